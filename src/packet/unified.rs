//! Unified configuration packet: every writable field in one message.
//!
//! The appliance applies the whole packet, so a partial change is made by
//! starting from the last status snapshot, overlaying the caller's changes
//! with [`UnifiedConfig::merge`] and sending the result.

use super::fields::{
    validate_common, FanControl, FanSetting, HorizontalAir, Humidify, Mode, NoiseControl,
    RegionalSwing, Schedule, Setpoint, SetpointCode, SleepCurve, SleepProfile, TempDisplay,
    TempUnits, Timers, ValveState, VerticalAir,
};
use super::status::{nibbles, StatusSnapshot};
use super::{bit, bits, flag, CommandCodes, WirePacket};
use crate::core::{PacketError, CONFIG_PAYLOAD_SIZE};

/// Update mask every configuration packet carries in its first byte.
const UPDATE_MASK: u8 = 0xAD;
const UPDATE_TIMERS: u8 = 0x02;
const UPDATE_REMOTE_SENSOR: u8 = 0x40;
/// Constant bit in the units byte.
const UNITS_MARKER: u8 = 0x02;

/// Complete writable state of the appliance.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnifiedConfig {
    /// Apply the timer fields; otherwise the appliance ignores them.
    pub update_timers: bool,
    /// Run the unit.
    pub power: bool,
    /// Operating mode.
    pub mode: Mode,
    /// Setpoint; its units select the display units.
    pub setpoint: Setpoint,
    /// Fan bits.
    pub fan: FanControl,
    /// Display light.
    pub light: bool,
    /// Air purifier.
    pub purify: bool,
    /// X-fan. Only sent in cool, dry and heat.
    pub x_fan: bool,
    /// Fresh-air valve.
    pub valve: ValveState,
    /// Vertical louver.
    pub vertical_air: VerticalAir,
    /// Horizontal louver.
    pub horizontal_air: HorizontalAir,
    /// Display selection.
    pub temp_display: TempDisplay,
    /// Use the remote's temperature sensor.
    pub remote_sensor: bool,
    /// Humidifier program.
    pub humidify: Humidify,
    /// Heat assist. Only sent in heat.
    pub heat_assist: bool,
    /// Countdown timers.
    pub timers: Timers,
    /// Sleep curve. `clock_invalid` is not transmitted.
    pub sleep: SleepProfile,
    /// Remote sensor reading in °C.
    pub remote_temperature: u8,
    /// Clock schedule.
    pub schedule: Schedule,
    /// Regional swing.
    pub swing: RegionalSwing,
    /// Undocumented mode-byte flag, echoed from the status.
    pub mode_flag_bit2: bool,
}

impl UnifiedConfig {
    /// Configuration reproducing the state in `status`.
    pub fn from_snapshot(status: &StatusSnapshot) -> Self {
        Self {
            update_timers: false,
            power: status.power,
            mode: status.mode,
            setpoint: status.setpoint,
            fan: status.fan,
            light: status.light,
            purify: status.purify,
            x_fan: status.x_fan,
            valve: status.valve,
            vertical_air: status.vertical_air,
            horizontal_air: status.horizontal_air,
            temp_display: status.temp_display,
            remote_sensor: status.remote_sensor,
            humidify: status.humidify,
            heat_assist: status.heat_assist,
            timers: status.timers,
            sleep: SleepProfile {
                clock_invalid: false,
                ..status.sleep
            },
            remote_temperature: status.remote_temperature,
            schedule: status.schedule,
            swing: status.swing,
            mode_flag_bit2: status.mode_flag_bit2(),
        }
    }

    /// Overlay `changes` on `baseline` and normalize the result the way the
    /// appliance's own controls would.
    pub fn merge(baseline: &StatusSnapshot, changes: &PrimaryChanges) -> Result<Self, PacketError> {
        let fan = changes.fan.map(FanControl::from_setting).transpose()?;
        let mut config = Self::from_snapshot(baseline);
        changes.apply(&mut config);
        config.normalize(fan, &baseline.noise);
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self, fan: Option<FanControl>, noise: &NoiseControl) {
        if !self.power {
            self.valve = ValveState::None;
            self.fan.quiet = 0;
            self.sleep.curve = SleepCurve::Off;
            self.humidify = Humidify::Off;
            self.purify = false;
        }
        if let Some(fan) = fan {
            self.fan = fan;
        }
        if let Some(cap) = noise.fan_cap(self.mode) {
            self.fan.speed = cap;
            self.fan.turbo = false;
        }
        if !matches!(self.mode, Mode::Cool | Mode::Dry | Mode::Heat) {
            self.x_fan = false;
        }
        if self.mode != Mode::Heat {
            self.heat_assist = false;
        }
    }

    /// Range-check every typed field.
    pub fn validate(&self) -> Result<(), PacketError> {
        validate_common(
            &self.setpoint,
            &self.fan,
            &self.timers,
            &self.schedule,
            &self.sleep,
            &self.swing,
        )
    }

    /// Encode the 35-byte payload.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        self.validate()?;

        let mut q = vec![0u8; CONFIG_PAYLOAD_SIZE];
        let code = self.setpoint.code();
        let (sleep_high, sleep_low, siesta) = self.sleep.curve.bits();
        let timers = &self.timers;
        let schedule = &self.schedule;
        let custom = &self.sleep.custom;
        let heat = self.mode == Mode::Heat;
        let x_fan_allowed = matches!(self.mode, Mode::Cool | Mode::Dry | Mode::Heat);

        q[0] = UPDATE_MASK
            | if self.update_timers { UPDATE_TIMERS } else { 0 }
            | if self.remote_sensor { UPDATE_REMOTE_SENSOR } else { 0 };
        q[1] = self.fan.low_res_speed()
            | flag(self.power, 7)
            | (self.mode.raw() << 4)
            | flag(sleep_high, 3)
            | flag(self.mode_flag_bit2, 2);
        q[2] = (code.code << 4) | flag(timers.enabled, 3);
        q[3] = flag(self.purify, 2)
            | flag(self.light, 1)
            | flag(self.fan.turbo, 0)
            | flag(self.x_fan && x_fan_allowed, 3);
        q[4] = flag(code.fahrenheit_fraction, 6)
            | flag(self.setpoint.units() == TempUnits::Fahrenheit, 7)
            | (self.valve.raw() << 4)
            | UNITS_MARKER;
        q[5] = (self.vertical_air.raw() << 4) | self.horizontal_air.raw();
        q[6] = (self.temp_display.raw() << 4) | flag(self.remote_sensor, 6);
        q[7] = flag(code.celsius_half, 3) | (self.humidify.raw() << 4);
        q[8] = flag(self.heat_assist && heat, 7);
        q[9] = timers.minutes_until_on as u8;
        q[10] = ((timers.minutes_until_on >> 4) as u8 & 0x70)
            | (timers.minutes_until_off as u8 & 0x0F)
            | flag(timers.remote_flag, 7);
        q[11] = (timers.minutes_until_off >> 4) as u8 & 0x7F;
        q[12] = flag(timers.on_enabled, 5) | flag(timers.off_enabled, 4);
        q[13] = (self.fan.quiet << 2) | if siesta { 0x80 } else { flag(sleep_low, 4) };
        q[14] = nibbles(custom[0], custom[1]);
        q[15] = self.fan.speed;
        q[17] = nibbles(custom[2], custom[3]);
        q[18] = nibbles(custom[4], custom[5]);
        q[19] = nibbles(custom[6], custom[7]);
        q[21] = self.remote_temperature;
        q[22] = (schedule.clock >> 8) as u8;
        q[23] = schedule.clock as u8;
        q[24] = (self.sleep.clock >> 8) as u8;
        q[25] = self.sleep.clock as u8;
        q[26] = (schedule.on_use_clock << 6)
            | (schedule.off_use_clock << 4)
            | (schedule.off_time >> 8) as u8;
        q[27] = schedule.off_time as u8;
        q[28] = (schedule.day_of_week << 5) | (schedule.on_time >> 8) as u8;
        q[29] = schedule.on_time as u8;
        q[30] = schedule.on_days;
        q[31] = schedule.off_days;
        let overflow = self.swing.position == RegionalSwing::POSITION_OVERFLOW;
        q[32] = flag(self.swing.avoid_people, 1) | flag(overflow, 0);
        q[33] = if overflow { 0 } else { self.swing.position as u8 };
        Ok(q)
    }

    /// Decode a configuration payload, as an appliance would.
    pub fn decode(q: &[u8]) -> Result<Self, PacketError> {
        if q.len() < CONFIG_PAYLOAD_SIZE {
            return Err(PacketError::TooShort {
                kind: Self::KIND,
                expected: CONFIG_PAYLOAD_SIZE,
                actual: q.len(),
            });
        }
        if q[0] & UPDATE_MASK != UPDATE_MASK {
            return Err(PacketError::Invalid(format!(
                "update mask 0x{:02x} is not a unified configuration",
                q[0]
            )));
        }

        let units = if bit(q[4], 7) {
            TempUnits::Fahrenheit
        } else {
            TempUnits::Celsius
        };
        let setpoint = Setpoint::from_code(
            units,
            SetpointCode {
                code: bits(q[2], 4, 4),
                fahrenheit_fraction: bit(q[4], 6),
                celsius_half: bit(q[7], 3),
            },
        )?;
        let siesta = bit(q[13], 7);

        let config = Self {
            update_timers: q[0] & UPDATE_TIMERS != 0,
            power: bit(q[1], 7),
            mode: Mode::from_raw(bits(q[1], 4, 3)),
            setpoint,
            fan: FanControl {
                speed: q[15],
                turbo: bit(q[3], 0),
                quiet: bits(q[13], 2, 2),
            },
            light: bit(q[3], 1),
            purify: bit(q[3], 2),
            x_fan: bit(q[3], 3),
            valve: ValveState::from_raw(bits(q[4], 4, 2)),
            vertical_air: VerticalAir::from_raw(bits(q[5], 4, 4)),
            horizontal_air: HorizontalAir::from_raw(bits(q[5], 0, 4)),
            temp_display: TempDisplay::from_raw(bits(q[6], 4, 2)),
            remote_sensor: bit(q[6], 6),
            humidify: Humidify::from_raw(bits(q[7], 4, 3)),
            heat_assist: bit(q[8], 7),
            timers: Timers {
                enabled: bit(q[2], 3),
                on_enabled: bit(q[12], 5),
                off_enabled: bit(q[12], 4),
                minutes_until_on: q[9] as u16 | ((q[10] as u16 & 0x70) << 4),
                minutes_until_off: ((q[11] as u16 & 0x7F) << 4) | (q[10] as u16 & 0x0F),
                remote_flag: bit(q[10], 7),
            },
            sleep: SleepProfile {
                curve: SleepCurve::from_bits(bit(q[1], 3), !siesta && bit(q[13], 4), siesta),
                custom: [
                    bits(q[14], 4, 4),
                    bits(q[14], 0, 4),
                    bits(q[17], 4, 4),
                    bits(q[17], 0, 4),
                    bits(q[18], 4, 4),
                    bits(q[18], 0, 4),
                    bits(q[19], 4, 4),
                    bits(q[19], 0, 4),
                ],
                clock: ((q[24] as u16) << 8) | q[25] as u16,
                clock_invalid: false,
            },
            remote_temperature: q[21],
            schedule: Schedule {
                clock: ((q[22] as u16) << 8) | q[23] as u16,
                day_of_week: bits(q[28], 5, 3),
                on_time: ((q[28] as u16 & 0x07) << 8) | q[29] as u16,
                off_time: ((q[26] as u16 & 0x07) << 8) | q[27] as u16,
                on_use_clock: bits(q[26], 6, 2),
                off_use_clock: bits(q[26], 4, 2),
                on_days: q[30],
                off_days: q[31],
            },
            swing: RegionalSwing {
                avoid_people: bit(q[32], 1),
                position: if bit(q[32], 0) {
                    RegionalSwing::POSITION_OVERFLOW
                } else {
                    q[33] as u16
                },
            },
            mode_flag_bit2: bit(q[1], 2),
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply this configuration to a snapshot, as the appliance does when it
    /// accepts the packet. Status-only fields are left alone.
    pub fn apply_to(&self, status: &mut StatusSnapshot) {
        status.power = self.power;
        status.mode = self.mode;
        status.setpoint = self.setpoint;
        status.fan = self.fan;
        status.light = self.light;
        status.purify = self.purify;
        status.x_fan = self.x_fan;
        status.valve = self.valve;
        status.vertical_air = self.vertical_air;
        status.horizontal_air = self.horizontal_air;
        status.temp_display = self.temp_display;
        status.remote_sensor = self.remote_sensor;
        status.humidify = self.humidify;
        status.heat_assist = self.heat_assist;
        if self.update_timers {
            status.timers = self.timers;
        }
        status.sleep = SleepProfile {
            clock_invalid: status.sleep.clock_invalid,
            ..self.sleep
        };
        status.remote_temperature = self.remote_temperature;
        status.schedule = self.schedule;
        status.swing = self.swing;
    }
}

impl WirePacket for UnifiedConfig {
    const KIND: &'static str = "unified configuration";

    fn command(&self, codes: &CommandCodes) -> u8 {
        codes.config
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PacketError> {
        self.encode()
    }

    fn decode_payload(_command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        Self::decode(payload)
    }
}

/// Partial update to the primary controls. Unset fields keep their current
/// value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryChanges {
    /// Run the unit.
    pub power: Option<bool>,
    /// Operating mode.
    pub mode: Option<Mode>,
    /// Setpoint.
    pub setpoint: Option<Setpoint>,
    /// Fan setting; replaces speed, turbo and quiet together.
    pub fan: Option<FanSetting>,
    /// Display light.
    pub light: Option<bool>,
    /// Air purifier.
    pub purify: Option<bool>,
    /// X-fan.
    pub x_fan: Option<bool>,
    /// Fresh-air valve.
    pub valve: Option<ValveState>,
    /// Vertical louver.
    pub vertical_air: Option<VerticalAir>,
    /// Horizontal louver.
    pub horizontal_air: Option<HorizontalAir>,
    /// Display selection.
    pub temp_display: Option<TempDisplay>,
    /// Use the remote's sensor.
    pub remote_sensor: Option<bool>,
    /// Humidifier program.
    pub humidify: Option<Humidify>,
    /// Heat assist.
    pub heat_assist: Option<bool>,
    /// Sleep curve.
    pub sleep_curve: Option<SleepCurve>,
    /// Countdown timers. Setting them also sets the timer update flag.
    pub timers: Option<Timers>,
    /// Clock schedule.
    pub schedule: Option<Schedule>,
    /// Regional swing.
    pub swing: Option<RegionalSwing>,
}

impl PrimaryChanges {
    /// No changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set power.
    pub fn power(mut self, on: bool) -> Self {
        self.power = Some(on);
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the setpoint.
    pub fn setpoint(mut self, setpoint: Setpoint) -> Self {
        self.setpoint = Some(setpoint);
        self
    }

    /// Set the fan.
    pub fn fan(mut self, fan: FanSetting) -> Self {
        self.fan = Some(fan);
        self
    }

    /// Set the display light.
    pub fn light(mut self, on: bool) -> Self {
        self.light = Some(on);
        self
    }

    /// Set the purifier.
    pub fn purify(mut self, on: bool) -> Self {
        self.purify = Some(on);
        self
    }

    /// Set x-fan.
    pub fn x_fan(mut self, on: bool) -> Self {
        self.x_fan = Some(on);
        self
    }

    /// Set the fresh-air valve.
    pub fn valve(mut self, valve: ValveState) -> Self {
        self.valve = Some(valve);
        self
    }

    /// Set both louvers.
    pub fn air_direction(mut self, vertical: VerticalAir, horizontal: HorizontalAir) -> Self {
        self.vertical_air = Some(vertical);
        self.horizontal_air = Some(horizontal);
        self
    }

    /// Set the display selection.
    pub fn temp_display(mut self, display: TempDisplay) -> Self {
        self.temp_display = Some(display);
        self
    }

    /// Use (or stop using) the remote's sensor.
    pub fn remote_sensor(mut self, on: bool) -> Self {
        self.remote_sensor = Some(on);
        self
    }

    /// Set the humidifier program.
    pub fn humidify(mut self, humidify: Humidify) -> Self {
        self.humidify = Some(humidify);
        self
    }

    /// Set heat assist.
    pub fn heat_assist(mut self, on: bool) -> Self {
        self.heat_assist = Some(on);
        self
    }

    /// Set the sleep curve.
    pub fn sleep_curve(mut self, curve: SleepCurve) -> Self {
        self.sleep_curve = Some(curve);
        self
    }

    /// Replace the countdown timers.
    pub fn timers(mut self, timers: Timers) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Replace the clock schedule.
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Set regional swing.
    pub fn swing(mut self, swing: RegionalSwing) -> Self {
        self.swing = Some(swing);
        self
    }

    fn apply(&self, config: &mut UnifiedConfig) {
        fn set<T: Copy>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(&mut config.power, self.power);
        set(&mut config.mode, self.mode);
        set(&mut config.setpoint, self.setpoint);
        set(&mut config.light, self.light);
        set(&mut config.purify, self.purify);
        set(&mut config.x_fan, self.x_fan);
        set(&mut config.valve, self.valve);
        set(&mut config.vertical_air, self.vertical_air);
        set(&mut config.horizontal_air, self.horizontal_air);
        set(&mut config.temp_display, self.temp_display);
        set(&mut config.remote_sensor, self.remote_sensor);
        set(&mut config.humidify, self.humidify);
        set(&mut config.heat_assist, self.heat_assist);
        set(&mut config.sleep.curve, self.sleep_curve);
        set(&mut config.schedule, self.schedule);
        set(&mut config.swing, self.swing);
        if let Some(timers) = self.timers {
            config.timers = timers;
            config.update_timers = true;
        }
    }
}
