//! Full state snapshot reported by the appliance.

use std::collections::BTreeMap;

use super::fields::{
    validate_common, FanControl, FanSetting, HorizontalAir, Humidify, Mode, NoiseControl,
    RegionalSwing, Schedule, Setpoint, SetpointCode, SleepCurve, SleepProfile, TempDisplay,
    TempUnits, Timers, ValveState, VerticalAir,
};
use super::{bit, bits, flag, CommandCodes, WirePacket};
use crate::core::{PacketError, STATUS_PAYLOAD_SIZE};

/// Bits of a status payload that no typed field reproduces.
///
/// Stored as the XOR difference between the received payload and the
/// re-encoding of the decoded fields, so applying it to that re-encoding
/// restores the payload exactly. Also remembers the received length so
/// trailing bytes beyond the known layout survive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpaqueFields {
    residue: BTreeMap<usize, u8>,
    len: usize,
}

impl OpaqueFields {
    pub(crate) fn from_residue(received: &[u8], known: &[u8]) -> Self {
        let residue = received
            .iter()
            .enumerate()
            .filter_map(|(pos, &byte)| {
                let diff = byte ^ known.get(pos).copied().unwrap_or(0);
                (diff != 0).then_some((pos, diff))
            })
            .collect();
        Self {
            residue,
            len: received.len(),
        }
    }

    pub(crate) fn apply(&self, out: &mut Vec<u8>) {
        if self.len > out.len() {
            out.resize(self.len, 0);
        }
        for (&pos, &diff) in &self.residue {
            if let Some(byte) = out.get_mut(pos) {
                *byte ^= diff;
            }
        }
    }

    /// Opaque bits at payload offset `pos` (zero when none).
    pub fn get(&self, pos: usize) -> u8 {
        self.residue.get(&pos).copied().unwrap_or(0)
    }

    /// Whether every received bit is covered by a typed field.
    pub fn is_empty(&self) -> bool {
        self.residue.is_empty()
    }

    /// Payload offsets carrying opaque bits.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.residue.keys().copied()
    }

    /// Length of the payload these fields were taken from.
    pub fn payload_len(&self) -> usize {
        self.len
    }
}

/// Decoded status packet.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusSnapshot {
    /// Command code the snapshot arrived with.
    pub command: u8,
    /// Unit is running.
    pub power: bool,
    /// Operating mode.
    pub mode: Mode,
    /// Temperature setpoint, in the unit's display units.
    pub setpoint: Setpoint,
    /// Fan bits.
    pub fan: FanControl,
    /// Display light.
    pub light: bool,
    /// Air purifier.
    pub purify: bool,
    /// Coil drying after shutdown (cool and dry) or heat boost (heat).
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
    /// Electric heat assist.
    pub heat_assist: bool,
    /// Countdown timers.
    pub timers: Timers,
    /// Sleep curve.
    pub sleep: SleepProfile,
    /// Last remote sensor reading in °C.
    pub remote_temperature: u8,
    /// Clock schedule.
    pub schedule: Schedule,
    /// Regional swing.
    pub swing: RegionalSwing,
    /// Noise limit.
    pub noise: NoiseControl,
    /// Eco mode.
    pub eco: bool,
    /// Everything else.
    pub opaque: OpaqueFields,
}

impl StatusSnapshot {
    /// Decode a status payload. Payloads longer than the known layout are
    /// accepted and the extra bytes kept in [`opaque`](Self::opaque).
    pub fn decode(command: u8, p: &[u8]) -> Result<Self, PacketError> {
        if p.len() < STATUS_PAYLOAD_SIZE {
            return Err(PacketError::TooShort {
                kind: Self::KIND,
                expected: STATUS_PAYLOAD_SIZE,
                actual: p.len(),
            });
        }

        let units = if bit(p[7], 7) {
            TempUnits::Fahrenheit
        } else {
            TempUnits::Celsius
        };
        let setpoint = Setpoint::from_code(
            units,
            SetpointCode {
                code: bits(p[5], 4, 4),
                fahrenheit_fraction: bit(p[7], 6),
                celsius_half: bit(p[10], 3),
            },
        )?;

        let fan = FanControl {
            speed: bits(p[18], 0, 3),
            turbo: bit(p[6], 0),
            quiet: bits(p[16], 2, 2),
        };
        fan.validate()?;

        let swing_position = if bit(p[35], 1) {
            RegionalSwing::POSITION_OVERFLOW
        } else {
            p[36] as u16
        };

        let mut snapshot = Self {
            command,
            power: bit(p[4], 7),
            mode: Mode::from_raw(bits(p[4], 4, 3)),
            setpoint,
            fan,
            light: bit(p[6], 1),
            purify: bit(p[6], 2),
            x_fan: bit(p[6], 3),
            valve: ValveState::from_raw(bits(p[7], 4, 2)),
            vertical_air: VerticalAir::from_raw(bits(p[8], 4, 4)),
            horizontal_air: HorizontalAir::from_raw(bits(p[8], 0, 4)),
            temp_display: TempDisplay::from_raw(bits(p[9], 4, 2)),
            remote_sensor: bit(p[9], 6),
            humidify: Humidify::from_raw(bits(p[10], 4, 3)),
            heat_assist: bit(p[11], 7),
            timers: Timers {
                enabled: bit(p[5], 3),
                on_enabled: bit(p[15], 5),
                off_enabled: bit(p[15], 4),
                minutes_until_on: p[12] as u16 | ((p[13] as u16 & 0x70) << 4),
                minutes_until_off: ((p[14] as u16 & 0x7F) << 4) | (p[13] as u16 & 0x0F),
                remote_flag: bit(p[13], 7),
            },
            sleep: SleepProfile {
                curve: SleepCurve::from_bits(bit(p[4], 3), bit(p[16], 4), bit(p[16], 7)),
                custom: [
                    bits(p[17], 4, 4),
                    bits(p[17], 0, 4),
                    bits(p[20], 4, 4),
                    bits(p[20], 0, 4),
                    bits(p[21], 4, 4),
                    bits(p[21], 0, 4),
                    bits(p[22], 4, 4),
                    bits(p[22], 0, 4),
                ],
                clock: ((p[27] as u16 & 0x7F) << 8) | p[28] as u16,
                clock_invalid: bit(p[27], 7),
            },
            remote_temperature: p[24],
            schedule: Schedule {
                clock: ((p[25] as u16 & 0x7F) << 8) | p[26] as u16,
                day_of_week: bits(p[31], 5, 3),
                on_time: ((p[31] as u16 & 0x07) << 8) | p[32] as u16,
                off_time: ((p[29] as u16 & 0x07) << 8) | p[30] as u16,
                on_use_clock: bits(p[29], 6, 2),
                off_use_clock: bits(p[29], 4, 2),
                on_days: p[33],
                off_days: p[34],
            },
            swing: RegionalSwing {
                avoid_people: bit(p[35], 2),
                position: swing_position,
            },
            noise: NoiseControl {
                enabled: bit(p[38], 0),
                cooling_db: p[43],
                heating_db: p[44],
            },
            eco: bit(p[45], 0),
            opaque: OpaqueFields::default(),
        };

        snapshot.opaque = OpaqueFields::from_residue(p, &snapshot.encode_known());
        Ok(snapshot)
    }

    /// Encode back to a payload. A decoded, unmodified snapshot encodes to
    /// exactly the bytes it was decoded from.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        self.validate()?;
        let mut out = self.encode_known();
        self.opaque.apply(&mut out);
        Ok(out)
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

    /// The undocumented flag at bit 2 of the mode byte, carried through to
    /// configuration updates unchanged.
    pub fn mode_flag_bit2(&self) -> bool {
        bit(self.opaque.get(4), 2)
    }

    /// Setpoint units in use.
    pub fn units(&self) -> TempUnits {
        self.setpoint.units()
    }

    /// Fan bits folded into a single setting.
    pub fn fan_setting(&self) -> FanSetting {
        self.fan.setting()
    }

    fn encode_known(&self) -> Vec<u8> {
        let mut p = vec![0u8; STATUS_PAYLOAD_SIZE];
        let code = self.setpoint.code();
        let (sleep_high, sleep_low, siesta) = self.sleep.curve.bits();
        let timers = &self.timers;
        let schedule = &self.schedule;
        let custom = &self.sleep.custom;
        let on = timers.minutes_until_on & 0x7FF;
        let off = timers.minutes_until_off & 0x7FF;

        p[4] = flag(self.power, 7) | (self.mode.raw() << 4) | flag(sleep_high, 3);
        p[5] = (code.code << 4) | flag(timers.enabled, 3);
        p[6] = flag(self.fan.turbo, 0)
            | flag(self.light, 1)
            | flag(self.purify, 2)
            | flag(self.x_fan, 3);
        p[7] = flag(code.fahrenheit_fraction, 6)
            | flag(self.units() == TempUnits::Fahrenheit, 7)
            | (self.valve.raw() << 4);
        p[8] = (self.vertical_air.raw() << 4) | self.horizontal_air.raw();
        p[9] = (self.temp_display.raw() << 4) | flag(self.remote_sensor, 6);
        p[10] = flag(code.celsius_half, 3) | (self.humidify.raw() << 4);
        p[11] = flag(self.heat_assist, 7);
        p[12] = on as u8;
        p[13] = ((on >> 4) as u8 & 0x70) | (off as u8 & 0x0F) | flag(timers.remote_flag, 7);
        p[14] = (off >> 4) as u8 & 0x7F;
        p[15] = flag(timers.on_enabled, 5) | flag(timers.off_enabled, 4);
        p[16] = flag(siesta, 7) | flag(sleep_low, 4) | ((self.fan.quiet & 0x03) << 2);
        p[17] = nibbles(custom[0], custom[1]);
        p[18] = self.fan.speed & 0x07;
        p[20] = nibbles(custom[2], custom[3]);
        p[21] = nibbles(custom[4], custom[5]);
        p[22] = nibbles(custom[6], custom[7]);
        p[24] = self.remote_temperature;
        p[25] = (schedule.clock >> 8) as u8 & 0x7F;
        p[26] = schedule.clock as u8;
        p[27] = flag(self.sleep.clock_invalid, 7) | ((self.sleep.clock >> 8) as u8 & 0x7F);
        p[28] = self.sleep.clock as u8;
        p[29] = ((schedule.on_use_clock & 0x03) << 6)
            | ((schedule.off_use_clock & 0x03) << 4)
            | ((schedule.off_time >> 8) as u8 & 0x07);
        p[30] = schedule.off_time as u8;
        p[31] = ((schedule.day_of_week & 0x07) << 5) | ((schedule.on_time >> 8) as u8 & 0x07);
        p[32] = schedule.on_time as u8;
        p[33] = schedule.on_days;
        p[34] = schedule.off_days;
        let overflow = self.swing.position >= RegionalSwing::POSITION_OVERFLOW;
        p[35] = flag(self.swing.avoid_people, 2) | flag(overflow, 1);
        p[36] = if overflow { 0 } else { self.swing.position as u8 };
        p[38] = flag(self.noise.enabled, 0);
        p[43] = self.noise.cooling_db;
        p[44] = self.noise.heating_db;
        p[45] = flag(self.eco, 0);
        p
    }
}

pub(crate) fn nibbles(high: u8, low: u8) -> u8 {
    ((high & 0x0F) << 4) | (low & 0x0F)
}

impl WirePacket for StatusSnapshot {
    const KIND: &'static str = "status";

    fn command(&self, _codes: &CommandCodes) -> u8 {
        self.command
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PacketError> {
        self.encode()
    }

    fn decode_payload(command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        Self::decode(command, payload)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::CMD_STATUS;

    /// Status of a unit that is powered off, cooling at 26 °C, fan auto.
    pub(crate) fn idle_payload() -> Vec<u8> {
        let mut p = vec![0u8; STATUS_PAYLOAD_SIZE];
        p[4] = 0x10; // cool
        p[5] = 10 << 4; // 26 °C
        p[6] = 0x02; // light
        p[8] = 0x44; // centered louvers
        p[9] = 0x10; // show setpoint
        p[43] = 36;
        p[44] = 38;
        p
    }

    #[test]
    fn test_decode_fields() {
        let mut p = idle_payload();
        p[4] |= 0x80;
        p[18] = 3;
        p[12] = 0x34;
        p[13] = 0x25 | 0x80;
        p[14] = 0x12;
        p[35] = 0x02;

        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        assert!(status.power);
        assert_eq!(status.mode, Mode::Cool);
        assert_eq!(status.setpoint, Setpoint::celsius(26));
        assert_eq!(status.fan.speed, 3);
        assert!(status.light);
        assert_eq!(status.vertical_air, VerticalAir::Center);
        assert_eq!(status.temp_display, TempDisplay::Setpoint);
        assert_eq!(status.timers.minutes_until_on, 0x234);
        assert_eq!(status.timers.minutes_until_off, 0x125);
        assert!(status.timers.remote_flag);
        assert_eq!(status.swing.position, 256);
        assert_eq!(status.noise.cooling_db, 36);
        assert!(status.opaque.is_empty());
    }

    #[test]
    fn test_encode_is_byte_exact() {
        let mut p = idle_payload();
        // undocumented bits in reserved bytes and inside known bytes
        p[4] |= 0x07;
        p[19] = 0xEE;
        p[23] = 0x01;
        p[37] = 0x5A;
        p[11] |= 0x3C;
        p[39] = 0xFF;
        p.extend_from_slice(&[0x00, 0x09, 0x00]);

        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        assert!(status.mode_flag_bit2());
        assert!(!status.opaque.is_empty());
        assert_eq!(status.opaque.payload_len(), p.len());
        assert_eq!(status.encode().unwrap(), p);
    }

    #[test]
    fn test_trailing_zero_bytes_survive() {
        let mut p = idle_payload();
        p.extend_from_slice(&[0, 0, 0, 0]);
        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        assert_eq!(status.encode().unwrap().len(), p.len());
    }

    #[test]
    fn test_fahrenheit_decode() {
        let mut p = idle_payload();
        p[5] = 6 << 4;
        p[7] = 0x80 | 0x40;
        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        assert_eq!(status.setpoint, Setpoint::fahrenheit(72));
        assert_eq!(status.encode().unwrap(), p);
    }

    #[test]
    fn test_modified_snapshot_encodes_change() {
        let p = idle_payload();
        let mut status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        status.power = true;
        status.setpoint = Setpoint::celsius(24);

        let encoded = status.encode().unwrap();
        let again = StatusSnapshot::decode(CMD_STATUS, &encoded).unwrap();
        assert!(again.power);
        assert_eq!(again.setpoint, Setpoint::celsius(24));
        assert_eq!(again.fan, status.fan);
    }

    #[test]
    fn test_short_payload_rejected() {
        let result = StatusSnapshot::decode(CMD_STATUS, &[0u8; 45]);
        assert_eq!(
            result,
            Err(PacketError::TooShort {
                kind: "status",
                expected: 46,
                actual: 45
            })
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut celsius_15 = idle_payload();
        celsius_15[5] = 0xF0;
        assert!(matches!(
            StatusSnapshot::decode(CMD_STATUS, &celsius_15),
            Err(PacketError::OutOfRange { .. })
        ));

        let mut quiet_3 = idle_payload();
        quiet_3[16] = 0x0C;
        assert!(StatusSnapshot::decode(CMD_STATUS, &quiet_3).is_err());

        let mut fast = idle_payload();
        fast[18] = 7;
        assert!(StatusSnapshot::decode(CMD_STATUS, &fast).is_err());
    }

    #[test]
    fn test_siesta_decode() {
        let mut p = idle_payload();
        p[16] = 0x80;
        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();
        assert_eq!(status.sleep.curve, SleepCurve::Siesta);
        assert_eq!(status.encode().unwrap(), p);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_keeps_opaque_bits() {
        let mut p = idle_payload();
        p[2] = 0x5A;
        p.push(0x99);
        let status = StatusSnapshot::decode(CMD_STATUS, &p).unwrap();

        let json = serde_json::to_string(&status).unwrap();
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
        assert_eq!(back.encode().unwrap(), p);
    }
}
