//! Typed values of individual status and configuration fields.
//!
//! Enumerations with spare encodings keep unknown values in an `Other`
//! variant instead of failing, so a snapshot from newer firmware still
//! round-trips.

use std::fmt;

use crate::core::PacketError;

/// Operating mode (3-bit field).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Automatic heat/cool.
    Auto,
    /// Cooling.
    Cool,
    /// Dehumidify.
    Dry,
    /// Fan only.
    Fan,
    /// Heating.
    Heat,
    /// Undocumented mode value 5..=7.
    Other(u8),
}

impl Mode {
    const AUTO: u8 = 0;
    const COOL: u8 = 1;
    const DRY: u8 = 2;
    const FAN: u8 = 3;
    const HEAT: u8 = 4;

    /// Decode from the raw 3-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            Self::AUTO => Mode::Auto,
            Self::COOL => Mode::Cool,
            Self::DRY => Mode::Dry,
            Self::FAN => Mode::Fan,
            Self::HEAT => Mode::Heat,
            other => Mode::Other(other),
        }
    }

    /// Raw 3-bit value.
    pub fn raw(self) -> u8 {
        match self {
            Mode::Auto => Self::AUTO,
            Mode::Cool => Self::COOL,
            Mode::Dry => Self::DRY,
            Mode::Fan => Self::FAN,
            Mode::Heat => Self::HEAT,
            Mode::Other(raw) => raw & 0x07,
        }
    }
}

/// Setpoint units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TempUnits {
    /// Degrees Celsius, half-degree resolution.
    Celsius,
    /// Whole degrees Fahrenheit.
    Fahrenheit,
}

/// What the indoor unit's display shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TempDisplay {
    /// Nothing selected.
    #[default]
    None,
    /// The setpoint.
    Setpoint,
    /// Indoor temperature.
    Indoor,
    /// Outdoor temperature.
    Outdoor,
}

impl TempDisplay {
    /// Decode from the raw 2-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => TempDisplay::None,
            1 => TempDisplay::Setpoint,
            2 => TempDisplay::Indoor,
            _ => TempDisplay::Outdoor,
        }
    }

    /// Raw 2-bit value.
    pub fn raw(self) -> u8 {
        match self {
            TempDisplay::None => 0,
            TempDisplay::Setpoint => 1,
            TempDisplay::Indoor => 2,
            TempDisplay::Outdoor => 3,
        }
    }
}

/// Fresh-air valve position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValveState {
    /// Closed.
    #[default]
    None,
    /// Drawing outside air in.
    Intake,
    /// Exhausting indoor air.
    Exhaust,
    /// Reserved encoding 3.
    Other,
}

impl ValveState {
    /// Decode from the raw 2-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => ValveState::None,
            1 => ValveState::Intake,
            2 => ValveState::Exhaust,
            _ => ValveState::Other,
        }
    }

    /// Raw 2-bit value.
    pub fn raw(self) -> u8 {
        match self {
            ValveState::None => 0,
            ValveState::Intake => 1,
            ValveState::Exhaust => 2,
            ValveState::Other => 3,
        }
    }
}

/// Humidifier program (3-bit field).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Humidify {
    /// Off.
    #[default]
    Off,
    /// Run continuously.
    Continuous,
    /// Unit-controlled.
    Intelligent,
    /// Target 40 %.
    Level40,
    /// Target 50 %.
    Level50,
    /// Target 60 %.
    Level60,
    /// Target 70 %.
    Level70,
    /// Undocumented value.
    Other(u8),
}

impl Humidify {
    /// Decode from the raw 3-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            0 => Humidify::Off,
            1 => Humidify::Continuous,
            2 => Humidify::Intelligent,
            3 => Humidify::Level40,
            4 => Humidify::Level50,
            5 => Humidify::Level60,
            6 => Humidify::Level70,
            other => Humidify::Other(other),
        }
    }

    /// Raw 3-bit value.
    pub fn raw(self) -> u8 {
        match self {
            Humidify::Off => 0,
            Humidify::Continuous => 1,
            Humidify::Intelligent => 2,
            Humidify::Level40 => 3,
            Humidify::Level50 => 4,
            Humidify::Level60 => 5,
            Humidify::Level70 => 6,
            Humidify::Other(raw) => raw & 0x07,
        }
    }
}

/// Sleep curve program.
///
/// On the wire the curve is split across two bits in different bytes, with
/// a separate flag for siesta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SleepCurve {
    /// No sleep curve.
    #[default]
    Off,
    /// Preset "expert" curve.
    Expert,
    /// Preset "traditional" curve.
    Traditional,
    /// User-defined curve (see [`SleepProfile::custom`]).
    Custom,
    /// Siesta program.
    Siesta,
}

impl SleepCurve {
    pub(crate) fn from_bits(high: bool, low: bool, siesta: bool) -> Self {
        if siesta {
            return SleepCurve::Siesta;
        }
        match (high, low) {
            (false, false) => SleepCurve::Off,
            (false, true) => SleepCurve::Expert,
            (true, false) => SleepCurve::Traditional,
            (true, true) => SleepCurve::Custom,
        }
    }

    /// `(high bit, low bit, siesta flag)`.
    pub(crate) fn bits(self) -> (bool, bool, bool) {
        match self {
            SleepCurve::Off => (false, false, false),
            SleepCurve::Expert => (false, true, false),
            SleepCurve::Traditional => (true, false, false),
            SleepCurve::Custom => (true, true, false),
            SleepCurve::Siesta => (false, false, true),
        }
    }
}

/// Vertical louver position (4-bit field).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VerticalAir {
    /// Not set.
    #[default]
    Unset,
    /// Swinging.
    Swing,
    /// Top.
    Up,
    /// Between top and center.
    CenterUp,
    /// Center.
    Center,
    /// Between center and bottom.
    CenterDown,
    /// Bottom.
    Down,
    /// Undocumented value.
    Other(u8),
}

impl VerticalAir {
    /// Decode from the raw 4-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x0F {
            0 => VerticalAir::Unset,
            1 => VerticalAir::Swing,
            2 => VerticalAir::Up,
            3 => VerticalAir::CenterUp,
            4 => VerticalAir::Center,
            5 => VerticalAir::CenterDown,
            6 => VerticalAir::Down,
            other => VerticalAir::Other(other),
        }
    }

    /// Raw 4-bit value.
    pub fn raw(self) -> u8 {
        match self {
            VerticalAir::Unset => 0,
            VerticalAir::Swing => 1,
            VerticalAir::Up => 2,
            VerticalAir::CenterUp => 3,
            VerticalAir::Center => 4,
            VerticalAir::CenterDown => 5,
            VerticalAir::Down => 6,
            VerticalAir::Other(raw) => raw & 0x0F,
        }
    }
}

/// Horizontal louver position (4-bit field).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HorizontalAir {
    /// Not set.
    #[default]
    Unset,
    /// Swinging.
    Swing,
    /// Far left.
    Left,
    /// Between left and center.
    CenterLeft,
    /// Center.
    Center,
    /// Between center and right.
    CenterRight,
    /// Far right.
    Right,
    /// Undocumented value.
    Other(u8),
}

impl HorizontalAir {
    /// Decode from the raw 4-bit value.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x0F {
            0 => HorizontalAir::Unset,
            1 => HorizontalAir::Swing,
            2 => HorizontalAir::Left,
            3 => HorizontalAir::CenterLeft,
            4 => HorizontalAir::Center,
            5 => HorizontalAir::CenterRight,
            6 => HorizontalAir::Right,
            other => HorizontalAir::Other(other),
        }
    }

    /// Raw 4-bit value.
    pub fn raw(self) -> u8 {
        match self {
            HorizontalAir::Unset => 0,
            HorizontalAir::Swing => 1,
            HorizontalAir::Left => 2,
            HorizontalAir::CenterLeft => 3,
            HorizontalAir::Center => 4,
            HorizontalAir::CenterRight => 5,
            HorizontalAir::Right => 6,
            HorizontalAir::Other(raw) => raw & 0x0F,
        }
    }
}

/// Unified fan setting, as offered by the remote and the app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FanSetting {
    /// Unit picks the speed.
    Auto,
    /// Fixed speed 1..=5.
    Level(u8),
    /// Maximum boost.
    Turbo,
    /// Quiet.
    Quiet,
    /// Auto with quiet limit.
    AutoQuiet,
}

/// Raw fan bits: speed, turbo and quiet are commanded separately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FanControl {
    /// Speed 0 (auto) ..= 5.
    pub speed: u8,
    /// Turbo flag.
    pub turbo: bool,
    /// Quiet type: 0 off, 1 auto quiet, 2 quiet.
    pub quiet: u8,
}

impl FanControl {
    const QUIET_AUTO: u8 = 1;
    const QUIET_ON: u8 = 2;

    /// Raw bits for a unified setting.
    pub fn from_setting(setting: FanSetting) -> Result<Self, PacketError> {
        let mut fan = FanControl::default();
        match setting {
            FanSetting::Auto => {}
            FanSetting::Level(level @ 1..=5) => fan.speed = level,
            FanSetting::Level(level) => {
                return Err(PacketError::OutOfRange {
                    field: "fan level",
                    value: level as u32,
                })
            }
            FanSetting::Turbo => fan.turbo = true,
            FanSetting::Quiet => fan.quiet = Self::QUIET_ON,
            FanSetting::AutoQuiet => fan.quiet = Self::QUIET_AUTO,
        }
        Ok(fan)
    }

    /// Unified view of the raw bits. Turbo wins over quiet, quiet over speed.
    pub fn setting(&self) -> FanSetting {
        if self.turbo {
            FanSetting::Turbo
        } else if self.quiet == Self::QUIET_AUTO {
            FanSetting::AutoQuiet
        } else if self.quiet == Self::QUIET_ON {
            FanSetting::Quiet
        } else if self.speed == 0 {
            FanSetting::Auto
        } else {
            FanSetting::Level(self.speed)
        }
    }

    /// Reject combinations the appliance never reports.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.quiet > Self::QUIET_ON {
            return Err(PacketError::OutOfRange {
                field: "quiet type",
                value: self.quiet as u32,
            });
        }
        if self.speed > 5 && !self.turbo && self.quiet == 0 {
            return Err(PacketError::OutOfRange {
                field: "fan speed",
                value: self.speed as u32,
            });
        }
        Ok(())
    }

    /// Speed on the legacy three-level scale.
    pub(crate) fn low_res_speed(&self) -> u8 {
        (self.speed.min(5) + 1) >> 1
    }
}

/// Indoor temperature setpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Setpoint {
    /// Celsius, 16..=30 with an optional half degree.
    Celsius {
        /// Whole degrees.
        degrees: u8,
        /// Add 0.5 °C.
        half: bool,
    },
    /// Fahrenheit, 61..=86.
    Fahrenheit(u8),
}

/// Wire representation of a setpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SetpointCode {
    pub code: u8,
    pub fahrenheit_fraction: bool,
    pub celsius_half: bool,
}

const CELSIUS_MIN: u8 = 16;
const CELSIUS_MAX: u8 = 30;
const FAHRENHEIT_MIN: u8 = 61;
const FAHRENHEIT_MAX: u8 = 86;
const FAHRENHEIT_FRACTION: [u8; 11] = [63, 65, 67, 70, 72, 74, 76, 79, 81, 83, 85];

impl Setpoint {
    /// Whole degrees Celsius.
    pub fn celsius(degrees: u8) -> Self {
        Setpoint::Celsius {
            degrees,
            half: false,
        }
    }

    /// Degrees Celsius plus one half.
    pub fn celsius_and_half(degrees: u8) -> Self {
        Setpoint::Celsius {
            degrees,
            half: true,
        }
    }

    /// Whole degrees Fahrenheit.
    pub fn fahrenheit(degrees: u8) -> Self {
        Setpoint::Fahrenheit(degrees)
    }

    /// Units of this setpoint.
    pub fn units(&self) -> TempUnits {
        match self {
            Setpoint::Celsius { .. } => TempUnits::Celsius,
            Setpoint::Fahrenheit(_) => TempUnits::Fahrenheit,
        }
    }

    /// Check the setpoint is within what the appliance accepts.
    pub fn validate(&self) -> Result<(), PacketError> {
        match *self {
            Setpoint::Celsius { degrees, half } => {
                if !(CELSIUS_MIN..=CELSIUS_MAX).contains(&degrees) || (half && degrees == CELSIUS_MAX) {
                    return Err(PacketError::OutOfRange {
                        field: "setpoint (°C)",
                        value: degrees as u32,
                    });
                }
            }
            Setpoint::Fahrenheit(degrees) => {
                if !(FAHRENHEIT_MIN..=FAHRENHEIT_MAX).contains(&degrees) {
                    return Err(PacketError::OutOfRange {
                        field: "setpoint (°F)",
                        value: degrees as u32,
                    });
                }
            }
        }
        Ok(())
    }

    /// Wire encoding. Out-of-range values are clamped; call
    /// [`validate`](Self::validate) first to reject them instead.
    pub(crate) fn code(&self) -> SetpointCode {
        match *self {
            Setpoint::Celsius { degrees, half } => SetpointCode {
                code: degrees.clamp(CELSIUS_MIN, CELSIUS_MAX) - CELSIUS_MIN,
                fahrenheit_fraction: false,
                celsius_half: half,
            },
            Setpoint::Fahrenheit(degrees) => SetpointCode {
                code: fahrenheit_code(degrees),
                fahrenheit_fraction: FAHRENHEIT_FRACTION.contains(&degrees),
                celsius_half: false,
            },
        }
    }

    pub(crate) fn from_code(units: TempUnits, code: SetpointCode) -> Result<Self, PacketError> {
        match units {
            TempUnits::Celsius => {
                let degrees = code.code + CELSIUS_MIN;
                if degrees > CELSIUS_MAX {
                    return Err(PacketError::OutOfRange {
                        field: "setpoint code (°C)",
                        value: code.code as u32,
                    });
                }
                Ok(Setpoint::Celsius {
                    degrees,
                    half: code.celsius_half,
                })
            }
            TempUnits::Fahrenheit => Ok(Setpoint::Fahrenheit(fahrenheit_degrees(
                code.code,
                code.fahrenheit_fraction,
            ))),
        }
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setpoint::Celsius { degrees, half: false } => write!(f, "{degrees}°C"),
            Setpoint::Celsius { degrees, half: true } => write!(f, "{degrees}.5°C"),
            Setpoint::Fahrenheit(degrees) => write!(f, "{degrees}°F"),
        }
    }
}

/// Fahrenheit value of a 4-bit code plus fraction bit.
pub(crate) fn fahrenheit_degrees(code: u8, fraction: bool) -> u8 {
    if code == 0 {
        return FAHRENHEIT_MIN;
    }
    let degrees = (code as u16 + 16) * 9 / 5 + 32 + fraction as u16;
    degrees.min(FAHRENHEIT_MAX as u16) as u8
}

fn fahrenheit_code(degrees: u8) -> u8 {
    let celsius = (degrees as f32 - 32.0) * 5.0 / 9.0;
    // truncate toward zero, then clamp into the nibble
    ((celsius - 15.5) as i32).clamp(0, 14) as u8
}

/// Noise limit configured in the app, enforced by capping the fan speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoiseControl {
    /// Whether the limit is active.
    pub enabled: bool,
    /// Limit while cooling, in dB.
    pub cooling_db: u8,
    /// Limit while heating, in dB.
    pub heating_db: u8,
}

impl NoiseControl {
    /// Highest fan speed allowed in `mode`, if the limit applies.
    pub fn fan_cap(&self, mode: Mode) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        match mode {
            Mode::Heat => Some(fan_speed_for_noise(self.heating_db)),
            Mode::Cool => Some(fan_speed_for_noise(self.cooling_db)),
            _ => None,
        }
    }
}

fn fan_speed_for_noise(db: u8) -> u8 {
    match db {
        38.. => 5,
        36..=37 => 4,
        33..=35 => 3,
        31..=32 => 2,
        29..=30 => 1,
        _ => 0,
    }
}

/// Countdown timers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timers {
    /// Global timer enable.
    pub enabled: bool,
    /// On-timer counting.
    pub on_enabled: bool,
    /// Off-timer counting.
    pub off_enabled: bool,
    /// Minutes until power on (11 bits).
    pub minutes_until_on: u16,
    /// Minutes until power off (11 bits).
    pub minutes_until_off: u16,
    /// Set by the remote when it programs the timers.
    pub remote_flag: bool,
}

impl Timers {
    fn validate(&self) -> Result<(), PacketError> {
        check_max("minutes until on", self.minutes_until_on as u32, 0x7FF)?;
        check_max("minutes until off", self.minutes_until_off as u32, 0x7FF)
    }
}

/// Clock-based schedule. Times are minutes since midnight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schedule {
    /// Appliance clock.
    pub clock: u16,
    /// Day of week (0..=7).
    pub day_of_week: u8,
    /// Scheduled power-on time.
    pub on_time: u16,
    /// Scheduled power-off time.
    pub off_time: u16,
    /// On event uses the clock instead of the countdown (2 bits).
    pub on_use_clock: u8,
    /// Off event uses the clock instead of the countdown (2 bits).
    pub off_use_clock: u8,
    /// Days the on event fires (Mon = 0x02 .. Sun = 0x80).
    pub on_days: u8,
    /// Days the off event fires.
    pub off_days: u8,
}

impl Schedule {
    fn validate(&self) -> Result<(), PacketError> {
        check_max("clock", self.clock as u32, 0x7FFF)?;
        check_max("day of week", self.day_of_week as u32, 7)?;
        check_max("on time", self.on_time as u32, 0x7FF)?;
        check_max("off time", self.off_time as u32, 0x7FF)?;
        check_max("on use clock", self.on_use_clock as u32, 3)?;
        check_max("off use clock", self.off_use_clock as u32, 3)
    }
}

/// Sleep curve selection and its custom points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SleepProfile {
    /// Active curve.
    pub curve: SleepCurve,
    /// Custom curve points as raw 4-bit setpoint codes.
    pub custom: [u8; 8],
    /// Clock used by the curve.
    pub clock: u16,
    /// Appliance reports the curve clock as invalid (status only).
    pub clock_invalid: bool,
}

impl SleepProfile {
    /// Custom curve points in whole degrees of `units`.
    pub fn custom_degrees(&self, units: TempUnits) -> [u8; 8] {
        self.custom.map(|code| match units {
            TempUnits::Celsius => (code + CELSIUS_MIN).min(CELSIUS_MAX),
            TempUnits::Fahrenheit => fahrenheit_degrees(code, false),
        })
    }

    fn validate(&self) -> Result<(), PacketError> {
        for code in self.custom {
            check_max("custom sleep point", code as u32, 0x0F)?;
        }
        check_max("sleep curve clock", self.clock as u32, 0x7FFF)
    }
}

/// Regional swing limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionalSwing {
    /// Avoid blowing at occupants.
    pub avoid_people: bool,
    /// Swing position 0..=256.
    pub position: u16,
}

impl RegionalSwing {
    pub(crate) const POSITION_OVERFLOW: u16 = 256;

    fn validate(&self) -> Result<(), PacketError> {
        check_max("swing position", self.position as u32, Self::POSITION_OVERFLOW as u32)
    }
}

pub(crate) fn check_max(field: &'static str, value: u32, max: u32) -> Result<(), PacketError> {
    if value > max {
        return Err(PacketError::OutOfRange { field, value });
    }
    Ok(())
}

/// Range checks shared by the status and configuration codecs.
pub(crate) fn validate_common(
    setpoint: &Setpoint,
    fan: &FanControl,
    timers: &Timers,
    schedule: &Schedule,
    sleep: &SleepProfile,
    swing: &RegionalSwing,
) -> Result<(), PacketError> {
    setpoint.validate()?;
    fan.validate()?;
    timers.validate()?;
    schedule.validate()?;
    sleep.validate()?;
    swing.validate()
}
