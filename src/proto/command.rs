use std::fmt;

use super::response::StateKind;
use super::{ProtoError, Result};

/// Default `max_lines` of multiline descriptors built with
/// [`CommandDescriptor::listing`].
pub const MAX_REPLY_LINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    /// Integer or floating point literal.
    Number,
    Text,
    /// `0` or `1`.
    Flag,
}

/// What a command answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    Scalar(Scalar),
    State(StateKind),
    /// Lines up to (not including) `sentinel`, at most `max_lines` read in total.
    Multiline {
        sentinel: &'static str,
        max_lines: usize,
    },
    /// Anything that is not an error is success (usually `OK`).
    Ack,
}

/// Static description of one supported command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub wire_name: &'static str,
    pub reply: ReplyShape,
    pub arity: usize,
    pub summary: &'static str,
}

impl CommandDescriptor {
    pub const fn query(wire_name: &'static str, reply: ReplyShape, summary: &'static str) -> Self {
        Self {
            wire_name,
            reply,
            arity: 0,
            summary,
        }
    }

    pub const fn action(wire_name: &'static str, summary: &'static str) -> Self {
        Self {
            wire_name,
            reply: ReplyShape::Ack,
            arity: 0,
            summary,
        }
    }

    /// Query answered by several lines, ended by `sentinel`.
    pub const fn listing(
        wire_name: &'static str,
        sentinel: &'static str,
        summary: &'static str,
    ) -> Self {
        Self::query(
            wire_name,
            ReplyShape::Multiline {
                sentinel,
                max_lines: MAX_REPLY_LINES,
            },
            summary,
        )
    }

    pub const fn setter(wire_name: &'static str, summary: &'static str) -> Self {
        Self {
            wire_name,
            reply: ReplyShape::Ack,
            arity: 1,
            summary,
        }
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name)
    }
}

/// A command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u8> for Arg {
    fn from(value: u8) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl Arg {
    fn render(&self, command: &str) -> Result<String> {
        let invalid = |reason: String| ProtoError::InvalidArgument {
            command: command.to_string(),
            reason,
        };
        match self {
            Arg::Int(i) => Ok(i.to_string()),
            Arg::Float(f) if f.is_finite() => Ok(f.to_string()),
            Arg::Float(f) => Err(invalid(format!("{} is not a finite number", f))),
            Arg::Text(s) if s.is_empty() => Err(invalid("empty text argument".into())),
            Arg::Text(s) if s.bytes().all(|b| b.is_ascii_graphic()) => Ok(s.clone()),
            Arg::Text(s) => Err(invalid(format!(
                "{:?} contains whitespace or non-ASCII characters",
                s
            ))),
        }
    }
}

/// Renders `<wire_name>[ <arg>...]`. The terminator is added by the transport.
pub fn encode(command: &CommandDescriptor, args: &[Arg]) -> Result<String> {
    if args.len() != command.arity {
        return Err(ProtoError::InvalidArgument {
            command: command.wire_name.to_string(),
            reason: format!("expected {} argument(s), got {}", command.arity, args.len()),
        });
    }
    let mut line = String::from(command.wire_name);
    for arg in args {
        line.push(' ');
        line.push_str(&arg.render(command.wire_name)?);
    }
    Ok(line)
}

pub mod cmd {
    use super::{CommandDescriptor as C, ReplyShape, Scalar};
    use crate::proto::response::StateKind;

    // Identification
    pub static PING: C = C::action("?", "Check that the laser answers");
    pub static FIRMWARE_VERSION: C =
        C::query("gfv?", ReplyShape::Scalar(Scalar::Text), "Get firmware version");
    pub static SERIAL_NUMBER: C =
        C::query("gsn?", ReplyShape::Scalar(Scalar::Text), "Get serial number");
    pub static MODEL_NUMBER: C =
        C::query("glm?", ReplyShape::Scalar(Scalar::Text), "Get model number");
    pub static OPERATING_HOURS: C =
        C::query("hrs?", ReplyShape::Scalar(Scalar::Number), "Get operating hours");

    // Laser on/off and status
    pub static AUTOSTART_ON: C = C::action("@cob1", "Turn on with the autostart sequence");
    pub static LASER_OFF: C = C::action("l0", "Turn off");
    pub static LASER_ON: C = C::query("l?", ReplyShape::Scalar(Scalar::Flag), "Is the laser on");
    pub static INTERLOCK: C = C::query(
        "ilk?",
        ReplyShape::State(StateKind::Interlock),
        "Get interlock state",
    );
    pub static FAULT: C = C::query("f?", ReplyShape::State(StateKind::Fault), "Get fault");
    pub static CLEAR_FAULT: C = C::action("cf", "Clear fault");
    pub static OPERATING_MODE: C = C::query(
        "gam?",
        ReplyShape::State(StateKind::OperatingMode),
        "Get operating mode",
    );
    pub static AUTOSTART_STATE: C = C::query(
        "gom?",
        ReplyShape::State(StateKind::Autostart),
        "Get autostart state",
    );

    // Current and power
    pub static CONSTANT_CURRENT: C = C::action("ci", "Enter constant current mode");
    pub static SET_CURRENT: C = C::setter("slc", "Set laser current");
    pub static CURRENT: C = C::query("i?", ReplyShape::Scalar(Scalar::Number), "Get current");
    pub static CURRENT_SETPOINT: C = C::query(
        "glc?",
        ReplyShape::Scalar(Scalar::Number),
        "Get current setpoint",
    );
    pub static CONSTANT_POWER: C = C::action("cp", "Enter constant power mode");
    pub static SET_POWER: C = C::setter("p", "Set output power in W");
    pub static POWER: C = C::query(
        "pa?",
        ReplyShape::Scalar(Scalar::Number),
        "Get output power in W",
    );
    pub static POWER_SETPOINT: C = C::query(
        "p?",
        ReplyShape::Scalar(Scalar::Number),
        "Get output power setpoint in W",
    );

    // Modulation, 06-MLD and 06-DPL
    pub static MODULATION_MODE: C = C::action("em", "Enter modulation mode");
    pub static DIGITAL_MODULATION: C = C::setter("sdmes", "Enable/disable digital modulation");
    pub static ANALOG_MODULATION: C = C::setter("sames", "Enable/disable analog modulation");
    pub static DIGITAL_MODULATION_STATE: C = C::query(
        "gdmes?",
        ReplyShape::Scalar(Scalar::Flag),
        "Is digital modulation enabled",
    );
    pub static ANALOG_MODULATION_STATE: C = C::query(
        "games?",
        ReplyShape::Scalar(Scalar::Flag),
        "Is analog modulation enabled",
    );

    // 06-MLD only
    pub static ON_OFF_MODULATION_ENABLE: C = C::action("eoom", "Enable on/off modulation");
    pub static ON_OFF_MODULATION_DISABLE: C = C::action("xoom", "Disable on/off modulation");
    pub static SET_MODULATION_POWER: C = C::setter("slmp", "Set modulation power in mW");
    pub static MODULATION_POWER: C = C::query(
        "glmp?",
        ReplyShape::Scalar(Scalar::Number),
        "Get modulation power setpoint in mW",
    );
    pub static SET_ANALOG_IMPEDANCE: C = C::setter("salis", "Set analog modulation impedance");
    pub static ANALOG_IMPEDANCE: C = C::query(
        "galis?",
        ReplyShape::State(StateKind::AnalogImpedance),
        "Get analog modulation impedance",
    );

    // 06-DPL only
    pub static SET_MODULATION_CURRENT_HIGH: C =
        C::setter("smc", "Set modulation high current in mA");
    pub static SET_MODULATION_CURRENT_LOW: C =
        C::setter("slth", "Set modulation low current in mA");
    pub static MODULATION_CURRENT_HIGH: C = C::query(
        "gmc?",
        ReplyShape::Scalar(Scalar::Number),
        "Get modulation high current in mA",
    );
    pub static MODULATION_CURRENT_LOW: C = C::query(
        "glth?",
        ReplyShape::Scalar(Scalar::Number),
        "Get modulation low current in mA",
    );
    pub static MODULATION_TEC: C = C::query(
        "rtec4t?",
        ReplyShape::Scalar(Scalar::Number),
        "Read modulation TEC temperature",
    );
    pub static SET_MODULATION_TEC: C = C::setter("stec4t", "Set modulation TEC temperature");
    pub static MODULATION_TEC_SETPOINT: C = C::query(
        "gtec4t?",
        ReplyShape::Scalar(Scalar::Number),
        "Get modulation TEC setpoint",
    );
}

/// Commands every laser understands.
pub static COMMON: &[&CommandDescriptor] = &[
    &cmd::PING,
    &cmd::FIRMWARE_VERSION,
    &cmd::SERIAL_NUMBER,
    &cmd::MODEL_NUMBER,
    &cmd::OPERATING_HOURS,
    &cmd::AUTOSTART_ON,
    &cmd::LASER_OFF,
    &cmd::LASER_ON,
    &cmd::INTERLOCK,
    &cmd::FAULT,
    &cmd::CLEAR_FAULT,
    &cmd::OPERATING_MODE,
    &cmd::AUTOSTART_STATE,
    &cmd::CONSTANT_CURRENT,
    &cmd::SET_CURRENT,
    &cmd::CURRENT,
    &cmd::CURRENT_SETPOINT,
    &cmd::CONSTANT_POWER,
    &cmd::SET_POWER,
    &cmd::POWER,
    &cmd::POWER_SETPOINT,
];

pub static MLD_06: &[&CommandDescriptor] = &[
    &cmd::MODULATION_MODE,
    &cmd::DIGITAL_MODULATION,
    &cmd::ANALOG_MODULATION,
    &cmd::DIGITAL_MODULATION_STATE,
    &cmd::ANALOG_MODULATION_STATE,
    &cmd::ON_OFF_MODULATION_ENABLE,
    &cmd::ON_OFF_MODULATION_DISABLE,
    &cmd::SET_MODULATION_POWER,
    &cmd::MODULATION_POWER,
    &cmd::SET_ANALOG_IMPEDANCE,
    &cmd::ANALOG_IMPEDANCE,
];

pub static DPL_06: &[&CommandDescriptor] = &[
    &cmd::MODULATION_MODE,
    &cmd::DIGITAL_MODULATION,
    &cmd::ANALOG_MODULATION,
    &cmd::DIGITAL_MODULATION_STATE,
    &cmd::ANALOG_MODULATION_STATE,
    &cmd::SET_MODULATION_CURRENT_HIGH,
    &cmd::SET_MODULATION_CURRENT_LOW,
    &cmd::MODULATION_CURRENT_HIGH,
    &cmd::MODULATION_CURRENT_LOW,
    &cmd::MODULATION_TEC,
    &cmd::SET_MODULATION_TEC,
    &cmd::MODULATION_TEC_SETPOINT,
];

/// Group of laser models sharing a command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Model number unknown, only [`COMMON`] commands.
    Generic,
    Mld06,
    Dpl06,
}

impl ModelFamily {
    pub fn classify(model_number: Option<&str>) -> Self {
        match model_number {
            None => Self::Generic,
            Some(m)
                if m.contains("-06-")
                    && (m.contains("-91-") || m.contains("-93-"))
                    && !m.contains("-71-") =>
            {
                Self::Dpl06
            }
            Some(_) => Self::Mld06,
        }
    }

    /// Family specific commands on top of [`COMMON`].
    pub fn extra_commands(&self) -> &'static [&'static CommandDescriptor] {
        match self {
            Self::Generic => &[],
            Self::Mld06 => MLD_06,
            Self::Dpl06 => DPL_06,
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = &'static CommandDescriptor> {
        COMMON
            .iter()
            .chain(self.extra_commands().iter())
            .copied()
    }

    pub fn supports(&self, command: &CommandDescriptor) -> bool {
        self.commands().any(|c| c.wire_name == command.wire_name)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Mld06 => f.write_str("06-MLD"),
            Self::Dpl06 => f.write_str("06-DPL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_query_without_args() {
        assert_eq!(encode(&cmd::SERIAL_NUMBER, &[]).expect("encode"), "gsn?");
    }

    #[test]
    fn encode_setter_renders_args() {
        assert_eq!(
            encode(&cmd::SET_POWER, &[Arg::from(0.05)]).expect("encode"),
            "p 0.05"
        );
        assert_eq!(
            encode(&cmd::DIGITAL_MODULATION, &[Arg::from(true)]).expect("encode"),
            "sdmes 1"
        );
        assert_eq!(
            encode(&cmd::SET_CURRENT, &[Arg::from(-1.5)]).expect("encode"),
            "slc -1.5"
        );
    }

    #[test]
    fn encode_checks_arity() {
        assert!(matches!(
            encode(&cmd::SET_POWER, &[]),
            Err(ProtoError::InvalidArgument { .. })
        ));
        assert!(matches!(
            encode(&cmd::LASER_OFF, &[Arg::Int(1)]),
            Err(ProtoError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn encode_rejects_bad_args() {
        assert!(encode(&cmd::SET_POWER, &[Arg::Float(f64::NAN)]).is_err());
        assert!(encode(&cmd::SET_POWER, &[Arg::from("1 2")]).is_err());
        assert!(encode(&cmd::SET_POWER, &[Arg::from("")]).is_err());
    }

    #[test]
    fn listing_uses_default_line_cap() {
        let listing = CommandDescriptor::listing("list?", "END", "listing");
        assert_eq!(listing.arity, 0);
        assert_eq!(
            listing.reply,
            ReplyShape::Multiline {
                sentinel: "END",
                max_lines: MAX_REPLY_LINES
            }
        );
    }

    #[test]
    fn classify_models() {
        assert_eq!(ModelFamily::classify(None), ModelFamily::Generic);
        assert_eq!(
            ModelFamily::classify(Some("0532-06-91-0100-700")),
            ModelFamily::Dpl06
        );
        assert_eq!(
            ModelFamily::classify(Some("0532-06-71-0100-700")),
            ModelFamily::Mld06
        );
        assert_eq!(
            ModelFamily::classify(Some("0488-06-01-0060-100")),
            ModelFamily::Mld06
        );
    }

    #[test]
    fn family_tables() {
        assert!(ModelFamily::Generic.supports(&cmd::SERIAL_NUMBER));
        assert!(!ModelFamily::Generic.supports(&cmd::MODULATION_MODE));
        assert!(ModelFamily::Mld06.supports(&cmd::SET_MODULATION_POWER));
        assert!(!ModelFamily::Mld06.supports(&cmd::MODULATION_TEC));
        assert!(ModelFamily::Dpl06.supports(&cmd::MODULATION_TEC));
        assert!(!ModelFamily::Dpl06.supports(&cmd::ANALOG_IMPEDANCE));
    }
}
