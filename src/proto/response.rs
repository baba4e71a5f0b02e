use std::fmt;

use super::command::{ReplyShape, Scalar};
use super::{ProtoError, Result};

/// Decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Flag(bool),
    State(State),
    Lines(Vec<String>),
    Ack,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Flag(b) => write!(f, "{}", if *b { "1" } else { "0" }),
            Value::State(s) => write!(f, "{}", s),
            Value::Lines(lines) => f.write_str(&lines.join("\n")),
            Value::Ack => f.write_str("OK"),
        }
    }
}

/// Which state table a reply token is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Fault,
    OperatingMode,
    Autostart,
    Interlock,
    AnalogImpedance,
}

impl StateKind {
    pub fn parse(&self, token: &str) -> Option<State> {
        match self {
            StateKind::Fault => Fault::from_token(token).map(State::Fault),
            StateKind::OperatingMode => OperatingMode::from_token(token).map(State::OperatingMode),
            StateKind::Autostart => AutostartState::from_token(token).map(State::Autostart),
            StateKind::Interlock => Interlock::from_token(token).map(State::Interlock),
            StateKind::AnalogImpedance => {
                AnalogImpedance::from_token(token).map(State::AnalogImpedance)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Fault(Fault),
    OperatingMode(OperatingMode),
    Autostart(AutostartState),
    Interlock(Interlock),
    AnalogImpedance(AnalogImpedance),
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Fault(s) => write!(f, "{}", s),
            State::OperatingMode(s) => write!(f, "{}", s),
            State::Autostart(s) => write!(f, "{}", s),
            State::Interlock(s) => write!(f, "{}", s),
            State::AnalogImpedance(s) => write!(f, "{}", s),
        }
    }
}

// Token table plus Display text for each device state enum.
macro_rules! state_enum {
    ($name:ident { $($variant:ident = $token:literal => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn from_token(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn token(&self) -> &'static str {
                match self {
                    $(Self::$variant => $token,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($text),)+
                }
            }
        }
    };
}

state_enum!(Fault {
    NoError = "0" => "No errors",
    Temperature = "1" => "Temperature error",
    Interlock = "3" => "Interlock error",
    ConstantPowerTimeout = "4" => "Constant power time out",
});

state_enum!(OperatingMode {
    ConstantCurrent = "0" => "Constant Current",
    ConstantPower = "1" => "Constant Power",
    Modulation = "2" => "Modulation Mode",
});

state_enum!(AutostartState {
    Off = "0" => "Off",
    WaitingForKey = "1" => "Waiting for key",
    Continuous = "2" => "Continuous",
    OnOffModulation = "3" => "On/Off Modulation",
    Modulation = "4" => "Modulation",
    Fault = "5" => "Fault",
    Aborted = "6" => "Aborted",
});

state_enum!(Interlock {
    Closed = "0" => "Closed",
    Open = "1" => "Open",
});

state_enum!(AnalogImpedance {
    HighZ = "0" => "HighZ",
    FiftyOhm = "1" => "50 Ohm",
});

/// Recognizes the error replies a laser sends instead of a value.
pub fn device_error(line: &str) -> Option<ProtoError> {
    let line = line.trim();
    let lower = line.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("err:") {
        let rest = rest.trim_start();
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let code = rest[..digits].parse::<u32>().ok();
        // Same byte offsets as the lowercase copy, the input is ASCII here.
        let offset = line.len() - rest.len() + digits;
        let message = line.get(offset..).unwrap_or_default().trim();
        return Some(ProtoError::Protocol {
            code,
            message: if message.is_empty() {
                line.to_string()
            } else {
                message.to_string()
            },
        });
    }
    if lower.starts_with("error") || lower.starts_with("syntax error") {
        return Some(ProtoError::Protocol {
            code: None,
            message: line.to_string(),
        });
    }
    None
}

fn parse_number(command: &str, text: &str) -> Result<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Value::Float(f)),
        _ => Err(ProtoError::MalformedReply(format!(
            "{}: expected a number, got {:?}",
            command, text
        ))),
    }
}

/// Turns the reply lines of `command` into a value. No I/O.
pub fn decode(command: &str, shape: &ReplyShape, lines: &[String]) -> Result<Value> {
    if let Some(err) = lines.first().and_then(|l| device_error(l)) {
        return Err(err);
    }
    if let ReplyShape::Multiline { .. } = shape {
        return Ok(Value::Lines(lines.to_vec()));
    }
    let text = lines
        .first()
        .map(|l| l.trim())
        .ok_or_else(|| ProtoError::MalformedReply(format!("{}: empty reply", command)))?;
    match shape {
        ReplyShape::Scalar(Scalar::Number) => parse_number(command, text),
        ReplyShape::Scalar(Scalar::Text) => Ok(Value::Text(text.to_string())),
        ReplyShape::Scalar(Scalar::Flag) => match text {
            "0" => Ok(Value::Flag(false)),
            "1" => Ok(Value::Flag(true)),
            _ => Err(ProtoError::MalformedReply(format!(
                "{}: expected 0 or 1, got {:?}",
                command, text
            ))),
        },
        ReplyShape::State(kind) => {
            kind.parse(text)
                .map(Value::State)
                .ok_or_else(|| ProtoError::UnknownState {
                    command: command.to_string(),
                    token: text.to_string(),
                })
        }
        ReplyShape::Multiline { .. } => Ok(Value::Lines(lines.to_vec())),
        ReplyShape::Ack => Ok(Value::Ack),
    }
}

/// Gathers the lines belonging to one reply.
#[derive(Debug)]
pub struct ReplyCollector {
    shape: ReplyShape,
    lines: Vec<String>,
    read: usize,
}

impl ReplyCollector {
    pub fn new(shape: ReplyShape) -> Self {
        Self {
            shape,
            lines: Vec::new(),
            read: 0,
        }
    }

    /// Feeds one line, returns true once the reply is complete.
    pub fn push(&mut self, line: String) -> Result<bool> {
        self.read += 1;
        match self.shape {
            ReplyShape::Multiline {
                sentinel,
                max_lines,
            } => {
                if self.read == 1 && device_error(&line).is_some() {
                    self.lines.push(line);
                    return Ok(true);
                }
                if line.trim() == sentinel {
                    return Ok(true);
                }
                if self.read >= max_lines {
                    return Err(ProtoError::MalformedReply(format!(
                        "no {:?} sentinel within {} lines",
                        sentinel, max_lines
                    )));
                }
                self.lines.push(line);
                Ok(false)
            }
            _ => {
                self.lines.push(line);
                Ok(true)
            }
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::command::cmd;

    fn reply(line: &str) -> Vec<String> {
        vec![line.to_string()]
    }

    #[test]
    fn number_round_trip() {
        let values = [
            0.0,
            -0.0,
            -12.5,
            0.05,
            1e-9,
            0.1 + 0.2,
            std::f64::consts::PI,
            f64::MAX,
            f64::MIN_POSITIVE,
            -4242.0,
        ];
        for v in values {
            let decoded = decode("pa?", &cmd::POWER.reply, &reply(&v.to_string()))
                .expect("decode number");
            assert_eq!(decoded.as_f64(), Some(v), "value {}", v);
        }
    }

    #[test]
    fn integers_stay_integers() {
        assert_eq!(
            decode("hrs?", &cmd::OPERATING_HOURS.reply, &reply("1234")).expect("decode"),
            Value::Integer(1234)
        );
        assert_eq!(
            decode("hrs?", &cmd::OPERATING_HOURS.reply, &reply("-7")).expect("decode"),
            Value::Integer(-7)
        );
    }

    #[test]
    fn malformed_number() {
        for bad in ["", "abc", "1.2.3", "nan", "inf"] {
            assert!(
                matches!(
                    decode("i?", &cmd::CURRENT.reply, &reply(bad)),
                    Err(ProtoError::MalformedReply(_))
                ),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn serial_number_is_text() {
        assert_eq!(
            decode("gsn?", &cmd::SERIAL_NUMBER.reply, &reply("12345 ")).expect("decode"),
            Value::Text("12345".into())
        );
    }

    #[test]
    fn error_code_reply() {
        match decode("gsn?", &cmd::SERIAL_NUMBER.reply, &reply("err:3")) {
            Err(ProtoError::Protocol { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("unexpected {:?}", other),
        }
        match decode("l0", &cmd::LASER_OFF.reply, &reply("Err:12 interlock open")) {
            Err(ProtoError::Protocol { code, message }) => {
                assert_eq!(code, Some(12));
                assert_eq!(message, "interlock open");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn textual_error_reply() {
        match decode("x?", &cmd::FIRMWARE_VERSION.reply, &reply("Syntax error: illegal command")) {
            Err(ProtoError::Protocol { code, message }) => {
                assert_eq!(code, None);
                assert_eq!(message, "Syntax error: illegal command");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn flags() {
        assert_eq!(
            decode("l?", &cmd::LASER_ON.reply, &reply("1")).expect("decode"),
            Value::Flag(true)
        );
        assert!(matches!(
            decode("l?", &cmd::LASER_ON.reply, &reply("2")),
            Err(ProtoError::MalformedReply(_))
        ));
    }

    #[test]
    fn states() {
        assert_eq!(
            decode("gom?", &cmd::AUTOSTART_STATE.reply, &reply("2")).expect("decode"),
            Value::State(State::Autostart(AutostartState::Continuous))
        );
        assert_eq!(
            decode("f?", &cmd::FAULT.reply, &reply("3")).expect("decode"),
            Value::State(State::Fault(Fault::Interlock))
        );
        match decode("f?", &cmd::FAULT.reply, &reply("2")) {
            Err(ProtoError::UnknownState { command, token }) => {
                assert_eq!(command, "f?");
                assert_eq!(token, "2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ack_accepts_anything_but_errors() {
        assert_eq!(
            decode("l0", &cmd::LASER_OFF.reply, &reply("OK")).expect("decode"),
            Value::Ack
        );
        assert_eq!(
            decode("cf", &cmd::CLEAR_FAULT.reply, &reply("")).expect("decode"),
            Value::Ack
        );
        assert!(decode("l0", &cmd::LASER_OFF.reply, &reply("ERROR")).is_err());
    }

    #[test]
    fn state_tokens_round_trip() {
        for token in ["0", "1", "2", "3", "4", "5", "6"] {
            let state = AutostartState::from_token(token).expect("known token");
            assert_eq!(state.token(), token);
        }
    }

    const LISTING: ReplyShape = ReplyShape::Multiline {
        sentinel: ">",
        max_lines: 4,
    };

    #[test]
    fn multiline_until_sentinel() {
        let mut collector = ReplyCollector::new(LISTING);
        assert!(!collector.push("a".into()).expect("push"));
        assert!(!collector.push("b".into()).expect("push"));
        assert!(collector.push(">".into()).expect("push"));
        assert_eq!(
            decode("list?", &LISTING, collector.lines()).expect("decode"),
            Value::Lines(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn multiline_is_capped() {
        let mut collector = ReplyCollector::new(LISTING);
        for line in ["a", "b", "c"] {
            assert!(!collector.push(line.into()).expect("push"));
        }
        assert!(matches!(
            collector.push("d".into()),
            Err(ProtoError::MalformedReply(_))
        ));
    }

    #[test]
    fn multiline_error_on_first_line() {
        let mut collector = ReplyCollector::new(LISTING);
        assert!(collector.push("err:1".into()).expect("push"));
        assert!(matches!(
            decode("list?", &LISTING, &collector.into_lines()),
            Err(ProtoError::Protocol { code: Some(1), .. })
        ));
    }

    #[test]
    fn multiline_empty_listing() {
        let mut collector = ReplyCollector::new(LISTING);
        assert!(collector.push(">".into()).expect("push"));
        assert_eq!(
            decode("list?", &LISTING, collector.lines()).expect("decode"),
            Value::Lines(Vec::new())
        );
    }
}
