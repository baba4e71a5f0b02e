use std::fmt;
use tracing::{debug, info};

use crate::proto::command::{cmd, Arg, CommandDescriptor, ModelFamily};
use crate::proto::resolver::{self, PortDescriptor, PortResolver};
use crate::proto::response::{
    AnalogImpedance, AutostartState, Fault, Interlock, OperatingMode, State, Value,
};
use crate::proto::transport::{self, PortOpener};
use crate::proto::{ProtoError, Result};
use crate::session::{Session, Settings, Target};

/// What a laser told us about itself while connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaserInfo {
    pub port: String,
    pub serial_number: String,
    pub model_number: Option<String>,
    pub firmware: String,
    pub family: ModelFamily,
}

impl LaserInfo {
    /// Wavelength in nm, encoded in the first four digits of the model number.
    pub fn wavelength_nm(&self) -> Option<u32> {
        self.model_number.as_deref()?.get(0..4)?.parse().ok()
    }

    /// Current setpoints are in A except for 06-08 lasers, which take mA.
    fn current_in_milliamps(&self) -> bool {
        self.model_number
            .as_deref()
            .map_or(false, |m| m.contains("-06-") && m.contains("-08-"))
    }
}

impl fmt::Display for LaserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial number: {}", self.serial_number)?;
        if let Some(model) = &self.model_number {
            write!(f, ", Model number: {}", model)?;
        }
        if let Some(wavelength) = self.wavelength_nm() {
            write!(f, ", Wavelength: {} nm", wavelength)?;
        }
        write!(f, ", Type: {}, Firmware: {}", self.family, self.firmware)
    }
}

/// Analog and digital modulation enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulationState {
    pub analog: bool,
    pub digital: bool,
}

/// An identified laser on an open session.
///
/// Only commands of the laser's [`ModelFamily`] are accepted, anything else
/// fails with [`ProtoError::Unsupported`] without touching the port.
#[derive(Debug)]
pub struct Laser {
    session: Session,
    info: LaserInfo,
}

impl Laser {
    pub async fn connect(target: Target, settings: &Settings) -> Result<Self> {
        let session = Session::connect(target, settings).await?;
        Self::identify(session).await
    }

    pub async fn connect_with<O, L>(
        opener: &O,
        list_ports: L,
        target: Target,
        settings: &Settings,
    ) -> Result<Self>
    where
        O: PortOpener + ?Sized,
        L: FnOnce() -> Result<Vec<PortDescriptor>>,
    {
        let session = Session::connect_with(opener, list_ports, target, settings).await?;
        Self::identify(session).await
    }

    /// Asks the device on `session` who it is. The session is closed if it is
    /// not a laser.
    pub async fn identify(session: Session) -> Result<Self> {
        match query_info(&session).await {
            Ok(info) => {
                info!(port = %info.port, "identified laser: {}", info);
                Ok(Self { session, info })
            }
            Err(err) => {
                session.close().await;
                let reason = if err.is_device_error() {
                    format!("rejected identification: {}", err)
                } else {
                    err.to_string()
                };
                Err(ProtoError::UnrecognizedDevice {
                    port: session.port_name().to_string(),
                    reason,
                })
            }
        }
    }

    pub fn info(&self) -> &LaserInfo {
        &self.info
    }

    pub fn family(&self) -> ModelFamily {
        self.info.family
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn close(&self) {
        self.session.close().await
    }

    async fn send_checked(&self, command: &'static CommandDescriptor, args: &[Arg]) -> Result<Value> {
        if !self.info.family.supports(command) {
            return Err(ProtoError::Unsupported {
                command: command.wire_name,
                family: self.info.family,
            });
        }
        self.session.send(command, args).await
    }

    async fn number(&self, command: &'static CommandDescriptor) -> Result<f64> {
        let value = self.send_checked(command, &[]).await?;
        value.as_f64().ok_or_else(|| unexpected(command, &value))
    }

    async fn flag(&self, command: &'static CommandDescriptor) -> Result<bool> {
        let value = self.send_checked(command, &[]).await?;
        value.as_bool().ok_or_else(|| unexpected(command, &value))
    }

    async fn state(&self, command: &'static CommandDescriptor) -> Result<State> {
        match self.send_checked(command, &[]).await? {
            Value::State(state) => Ok(state),
            other => Err(unexpected(command, &other)),
        }
    }

    async fn set(&self, command: &'static CommandDescriptor, arg: impl Into<Arg>) -> Result<()> {
        self.send_checked(command, &[arg.into()]).await.map(|_| ())
    }

    async fn action(&self, command: &'static CommandDescriptor) -> Result<()> {
        self.send_checked(command, &[]).await.map(|_| ())
    }

    /// True if the laser answers `?` with anything but an error.
    pub async fn is_connected(&self) -> bool {
        self.action(&cmd::PING).await.is_ok()
    }

    /// Turns on with the autostart sequence. The laser waits for its TEC
    /// setpoints and warms up before emitting.
    pub async fn turn_on(&self) -> Result<()> {
        info!(port = %self.info.port, "turning on laser");
        self.action(&cmd::AUTOSTART_ON).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        info!(port = %self.info.port, "turning off laser");
        self.action(&cmd::LASER_OFF).await
    }

    pub async fn is_on(&self) -> Result<bool> {
        self.flag(&cmd::LASER_ON).await
    }

    pub async fn interlock(&self) -> Result<Interlock> {
        match self.state(&cmd::INTERLOCK).await? {
            State::Interlock(s) => Ok(s),
            other => Err(unexpected_state(&cmd::INTERLOCK, other)),
        }
    }

    pub async fn fault(&self) -> Result<Fault> {
        match self.state(&cmd::FAULT).await? {
            State::Fault(s) => Ok(s),
            other => Err(unexpected_state(&cmd::FAULT, other)),
        }
    }

    pub async fn clear_fault(&self) -> Result<()> {
        self.action(&cmd::CLEAR_FAULT).await
    }

    pub async fn operating_mode(&self) -> Result<OperatingMode> {
        match self.state(&cmd::OPERATING_MODE).await? {
            State::OperatingMode(s) => Ok(s),
            other => Err(unexpected_state(&cmd::OPERATING_MODE, other)),
        }
    }

    pub async fn autostart_state(&self) -> Result<AutostartState> {
        match self.state(&cmd::AUTOSTART_STATE).await? {
            State::Autostart(s) => Ok(s),
            other => Err(unexpected_state(&cmd::AUTOSTART_STATE, other)),
        }
    }

    /// Enters constant current mode, optionally setting the current (mA) first.
    pub async fn constant_current(&self, current_ma: Option<f64>) -> Result<()> {
        if let Some(current) = current_ma {
            self.set_current(current).await?;
        }
        info!(port = %self.info.port, "entering constant current mode");
        self.action(&cmd::CONSTANT_CURRENT).await
    }

    pub async fn set_current(&self, current_ma: f64) -> Result<()> {
        info!(port = %self.info.port, "setting I = {} mA", current_ma);
        let current = if self.info.current_in_milliamps() {
            current_ma
        } else {
            current_ma / 1000.0
        };
        self.set(&cmd::SET_CURRENT, current).await
    }

    /// Laser current in mA.
    pub async fn current(&self) -> Result<f64> {
        self.number(&cmd::CURRENT).await
    }

    pub async fn current_setpoint(&self) -> Result<f64> {
        self.number(&cmd::CURRENT_SETPOINT).await
    }

    /// Enters constant power mode, optionally setting the power (mW) first.
    pub async fn constant_power(&self, power_mw: Option<f64>) -> Result<()> {
        if let Some(power) = power_mw {
            self.set_power(power).await?;
        }
        info!(port = %self.info.port, "entering constant power mode");
        self.action(&cmd::CONSTANT_POWER).await
    }

    pub async fn set_power(&self, power_mw: f64) -> Result<()> {
        info!(port = %self.info.port, "setting P = {} mW", power_mw);
        self.set(&cmd::SET_POWER, power_mw / 1000.0).await
    }

    /// Output power in mW.
    pub async fn power(&self) -> Result<f64> {
        Ok(self.number(&cmd::POWER).await? * 1000.0)
    }

    /// Output power setpoint in mW.
    pub async fn power_setpoint(&self) -> Result<f64> {
        Ok(self.number(&cmd::POWER_SETPOINT).await? * 1000.0)
    }

    pub async fn operating_hours(&self) -> Result<f64> {
        self.number(&cmd::OPERATING_HOURS).await
    }

    /// Enters modulation mode. `level` is the modulation power in mW on 06-MLD
    /// and the modulation high current in mA on 06-DPL lasers.
    pub async fn modulation_mode(&self, level: Option<f64>) -> Result<()> {
        if !self.info.family.supports(&cmd::MODULATION_MODE) {
            return Err(ProtoError::Unsupported {
                command: cmd::MODULATION_MODE.wire_name,
                family: self.info.family,
            });
        }
        if let Some(level) = level {
            match self.info.family {
                ModelFamily::Dpl06 => self.set_modulation_current_high(level).await?,
                _ => self.set_modulation_power(level).await?,
            }
        }
        info!(port = %self.info.port, "entering modulation mode");
        self.action(&cmd::MODULATION_MODE).await
    }

    pub async fn digital_modulation(&self, enable: bool) -> Result<()> {
        self.set(&cmd::DIGITAL_MODULATION, enable).await
    }

    pub async fn analog_modulation(&self, enable: bool) -> Result<()> {
        self.set(&cmd::ANALOG_MODULATION, enable).await
    }

    pub async fn modulation_state(&self) -> Result<ModulationState> {
        let digital = self.flag(&cmd::DIGITAL_MODULATION_STATE).await?;
        let analog = self.flag(&cmd::ANALOG_MODULATION_STATE).await?;
        Ok(ModulationState { analog, digital })
    }

    pub async fn on_off_modulation(&self, enable: bool) -> Result<()> {
        if enable {
            self.action(&cmd::ON_OFF_MODULATION_ENABLE).await
        } else {
            self.action(&cmd::ON_OFF_MODULATION_DISABLE).await
        }
    }

    pub async fn set_modulation_power(&self, power_mw: f64) -> Result<()> {
        info!(port = %self.info.port, "setting modulation power = {} mW", power_mw);
        self.set(&cmd::SET_MODULATION_POWER, power_mw).await
    }

    /// Modulation power setpoint in mW.
    pub async fn modulation_power(&self) -> Result<f64> {
        self.number(&cmd::MODULATION_POWER).await
    }

    pub async fn set_analog_impedance(&self, impedance: AnalogImpedance) -> Result<()> {
        self.set(&cmd::SET_ANALOG_IMPEDANCE, impedance.token()).await
    }

    pub async fn analog_impedance(&self) -> Result<AnalogImpedance> {
        match self.state(&cmd::ANALOG_IMPEDANCE).await? {
            State::AnalogImpedance(s) => Ok(s),
            other => Err(unexpected_state(&cmd::ANALOG_IMPEDANCE, other)),
        }
    }

    pub async fn set_modulation_current_high(&self, current_ma: f64) -> Result<()> {
        self.set(&cmd::SET_MODULATION_CURRENT_HIGH, current_ma).await
    }

    pub async fn set_modulation_current_low(&self, current_ma: f64) -> Result<()> {
        self.set(&cmd::SET_MODULATION_CURRENT_LOW, current_ma).await
    }

    /// Modulation current setpoints in mA as `(high, low)`.
    pub async fn modulation_current(&self) -> Result<(f64, f64)> {
        let high = self.number(&cmd::MODULATION_CURRENT_HIGH).await?;
        let low = self.number(&cmd::MODULATION_CURRENT_LOW).await?;
        Ok((high, low))
    }

    /// Modulation TEC temperature in °C.
    pub async fn modulation_tec(&self) -> Result<f64> {
        self.number(&cmd::MODULATION_TEC).await
    }

    pub async fn set_modulation_tec(&self, temperature: f64) -> Result<()> {
        self.set(&cmd::SET_MODULATION_TEC, temperature).await
    }

    pub async fn modulation_tec_setpoint(&self) -> Result<f64> {
        self.number(&cmd::MODULATION_TEC_SETPOINT).await
    }
}

fn unexpected(command: &CommandDescriptor, value: &Value) -> ProtoError {
    ProtoError::MalformedReply(format!("{}: unexpected reply {:?}", command, value))
}

fn unexpected_state(command: &CommandDescriptor, state: State) -> ProtoError {
    unexpected(command, &Value::State(state))
}

async fn text(session: &Session, command: &'static CommandDescriptor) -> Result<String> {
    match session.send(command, &[]).await? {
        Value::Text(s) => Ok(s),
        other => Err(unexpected(command, &other)),
    }
}

async fn query_info(session: &Session) -> Result<LaserInfo> {
    let firmware = text(session, &cmd::FIRMWARE_VERSION).await?;
    if firmware.to_ascii_lowercase().contains("error") {
        return Err(ProtoError::MalformedReply(format!(
            "not a laser, firmware query answered {:?}",
            firmware
        )));
    }
    let mut serial_number = text(session, &cmd::SERIAL_NUMBER).await?;
    let model_number = if firmware.contains('.') {
        Some(text(session, &cmd::MODEL_NUMBER).await?)
    } else {
        // Old firmware has no glm?, the model prefix is part of the serial number.
        match serial_number.split_once('0') {
            Some((prefix, rest)) => {
                let model = format!("0{}-04-XX-XXXX-XXX", prefix);
                serial_number = rest.trim_start_matches('0').to_string();
                Some(model)
            }
            None => None,
        }
    };
    let family = ModelFamily::classify(model_number.as_deref());
    Ok(LaserInfo {
        port: session.port_name().to_string(),
        serial_number,
        model_number,
        firmware,
        family,
    })
}

/// Identifies the laser behind every port that answers, then closes them again.
pub async fn list_lasers(settings: &Settings) -> Result<Vec<LaserInfo>> {
    let ports = resolver::list_ports()?;
    Ok(list_lasers_with(&transport::open, &ports, settings).await)
}

pub async fn list_lasers_with<O>(
    opener: &O,
    ports: &[PortDescriptor],
    settings: &Settings,
) -> Vec<LaserInfo>
where
    O: PortOpener + ?Sized,
{
    let resolver = PortResolver::new(opener, settings.baud_rate, settings.probe_timeout);
    let mut lasers = Vec::new();
    for (port, _) in resolver.scan(ports).await {
        let conn = match opener.open(&port.port_name, settings.baud_rate, settings.probe_timeout) {
            Ok(conn) => conn,
            Err(err) => {
                debug!(port = %port.port_name, "cannot reopen: {}", err);
                continue;
            }
        };
        match Laser::identify(Session::from_connection(conn)).await {
            Ok(laser) => {
                laser.close().await;
                lasers.push(laser.info);
            }
            Err(err) => debug!(port = %port.port_name, "skipped: {}", err),
        }
    }
    lasers
}
