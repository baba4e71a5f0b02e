#![deny(clippy::unwrap_used)]

use clap::{arg, command, value_parser};
use std::io::ErrorKind;
use std::process::exit;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use coboltctrl::proto::resolver::list_ports;
use coboltctrl::{
    list_lasers, Laser, ProtoError, Result, Settings, Target, DEFAULT_BAUDRATE, DEFAULT_TTY,
};

#[tokio::main]
async fn main() {
    let matches = command!() // requires `cargo` feature
        .arg(
            arg!(
                -p --port <PORT>
            )
            .help(format!("Serial port of the laser [default: {}]", DEFAULT_TTY))
            .required(false),
        )
        .arg(
            arg!(
                -s --serial <SERIAL> "Find the laser by its serial number"
            )
            .required(false)
            .conflicts_with("port"),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baudrate"
            )
            .default_value(DEFAULT_BAUDRATE.to_string())
            .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(
                -t --timeout <MS> "Reply timeout in milliseconds"
            )
            .default_value("1000")
            .value_parser(value_parser!(u64)),
        )
        .subcommand(clap::Command::new("ports").about("List serial ports"))
        .subcommand(clap::Command::new("lasers").about("List attached lasers"))
        .subcommand(clap::Command::new("ident").about("Laser identification"))
        .subcommand(clap::Command::new("on").about("Turn on with autostart sequence"))
        .subcommand(clap::Command::new("off").about("Turn off"))
        .subcommand(clap::Command::new("status").about("Laser state overview"))
        .subcommand(
            clap::Command::new("fault")
                .about("Fault state")
                .arg(arg!(--clear "Clear the fault")),
        )
        .subcommand(
            clap::Command::new("current")
                .about("Laser current")
                .arg(
                    arg!([milliamps] "Enter constant current mode with this current in mA")
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            clap::Command::new("power")
                .about("Output power")
                .arg(
                    arg!([milliwatts] "Enter constant power mode with this power in mW")
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(clap::Command::new("hours").about("Operating hours"))
        .subcommand(
            clap::Command::new("raw")
                .about("Send a command line as is and print the reply")
                .arg(arg!(<line> "Command line, e.g. \"glm?\"")),
        )
        .subcommand_required(true)
        .get_matches();

    init_logging(matches.get_count("debug"));

    if let Err(e) = handle_args(&matches).await {
        report(e);
        exit(-1);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("coboltctrl={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn report(e: ProtoError) {
    match e {
        ProtoError::ConnectFailed { target, source } => {
            eprintln!("Cannot connect to {}:", target);
            report(*source);
        }
        ProtoError::PortUnavailable { port, reason } => {
            eprintln!("{}: Port not available ({})", port, reason);
        }
        ProtoError::PermissionDenied { port } => {
            eprintln!("{}: Permission denied, is your user allowed to access serial ports?", port);
        }
        ProtoError::Io(err) if err.kind() == ErrorKind::NotFound => {
            eprintln!("File not found: {}", err);
        }
        ProtoError::Serial(err) => {
            eprintln!("Cannot list serial ports: {}", err);
        }
        ProtoError::DeviceNotFound(serial) => {
            eprintln!("No laser with serial number {} found", serial);
        }
        ProtoError::UnrecognizedDevice { port, reason } => {
            eprintln!("{}: Not a laser ({})", port, reason);
        }
        ProtoError::Timeout { port, timeout } => {
            eprintln!("{}: No reply within {} ms, aborting!", port, timeout.as_millis());
        }
        ProtoError::Unsupported { command, family } => {
            eprintln!("Command {} is not supported by {} lasers", command, family);
        }
        e if e.is_device_error() => {
            eprintln!("Command was rejected by laser: {}", e);
        }
        e => {
            eprintln!("Error: {}", e);
        }
    }
}

async fn handle_args(matches: &clap::ArgMatches) -> Result<()> {
    let settings = Settings {
        baud_rate: *matches
            .get_one::<u32>("baudrate")
            .unwrap_or(&DEFAULT_BAUDRATE),
        timeout: Duration::from_millis(*matches.get_one::<u64>("timeout").unwrap_or(&1000)),
        ..Settings::default()
    };

    // Commands without a specific laser
    match matches.subcommand() {
        Some(("ports", _args)) => {
            for port in list_ports()? {
                println!("{}", port);
            }
            return Ok(());
        }
        Some(("lasers", _args)) => {
            let lasers = list_lasers(&settings).await?;
            if lasers.is_empty() {
                eprintln!("No lasers found");
            }
            for info in lasers {
                println!("{}: {}", info.port, info);
            }
            return Ok(());
        }
        _ => {}
    }

    let target = match (
        matches.get_one::<String>("serial"),
        matches.get_one::<String>("port"),
    ) {
        (Some(serial), _) => Target::Serial(serial.clone()),
        (None, Some(port)) => Target::Port(port.clone()),
        (None, None) => Target::Port(DEFAULT_TTY.to_string()),
    };

    let laser = Laser::connect(target, &settings).await?;
    eprintln!("Connected to: {}\n", laser.session().port_name());

    let result = run(&laser, matches).await;
    laser.close().await;
    result
}

async fn run(laser: &Laser, matches: &clap::ArgMatches) -> Result<()> {
    match matches.subcommand() {
        // Laser ID
        Some(("ident", _args)) => {
            let info = laser.info();
            println!("Serial: {}", info.serial_number);
            println!("Model: {}", info.model_number.as_deref().unwrap_or("unknown"));
            if let Some(wavelength) = info.wavelength_nm() {
                println!("Wavelength: {} nm", wavelength);
            }
            println!("Firmware: {}", info.firmware);
            println!("Type: {}", info.family);
        }
        Some(("on", _args)) => {
            laser.turn_on().await?;
            println!("OK");
        }
        Some(("off", _args)) => {
            laser.turn_off().await?;
            println!("OK");
        }
        Some(("status", _args)) => {
            println!("Laser: {}", if laser.is_on().await? { "ON" } else { "OFF" });
            println!("Autostart state: {}", laser.autostart_state().await?);
            println!("Operating mode: {}", laser.operating_mode().await?);
            println!("Interlock: {}", laser.interlock().await?);
            println!("Fault: {}", laser.fault().await?);
            println!("Power: {:.3} mW", laser.power().await?);
            println!("Power setpoint: {:.3} mW", laser.power_setpoint().await?);
            println!("Current: {:.3} mA", laser.current().await?);
        }
        Some(("fault", args)) => {
            if args.get_flag("clear") {
                laser.clear_fault().await?;
                println!("OK");
            } else {
                println!("Fault: {}", laser.fault().await?);
            }
        }
        Some(("current", args)) => {
            if let Some(current) = args.get_one::<f64>("milliamps") {
                // Write value
                laser.constant_current(Some(*current)).await?;
                println!("OK");
            } else {
                // Read value
                println!("Current: {:.3} mA", laser.current().await?);
                println!("Current setpoint: {:.3} mA", laser.current_setpoint().await?);
            }
        }
        Some(("power", args)) => {
            if let Some(power) = args.get_one::<f64>("milliwatts") {
                // Write value
                laser.constant_power(Some(*power)).await?;
                println!("OK");
            } else {
                // Read value
                println!("Power: {:.3} mW", laser.power().await?);
                println!("Power setpoint: {:.3} mW", laser.power_setpoint().await?);
            }
        }
        Some(("hours", _args)) => {
            println!("Operating hours: {}", laser.operating_hours().await?);
        }
        Some(("raw", args)) => {
            if let Some(line) = args.get_one::<String>("line") {
                println!("{}", laser.session().send_raw(line).await?);
            }
        }
        _ => {
            eprintln!("Unknown command");
        }
    }
    Ok(())
}
