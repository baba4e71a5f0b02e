//!
//! This library drives lasers speaking the line-based Cobolt serial protocol.
//!
//! <br>
//!
//! # Details
//!
//! - The laser is attached by USB and shows up as a serial port.
//!
//! - Basic setup and connection
//!
//!   ```no_run
//!   use coboltctrl::{Laser, Settings, Target};
//!   #[tokio::main]
//!   async fn main() -> coboltctrl::Result<()> {
//!       let target = Target::Port("/dev/ttyUSB0".to_string());
//!       let laser = Laser::connect(target, &Settings::default()).await?;
//!       eprintln!("Connected to: {}\n", laser.info());
//!       laser.set_power(50.0).await?;
//!       laser.turn_on().await?;
//!       laser.close().await;
//!       Ok(())
//!   }
//!   ```
//!
//! - A laser can also be found by its serial number with
//!   `Target::Serial("12345".to_string())`. Every serial port is then asked
//!   for its serial number, one after another.
//!
//! # Supported devices
//!
//!  * Cobolt 04 series (old firmware, basic commands only)
//!  * Cobolt 06-MLD
//!  * Cobolt 06-DPL
//!

use std::time::Duration;

pub mod laser;
pub mod proto;
pub mod session;

pub use laser::{list_lasers, Laser, LaserInfo};
pub use proto::{ProtoError, Result};
pub use session::{Session, Settings, Target};

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyUSB0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

/// Default Baudrate for Cobolt lasers.
pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Default read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
