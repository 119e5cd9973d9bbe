//! Buzzer arbitration and question session engine for hardware quiz shows.
//!
//! A coordinator microcontroller reports button presses and device status over a
//! serial link. Buzzwire decodes that stream, keeps track of which buzzers are
//! alive, decides which contestant group buzzed in first, runs the question timer
//! and computes time-decayed scores. Control panels, public displays and phone
//! buzzers all observe the same engine through event subscriptions.
//!
//! # Features
//!
//! - **Self-healing decoder**: binary (`0xAA` framed) and legacy text protocols,
//!   resynchronizing after corruption without stalling
//! - **Race-free sessions**: timer expiry, manual end and late presses are
//!   serialized through one reactor
//! - **Virtual buzzers**: phones compete through the same arbitration gate
//! - **No hardware required**: a simulated coordinator stands in when the serial
//!   port is missing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use buzzwire::{Buzzwire, Config, StartQuestion};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> buzzwire::Result<()> {
//!     let config = Config::load("buzzwire.yaml")?;
//!     let (engine, degraded) = Buzzwire::connect_or_simulate(&config).await;
//!     if let Some(reason) = degraded {
//!         eprintln!("running without hardware: {reason}");
//!     }
//!
//!     let mut events = engine.subscribe();
//!     engine.start_question(StartQuestion::new(1, 30_000, 100)).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Game state
pub mod arbitration;
pub mod registry;
pub mod session;

// Reactor and I/O
pub mod config;
mod driver;
pub mod engine;
pub mod gateway;
pub mod stream;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use arbitration::{PressSummary, Roster};
pub use codec::{Command, CommandType, FrameCodec, ProtocolMode};
pub use config::Config;
pub use engine::{EngineHandle, EngineStatus};
pub use gateway::Event;
pub use registry::{DeviceRegistry, DeviceStatus};
pub use session::{Evaluation, SessionState, StartQuestion};
pub use transports::{SerialTransport, SimulatedTransport, SimulatorHandle};

use tracing::{info, warn};

/// Unified entry point for starting an engine.
///
/// Every constructor spawns the reactor on the current Tokio runtime and returns a
/// handle; the engine stops when the last handle is dropped.
///
/// # Examples
///
/// ## Serial hardware
/// ```rust,no_run
/// use buzzwire::{Buzzwire, Config};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> buzzwire::Result<()> {
/// let config = Config::from_yaml("serial_port: /dev/ttyUSB0")?;
/// let engine = Buzzwire::connect(&config).await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Simulation
/// ```rust
/// use buzzwire::{Buzzwire, Config, StartQuestion};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> buzzwire::Result<()> {
/// let (engine, mut simulator) = Buzzwire::simulate(&Config::default());
/// simulator.connect_devices([1, 2]);
/// engine.start_question(StartQuestion::new(1, 30_000, 100)).await?;
/// // Commands reach the coordinator through the writer task.
/// simulator.next_command().await;
/// assert!(simulator.press(1, 1_200));
/// # Ok(())
/// # }
/// ```
pub struct Buzzwire;

impl Buzzwire {
    /// Start an engine on the configured serial port.
    ///
    /// # Errors
    ///
    /// Returns [`BuzzerError::Transport`] if no port is configured or the port cannot
    /// be opened, and [`BuzzerError::Timeout`] if opening it hangs.
    pub async fn connect(config: &Config) -> Result<EngineHandle> {
        let Some(port) = &config.serial_port else {
            return Err(BuzzerError::transport_unavailable("no serial_port configured"));
        };
        let transport = SerialTransport::open(port).await?;
        Ok(engine::spawn(transport, config))
    }

    /// Start on the serial port, falling back to a detached simulated link.
    ///
    /// The engine is always returned. The error explains why hardware is missing,
    /// if it is.
    pub async fn connect_or_simulate(config: &Config) -> (EngineHandle, Option<BuzzerError>) {
        match Self::connect(config).await {
            Ok(engine) => (engine, None),
            Err(e) => {
                warn!(error = %e, "Buzzer hardware unavailable, continuing in simulation");
                let transport = SimulatedTransport::detached(config.protocol());
                (engine::spawn(transport, config), Some(e))
            }
        }
    }

    /// Start against a simulated coordinator driven by the returned handle.
    pub fn simulate(config: &Config) -> (EngineHandle, SimulatorHandle) {
        let (transport, simulator) = SimulatedTransport::new(config.protocol());
        info!("Starting engine against simulated coordinator");
        (engine::spawn(transport, config), simulator)
    }
}
