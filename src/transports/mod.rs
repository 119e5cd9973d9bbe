//! Transport implementations

pub mod serial;
pub mod simulated;

pub use serial::SerialTransport;
pub use simulated::{SimulatedTransport, SimulatorHandle};
