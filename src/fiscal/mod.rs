//! Fiscal receipt module.
//!
//! Defines the device contract fiscal drivers implement, the orchestrator
//! that walks any driver through session handling and a sales receipt, and a
//! register façade that serializes callers onto one device.

pub mod config;
pub mod driver;
pub mod drivers;
pub mod orchestrator;
pub mod receipt;
pub mod register;

pub use driver::{DriverError, DriverResult, FiscalDriver};
pub use orchestrator::Orchestrator;
pub use receipt::{FiscalFormat, Payment, PaymentType, Position, Receipt, SessionStatus};
pub use register::FiscalRegister;
