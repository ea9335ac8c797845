//! Fiscal receipt orchestration for point-of-sale software.
//!
//! Callers build a [`Receipt`](fiscal::Receipt) and hand it to a
//! [`FiscalRegister`](fiscal::FiscalRegister) (or drive an
//! [`Orchestrator`](fiscal::Orchestrator) directly). Device-specific drivers
//! implement [`FiscalDriver`](fiscal::FiscalDriver); observers receive log
//! events through [`logging::LogSink`].

pub mod fiscal;
pub mod logging;

pub use fiscal::{
    DriverError, FiscalDriver, FiscalFormat, FiscalRegister, Orchestrator, Payment, PaymentType,
    Position, Receipt, SessionStatus,
};
pub use logging::{LogHub, LogRecord, LogSink, Logger};
