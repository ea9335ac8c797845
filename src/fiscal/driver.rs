//! Device contract every fiscal driver implements.
//!
//! Drivers own all device and session state. The orchestrator only reads
//! [`FiscalDriver::session_status`] and invokes the operations below; it never
//! reaches into a driver any other way.

use super::config::ConfigError;
use super::receipt::{FiscalFormat, PaymentType, Position, Receipt, SessionStatus};
use thiserror::Error;

/// Reported when a driver does not override [`FiscalDriver::name`].
pub const UNKNOWN_DRIVER_NAME: &str = "Unknown fiscal integration";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("device is not connected")]
    NotConnected,
    #[error("operation not allowed in session state {0:?}")]
    InvalidSession(SessionStatus),
    #[error("invalid device state: {0}")]
    InvalidState(String),
    #[error("device rejected the operation: {0}")]
    Rejected(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Operations a fiscal device variant supplies.
///
/// `Err` is the contract's failure signal; its text is forwarded to the log
/// channel by the caller. No operation may block indefinitely: a driver
/// talking to hardware applies its own timeout before returning `Err`.
pub trait FiscalDriver: Send {
    /// Current session state. Must reflect the device at the time of the call.
    fn session_status(&self) -> SessionStatus;

    fn open_session(&mut self) -> DriverResult;

    fn close_session(&mut self) -> DriverResult;

    /// Begin a fiscal document. May read header fields of `receipt`.
    fn open_receipt(&mut self, receipt: &Receipt) -> DriverResult;

    fn register_position(&mut self, position: &Position) -> DriverResult;

    /// Apply one non-zero payment slot to the open document.
    fn single_payment(&mut self, kind: PaymentType, amount: u32) -> DriverResult;

    /// Finalize the document. `total` of `None` means the device's own
    /// running total is used.
    fn close_receipt(&mut self, total: Option<u32>) -> DriverResult;

    /// Recovery hook run after a mid-document failure.
    ///
    /// Returns whether a partial document was actually voided. The default
    /// does nothing.
    fn cancel_document(&mut self) -> bool {
        false
    }

    /// One-time setup from a configuration string, before `connect`.
    fn configure(&mut self, args: &str) -> DriverResult;

    fn connect(&mut self) -> DriverResult;

    fn disconnect(&mut self) -> DriverResult;

    fn is_connected(&self) -> bool;

    /// Text of the most recent failure, empty if none.
    fn last_error_message(&self) -> String;

    /// Fiscal documents not yet transmitted to the tax authority.
    fn unsend_counter(&self) -> u32;

    fn name(&self) -> &str {
        UNKNOWN_DRIVER_NAME
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn doc_format(&self) -> FiscalFormat {
        FiscalFormat::Unknown
    }
}

impl<D: FiscalDriver + ?Sized> FiscalDriver for Box<D> {
    fn session_status(&self) -> SessionStatus {
        (**self).session_status()
    }
    fn open_session(&mut self) -> DriverResult {
        (**self).open_session()
    }
    fn close_session(&mut self) -> DriverResult {
        (**self).close_session()
    }
    fn open_receipt(&mut self, receipt: &Receipt) -> DriverResult {
        (**self).open_receipt(receipt)
    }
    fn register_position(&mut self, position: &Position) -> DriverResult {
        (**self).register_position(position)
    }
    fn single_payment(&mut self, kind: PaymentType, amount: u32) -> DriverResult {
        (**self).single_payment(kind, amount)
    }
    fn close_receipt(&mut self, total: Option<u32>) -> DriverResult {
        (**self).close_receipt(total)
    }
    fn cancel_document(&mut self) -> bool {
        (**self).cancel_document()
    }
    fn configure(&mut self, args: &str) -> DriverResult {
        (**self).configure(args)
    }
    fn connect(&mut self) -> DriverResult {
        (**self).connect()
    }
    fn disconnect(&mut self) -> DriverResult {
        (**self).disconnect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn last_error_message(&self) -> String {
        (**self).last_error_message()
    }
    fn unsend_counter(&self) -> u32 {
        (**self).unsend_counter()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
    fn version(&self) -> &str {
        (**self).version()
    }
    fn doc_format(&self) -> FiscalFormat {
        (**self).doc_format()
    }
}
