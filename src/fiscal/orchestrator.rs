//! Receipt orchestration.
//!
//! Sequences session handling, document opening, position registration,
//! payments and closing against any [`FiscalDriver`]. Every driver sees the
//! same call order for the same receipt; nothing here depends on the device.

use super::driver::{DriverError, FiscalDriver};
use super::receipt::{Payment, Receipt, SessionStatus};
use crate::logging::Logger;
use tracing::debug;

/// Drives a [`FiscalDriver`] through one receipt at a time.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    log: Logger,
}

impl Orchestrator {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    pub fn logger(&self) -> &Logger {
        &self.log
    }

    /// Fiscalize `receipt` on `driver`. Returns `true` only if the document
    /// was closed.
    ///
    /// Session problems fail without cancellation. Any failure from opening
    /// the document onwards runs [`Self::cancel_document`] exactly once.
    /// Nothing is retried.
    pub fn create_receipt<D>(&self, driver: &mut D, receipt: &Receipt) -> bool
    where
        D: FiscalDriver + ?Sized,
    {
        if !self.ensure_session(driver) {
            return false;
        }

        if let Err(e) = driver.open_receipt(receipt) {
            self.log.error_with("Failed to open receipt", &e);
            return self.cancel_document(driver);
        }

        for (idx, pos) in receipt.items.iter().enumerate() {
            if let Err(e) = driver.register_position(pos) {
                let text = format!("Failed to register position #{} '{}'", idx + 1, pos.name);
                self.log.error_with(text, &e);
                return self.cancel_document(driver);
            }
        }

        if let Err(e) = self.apply_payment(driver, &receipt.payment) {
            self.log.error_with("Failed to apply payment", &e);
            return self.cancel_document(driver);
        }

        if let Err(e) = driver.close_receipt(receipt.rounded_sum) {
            self.log.error_with("Failed to close receipt", &e);
            return self.cancel_document(driver);
        }

        debug!(
            "Receipt closed: {} positions, {} paid",
            receipt.items.len(),
            receipt.payment.total()
        );
        true
    }

    /// Bring the session to a state where a document may be opened.
    fn ensure_session<D>(&self, driver: &mut D) -> bool
    where
        D: FiscalDriver + ?Sized,
    {
        let mut status = driver.session_status();
        debug!("Session status: {status:?}");

        if status == SessionStatus::Unknown {
            self.log.error("Fiscal session state is unknown");
            return false;
        }

        if status == SessionStatus::Expired {
            if let Err(e) = driver.close_session() {
                self.log.error_with("Failed to close expired session", &e);
                return false;
            }
            status = driver.session_status();
        }

        if status == SessionStatus::Closed {
            if let Err(e) = driver.open_session() {
                self.log.error_with("Failed to open session", &e);
                return false;
            }
        }

        true
    }

    /// Apply non-zero payment slots in ascending type-code order, stopping at
    /// the first rejection.
    fn apply_payment<D>(&self, driver: &mut D, payment: &Payment) -> Result<(), DriverError>
    where
        D: FiscalDriver + ?Sized,
    {
        for (kind, amount) in payment.slots() {
            if amount == 0 {
                continue;
            }
            driver.single_payment(kind, amount)?;
        }
        Ok(())
    }

    /// Log the cancellation, give the driver a chance to void the document,
    /// and report failure.
    fn cancel_document<D>(&self, driver: &mut D) -> bool
    where
        D: FiscalDriver + ?Sized,
    {
        self.log.info("Cancelling document...");
        if driver.cancel_document() {
            debug!("Driver voided the partial document");
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
