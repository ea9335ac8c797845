//! Fiscal register façade.
//!
//! Owns one driver behind a `Mutex` so concurrent callers are serialized onto
//! the device, and exposes the caller-facing surface: configure, connect,
//! create receipts, disconnect, and the status accessors.

use super::driver::{DriverError, FiscalDriver};
use super::orchestrator::Orchestrator;
use super::receipt::{FiscalFormat, Receipt};
use crate::logging::Logger;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// A connected (or connectable) fiscal device plus the orchestrator that
/// drives it.
pub struct FiscalRegister<D: FiscalDriver> {
    driver: Mutex<D>,
    orchestrator: Orchestrator,
}

impl<D: FiscalDriver> FiscalRegister<D> {
    pub fn new(driver: D, log: Logger) -> Self {
        Self {
            driver: Mutex::new(driver),
            orchestrator: Orchestrator::new(log),
        }
    }

    fn driver(&self) -> MutexGuard<'_, D> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(&self) -> &Logger {
        self.orchestrator.logger()
    }

    /// Apply a configuration string. Call before [`Self::connect`].
    pub fn configure(&self, args: &str) -> bool {
        match self.driver().configure(args) {
            Ok(()) => true,
            Err(e) => {
                self.log().error_with("Configuration failed", &e);
                false
            }
        }
    }

    pub fn connect(&self) -> bool {
        let mut drv = self.driver();
        match drv.connect() {
            Ok(()) => {
                self.log().info(format!("Connected to {}", drv.name()));
                true
            }
            Err(e) => {
                self.log().error_with(format!("Failed to connect to {}", drv.name()), &e);
                false
            }
        }
    }

    pub fn disconnect(&self) -> bool {
        let mut drv = self.driver();
        match drv.disconnect() {
            Ok(()) => {
                self.log().info(format!("Disconnected from {}", drv.name()));
                true
            }
            Err(e) => {
                self.log().error_with(format!("Failed to disconnect from {}", drv.name()), &e);
                false
            }
        }
    }

    /// Fiscalize one receipt. The device stays locked for the whole sequence.
    pub fn create_receipt(&self, receipt: &Receipt) -> bool {
        let mut drv = self.driver();
        self.orchestrator.create_receipt(&mut *drv, receipt)
    }

    pub fn is_connected(&self) -> bool {
        self.driver().is_connected()
    }

    pub fn last_error_message(&self) -> String {
        self.driver().last_error_message()
    }

    pub fn unsend_counter(&self) -> u32 {
        self.driver().unsend_counter()
    }

    pub fn name(&self) -> String {
        self.driver().name().to_string()
    }

    pub fn version(&self) -> String {
        self.driver().version().to_string()
    }

    pub fn doc_format(&self) -> FiscalFormat {
        self.driver().doc_format()
    }

    /// Run `f` with exclusive access to the driver, e.g. for driver-specific
    /// operations outside the common contract.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut drv = self.driver();
        f(&mut *drv)
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        let drv = self.driver.get_mut().unwrap_or_else(|e| e.into_inner());
        if drv.is_connected() {
            drv.disconnect()?;
            info!("{} disconnected on shutdown", drv.name());
        }
        Ok(())
    }
}

impl<D: FiscalDriver> Drop for FiscalRegister<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error disconnecting during shutdown: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
