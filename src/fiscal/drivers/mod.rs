//! Driver implementations and factory.

pub mod virtual_device;

use super::driver::{DriverError, FiscalDriver};
use tracing::info;

/// Create and configure a driver by kind name.
///
/// The driver is configured but not connected.
pub fn create_driver(kind: &str, config: &str) -> Result<Box<dyn FiscalDriver>, DriverError> {
    let mut driver: Box<dyn FiscalDriver> = match kind {
        "virtual" | "emulator" => Box::new(virtual_device::VirtualDevice::new()),
        other => {
            return Err(DriverError::InvalidState(format!(
                "Unsupported fiscal driver: '{other}'. Supported: virtual"
            )))
        }
    };
    driver.configure(config)?;
    info!("Created fiscal driver '{}' v{}", driver.name(), driver.version());
    Ok(driver)
}
