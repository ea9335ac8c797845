//! Configuration strings for drivers.
//!
//! A driver's configuration string is a JSON object with camelCase keys.
//! Missing keys take the driver's defaults; a blank string means "all
//! defaults".

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration value '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Parse a configuration string into `T`.
pub fn parse_config<T>(args: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let args = args.trim();
    if args.is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(args)?)
}
