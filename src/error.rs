//! Poller error types.
//!
//! Configuration problems are fatal before the daemon starts, an
//! unreachable executor is fatal after the startup retry budget, and a
//! handler fault is fatal once the daemon is running. Each maps to a
//! distinct process exit code.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PollerError>;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("cannot read config file {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("config parse failure in {path}: {details}")]
    ConfigParse { path: PathBuf, details: String },

    #[error("config is missing the `app_location` key")]
    MissingLocation,

    #[error("unsupported app location backend `{backend}` (expected local, s3 or gcs)")]
    UnsupportedBackend { backend: String },

    #[error("invalid app location: {details}")]
    InvalidLocation { details: String },

    #[error("invalid setting `{field}`: {details}")]
    InvalidSetting { field: &'static str, details: String },

    #[error("logging setup failed: {0:#}")]
    Logging(#[source] anyhow::Error),

    #[error("cannot set up {backend} handler: {source:#}")]
    HandlerSetup {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("executor did not become healthy after {attempts} attempts")]
    ExecutorUnavailable { attempts: u32 },

    #[error("resource handler fault: {0:#}")]
    Handler(#[source] anyhow::Error),
}

impl PollerError {
    /// Process exit code for this failure.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ExecutorUnavailable { .. } => 1,
            Self::Config { .. }
            | Self::ConfigParse { .. }
            | Self::MissingLocation
            | Self::UnsupportedBackend { .. }
            | Self::InvalidLocation { .. }
            | Self::InvalidSetting { .. }
            | Self::Logging(_)
            | Self::HandlerSetup { .. } => 2,
            Self::Handler(_) => 3,
        }
    }

    pub const fn is_config_error(&self) -> bool {
        self.exit_code() == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PollerError::ExecutorUnavailable { attempts: 10 }.exit_code(), 1);
        assert_eq!(PollerError::MissingLocation.exit_code(), 2);
        assert_eq!(
            PollerError::UnsupportedBackend { backend: "ftp".into() }.exit_code(),
            2
        );
        assert_eq!(
            PollerError::HandlerSetup { backend: "s3", source: anyhow::anyhow!("bad endpoint") }
                .exit_code(),
            2
        );
        assert_eq!(PollerError::Handler(anyhow::anyhow!("boom")).exit_code(), 3);
    }

    #[test]
    fn test_config_error_classification() {
        assert!(PollerError::InvalidLocation { details: "x".into() }.is_config_error());
        assert!(!PollerError::ExecutorUnavailable { attempts: 10 }.is_config_error());
    }

    #[test]
    fn test_handler_error_message_includes_context() {
        let err = anyhow::anyhow!("disk full").context("Failed to write app.py");
        let msg = PollerError::Handler(err).to_string();
        assert!(msg.contains("Failed to write app.py"));
        assert!(msg.contains("disk full"));
    }
}
