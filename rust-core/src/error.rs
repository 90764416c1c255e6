//! Error types for the sleep-stage engine.
//!
//! Runtime input never fails: malformed samples are defaulted and missing data
//! yields "no result". The only fallible surfaces are configuration (validation
//! and file loading) and talking to an engine actor whose thread has stopped.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating, loading or saving an [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be written.
    #[error("Cannot write config file `{path}`: {source}")]
    FileWrite {
        /// Path that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration could not be serialized.
    #[error("Cannot serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by an [`crate::actor::EngineHandle`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActorError {
    /// The owning engine thread has stopped and no longer accepts commands.
    #[error("engine actor is no longer running")]
    Disconnected,

    /// The engine thread could not be started.
    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),

    /// The owning engine thread panicked.
    #[error("engine actor thread panicked")]
    Panicked,
}
