//! Error taxonomy for the hub. None of these are fatal once the process is
//! running: each one is confined to a config entry, a field, the profile
//! writer, or the listener.

use std::path::PathBuf;

use thiserror::Error;

use crate::units::Unit;

/// A single configuration entry that could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("'{key}': unknown sensor category '{category}'")]
    UnknownCategory { key: String, category: String },

    #[error("'{key}': category '{category}' has no field '{field}'")]
    UnknownField {
        key: String,
        category: String,
        field: String,
    },

    #[error("'{key}': vendor field id is empty")]
    EmptyFieldId { key: String },

    #[error("'{key}': invalid value '{value}' ({reason})")]
    InvalidSetting {
        key: String,
        value: String,
        reason: &'static str,
    },
}

/// A single pushed field that could not be turned into a driver value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("vendor field '{0}' is not mapped")]
    Unmapped(String),

    #[error("vendor field '{field}': value '{raw}' is not numeric")]
    NotNumeric { field: String, raw: String },

    #[error("cannot convert {from:?} to {to:?}")]
    IncompatibleUnits { from: Unit, to: Unit },
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to create profile directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write node definitions to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ListenerStartError {
    #[error("failed to bind ingestion listener on port {port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
