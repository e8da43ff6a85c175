//! Station configuration: the host's key/value parameters, loaded from a
//! TOML file at startup or pushed by the host as JSON.
//!
//! ```toml
//! [params]
//! Port = 8080
//! Units = "us"
//! IncomingUnits = "metric"
//! Elevation = 230
//! "temperature-main" = "4"
//! "wind-winddir" = "3"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::units::UnitSystem;

pub const DEFAULT_PORT: u16 = 8080;

const KEY_PORT: &str = "Port";
const KEY_UNITS: &str = "Units";
const KEY_INCOMING_UNITS: &str = "IncomingUnits";
const KEY_ELEVATION: &str = "Elevation";

// ---------------------------------------------------------------------------
// Config structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    params: toml::Table,
}

/// Ordered key/value parameters exactly as the host supplies them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationConfig {
    params: Vec<(String, String)>,
}

/// Settings derived from the non-mapping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub units: UnitSystem,
    pub incoming_units: UnitSystem,
    /// Station elevation in meters, used for sea-level pressure.
    pub elevation: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            units: UnitSystem::Metric,
            incoming_units: UnitSystem::Metric,
            elevation: 0.0,
        }
    }
}

impl StationConfig {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a TOML document with a `[params]` table.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;
        let mut params = Vec::with_capacity(file.params.len());
        for (key, value) in file.params {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => bail!("param '{key}' must be a scalar, got {}", other.type_str()),
            };
            params.push((key, value));
        }
        Ok(Self { params })
    }

    /// Parse a JSON object of parameters as pushed by the host.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(payload).context("config push is not a JSON object")?;
        let mut params = Vec::with_capacity(map.len());
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => bail!("param '{key}' must be a scalar, got {other}"),
            };
            params.push((key, value));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Derive settings. Malformed values fall back to their defaults and are
    /// reported alongside.
    pub fn settings(&self) -> (Settings, Vec<ConfigError>) {
        let mut settings = Settings::default();
        let mut errors = Vec::new();

        if let Some(v) = self.get(KEY_PORT) {
            match v.trim().parse::<u16>() {
                Ok(p) if p > 0 => settings.port = p,
                _ => errors.push(invalid(KEY_PORT, v, "expected a TCP port number")),
            }
        }

        if let Some(v) = self.get(KEY_UNITS) {
            match v.parse::<UnitSystem>() {
                Ok(u) => settings.units = u,
                Err(_) => errors.push(invalid(KEY_UNITS, v, "expected metric, us or uk")),
            }
        }

        if let Some(v) = self.get(KEY_INCOMING_UNITS) {
            match v.parse::<UnitSystem>() {
                Ok(u) => settings.incoming_units = u,
                Err(_) => errors.push(invalid(KEY_INCOMING_UNITS, v, "expected metric, us or uk")),
            }
        }

        if let Some(v) = self.get(KEY_ELEVATION) {
            match v.trim().parse::<f64>() {
                Ok(e) if e.is_finite() => settings.elevation = e,
                _ => errors.push(invalid(KEY_ELEVATION, v, "expected meters")),
            }
        }

        (settings, errors)
    }
}

fn invalid(key: &str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file.
pub fn load(path: &str) -> Result<StationConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config = StationConfig::from_toml(&contents)
        .with_context(|| format!("failed to parse config: {path}"))?;
    info!(path, params = config.len(), "config loaded");
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
