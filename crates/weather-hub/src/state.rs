use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Settings, StationConfig};
use crate::host::{DriverValue, HostEvent, HostLink};
use crate::mapping::{MappingTable, ProfileTables, SensorCategory};
use crate::rain::{RainAccumulators, RainPeriod, RainTotals};
use crate::trend::{PressureTrend, Trend};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

const PORT_CHANGE_NOTICE: &str = "Restart node server for Port change to take effect";

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// The one lock guarding mapping, node values, trend history and rain
/// accumulators together.
pub type SharedState = Arc<RwLock<Station>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct Station {
    pub started_at: Instant,
    pub host_connected: bool,
    config: Option<StationConfig>,
    settings: Settings,
    mapping: MappingTable,
    nodes: BTreeMap<SensorCategory, NodeState>,
    trend: PressureTrend,
    rain: RainAccumulators,
    events: VecDeque<StationEvent>,
    host: HostLink,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeState {
    pub address: &'static str,
    pub name: &'static str,
    pub drivers: Vec<DriverState>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverState {
    pub driver: &'static str,
    pub field: &'static str,
    pub value: f64,
    pub uom: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Ingest,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the status API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub host_connected: bool,
    pub port: u16,
    pub units: String,
    pub incoming_units: String,
    pub mapped_fields: usize,
    pub nodes: Vec<NodeState>,
    pub pressure_history: usize,
    pub rain_mm: RainTotals,
    pub events: Vec<StationEvent>,
}

// ---------------------------------------------------------------------------
// Construction & configuration
// ---------------------------------------------------------------------------

impl NodeState {
    fn for_category(category: SensorCategory, mapping: &MappingTable) -> Self {
        let drivers = mapping
            .entries_for(category)
            .into_iter()
            .map(|e| DriverState {
                driver: e.driver,
                field: e.field,
                value: 0.0,
                uom: e.unit.uom(),
            })
            .collect();

        Self {
            address: category.address(),
            name: category.display_name(),
            drivers,
            last_update: None,
        }
    }

    fn driver_values(&self) -> Vec<DriverValue> {
        self.drivers
            .iter()
            .map(|d| DriverValue {
                driver: d.driver.to_string(),
                value: d.value,
                uom: d.uom,
            })
            .collect()
    }
}

impl Station {
    pub fn new(host: HostLink) -> Self {
        Self {
            started_at: Instant::now(),
            host_connected: false,
            config: None,
            settings: Settings::default(),
            mapping: MappingTable::default(),
            nodes: BTreeMap::new(),
            trend: PressureTrend::new(),
            rain: RainAccumulators::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
            host,
        }
    }

    /// Rebuild settings, the mapping table and every node from `config`.
    ///
    /// Returns the tables the profile must be regenerated from, or `None`
    /// when `config` is identical to what is already applied. Trend history
    /// and rain totals are kept.
    pub fn apply_config(&mut self, config: &StationConfig) -> Option<ProfileTables> {
        if self.config.as_ref() == Some(config) {
            debug!("configuration unchanged");
            return None;
        }

        let (settings, mut errors) = config.settings();
        let (mapping, mapping_errors) =
            MappingTable::build(config.params(), settings.units, settings.incoming_units);
        errors.extend(mapping_errors);

        for e in &errors {
            warn!("config entry skipped: {e}");
            self.record_error(format!("config: {e}"));
        }

        self.host.clear_notices();
        if self.config.is_some() && self.settings.port != settings.port {
            self.host.notice(PORT_CHANGE_NOTICE);
        }

        self.nodes = mapping
            .categories()
            .into_iter()
            .map(|c| (c, NodeState::for_category(c, &mapping)))
            .collect();

        info!(
            units = %settings.units,
            incoming_units = %settings.incoming_units,
            mapped_fields = mapping.len(),
            nodes = self.nodes.len(),
            skipped = errors.len(),
            "configuration applied"
        );
        self.push_event(
            EventKind::Config,
            format!(
                "{} field(s) mapped into {} node(s), {} entr{} skipped",
                mapping.len(),
                self.nodes.len(),
                errors.len(),
                if errors.len() == 1 { "y" } else { "ies" }
            ),
        );

        self.settings = settings;
        self.mapping = mapping;
        self.config = Some(config.clone());

        self.discover();
        Some(self.mapping.profile_tables())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    pub fn host(&self) -> &HostLink {
        &self.host
    }

    #[cfg(test)]
    pub fn node(&self, category: SensorCategory) -> Option<&NodeState> {
        self.nodes.get(&category)
    }

    pub fn driver_value(&self, category: SensorCategory, driver: &str) -> Option<f64> {
        self.nodes
            .get(&category)?
            .drivers
            .iter()
            .find(|d| d.driver == driver)
            .map(|d| d.value)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Store a driver value and report it to the host. Returns false when the
    /// driver is not part of the current node layout.
    pub fn set_driver(&mut self, category: SensorCategory, driver: &str, value: f64) -> bool {
        let Some(node) = self.nodes.get_mut(&category) else {
            return false;
        };
        let Some(d) = node.drivers.iter_mut().find(|d| d.driver == driver) else {
            return false;
        };

        d.value = value;
        node.last_update = Some(OffsetDateTime::now_utc());

        self.host.send(HostEvent::Report {
            address: node.address.to_string(),
            driver: d.driver.to_string(),
            value,
            uom: d.uom,
        });
        true
    }

    /// Feed a pressure sample (mb) to the trend tracker.
    pub fn record_pressure(&mut self, millibar: f64) -> Trend {
        self.trend.update(millibar)
    }

    /// Add a rain increment (mm) to one accumulator; returns the running total (mm).
    pub fn add_rain(&mut self, period: RainPeriod, millimeters: f64) -> f64 {
        self.rain.add(period, millimeters)
    }

    #[cfg(test)]
    pub fn pressure_history_len(&self) -> usize {
        self.trend.len()
    }

    // -----------------------------------------------------------------------
    // Host requests
    // -----------------------------------------------------------------------

    /// Report every driver of every node.
    pub fn query(&self) {
        for node in self.nodes.values() {
            for d in &node.drivers {
                self.host.send(HostEvent::Report {
                    address: node.address.to_string(),
                    driver: d.driver.to_string(),
                    value: d.value,
                    uom: d.uom,
                });
            }
        }
    }

    /// Announce configured nodes and drop nodes for unconfigured categories.
    pub fn discover(&self) {
        for category in SensorCategory::ALL {
            match self.nodes.get(&category) {
                Some(node) => self.host.send(HostEvent::AddNode {
                    address: node.address.to_string(),
                    name: node.name.to_string(),
                    nodedef: category.nodedef_id().to_string(),
                    drivers: node.driver_values(),
                }),
                None => self.host.send(HostEvent::RemoveNode {
                    address: category.address().to_string(),
                }),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    pub fn record_ingest(&mut self, detail: String) {
        self.push_event(EventKind::Ingest, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            host_connected: self.host_connected,
            port: self.settings.port,
            units: self.settings.units.to_string(),
            incoming_units: self.settings.incoming_units.to_string(),
            mapped_fields: self.mapping.len(),
            nodes: self.nodes.values().cloned().collect(),
            pressure_history: self.trend.len(),
            rain_mm: self.rain.totals(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(StationEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
