//! Configuration mapper: turns `<category>-<field> = <vendor field id>`
//! entries into the lookup the ingestion path resolves pushed fields with.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::units::{Quantity, Unit, UnitSystem};

// ---------------------------------------------------------------------------
// Sensor categories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Temperature,
    Humidity,
    Pressure,
    Wind,
    Rain,
    Light,
    Lightning,
}

/// (field name, driver id, quantity)
type FieldDef = (&'static str, &'static str, Quantity);

const TEMPERATURE_FIELDS: &[FieldDef] = &[
    ("main", "ST", Quantity::Temperature),
    ("dewpoint", "GV0", Quantity::Temperature),
    ("windchill", "GV1", Quantity::Temperature),
    ("heatindex", "GV2", Quantity::Temperature),
    ("apparent", "GV3", Quantity::Temperature),
    ("inside", "GV4", Quantity::Temperature),
    ("extra1", "GV5", Quantity::Temperature),
    ("extra2", "GV6", Quantity::Temperature),
    ("extra3", "GV7", Quantity::Temperature),
    ("extra4", "GV8", Quantity::Temperature),
    ("extra5", "GV9", Quantity::Temperature),
    ("extra6", "GV10", Quantity::Temperature),
    ("extra7", "GV11", Quantity::Temperature),
    ("extra8", "GV12", Quantity::Temperature),
    ("extra9", "GV13", Quantity::Temperature),
    ("extra10", "GV14", Quantity::Temperature),
    ("max", "GV15", Quantity::Temperature),
    ("min", "GV16", Quantity::Temperature),
    ("soil", "GV17", Quantity::Temperature),
];

const HUMIDITY_FIELDS: &[FieldDef] = &[
    ("main", "ST", Quantity::Percent),
    ("inside", "GV0", Quantity::Percent),
    ("extra1", "GV1", Quantity::Percent),
    ("extra2", "GV2", Quantity::Percent),
    ("extra3", "GV3", Quantity::Percent),
    ("extra4", "GV4", Quantity::Percent),
    ("extra5", "GV5", Quantity::Percent),
];

const PRESSURE_FIELDS: &[FieldDef] = &[
    ("station", "ST", Quantity::Pressure),
    ("sealevel", "GV0", Quantity::Pressure),
    ("trend", "GV1", Quantity::Trend),
];

const WIND_FIELDS: &[FieldDef] = &[
    ("windspeed", "ST", Quantity::WindSpeed),
    ("winddir", "GV0", Quantity::Direction),
    ("gustspeed", "GV1", Quantity::WindSpeed),
    ("gustdir", "GV2", Quantity::Direction),
    ("lullspeed", "GV3", Quantity::WindSpeed),
    ("avgwindspeed", "GV4", Quantity::WindSpeed),
];

const RAIN_FIELDS: &[FieldDef] = &[
    ("rate", "ST", Quantity::RainRate),
    ("hourly", "GV0", Quantity::RainDepth),
    ("daily", "GV1", Quantity::RainDepth),
    ("weekly", "GV2", Quantity::RainDepth),
    ("monthly", "GV3", Quantity::RainDepth),
    ("yearly", "GV4", Quantity::RainDepth),
    ("maxrate", "GV5", Quantity::RainRate),
    ("yesterday", "GV6", Quantity::RainDepth),
];

const LIGHT_FIELDS: &[FieldDef] = &[
    ("uv", "ST", Quantity::UvIndex),
    ("solar_radiation", "GV0", Quantity::Irradiance),
    ("illuminance", "GV1", Quantity::Illuminance),
    ("solar_percent", "GV2", Quantity::Percent),
];

const LIGHTNING_FIELDS: &[FieldDef] = &[
    ("strikes", "ST", Quantity::Count),
    ("distance", "GV0", Quantity::Distance),
];

impl SensorCategory {
    pub const ALL: [SensorCategory; 7] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Wind,
        Self::Rain,
        Self::Light,
        Self::Lightning,
    ];

    /// Node address registered with the host.
    pub fn address(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Wind => "wind",
            Self::Rain => "rain",
            Self::Light => "light",
            Self::Lightning => "lightning",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Temperature => "Temperatures",
            Self::Humidity => "Humidity",
            Self::Pressure => "Barometric Pressure",
            Self::Wind => "Wind",
            Self::Rain => "Precipitation",
            Self::Light => "Illumination",
            Self::Lightning => "Lightning",
        }
    }

    /// Node definition id in the profile.
    pub fn nodedef_id(self) -> &'static str {
        match self {
            Self::Rain => "precipitation",
            other => other.address(),
        }
    }

    /// NLS key used by the profile for this node definition.
    pub fn nls(self) -> &'static str {
        match self {
            Self::Temperature => "139T",
            Self::Humidity => "139H",
            Self::Pressure => "139P",
            Self::Wind => "139W",
            Self::Rain => "139R",
            Self::Light => "139L",
            Self::Lightning => "139S",
        }
    }

    fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Temperature => TEMPERATURE_FIELDS,
            Self::Humidity => HUMIDITY_FIELDS,
            Self::Pressure => PRESSURE_FIELDS,
            Self::Wind => WIND_FIELDS,
            Self::Rain => RAIN_FIELDS,
            Self::Light => LIGHT_FIELDS,
            Self::Lightning => LIGHTNING_FIELDS,
        }
    }

    /// Look up a field by its configuration name.
    pub fn field(self, name: &str) -> Option<(&'static str, &'static str, Quantity)> {
        // Older configurations spell this one without the second 'n'.
        let name = match (self, name) {
            (Self::Light, "illuminace") => "illuminance",
            _ => name,
        };
        self.fields().iter().copied().find(|(f, _, _)| *f == name)
    }

    /// Position of a driver in the category's field table, for stable ordering.
    fn driver_rank(self, driver: &str) -> usize {
        self.fields()
            .iter()
            .position(|(_, d, _)| *d == driver)
            .unwrap_or(usize::MAX)
    }
}

impl FromStr for SensorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.address() == s)
            .ok_or_else(|| format!("unknown sensor category '{s}'"))
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address())
    }
}

// ---------------------------------------------------------------------------
// Mapping table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingEntry {
    pub vendor_field_id: String,
    pub category: SensorCategory,
    pub field: &'static str,
    pub driver: &'static str,
    pub quantity: Quantity,
    /// Unit values are displayed (and reported to the host) in.
    pub unit: Unit,
}

/// Per-category list of (driver id, editor) pairs the profile is generated from.
pub type ProfileTables = BTreeMap<SensorCategory, Vec<(&'static str, &'static str)>>;

#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: HashMap<String, MappingEntry>,
    display: UnitSystem,
    incoming: UnitSystem,
}

/// Integer-looking vendor ids address positional fields; store them in one
/// canonical spelling so " 04" and "4" resolve the same way.
pub fn canonical_field_id(id: &str) -> String {
    let id = id.trim();
    match id.parse::<usize>() {
        Ok(index) => index.to_string(),
        Err(_) => id.to_string(),
    }
}

impl MappingTable {
    /// Build the table from ordered configuration pairs. Keys without a `-`
    /// are settings and are ignored here. Bad entries are reported back and
    /// skipped; the rest of the table is still built.
    pub fn build<'a, I>(
        params: I,
        display: UnitSystem,
        incoming: UnitSystem,
    ) -> (Self, Vec<ConfigError>)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = Self {
            entries: HashMap::new(),
            display,
            incoming,
        };
        let mut errors = Vec::new();
        let mut drivers: HashMap<(SensorCategory, &'static str), String> = HashMap::new();

        for (key, value) in params {
            let Some((category, field)) = key.split_once('-') else {
                debug!(key, "not a mapping key");
                continue;
            };

            let category = match category.parse::<SensorCategory>() {
                Ok(c) => c,
                Err(_) => {
                    errors.push(ConfigError::UnknownCategory {
                        key: key.to_string(),
                        category: category.to_string(),
                    });
                    continue;
                }
            };

            let Some((field, driver, quantity)) = category.field(field) else {
                errors.push(ConfigError::UnknownField {
                    key: key.to_string(),
                    category: category.to_string(),
                    field: field.to_string(),
                });
                continue;
            };

            let vendor_field_id = canonical_field_id(value);
            if vendor_field_id.is_empty() {
                errors.push(ConfigError::EmptyFieldId {
                    key: key.to_string(),
                });
                continue;
            }

            let entry = MappingEntry {
                vendor_field_id: vendor_field_id.clone(),
                category,
                field,
                driver,
                quantity,
                unit: quantity.unit_in(display),
            };

            // A driver is fed by one vendor id; a later key for the same
            // driver (both illuminance spellings, say) replaces the earlier.
            if let Some(old_id) = drivers.insert((category, driver), vendor_field_id.clone()) {
                if old_id != vendor_field_id {
                    table.entries.remove(&old_id);
                    warn!(
                        %category,
                        driver,
                        replaced = %old_id,
                        by = key,
                        "driver mapped twice, keeping the later entry"
                    );
                }
            }

            // Last write wins, including across categories.
            if let Some(previous) = table.entries.insert(vendor_field_id.clone(), entry) {
                if (previous.category, previous.driver) != (category, driver) {
                    drivers.remove(&(previous.category, previous.driver));
                }
                warn!(
                    vendor_field_id = %vendor_field_id,
                    replaced = %format!("{}-{}", previous.category, previous.field),
                    by = key,
                    "vendor field mapped twice, keeping the later entry"
                );
            }
        }

        (table, errors)
    }

    pub fn resolve(&self, vendor_field_id: &str) -> Option<&MappingEntry> {
        self.entries.get(vendor_field_id)
    }

    pub fn display_units(&self) -> UnitSystem {
        self.display
    }

    pub fn incoming_units(&self) -> UnitSystem {
        self.incoming
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one category in driver order.
    pub fn entries_for(&self, category: SensorCategory) -> Vec<&MappingEntry> {
        let mut entries: Vec<&MappingEntry> = self
            .entries
            .values()
            .filter(|e| e.category == category)
            .collect();
        entries.sort_by_key(|e| category.driver_rank(e.driver));
        entries
    }

    /// Whether a particular category field has a mapping.
    pub fn has_field(&self, category: SensorCategory, field: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.category == category && e.field == field)
    }

    pub fn categories(&self) -> Vec<SensorCategory> {
        SensorCategory::ALL
            .into_iter()
            .filter(|c| self.entries.values().any(|e| e.category == *c))
            .collect()
    }

    pub fn profile_tables(&self) -> ProfileTables {
        self.categories()
            .into_iter()
            .map(|c| {
                let drivers = self
                    .entries_for(c)
                    .into_iter()
                    .map(|e| (e.driver, e.unit.editor()))
                    .collect();
                (c, drivers)
            })
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(&str, &str)], display: UnitSystem) -> (MappingTable, Vec<ConfigError>) {
        MappingTable::build(pairs.iter().copied(), display, UnitSystem::Metric)
    }

    #[test]
    fn builds_entries_with_drivers_and_units() {
        let (table, errors) = build(
            &[
                ("temperature-main", "4"),
                ("pressure-trend", "50"),
                ("wind-winddir", "3"),
            ],
            UnitSystem::Metric,
        );
        assert!(errors.is_empty());
        assert_eq!(table.len(), 3);

        let t = table.resolve("4").unwrap();
        assert_eq!(t.category, SensorCategory::Temperature);
        assert_eq!(t.driver, "ST");
        assert_eq!(t.unit, Unit::Celsius);

        assert_eq!(table.resolve("50").unwrap().unit, Unit::TrendIndex);
        assert_eq!(table.resolve("3").unwrap().unit, Unit::Degrees);
    }

    #[test]
    fn display_units_select_driver_units() {
        let (table, _) = build(
            &[
                ("temperature-main", "tempf"),
                ("pressure-sealevel", "baromrelin"),
                ("wind-windspeed", "windspeedmph"),
                ("rain-daily", "dailyrainin"),
                ("lightning-distance", "lightning_dist"),
            ],
            UnitSystem::Us,
        );
        assert_eq!(table.resolve("tempf").unwrap().unit, Unit::Fahrenheit);
        assert_eq!(table.resolve("baromrelin").unwrap().unit, Unit::InchesHg);
        assert_eq!(table.resolve("windspeedmph").unwrap().unit, Unit::MilesPerHour);
        assert_eq!(table.resolve("dailyrainin").unwrap().unit, Unit::Inches);
        assert_eq!(table.resolve("lightning_dist").unwrap().unit, Unit::Miles);
    }

    #[test]
    fn unknown_entries_are_skipped_not_fatal() {
        let (table, errors) = build(
            &[
                ("temperature-main", "4"),
                ("soil-moisture", "9"),
                ("wind-direction", "3"),
                ("humidity-main", "5"),
            ],
            UnitSystem::Metric,
        );
        assert_eq!(table.len(), 2);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ConfigError::UnknownCategory { .. }));
        assert!(matches!(errors[1], ConfigError::UnknownField { .. }));
    }

    #[test]
    fn settings_keys_are_ignored() {
        let (table, errors) = build(
            &[("Port", "8080"), ("Units", "us"), ("rain-rate", "10")],
            UnitSystem::Metric,
        );
        assert!(errors.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_vendor_id_is_rejected() {
        let (table, errors) = build(&[("temperature-main", "  ")], UnitSystem::Metric);
        assert!(table.is_empty());
        assert_eq!(
            errors,
            vec![ConfigError::EmptyFieldId {
                key: "temperature-main".into()
            }]
        );
    }

    #[test]
    fn duplicate_vendor_id_last_write_wins() {
        let (table, errors) = build(
            &[("temperature-main", "7"), ("rain-weekly", "7")],
            UnitSystem::Metric,
        );
        assert!(errors.is_empty());
        assert_eq!(table.len(), 1);
        let entry = table.resolve("7").unwrap();
        assert_eq!(entry.category, SensorCategory::Rain);
        assert_eq!(entry.driver, "GV2");
        assert!(!table.has_field(SensorCategory::Temperature, "main"));
    }

    #[test]
    fn one_vendor_id_per_driver() {
        let (table, errors) = build(
            &[("light-illuminace", "lux_a"), ("light-illuminance", "lux_b")],
            UnitSystem::Metric,
        );
        assert!(errors.is_empty());
        assert_eq!(table.len(), 1);
        assert!(table.resolve("lux_a").is_none());
        assert_eq!(table.resolve("lux_b").unwrap().driver, "GV1");
        assert_eq!(
            table.profile_tables()[&SensorCategory::Light],
            vec![("GV1", "I_LUX")]
        );
    }

    #[test]
    fn driver_freed_when_its_vendor_id_moves() {
        let (table, _) = build(
            &[
                ("temperature-main", "4"),
                ("rain-weekly", "4"),
                ("temperature-main", "9"),
            ],
            UnitSystem::Metric,
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("4").unwrap().category, SensorCategory::Rain);
        assert_eq!(table.resolve("9").unwrap().driver, "ST");
    }

    #[test]
    fn positional_ids_are_canonical() {
        let (table, _) = build(&[("humidity-main", " 05 ")], UnitSystem::Metric);
        assert!(table.resolve("5").is_some());
    }

    #[test]
    fn legacy_illuminance_spelling_accepted() {
        let (table, errors) = build(&[("light-illuminace", "lux")], UnitSystem::Metric);
        assert!(errors.is_empty());
        assert_eq!(table.resolve("lux").unwrap().driver, "GV1");
    }

    #[test]
    fn entries_for_follow_driver_order() {
        let (table, _) = build(
            &[
                ("temperature-heatindex", "45"),
                ("temperature-main", "4"),
                ("temperature-windchill", "44"),
            ],
            UnitSystem::Metric,
        );
        let drivers: Vec<_> = table
            .entries_for(SensorCategory::Temperature)
            .iter()
            .map(|e| e.driver)
            .collect();
        assert_eq!(drivers, vec!["ST", "GV1", "GV2"]);
    }

    #[test]
    fn profile_tables_cover_configured_categories_only() {
        let (table, _) = build(
            &[("pressure-station", "6"), ("pressure-trend", "50"), ("light-uv", "uv")],
            UnitSystem::Us,
        );
        let tables = table.profile_tables();
        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables[&SensorCategory::Pressure],
            vec![("ST", "I_INHG"), ("GV1", "I_TREND")]
        );
        assert_eq!(tables[&SensorCategory::Light], vec![("ST", "I_UV")]);
    }
}
