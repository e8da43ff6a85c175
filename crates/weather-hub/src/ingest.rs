//! Vendor push parsing and the per-field ingestion pipeline.
//!
//! A push is split into `(vendor field id, raw value)` pairs, then every pair
//! is resolved against the mapping, interpreted, converted from the incoming
//! unit system to the display one and written to its node. The whole batch
//! runs under the station write lock.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::ConversionError;
use crate::mapping::{canonical_field_id, MappingEntry, SensorCategory};
use crate::rain::RainPeriod;
use crate::state::Station;
use crate::trend::Trend;
use crate::units::{self, Quantity, Unit, UnitSystem};

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

// ---------------------------------------------------------------------------
// Vendor formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorFormat {
    /// Weather Display clientraw: one space separated record, fields by position.
    WeatherDisplay,
    AmbientWeather,
    WeatherUnderground,
    Ecowitt,
}

impl VendorFormat {
    /// Pick the format from a marker anywhere in the request path.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.to_ascii_lowercase();
        if path.contains("weatherdisplay") || path.contains("clientraw") {
            Some(Self::WeatherDisplay)
        } else if path.contains("ambientweather") {
            Some(Self::AmbientWeather)
        } else if path.contains("updateweatherstation") || path.contains("wunderground") {
            Some(Self::WeatherUnderground)
        } else if path.contains("ecowitt") {
            Some(Self::Ecowitt)
        } else {
            None
        }
    }

    pub fn is_positional(self) -> bool {
        matches!(self, Self::WeatherDisplay)
    }
}

impl fmt::Display for VendorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WeatherDisplay => "weatherdisplay",
            Self::AmbientWeather => "ambientweather",
            Self::WeatherUnderground => "wunderground",
            Self::Ecowitt => "ecowitt",
        })
    }
}

/// Split a raw payload (query string or body) into ordered field pairs.
pub fn parse_payload(format: VendorFormat, raw: &str) -> Vec<(String, String)> {
    if format.is_positional() {
        let plus_decoded = raw.replace('+', " ");
        let decoded = urlencoding::decode_binary(plus_decoded.as_bytes());
        String::from_utf8_lossy(&decoded)
            .split_whitespace()
            .enumerate()
            .map(|(i, token)| (i.to_string(), token.to_string()))
            .collect()
    } else {
        url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Value interpretation
// ---------------------------------------------------------------------------

/// Degrees for a 16-point compass label.
pub fn compass_to_degrees(label: &str) -> Option<f64> {
    let label = label.trim().to_ascii_uppercase();
    COMPASS_POINTS
        .iter()
        .position(|p| *p == label)
        .map(|i| i as f64 * 22.5)
}

/// Turn a raw pushed value into a number in the incoming unit.
fn interpret(
    entry: &MappingEntry,
    raw: &str,
    incoming: UnitSystem,
) -> Result<f64, ConversionError> {
    let numeric = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite());

    match (entry.quantity, numeric) {
        (_, Some(v)) if entry.quantity != Quantity::Trend => Ok(v),
        // A numeric trend is the pressure change over the station's window,
        // in the incoming pressure unit. Thresholds are in millibars.
        (Quantity::Trend, Some(delta)) => {
            let delta_mb =
                units::convert(delta, Quantity::Pressure.unit_in(incoming), Unit::Millibar)?;
            Ok(f64::from(Trend::from_drop(-delta_mb).code()))
        }
        (Quantity::Trend, None) => Ok(f64::from(Trend::from_label(raw).code())),
        (Quantity::Direction, None) => match compass_to_degrees(raw) {
            Some(deg) => Ok(deg),
            None => {
                error!(field = %entry.vendor_field_id, raw, "unknown compass direction");
                Ok(0.0)
            }
        },
        _ => Err(ConversionError::NotNumeric {
            field: entry.vendor_field_id.clone(),
            raw: raw.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Batch processing
// ---------------------------------------------------------------------------

/// Outcome of one push.
#[derive(Debug)]
pub struct BatchReport {
    /// Pushed fields written to a driver.
    pub applied: usize,
    /// Drivers filled in from other readings of the same push.
    pub derived: usize,
    pub failures: Vec<ConversionError>,
}

impl BatchReport {
    pub fn unmapped(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f, ConversionError::Unmapped(_)))
            .count()
    }
}

/// Metric readings captured while applying a push, for derived drivers.
#[derive(Default)]
struct Readings {
    temperature_c: Option<f64>,
    humidity: Option<f64>,
    windspeed_kph: Option<f64>,
    station_mb: Option<f64>,
    sealevel_mb: Option<f64>,
    supplied: HashSet<(SensorCategory, &'static str)>,
}

impl Readings {
    fn capture(&mut self, entry: &MappingEntry, value: f64, incoming: UnitSystem) {
        let to_metric = |v| units::convert_between(v, entry.quantity, incoming, UnitSystem::Metric);
        let slot = match (entry.category, entry.field) {
            (SensorCategory::Temperature, "main") => &mut self.temperature_c,
            (SensorCategory::Humidity, "main") => &mut self.humidity,
            (SensorCategory::Wind, "windspeed") => &mut self.windspeed_kph,
            (SensorCategory::Pressure, "station") => &mut self.station_mb,
            (SensorCategory::Pressure, "sealevel") => &mut self.sealevel_mb,
            _ => return,
        };
        *slot = to_metric(value).ok();
    }
}

/// Apply one parsed push to the station.
pub fn ingest(
    station: &mut Station,
    format: VendorFormat,
    pairs: &[(String, String)],
) -> BatchReport {
    let mut report = BatchReport {
        applied: 0,
        derived: 0,
        failures: Vec::new(),
    };
    let mut readings = Readings::default();

    for (id, raw) in pairs {
        match apply_field(station, &mut readings, id, raw) {
            Ok(()) => report.applied += 1,
            Err(e @ ConversionError::Unmapped(_)) => {
                debug!(%format, field = %id, "ignoring unmapped field");
                report.failures.push(e);
            }
            Err(e) => {
                warn!(%format, field = %id, raw = %raw, "field skipped: {e}");
                report.failures.push(e);
            }
        }
    }

    report.derived = fill_derived(station, &readings);

    info!(
        %format,
        applied = report.applied,
        derived = report.derived,
        unmapped = report.unmapped(),
        failed = report.failures.len() - report.unmapped(),
        "push processed"
    );
    station.record_ingest(format!(
        "{format}: {} applied, {} derived, {} skipped",
        report.applied,
        report.derived,
        report.failures.len()
    ));

    report
}

fn apply_field(
    station: &mut Station,
    readings: &mut Readings,
    id: &str,
    raw: &str,
) -> Result<(), ConversionError> {
    let id = canonical_field_id(id);
    let entry = station
        .mapping()
        .resolve(&id)
        .cloned()
        .ok_or(ConversionError::Unmapped(id))?;
    let incoming = station.mapping().incoming_units();
    let incoming_unit = entry.quantity.unit_in(incoming);

    let value = interpret(&entry, raw, incoming)?;

    let display = match RainPeriod::from_field(entry.field) {
        Some(period) if entry.category == SensorCategory::Rain => {
            let increment_mm = units::convert(value, incoming_unit, Unit::Millimeters)?;
            let total_mm = station.add_rain(period, increment_mm);
            units::convert(total_mm, Unit::Millimeters, entry.unit)?
        }
        _ => units::convert(value, incoming_unit, entry.unit)?,
    };

    readings.capture(&entry, value, incoming);
    readings.supplied.insert((entry.category, entry.field));
    station.set_driver(entry.category, entry.driver, display);
    Ok(())
}

/// Fill configured drivers the push did not carry but whose inputs it did.
/// Also feeds the pressure trend tracker. Returns the number of drivers set.
fn fill_derived(station: &mut Station, readings: &Readings) -> usize {
    let supplied = &readings.supplied;
    let mut filled = 0;

    let mut sealevel_mb = readings.sealevel_mb;
    if let (Some(station_mb), None) = (readings.station_mb, readings.sealevel_mb) {
        let slp = units::sea_level_pressure(station_mb, station.settings().elevation);
        filled += fill(station, supplied, SensorCategory::Pressure, "sealevel", slp);
        sealevel_mb = Some(slp);
    }

    if let Some(mb) = sealevel_mb.or(readings.station_mb) {
        let trend = station.record_pressure(mb);
        filled += fill(
            station,
            supplied,
            SensorCategory::Pressure,
            "trend",
            f64::from(trend.code()),
        );
    }

    if let Some(t) = readings.temperature_c {
        let ws = readings.windspeed_kph.map(units::kph_to_mps);
        let temp = SensorCategory::Temperature;

        if let Some(rh) = readings.humidity {
            if let Some(dp) = units::dewpoint(t, rh) {
                filled += fill(station, supplied, temp, "dewpoint", dp);
            }
            filled += fill(station, supplied, temp, "heatindex", units::heat_index(t, rh));
            if let Some(ws) = ws {
                let at = units::apparent_temperature(t, ws, rh);
                filled += fill(station, supplied, temp, "apparent", at);
            }
        }
        if let Some(ws) = ws {
            filled += fill(station, supplied, temp, "windchill", units::wind_chill(t, ws));
        }
    }

    filled
}

/// Write one derived metric value if its driver is configured and was not
/// pushed. Returns 1 when a driver was set.
fn fill(
    station: &mut Station,
    supplied: &HashSet<(SensorCategory, &'static str)>,
    category: SensorCategory,
    field: &str,
    metric: f64,
) -> usize {
    let Some((field, driver, quantity)) = category.field(field) else {
        return 0;
    };
    if supplied.contains(&(category, field)) || !station.mapping().has_field(category, field) {
        return 0;
    }

    let display = station.mapping().display_units();
    match units::convert_between(metric, quantity, UnitSystem::Metric, display) {
        Ok(value) if station.set_driver(category, driver, value) => {
            debug!(%category, field, value, "derived driver filled");
            1
        }
        Ok(_) => 0,
        Err(e) => {
            warn!(%category, field, "derived value dropped: {e}");
            0
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use crate::host::{HostEvent, HostLink};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn station(pairs: &[(&str, &str)]) -> (Station, UnboundedReceiver<HostEvent>) {
        let (host, rx) = HostLink::channel();
        let mut st = Station::new(host);
        st.apply_config(&StationConfig::from_pairs(pairs.iter().copied()));
        (st, rx)
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    // -- formats and parsing ------------------------------------------------

    #[test]
    fn path_markers_select_format() {
        assert_eq!(
            VendorFormat::from_path("/clientraw.txt"),
            Some(VendorFormat::WeatherDisplay)
        );
        assert_eq!(
            VendorFormat::from_path("/WeatherDisplay"),
            Some(VendorFormat::WeatherDisplay)
        );
        assert_eq!(
            VendorFormat::from_path("/data/AmbientWeather/report"),
            Some(VendorFormat::AmbientWeather)
        );
        assert_eq!(
            VendorFormat::from_path("/weatherstation/updateweatherstation.php"),
            Some(VendorFormat::WeatherUnderground)
        );
        assert_eq!(
            VendorFormat::from_path("/data/report/ecowitt"),
            Some(VendorFormat::Ecowitt)
        );
        assert_eq!(VendorFormat::from_path("/favicon.ico"), None);
    }

    #[test]
    fn positional_payload_is_indexed() {
        let fields = parse_payload(VendorFormat::WeatherDisplay, "12345+1.5%202.0 NNE");
        assert_eq!(
            fields,
            pairs(&[("0", "12345"), ("1", "1.5"), ("2", "2.0"), ("3", "NNE")])
        );
    }

    #[test]
    fn key_value_payload_keeps_order() {
        let fields = parse_payload(
            VendorFormat::AmbientWeather,
            "PASSKEY=abc&tempf=71.6&winddir=SW&date=2024-05-10+12%3A00",
        );
        assert_eq!(
            fields,
            pairs(&[
                ("PASSKEY", "abc"),
                ("tempf", "71.6"),
                ("winddir", "SW"),
                ("date", "2024-05-10 12:00"),
            ])
        );
    }

    #[test]
    fn compass_labels() {
        assert_eq!(compass_to_degrees("N"), Some(0.0));
        assert_eq!(compass_to_degrees("E"), Some(90.0));
        assert_eq!(compass_to_degrees("SW"), Some(225.0));
        assert_eq!(compass_to_degrees("nnw"), Some(337.5));
        assert_eq!(compass_to_degrees("north"), None);
    }

    // -- pipeline -----------------------------------------------------------

    #[test]
    fn mapped_and_unmapped_fields() {
        let (mut st, mut rx) = station(&[("temperature-main", "4")]);
        while rx.try_recv().is_ok() {}

        let report = ingest(
            &mut st,
            VendorFormat::WeatherDisplay,
            &pairs(&[("4", "21.5"), ("5", "60")]),
        );

        assert_eq!(report.applied, 1);
        assert_eq!(report.unmapped(), 1);
        assert_eq!(st.driver_value(SensorCategory::Temperature, "ST"), Some(21.5));
        assert_eq!(
            rx.try_recv().ok(),
            Some(HostEvent::Report {
                address: "temperature".into(),
                driver: "ST".into(),
                value: 21.5,
                uom: 4,
            })
        );
    }

    #[test]
    fn direction_labels_and_numbers() {
        let (mut st, _rx) = station(&[("wind-winddir", "3"), ("wind-gustdir", "4")]);
        let fields = parse_payload(VendorFormat::WeatherDisplay, "0 0 0 SW 270");
        ingest(&mut st, VendorFormat::WeatherDisplay, &fields);

        assert_eq!(st.driver_value(SensorCategory::Wind, "GV0"), Some(225.0));
        assert_eq!(st.driver_value(SensorCategory::Wind, "GV2"), Some(270.0));
    }

    #[test]
    fn unknown_direction_label_is_zero() {
        let (mut st, _rx) = station(&[("wind-winddir", "winddir")]);
        st.set_driver(SensorCategory::Wind, "GV0", 90.0);
        let report = ingest(
            &mut st,
            VendorFormat::Ecowitt,
            &pairs(&[("winddir", "sideways")]),
        );
        assert_eq!(report.applied, 1);
        assert_eq!(st.driver_value(SensorCategory::Wind, "GV0"), Some(0.0));
    }

    #[test]
    fn non_numeric_value_is_skipped() {
        let (mut st, _rx) = station(&[("temperature-main", "temp")]);
        let report = ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("temp", "--")]));
        assert_eq!(report.applied, 0);
        assert!(matches!(
            report.failures[0],
            ConversionError::NotNumeric { .. }
        ));
    }

    #[test]
    fn incoming_us_displayed_metric() {
        let (mut st, _rx) = station(&[
            ("IncomingUnits", "us"),
            ("temperature-main", "tempf"),
            ("pressure-station", "baromabsin"),
            ("wind-windspeed", "windspeedmph"),
        ]);
        ingest(
            &mut st,
            VendorFormat::AmbientWeather,
            &pairs(&[
                ("tempf", "77"),
                ("baromabsin", "29.921"),
                ("windspeedmph", "10"),
            ]),
        );

        assert_eq!(st.driver_value(SensorCategory::Temperature, "ST"), Some(25.0));
        assert!(approx(
            st.driver_value(SensorCategory::Pressure, "ST").unwrap(),
            1013.25,
            0.02
        ));
        assert_eq!(st.driver_value(SensorCategory::Wind, "ST"), Some(16.09));
    }

    #[test]
    fn descriptive_and_numeric_trends() {
        let (mut st, _rx) = station(&[("pressure-trend", "trend")]);
        ingest(
            &mut st,
            VendorFormat::Ecowitt,
            &pairs(&[("trend", "Falling slowly")]),
        );
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(5.0));

        ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("trend", "-1.5")]));
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(0.0));

        ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("trend", "0.4")]));
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(1.0));
    }

    #[test]
    fn numeric_trend_in_inches_is_classified_in_millibars() {
        let (mut st, _rx) = station(&[("IncomingUnits", "us"), ("pressure-trend", "trend")]);

        // -0.05 inHg is about -1.7 mb.
        ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("trend", "-0.05")]));
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(0.0));

        // 0.02 inHg is about 0.7 mb.
        ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("trend", "0.02")]));
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(1.0));
    }

    #[test]
    fn rain_increments_accumulate() {
        let (mut st, _rx) = station(&[("IncomingUnits", "us"), ("rain-daily", "dailyrainin")]);
        ingest(&mut st, VendorFormat::AmbientWeather, &pairs(&[("dailyrainin", "0.1")]));
        assert_eq!(st.driver_value(SensorCategory::Rain, "GV1"), Some(2.54));

        ingest(&mut st, VendorFormat::AmbientWeather, &pairs(&[("dailyrainin", "0.1")]));
        assert_eq!(st.driver_value(SensorCategory::Rain, "GV1"), Some(5.08));
    }

    #[test]
    fn rain_rate_is_not_accumulated() {
        let (mut st, _rx) = station(&[("rain-rate", "rainratein"), ("Units", "us")]);
        ingest(&mut st, VendorFormat::AmbientWeather, &pairs(&[("rainratein", "0.5")]));
        ingest(&mut st, VendorFormat::AmbientWeather, &pairs(&[("rainratein", "0.5")]));
        assert_eq!(st.driver_value(SensorCategory::Rain, "ST"), Some(0.02));
    }

    #[test]
    fn pressure_feeds_tracker_once_per_push() {
        let (mut st, _rx) = station(&[
            ("pressure-station", "abs"),
            ("pressure-sealevel", "rel"),
            ("pressure-trend", "t"),
        ]);
        ingest(
            &mut st,
            VendorFormat::Ecowitt,
            &pairs(&[("abs", "990"), ("rel", "1013")]),
        );
        assert_eq!(st.pressure_history_len(), 1);
        // First sample is compared against an empty history.
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(2.0));

        ingest(
            &mut st,
            VendorFormat::Ecowitt,
            &pairs(&[("abs", "990"), ("rel", "1013.5")]),
        );
        assert_eq!(st.driver_value(SensorCategory::Pressure, "GV1"), Some(1.0));
    }

    #[test]
    fn sea_level_derived_from_station_and_elevation() {
        let (mut st, _rx) = station(&[
            ("Elevation", "1000"),
            ("pressure-station", "abs"),
            ("pressure-sealevel", "rel"),
        ]);
        let report = ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("abs", "900")]));
        assert_eq!(report.derived, 1);
        assert!(approx(
            st.driver_value(SensorCategory::Pressure, "GV0").unwrap(),
            1014.6,
            0.1
        ));
    }

    #[test]
    fn derived_temperatures_fill_unsupplied_drivers() {
        let (mut st, _rx) = station(&[
            ("IncomingUnits", "us"),
            ("temperature-main", "tempf"),
            ("temperature-dewpoint", "dewptf"),
            ("temperature-windchill", "windchillf"),
            ("humidity-main", "humidity"),
            ("wind-windspeed", "windspeedmph"),
        ]);
        let report = ingest(
            &mut st,
            VendorFormat::WeatherUnderground,
            &pairs(&[("tempf", "77"), ("humidity", "50"), ("windspeedmph", "3")]),
        );

        assert_eq!(report.derived, 2);
        assert_eq!(
            st.driver_value(SensorCategory::Temperature, "GV0"),
            Some(13.9)
        );
        // Too warm for wind chill: passthrough of the air temperature.
        assert_eq!(
            st.driver_value(SensorCategory::Temperature, "GV1"),
            Some(25.0)
        );
    }

    #[test]
    fn supplied_derived_values_are_not_overwritten() {
        let (mut st, _rx) = station(&[
            ("temperature-main", "temp"),
            ("temperature-dewpoint", "dew"),
            ("humidity-main", "hum"),
        ]);
        let report = ingest(
            &mut st,
            VendorFormat::Ecowitt,
            &pairs(&[("temp", "25"), ("hum", "50"), ("dew", "12.0")]),
        );
        assert_eq!(report.derived, 0);
        assert_eq!(
            st.driver_value(SensorCategory::Temperature, "GV0"),
            Some(12.0)
        );
    }

    #[test]
    fn batch_is_logged_as_event() {
        let (mut st, _rx) = station(&[("humidity-main", "hum")]);
        ingest(&mut st, VendorFormat::Ecowitt, &pairs(&[("hum", "40")]));
        let status = st.to_status();
        assert!(status.events[0].detail.starts_with("ecowitt: 1 applied"));
    }
}
