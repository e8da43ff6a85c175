//! Unit systems, unit conversion, and derived weather metrics.
//!
//! Everything in here is pure. Values are converted straight from the unit
//! the station reports in to the unit the user wants to see; derived
//! metrics always take metric inputs (°C, m/s, mb, m).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

const KM_PER_MILE: f64 = 1.609344;
const INHG_PER_MB: f64 = 0.02952998751;
const INCH_PER_MM: f64 = 0.03937;
const MPS_PER_MPH: f64 = 0.44704;

// Barometric reduction constants.
const GAS_CONSTANT: f64 = 287.05;
const GRAVITY: f64 = 9.80665;
const LAPSE_RATE: f64 = 0.0065;
const REFERENCE_TEMP_K: f64 = 288.15;
const SEA_LEVEL_MB: f64 = 1013.35;

// ---------------------------------------------------------------------------
// Unit systems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Us,
    Uk,
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "us" => Ok(Self::Us),
            "uk" => Ok(Self::Uk),
            other => Err(format!("unknown unit system '{other}' (use metric, us or uk)")),
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Us => write!(f, "us"),
            Self::Uk => write!(f, "uk"),
        }
    }
}

// ---------------------------------------------------------------------------
// Quantities and units
// ---------------------------------------------------------------------------

/// What a driver measures. The quantity decides which unit a value is in
/// for a given unit system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Pressure,
    WindSpeed,
    RainDepth,
    RainRate,
    Distance,
    Direction,
    Trend,
    Percent,
    UvIndex,
    Irradiance,
    Illuminance,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Millibar,
    InchesHg,
    KilometersPerHour,
    MilesPerHour,
    Millimeters,
    Inches,
    MillimetersPerHour,
    InchesPerHour,
    Kilometers,
    Miles,
    Degrees,
    TrendIndex,
    Percent,
    UvIndex,
    WattsPerSquareMeter,
    Lux,
    Strikes,
}

impl Quantity {
    pub fn unit_in(self, system: UnitSystem) -> Unit {
        use UnitSystem::*;
        match (self, system) {
            (Self::Temperature, Us) => Unit::Fahrenheit,
            (Self::Temperature, _) => Unit::Celsius,
            (Self::Pressure, Us) => Unit::InchesHg,
            (Self::Pressure, _) => Unit::Millibar,
            (Self::WindSpeed, Metric) => Unit::KilometersPerHour,
            (Self::WindSpeed, _) => Unit::MilesPerHour,
            (Self::RainDepth, Us) => Unit::Inches,
            (Self::RainDepth, _) => Unit::Millimeters,
            (Self::RainRate, Us) => Unit::InchesPerHour,
            (Self::RainRate, _) => Unit::MillimetersPerHour,
            (Self::Distance, Metric) => Unit::Kilometers,
            (Self::Distance, _) => Unit::Miles,
            (Self::Direction, _) => Unit::Degrees,
            (Self::Trend, _) => Unit::TrendIndex,
            (Self::Percent, _) => Unit::Percent,
            (Self::UvIndex, _) => Unit::UvIndex,
            (Self::Irradiance, _) => Unit::WattsPerSquareMeter,
            (Self::Illuminance, _) => Unit::Lux,
            (Self::Count, _) => Unit::Strikes,
        }
    }
}

impl Unit {
    /// Unit-of-measure code understood by the host's display layer.
    pub fn uom(self) -> u16 {
        match self {
            Self::Celsius => 4,
            Self::Fahrenheit => 17,
            Self::Millibar => 117,
            Self::InchesHg => 23,
            Self::KilometersPerHour => 32,
            Self::MilesPerHour => 48,
            Self::Millimeters => 82,
            Self::Inches => 105,
            Self::MillimetersPerHour => 46,
            Self::InchesPerHour => 24,
            Self::Kilometers => 83,
            Self::Miles => 116,
            Self::Degrees => 76,
            Self::TrendIndex => 25,
            Self::Percent => 22,
            Self::UvIndex => 71,
            Self::WattsPerSquareMeter => 74,
            Self::Lux => 36,
            Self::Strikes => 56,
        }
    }

    /// Editor name used in the node-definition profile.
    pub fn editor(self) -> &'static str {
        match self {
            Self::Celsius => "TEMP_C",
            Self::Fahrenheit => "TEMP_F",
            Self::Millibar => "I_MB",
            Self::InchesHg => "I_INHG",
            Self::KilometersPerHour => "I_KPH",
            Self::MilesPerHour => "I_MPH",
            Self::Millimeters => "I_MM",
            Self::Inches => "I_INCH",
            Self::MillimetersPerHour => "I_MMHR",
            Self::InchesPerHour => "I_INHR",
            Self::Kilometers => "I_KM",
            Self::Miles => "I_MILE",
            Self::Degrees => "I_DEGREE",
            Self::TrendIndex => "I_TREND",
            Self::Percent => "I_HUMIDITY",
            Self::UvIndex => "I_UV",
            Self::WattsPerSquareMeter => "I_RADIATION",
            Self::Lux => "I_LUX",
            Self::Strikes => "I_STRIKES",
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    round_to(c * 1.8 + 32.0, 1)
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    round_to((f - 32.0) / 1.8, 1)
}

/// Convert `value` from one unit to another. Identical units pass the value
/// through untouched; otherwise the result is rounded to the precision the
/// host displays for the target unit.
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, ConversionError> {
    use Unit::*;

    if from == to {
        return Ok(value);
    }

    let converted = match (from, to) {
        (Celsius, Fahrenheit) => celsius_to_fahrenheit(value),
        (Fahrenheit, Celsius) => fahrenheit_to_celsius(value),
        (Millibar, InchesHg) => round_to(value * INHG_PER_MB, 3),
        (InchesHg, Millibar) => round_to(value / INHG_PER_MB, 3),
        (KilometersPerHour, MilesPerHour) => round_to(value / KM_PER_MILE, 2),
        (MilesPerHour, KilometersPerHour) => round_to(value * KM_PER_MILE, 2),
        (Kilometers, Miles) => round_to(value / KM_PER_MILE, 1),
        (Miles, Kilometers) => round_to(value * KM_PER_MILE, 1),
        (Millimeters, Inches) | (MillimetersPerHour, InchesPerHour) => {
            round_to(value * INCH_PER_MM, 2)
        }
        (Inches, Millimeters) | (InchesPerHour, MillimetersPerHour) => {
            round_to(value / INCH_PER_MM, 2)
        }
        _ => return Err(ConversionError::IncompatibleUnits { from, to }),
    };

    Ok(converted)
}

/// Convert a quantity between two unit systems.
pub fn convert_between(
    value: f64,
    quantity: Quantity,
    from: UnitSystem,
    to: UnitSystem,
) -> Result<f64, ConversionError> {
    convert(value, quantity.unit_in(from), quantity.unit_in(to))
}

pub fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

// ---------------------------------------------------------------------------
// Derived metrics (metric inputs)
// ---------------------------------------------------------------------------

/// Magnus-formula dewpoint. `None` when humidity is not a positive
/// percentage, where the logarithm is undefined.
pub fn dewpoint(t: f64, rh: f64) -> Option<f64> {
    if rh <= 0.0 {
        return None;
    }
    let b = (17.625 * t) / (243.04 + t);
    let c = (rh / 100.0).ln();
    let dp = (243.04 * (c + b)) / (17.625 - c - b);
    Some(round_to(dp, 1))
}

/// Apparent ("feels like") temperature from temperature, wind speed (m/s)
/// and relative humidity.
pub fn apparent_temperature(t: f64, ws: f64, rh: f64) -> f64 {
    let vapor = rh / 100.0 * 6.105 * (17.27 * t / (237.7 + t)).exp();
    round_to(t + 0.33 * vapor - 0.70 * ws - 4.0, 1)
}

/// Wind chill. Only defined at or below 50°F with at least 5 mph of wind;
/// otherwise the input temperature comes back unchanged.
pub fn wind_chill(t: f64, ws: f64) -> f64 {
    let tf = t * 1.8 + 32.0;
    let mph = ws / MPS_PER_MPH;

    if tf > 50.0 || mph < 5.0 {
        return t;
    }

    let v = mph.powf(0.16);
    let wc = 35.74 + 0.6215 * tf - 35.75 * v + 0.4275 * tf * v;
    round_to((wc - 32.0) / 1.8, 1)
}

/// Heat index (Rothfusz regression). Only defined at or above 80°F with at
/// least 40% humidity; otherwise the input temperature comes back unchanged.
pub fn heat_index(t: f64, rh: f64) -> f64 {
    let tf = t * 1.8 + 32.0;

    if tf < 80.0 || rh < 40.0 {
        return t;
    }

    let hi = -42.379 + 2.04901523 * tf + 10.1433127 * rh
        - 0.22475541 * tf * rh
        - 6.83783e-3 * tf * tf
        - 5.481717e-2 * rh * rh
        + 1.22874e-3 * tf * tf * rh
        + 8.5282e-4 * tf * rh * rh
        - 1.99e-6 * tf * tf * rh * rh;

    round_to((hi - 32.0) / 1.8, 1)
}

/// Reduce station pressure (mb) at `elevation` meters to sea level.
pub fn sea_level_pressure(station: f64, elevation: f64) -> f64 {
    let rl_over_g = GAS_CONSTANT * LAPSE_RATE / GRAVITY;
    let base = 1.0
        + (SEA_LEVEL_MB / station).powf(rl_over_g) * (LAPSE_RATE * elevation / REFERENCE_TEMP_K);
    round_to(station * base.powf(1.0 / rl_over_g), 3)
}

// ===========================================================================
// Tests
// ===========================================================================
