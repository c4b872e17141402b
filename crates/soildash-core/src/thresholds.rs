//! Alert thresholds for soil and climate readings.
//!
//! Each metric has an inclusive `[min, max]` band. A reading outside the band
//! is a threshold breach and raises a warning (see [`crate::alerts`]).
//!
//! # Example
//!
//! ```
//! use soildash_core::AlertThresholds;
//! use soildash_types::Metric;
//!
//! let thresholds = AlertThresholds::default();
//! assert!(thresholds.range(Metric::Temperature).contains(25.0));
//! assert!(!thresholds.range(Metric::SoilMoisture).contains(12.0));
//! ```

use serde::{Deserialize, Serialize};

use soildash_types::{Metric, TelemetryReading};

/// Inclusive band for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub min: f64,
    pub max: f64,
}

impl ThresholdRange {
    /// Create a band.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the band (bounds included).
    pub fn contains(&self, value: f64) -> bool {
        is_within_threshold(value, self.min, self.max)
    }

    /// Which side of the band `value` falls on, if outside.
    pub fn breach(&self, value: f64) -> Option<BreachKind> {
        if value < self.min {
            Some(BreachKind::Below)
        } else if value > self.max {
            Some(BreachKind::Above)
        } else {
            None
        }
    }
}

/// Side of a threshold band that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachKind {
    Below,
    Above,
}

/// A metric value outside its band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub metric: Metric,
    pub kind: BreachKind,
    pub value: f64,
    /// The bound that was crossed.
    pub threshold: f64,
}

/// User-editable thresholds for all metrics.
///
/// Serialized flat (`tempMin`, `tempMax`, `humMin`, ...) to stay compatible
/// with settings written by the web dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertThresholds {
    pub temp_min: f64,
    pub temp_max: f64,
    pub hum_min: f64,
    pub hum_max: f64,
    pub soil_min: f64,
    pub soil_max: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temp_min: 10.0,
            temp_max: 40.0,
            hum_min: 20.0,
            hum_max: 95.0,
            soil_min: 20.0,
            soil_max: 95.0,
        }
    }
}

impl AlertThresholds {
    /// Band for one metric.
    pub fn range(&self, metric: Metric) -> ThresholdRange {
        match metric {
            Metric::Temperature => ThresholdRange::new(self.temp_min, self.temp_max),
            Metric::Humidity => ThresholdRange::new(self.hum_min, self.hum_max),
            Metric::SoilMoisture => ThresholdRange::new(self.soil_min, self.soil_max),
        }
    }

    /// Replace the band for one metric.
    pub fn set_range(&mut self, metric: Metric, range: ThresholdRange) {
        match metric {
            Metric::Temperature => {
                self.temp_min = range.min;
                self.temp_max = range.max;
            }
            Metric::Humidity => {
                self.hum_min = range.min;
                self.hum_max = range.max;
            }
            Metric::SoilMoisture => {
                self.soil_min = range.min;
                self.soil_max = range.max;
            }
        }
    }

    /// All metrics of `reading` that fall outside their band.
    pub fn breaches(&self, reading: &TelemetryReading) -> Vec<Breach> {
        Metric::ALL
            .into_iter()
            .filter_map(|metric| {
                let range = self.range(metric);
                let value = reading.value(metric);
                range.breach(value).map(|kind| Breach {
                    metric,
                    kind,
                    value,
                    threshold: match kind {
                        BreachKind::Below => range.min,
                        BreachKind::Above => range.max,
                    },
                })
            })
            .collect()
    }

    /// Check that every band has `min <= max`.
    pub fn validate(&self) -> Result<(), String> {
        for metric in Metric::ALL {
            let range = self.range(metric);
            if range.min > range.max {
                return Err(format!(
                    "{} minimum ({}) is greater than maximum ({})",
                    metric, range.min, range.max
                ));
            }
        }
        Ok(())
    }
}

/// Whether `value` lies in `[min, max]`.
pub fn is_within_threshold(value: f64, min: f64, max: f64) -> bool {
    value >= min && value <= max
}
