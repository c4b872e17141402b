//! Derived statistics over a run of readings.
//!
//! Statistics are computed on demand and never stored. Input is taken in the
//! history buffer's newest-first order; trends are fitted over chronological
//! (oldest to newest) order.

use serde::{Deserialize, Serialize};

use soildash_types::{Metric, TelemetryReading};

/// Default slope magnitude below which a series is considered stable.
pub const DEFAULT_TREND_THRESHOLD: f64 = 0.01;

/// Direction of a least-squares trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Rising faster than the threshold.
    Up,
    /// Falling faster than the threshold.
    Down,
    /// Within the threshold either way.
    Stable,
}

impl Trend {
    /// Classify a slope against `threshold`.
    pub fn from_slope(slope: f64, threshold: f64) -> Self {
        if slope > threshold {
            Trend::Up
        } else if slope < -threshold {
            Trend::Down
        } else {
            Trend::Stable
        }
    }

    /// Arrow glyph for terminal display.
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Up => "↑",
            Trend::Down => "↓",
            Trend::Stable => "→",
        }
    }
}

/// Options for [`calculate_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsOptions {
    /// Also compute standard deviation and trend.
    pub advanced: bool,
    /// Slope magnitude that separates a trend from noise.
    pub trend_threshold: f64,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            advanced: false,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
        }
    }
}

impl StatsOptions {
    /// Basic min/max/avg only.
    pub fn basic() -> Self {
        Self::default()
    }

    /// Include standard deviation and trend.
    pub fn advanced() -> Self {
        Self {
            advanced: true,
            ..Self::default()
        }
    }
}

/// Statistics for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Population standard deviation (advanced mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    /// Least-squares trend (advanced mode, two or more readings).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

/// Statistics for all metrics. Every field is `None` for empty input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryStats {
    /// Number of readings the statistics were computed over.
    pub count: usize,
    pub temperature: Option<MetricStats>,
    pub humidity: Option<MetricStats>,
    pub soil_moisture: Option<MetricStats>,
}

impl TelemetryStats {
    /// Statistics for one metric.
    pub fn get(&self, metric: Metric) -> Option<&MetricStats> {
        match metric {
            Metric::Temperature => self.temperature.as_ref(),
            Metric::Humidity => self.humidity.as_ref(),
            Metric::SoilMoisture => self.soil_moisture.as_ref(),
        }
    }

    /// Whether no readings were available.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Compute statistics over `readings`, given newest first.
///
/// Never panics: empty input yields [`TelemetryStats::default`], a single
/// reading yields `min == max == avg`, a zero standard deviation in advanced
/// mode and no trend.
///
/// ```
/// use soildash_core::stats::{calculate_stats, StatsOptions};
/// use soildash_types::{DeviceStatus, TelemetryReading};
/// use time::OffsetDateTime;
///
/// let r = TelemetryReading::new(10.0, 50.0, 50.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH);
/// let stats = calculate_stats([&r], StatsOptions::advanced());
/// let temp = stats.temperature.unwrap();
/// assert_eq!((temp.min, temp.max, temp.avg), (10.0, 10.0, 10.0));
/// assert_eq!(temp.trend, None);
/// ```
pub fn calculate_stats<'a, I>(readings: I, options: StatsOptions) -> TelemetryStats
where
    I: IntoIterator<Item = &'a TelemetryReading>,
{
    let readings: Vec<&TelemetryReading> = readings.into_iter().collect();
    if readings.is_empty() {
        return TelemetryStats::default();
    }

    let series = |metric: Metric| -> Vec<f64> {
        // Chronological order for trend fitting.
        readings.iter().rev().map(|r| r.value(metric)).collect()
    };

    TelemetryStats {
        count: readings.len(),
        temperature: metric_stats(&series(Metric::Temperature), options),
        humidity: metric_stats(&series(Metric::Humidity), options),
        soil_moisture: metric_stats(&series(Metric::SoilMoisture), options),
    }
}

fn metric_stats(values: &[f64], options: StatsOptions) -> Option<MetricStats> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / n;

    let (std_dev, trend) = if options.advanced {
        let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;
        let trend = (values.len() >= 2)
            .then(|| Trend::from_slope(least_squares_slope(values), options.trend_threshold));
        (Some(variance.sqrt()), trend)
    } else {
        (None, None)
    };

    Some(MetricStats {
        min,
        max,
        avg,
        std_dev,
        trend,
    })
}

/// Slope of the least-squares line through `(index, value)`.
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = values.iter().sum::<f64>() / n as f64;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den == 0.0 { 0.0 } else { num / den }
}

/// Arrow comparing a value with its predecessor (`—` when there is none).
pub fn trend_indicator(current: f64, previous: Option<f64>) -> &'static str {
    match previous {
        None => "—",
        Some(prev) if current > prev => "↑",
        Some(prev) if current < prev => "↓",
        Some(_) => "→",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_types::DeviceStatus;
    use time::OffsetDateTime;

    fn reading(temp: f64, hum: f64, soil: f64) -> TelemetryReading {
        TelemetryReading::new(temp, hum, soil, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn test_empty_input() {
        let readings: [TelemetryReading; 0] = [];
        let stats = calculate_stats(&readings, StatsOptions::advanced());
        assert!(stats.is_empty());
        assert!(stats.temperature.is_none());
        assert!(stats.humidity.is_none());
        assert!(stats.soil_moisture.is_none());
    }

    #[test]
    fn test_single_reading() {
        let readings = [reading(10.0, 40.0, 60.0)];
        let stats = calculate_stats(&readings, StatsOptions::advanced());
        let temp = stats.temperature.unwrap();
        assert_eq!(temp.min, 10.0);
        assert_eq!(temp.max, 10.0);
        assert_eq!(temp.avg, 10.0);
        assert_eq!(temp.std_dev, Some(0.0));
        assert_eq!(temp.trend, None);
    }

    #[test]
    fn test_basic_mode_skips_advanced_fields() {
        let readings = [reading(10.0, 40.0, 60.0), reading(20.0, 50.0, 70.0)];
        let stats = calculate_stats(&readings, StatsOptions::basic());
        let hum = stats.humidity.unwrap();
        assert_eq!(hum.min, 40.0);
        assert_eq!(hum.max, 50.0);
        assert_eq!(hum.avg, 45.0);
        assert!(hum.std_dev.is_none());
        assert!(hum.trend.is_none());
    }

    #[test]
    fn test_population_std_dev() {
        // Values 2, 4, 4, 4, 5, 5, 7, 9 have population std-dev 2.
        let readings: Vec<_> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .into_iter()
            .map(|t| reading(t, 0.0, 0.0))
            .collect();
        let stats = calculate_stats(&readings, StatsOptions::advanced());
        assert!((stats.temperature.unwrap().std_dev.unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_trend_uses_chronological_order() {
        // Newest first: 30 is the latest, so temperature is rising.
        let readings = [
            reading(30.0, 50.0, 40.0),
            reading(20.0, 50.0, 50.0),
            reading(10.0, 50.0, 60.0),
        ];
        let stats = calculate_stats(&readings, StatsOptions::advanced());
        assert_eq!(stats.temperature.unwrap().trend, Some(Trend::Up));
        assert_eq!(stats.humidity.unwrap().trend, Some(Trend::Stable));
        assert_eq!(stats.soil_moisture.unwrap().trend, Some(Trend::Down));
    }

    #[test]
    fn test_trend_threshold() {
        assert_eq!(Trend::from_slope(0.011, 0.01), Trend::Up);
        assert_eq!(Trend::from_slope(0.01, 0.01), Trend::Stable);
        assert_eq!(Trend::from_slope(-0.011, 0.01), Trend::Down);
    }

    #[test]
    fn test_least_squares_slope() {
        assert_eq!(least_squares_slope(&[1.0, 2.0, 3.0, 4.0]), 1.0);
        assert_eq!(least_squares_slope(&[5.0]), 0.0);
        assert_eq!(least_squares_slope(&[3.0, 3.0, 3.0]), 0.0);
    }

    #[test]
    fn test_trend_indicator() {
        assert_eq!(trend_indicator(5.0, None), "—");
        assert_eq!(trend_indicator(5.0, Some(4.0)), "↑");
        assert_eq!(trend_indicator(3.0, Some(4.0)), "↓");
        assert_eq!(trend_indicator(4.0, Some(4.0)), "→");
    }

    #[test]
    fn test_get_by_metric() {
        let readings = [reading(10.0, 40.0, 60.0)];
        let stats = calculate_stats(&readings, StatsOptions::basic());
        assert_eq!(stats.get(Metric::SoilMoisture).unwrap().avg, 60.0);
    }
}
