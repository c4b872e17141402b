//! Synthetic telemetry for demo mode and tests.
//!
//! [`MockGenerator`] produces readings that follow a slow sine wave per
//! metric, with a little random jitter and exponential smoothing against the
//! previous emitted value so that consecutive readings never jump.
//!
//! The generator is an explicit instance: its smoothing state belongs to it,
//! [`MockGenerator::reset`] clears it and [`MockGenerator::with_seed`] makes
//! the random parts reproducible.
//!
//! [`MockSource`] wraps a generator behind the [`TelemetrySource`] trait so the
//! poller can run in demo mode without a device.

use std::f64::consts::PI;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use soildash_types::{DeviceStatus, TelemetryReading};

use crate::client::HistoryRange;
use crate::error::{Error, Result};
use crate::traits::TelemetrySource;

/// Default smoothing factor applied to each new target value.
pub const DEFAULT_SMOOTHING: f64 = 0.3;

/// Default probability of a random `DANGER` status.
pub const DEFAULT_ANOMALY_PROBABILITY: f64 = 0.02;

/// Spacing between readings produced by [`MockGenerator::generate_history`].
pub const HISTORY_SPACING: Duration = Duration::from_secs(5 * 60);

/// A sinusoid advanced by wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wave {
    /// Centre value.
    pub base: f64,
    /// Peak deviation from `base`.
    pub amplitude: f64,
    /// Length of one full cycle.
    pub period: Duration,
    /// Phase offset in radians.
    pub phase: f64,
    /// Full width of the uniform jitter added to each target (`±jitter/2`).
    pub jitter: f64,
}

impl Wave {
    /// Value of the wave at `at`, without jitter.
    pub fn value_at(&self, at: OffsetDateTime) -> f64 {
        let period_ms = self.period.as_millis().max(1) as i128;
        let now_ms = at.unix_timestamp_nanos() / 1_000_000;
        let fraction = now_ms.rem_euclid(period_ms) as f64 / period_ms as f64;
        self.base + self.amplitude * (fraction * 2.0 * PI + self.phase).sin()
    }
}

/// Shape of the generated signal.
#[derive(Debug, Clone, PartialEq)]
pub struct MockConfig {
    /// Temperature wave (°C).
    pub temperature: Wave,
    /// Humidity wave (%).
    pub humidity: Wave,
    /// Soil moisture wave (%).
    pub soil_moisture: Wave,
    /// Weight of the new target in `α·target + (1−α)·previous`.
    pub smoothing: f64,
    /// Probability of flagging an otherwise safe reading as `DANGER`.
    pub anomaly_probability: f64,
}

impl Default for MockConfig {
    fn default() -> Self {
        let period = Duration::from_secs(2 * 3600);
        Self {
            temperature: Wave {
                base: 22.0,
                amplitude: 4.0,
                period,
                phase: 0.0,
                jitter: 0.5,
            },
            humidity: Wave {
                base: 55.0,
                amplitude: 10.0,
                period,
                phase: PI / 2.0,
                jitter: 1.0,
            },
            soil_moisture: Wave {
                base: 60.0,
                amplitude: 15.0,
                period,
                phase: PI,
                jitter: 2.0,
            },
            smoothing: DEFAULT_SMOOTHING,
            anomaly_probability: DEFAULT_ANOMALY_PROBABILITY,
        }
    }
}

impl MockConfig {
    /// Wider, faster waves used for back-filled history (1 h period, 5 % anomalies).
    pub fn history() -> Self {
        let period = Duration::from_secs(3600);
        Self {
            temperature: Wave {
                base: 22.0,
                amplitude: 8.0,
                period,
                phase: 0.0,
                jitter: 2.0,
            },
            humidity: Wave {
                base: 55.0,
                amplitude: 20.0,
                period,
                phase: PI / 2.0,
                jitter: 5.0,
            },
            soil_moisture: Wave {
                base: 60.0,
                amplitude: 30.0,
                period,
                phase: PI,
                jitter: 10.0,
            },
            smoothing: 1.0,
            anomaly_probability: 0.05,
        }
    }
}

/// Smoothed sine-wave telemetry generator.
///
/// # Example
///
/// ```
/// use soildash_core::MockGenerator;
///
/// let mut generator = MockGenerator::with_seed(7);
/// let reading = generator.next_reading();
/// assert!((0.0..=50.0).contains(&reading.temperature_c));
/// assert!((0.0..=100.0).contains(&reading.soil_moisture_pct));
/// ```
#[derive(Debug)]
pub struct MockGenerator {
    config: MockConfig,
    rng: StdRng,
    previous: Option<[f64; 3]>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    /// Create a generator with the default wave shapes and OS entropy.
    pub fn new() -> Self {
        Self::with_config(MockConfig::default(), StdRng::from_os_rng())
    }

    /// Create a reproducible generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_config(MockConfig::default(), StdRng::seed_from_u64(seed))
    }

    /// Create a generator with custom wave shapes.
    pub fn with_config(config: MockConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            previous: None,
        }
    }

    /// The wave configuration.
    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Forget the smoothing state; the next reading starts from the raw target.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Produce a reading for the current wall-clock time.
    pub fn next_reading(&mut self) -> TelemetryReading {
        self.next_at(OffsetDateTime::now_utc())
    }

    /// Produce a reading for `at`.
    pub fn next_at(&mut self, at: OffsetDateTime) -> TelemetryReading {
        let target = [
            self.target(self.config.temperature, at),
            self.target(self.config.humidity, at),
            self.target(self.config.soil_moisture, at),
        ];

        let alpha = self.config.smoothing.clamp(0.0, 1.0);
        let emitted = match self.previous {
            None => target,
            Some(prev) => [
                alpha * target[0] + (1.0 - alpha) * prev[0],
                alpha * target[1] + (1.0 - alpha) * prev[1],
                alpha * target[2] + (1.0 - alpha) * prev[2],
            ],
        };

        let temperature_c = emitted[0].clamp(0.0, 50.0);
        let humidity_pct = emitted[1].clamp(0.0, 100.0);
        let soil_moisture_pct = emitted[2].clamp(0.0, 100.0);
        self.previous = Some([temperature_c, humidity_pct, soil_moisture_pct]);

        let anomaly = self
            .rng
            .random_bool(self.config.anomaly_probability.clamp(0.0, 1.0));
        let status = if anomaly || is_dangerous(temperature_c, humidity_pct, soil_moisture_pct) {
            DeviceStatus::Danger
        } else {
            DeviceStatus::Safe
        };

        TelemetryReading::new(temperature_c, humidity_pct, soil_moisture_pct, status, at)
    }

    /// Generate `count` readings spaced `spacing` apart and ending at `end`,
    /// newest first.
    ///
    /// History uses [`MockConfig::history`] shapes and no smoothing; only the
    /// random anomaly flips the status, as on the real device's backlog.
    pub fn generate_history(
        &mut self,
        count: usize,
        spacing: Duration,
        end: OffsetDateTime,
    ) -> Vec<TelemetryReading> {
        let shape = MockConfig::history();
        let probability = shape.anomaly_probability;

        (0..count)
            .map(|i| {
                let at = end - spacing * i as u32;
                let temperature_c = self.target(shape.temperature, at).clamp(0.0, 50.0);
                let humidity_pct = self.target(shape.humidity, at).clamp(0.0, 100.0);
                let soil_moisture_pct = self.target(shape.soil_moisture, at).clamp(0.0, 100.0);
                let status = if self.rng.random_bool(probability) {
                    DeviceStatus::Danger
                } else {
                    DeviceStatus::Safe
                };
                TelemetryReading::new(temperature_c, humidity_pct, soil_moisture_pct, status, at)
            })
            .collect()
    }

    fn target(&mut self, wave: Wave, at: OffsetDateTime) -> f64 {
        let jitter = (self.rng.random::<f64>() - 0.5) * wave.jitter;
        wave.value_at(at) + jitter
    }
}

/// Hardcoded danger band used by the demo generator.
fn is_dangerous(temperature_c: f64, humidity_pct: f64, soil_moisture_pct: f64) -> bool {
    !(10.0..=35.0).contains(&temperature_c)
        || !(20.0..=90.0).contains(&humidity_pct)
        || soil_moisture_pct < 15.0
}

/// A [`MockGenerator`] exposed as a [`TelemetrySource`].
#[derive(Debug)]
pub struct MockSource {
    device_id: String,
    generator: Mutex<MockGenerator>,
}

impl MockSource {
    /// Device id reported by demo sources.
    pub const DEMO_DEVICE_ID: &'static str = "demo";

    /// Wrap a generator.
    pub fn new(generator: MockGenerator) -> Self {
        Self {
            device_id: Self::DEMO_DEVICE_ID.to_string(),
            generator: Mutex::new(generator),
        }
    }

    /// Reset the wrapped generator's smoothing state.
    pub fn reset(&self) {
        self.generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new(MockGenerator::new())
    }
}

#[async_trait]
impl TelemetrySource for MockSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_name(&self) -> &str {
        "Demo Device"
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<TelemetryReading> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_reading())
    }

    async fn fetch_history(
        &self,
        range: HistoryRange,
        cancel: &CancellationToken,
    ) -> Vec<TelemetryReading> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        let count = (range.duration().as_secs() / HISTORY_SPACING.as_secs()) as usize;
        self.generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate_history(count, HISTORY_SPACING, OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn quiet_config() -> MockConfig {
        MockConfig {
            anomaly_probability: 0.0,
            ..MockConfig::default()
        }
    }

    #[test]
    fn test_values_are_clamped_to_sensor_ranges() {
        let mut generator = MockGenerator::with_seed(1);
        let start = datetime!(2025-01-01 00:00:00 UTC);
        for minute in 0..240 {
            let r = generator.next_at(start + Duration::from_secs(minute * 60));
            assert!((0.0..=50.0).contains(&r.temperature_c));
            assert!((0.0..=100.0).contains(&r.humidity_pct));
            assert!((0.0..=100.0).contains(&r.soil_moisture_pct));
        }
    }

    #[test]
    fn test_first_reading_is_near_wave() {
        let mut generator = MockGenerator::with_config(quiet_config(), StdRng::seed_from_u64(3));
        let at = datetime!(2025-01-01 00:00:00 UTC);
        let config = generator.config().clone();
        let r = generator.next_at(at);

        assert!((r.temperature_c - config.temperature.value_at(at)).abs() <= 0.25);
        assert!((r.humidity_pct - config.humidity.value_at(at)).abs() <= 0.5);
        assert!((r.soil_moisture_pct - config.soil_moisture.value_at(at)).abs() <= 1.0);
    }

    #[test]
    fn test_consecutive_readings_are_smoothed() {
        let mut generator = MockGenerator::with_seed(42);
        let at = datetime!(2025-03-01 10:00:00 UTC);
        let first = generator.next_at(at);
        let second = generator.next_at(at);

        // Same instant: only jitter differs, and only α of it passes through.
        assert!((second.temperature_c - first.temperature_c).abs() <= DEFAULT_SMOOTHING * 0.5);
        assert!((second.humidity_pct - first.humidity_pct).abs() <= DEFAULT_SMOOTHING * 1.0);
        assert!(
            (second.soil_moisture_pct - first.soil_moisture_pct).abs() <= DEFAULT_SMOOTHING * 2.0
        );
    }

    #[test]
    fn test_deltas_never_exceed_amplitude() {
        let mut generator = MockGenerator::with_seed(9);
        let config = generator.config().clone();
        let start = datetime!(2025-03-01 00:00:00 UTC);
        let mut prev = generator.next_at(start);
        for tick in 1..500 {
            let next = generator.next_at(start + Duration::from_secs(tick * 5));
            assert!((next.temperature_c - prev.temperature_c).abs() < config.temperature.amplitude);
            assert!((next.humidity_pct - prev.humidity_pct).abs() < config.humidity.amplitude);
            assert!(
                (next.soil_moisture_pct - prev.soil_moisture_pct).abs()
                    < config.soil_moisture.amplitude
            );
            prev = next;
        }
    }

    #[test]
    fn test_seeded_generators_are_reproducible() {
        let at = datetime!(2025-05-05 05:05:05 UTC);
        let a = MockGenerator::with_seed(11).next_at(at);
        let b = MockGenerator::with_seed(11).next_at(at);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reset_clears_smoothing() {
        let at = datetime!(2025-05-05 05:05:05 UTC);
        let later = at + Duration::from_secs(1800);

        let mut reset = MockGenerator::with_seed(5);
        reset.next_at(at);
        reset.reset();
        let after_reset = reset.next_at(later);

        let mut kept = MockGenerator::with_seed(5);
        kept.next_at(at);
        let smoothed = kept.next_at(later);

        // After a reset the reading is the raw target again.
        let wave = MockConfig::default().temperature;
        assert!((after_reset.temperature_c - wave.value_at(later)).abs() <= 0.25);
        assert_ne!(after_reset.temperature_c, smoothed.temperature_c);
    }

    #[test]
    fn test_danger_band() {
        assert!(is_dangerous(36.0, 50.0, 50.0));
        assert!(is_dangerous(9.0, 50.0, 50.0));
        assert!(is_dangerous(20.0, 19.0, 50.0));
        assert!(is_dangerous(20.0, 91.0, 50.0));
        assert!(is_dangerous(20.0, 50.0, 14.0));
        assert!(!is_dangerous(20.0, 50.0, 50.0));
    }

    #[test]
    fn test_no_anomalies_when_probability_zero() {
        let mut generator = MockGenerator::with_config(quiet_config(), StdRng::seed_from_u64(8));
        // Default waves stay inside the safe band at every phase.
        let start = datetime!(2025-01-01 00:00:00 UTC);
        for minute in 0..120 {
            let r = generator.next_at(start + Duration::from_secs(minute * 60));
            assert_eq!(r.status, DeviceStatus::Safe);
        }
    }

    #[test]
    fn test_generate_history_spacing_and_order() {
        let mut generator = MockGenerator::with_seed(2);
        let end = datetime!(2025-01-01 12:00:00 UTC);
        let history = generator.generate_history(12, HISTORY_SPACING, end);

        assert_eq!(history.len(), 12);
        assert_eq!(history[0].timestamp, end);
        assert_eq!(history[11].timestamp, end - HISTORY_SPACING * 11);
        for pair in history.windows(2) {
            assert_eq!(pair[0].timestamp - pair[1].timestamp, HISTORY_SPACING);
        }
    }

    #[tokio::test]
    async fn test_mock_source_fetch() {
        let source = MockSource::new(MockGenerator::with_seed(1));
        let reading = source.fetch(&CancellationToken::new()).await.unwrap();
        assert!((0.0..=50.0).contains(&reading.temperature_c));
        assert_eq!(source.device_id(), "demo");
    }

    #[tokio::test]
    async fn test_mock_source_respects_cancellation() {
        let source = MockSource::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(source.fetch(&cancel).await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_mock_source_history_covers_range() {
        let source = MockSource::new(MockGenerator::with_seed(1));
        let history = source
            .fetch_history(HistoryRange::LastHour, &CancellationToken::new())
            .await;
        assert_eq!(history.len(), 12);
    }
}
