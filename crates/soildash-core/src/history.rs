//! Bounded, newest-first history of readings.

use std::collections::VecDeque;

use soildash_types::TelemetryReading;

/// Default capacity: 24 hours of readings at one per five minutes.
pub const DEFAULT_MAX_HISTORY: usize = 288;

/// Newest-first ring of readings capped at `capacity`.
///
/// Pushing at capacity evicts the oldest reading, so the buffer always holds
/// the `capacity` most recent readings in insertion order.
///
/// ```
/// use soildash_core::HistoryBuffer;
/// use soildash_types::{DeviceStatus, TelemetryReading};
/// use time::OffsetDateTime;
///
/// let mut buffer = HistoryBuffer::new(2);
/// for t in [20.0, 21.0, 22.0] {
///     buffer.push(TelemetryReading::new(t, 50.0, 50.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH));
/// }
/// assert_eq!(buffer.len(), 2);
/// assert_eq!(buffer.latest().unwrap().temperature_c, 22.0);
/// ```
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    readings: VecDeque<TelemetryReading>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of 0 is raised to 1.
    ///
    /// Storage grows on demand; only up to [`DEFAULT_MAX_HISTORY`] slots are
    /// reserved up front.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_HISTORY)),
            capacity,
        }
    }

    /// Prepend a reading, evicting the oldest beyond capacity.
    pub fn push(&mut self, reading: TelemetryReading) {
        self.readings.push_front(reading);
        self.readings.truncate(self.capacity);
    }

    /// Append older readings (newest-first order) behind the current ones.
    ///
    /// Used to back-fill from `/history`; anything beyond capacity is dropped.
    pub fn extend_older<I>(&mut self, older: I)
    where
        I: IntoIterator<Item = TelemetryReading>,
    {
        let room = self.capacity.saturating_sub(self.readings.len());
        self.readings.extend(older.into_iter().take(room));
    }

    /// Change the capacity, truncating the oldest readings if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.readings.truncate(self.capacity);
    }

    /// Maximum number of readings retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of readings currently held.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Most recent reading.
    pub fn latest(&self) -> Option<&TelemetryReading> {
        self.readings.front()
    }

    /// Oldest retained reading.
    pub fn oldest(&self) -> Option<&TelemetryReading> {
        self.readings.back()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TelemetryReading> + ExactSizeIterator {
        self.readings.iter()
    }

    /// Copy out as a newest-first vector.
    pub fn to_vec(&self) -> Vec<TelemetryReading> {
        self.readings.iter().copied().collect()
    }

    /// Remove all readings.
    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_types::DeviceStatus;
    use time::OffsetDateTime;

    fn reading(n: usize) -> TelemetryReading {
        TelemetryReading::new(
            n as f64,
            50.0,
            50.0,
            DeviceStatus::Safe,
            OffsetDateTime::UNIX_EPOCH + time::Duration::minutes(n as i64),
        )
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let mut buffer = HistoryBuffer::new(usize::MAX);
        assert_eq!(buffer.capacity(), usize::MAX);
        for n in 0..3 {
            buffer.push(reading(n));
        }
        assert_eq!(buffer.len(), 3);
        assert!(buffer.readings.capacity() < 1_000_000);
    }

    #[test]
    fn test_push_orders_newest_first() {
        let mut buffer = HistoryBuffer::new(10);
        for n in 0..3 {
            buffer.push(reading(n));
        }
        let temps: Vec<f64> = buffer.iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![2.0, 1.0, 0.0]);
        assert_eq!(buffer.oldest().unwrap().temperature_c, 0.0);
    }

    #[test]
    fn test_eviction_at_capacity() {
        let mut buffer = HistoryBuffer::new(3);
        for n in 0..5 {
            buffer.push(reading(n));
        }
        assert_eq!(buffer.len(), 3);
        let temps: Vec<f64> = buffer.iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut buffer = HistoryBuffer::new(0);
        buffer.push(reading(1));
        buffer.push(reading(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.latest().unwrap().temperature_c, 2.0);
    }

    #[test]
    fn test_extend_older_fills_remaining_room() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.push(reading(10));
        buffer.extend_older((0..10).rev().map(reading));
        assert_eq!(buffer.len(), 4);
        let temps: Vec<f64> = buffer.iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![10.0, 9.0, 8.0, 7.0]);
    }

    #[test]
    fn test_set_capacity_truncates_oldest() {
        let mut buffer = HistoryBuffer::new(5);
        for n in 0..5 {
            buffer.push(reading(n));
        }
        buffer.set_capacity(2);
        assert_eq!(buffer.to_vec().len(), 2);
        assert_eq!(buffer.oldest().unwrap().temperature_c, 3.0);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(HistoryBuffer::default().capacity(), DEFAULT_MAX_HISTORY);
    }
}

/// Property-based tests for the history cap.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use soildash_types::DeviceStatus;
    use time::OffsetDateTime;

    proptest! {
        /// After any number of pushes the buffer holds exactly the `cap` most
        /// recent readings, newest first.
        #[test]
        fn holds_most_recent_newest_first(cap in 1usize..50, pushes in 0usize..200) {
            let mut buffer = HistoryBuffer::new(cap);
            for n in 0..pushes {
                buffer.push(TelemetryReading::new(
                    n as f64, 0.0, 0.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH,
                ));
            }

            prop_assert!(buffer.len() <= cap);
            prop_assert_eq!(buffer.len(), pushes.min(cap));

            let expected: Vec<f64> = (0..pushes).rev().take(cap).map(|n| n as f64).collect();
            let actual: Vec<f64> = buffer.iter().map(|r| r.temperature_c).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
