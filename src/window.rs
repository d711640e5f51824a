use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Window size used by every dashboard page.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// A single observed value of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Fixed-capacity FIFO of samples, kept in arrival order.
///
/// Values are trusted as delivered by the transport: samples are never
/// re-sorted by timestamp and callers filter out non-finite values first.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Build a window from a full series, keeping only the newest `capacity` values.
    pub fn from_values<I>(capacity: usize, values: I, at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut window = Self::new(capacity);
        for value in values {
            window.push_sample(MetricSample::new(at, value));
        }
        window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a value stamped with the current time.
    pub fn push(&mut self, value: f64) {
        self.push_sample(MetricSample::new(Utc::now(), value));
    }

    pub fn push_sample(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|s| s.value)
    }

    /// Arithmetic mean rounded to one decimal; 0 for an empty window.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value).sum();
        round_one_decimal(sum / self.samples.len() as f64)
    }
}

pub(crate) fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_evicts_oldest() {
        let mut window = SampleWindow::new(3);
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            window.push(value);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.values(), vec![3.0, 4.0, 5.0]);
        assert_eq!(window.latest(), Some(5.0));
    }

    #[test]
    fn average_of_empty_window_is_zero() {
        let window = SampleWindow::new(DEFAULT_WINDOW_CAPACITY);
        assert_eq!(window.average(), 0.0);
        assert_eq!(window.latest(), None);
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        let mut window = SampleWindow::new(DEFAULT_WINDOW_CAPACITY);
        window.push(10.0);
        window.push(20.0);
        assert_eq!(window.average(), 15.0);

        window.push(20.0);
        // 50 / 3 = 16.666..
        assert_eq!(window.average(), 16.7);
    }

    #[test]
    fn insertion_order_is_kept_regardless_of_timestamps() {
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(30);
        let mut window = SampleWindow::new(4);
        window.push_sample(MetricSample::new(later, 1.0));
        window.push_sample(MetricSample::new(earlier, 2.0));
        assert_eq!(window.values(), vec![1.0, 2.0]);
    }

    #[test]
    fn from_values_keeps_newest_tail() {
        let window = SampleWindow::from_values(2, [1.0, 2.0, 3.0], Utc::now());
        assert_eq!(window.values(), vec![2.0, 3.0]);
        assert_eq!(window.capacity(), 2);
    }
}
