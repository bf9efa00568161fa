// ── Bounded telemetry series ──

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::model::TelemetrySample;

/// Append-only, timestamp-ordered ring buffer for one (device, key).
///
/// Holds at most `capacity` samples; with a `max_age`, samples older than
/// `newest - max_age` are dropped as well. Oldest go first either way.
#[derive(Debug, Clone)]
pub(crate) struct Series {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

/// Sample older than the series tail.
#[derive(Debug)]
pub(crate) struct OutOfOrder {
    pub sample: TelemetrySample,
    pub tail: DateTime<Utc>,
}

impl Series {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append `sample`, returning how many samples were evicted.
    pub(crate) fn push(
        &mut self,
        sample: TelemetrySample,
        max_age: Option<Duration>,
    ) -> Result<usize, OutOfOrder> {
        if let Some(tail) = self.tail() {
            if sample.timestamp < tail {
                return Err(OutOfOrder { sample, tail });
            }
        }

        let newest = sample.timestamp;
        self.samples.push_back(sample);

        let mut evicted = 0;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        if let Some(cutoff) = max_age.and_then(|age| newest.checked_sub_signed(age)) {
            while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
                self.samples.pop_front();
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    pub(crate) fn tail(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.timestamp)
    }

    pub(crate) fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub(crate) fn to_vec(&self) -> Vec<TelemetrySample> {
        self.samples.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(secs: i64, v: f64) -> TelemetrySample {
        TelemetrySample::new("dev-001", "temperature", v, at(secs))
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest_first() {
        let mut series = Series::new(3);
        for i in 0..5 {
            series.push(sample(i, 1.0), None).unwrap();
            assert!(series.len() <= 3);
        }
        let values: Vec<_> = series.to_vec().iter().map(|s| s.timestamp).collect();
        assert_eq!(values, vec![at(2), at(3), at(4)]);
    }

    #[test]
    fn push_reports_evictions() {
        let mut series = Series::new(1);
        assert_eq!(series.push(sample(0, 1.0), None).unwrap(), 0);
        assert_eq!(series.push(sample(1, 2.0), None).unwrap(), 1);
    }

    #[test]
    fn out_of_order_sample_is_refused() {
        let mut series = Series::new(10);
        series.push(sample(10, 1.0), None).unwrap();
        let err = series.push(sample(5, 2.0), None).unwrap_err();
        assert_eq!(err.tail, at(10));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn equal_timestamps_are_accepted() {
        let mut series = Series::new(10);
        series.push(sample(10, 1.0), None).unwrap();
        series.push(sample(10, 2.0), None).unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn max_age_drops_stale_samples() {
        let mut series = Series::new(100);
        series.push(sample(0, 1.0), Some(Duration::seconds(60))).unwrap();
        series.push(sample(30, 2.0), Some(Duration::seconds(60))).unwrap();
        let evicted = series.push(sample(90, 3.0), Some(Duration::seconds(60))).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(series.latest().unwrap().timestamp, at(90));
        assert_eq!(series.len(), 2);
    }
}
