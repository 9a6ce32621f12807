//! Bounded time-series buffers held per point inside an actor

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// One timestamped sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimedValue {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An append-mostly buffer of samples for a single point
///
/// Samples arrive in timestamp order under normal operation; a sample that
/// lands at or before the current tail replays history, so everything from
/// that timestamp on is discarded before the new sample is appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeriesBuffer {
    points: VecDeque<TimedValue>,
    /// Unit carried by the source stream, once seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Non-finite values are dropped; a timestamp at or
    /// before the tail truncates the buffer back to just before it first.
    pub fn add(&mut self, tv: TimedValue) {
        if !tv.value.is_finite() {
            warn!(value = tv.value, "discarding non-finite sample");
            return;
        }
        while self
            .points
            .back()
            .is_some_and(|last| last.timestamp >= tv.timestamp)
        {
            self.points.pop_back();
        }
        self.points.push_back(tv);
    }

    /// Trim to retention limits, always keeping at least two samples so a
    /// rate of change stays computable.
    pub fn apply_limits(&mut self, max_count: usize, max_age: Duration, now: DateTime<Utc>) {
        let cutoff = now - max_age;
        while self.points.len() > 2
            && (self.points.len() > max_count
                || self.points.front().is_some_and(|p| p.timestamp < cutoff))
        {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&TimedValue> {
        self.points.back()
    }

    pub fn first(&self) -> Option<&TimedValue> {
        self.points.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedValue> {
        self.points.iter()
    }

    /// Samples with timestamps in `(start, end]`
    pub fn window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &TimedValue> {
        self.points
            .iter()
            .filter(move |p| p.timestamp > start && p.timestamp <= end)
    }

    /// Span between the oldest and newest samples
    pub fn range(&self) -> Option<Duration> {
        match (self.points.front(), self.points.back()) {
            (Some(first), Some(last)) => Some(last.timestamp - first.timestamp),
            _ => None,
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
    }
}
