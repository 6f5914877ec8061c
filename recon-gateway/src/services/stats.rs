//! Approximate rolling query statistics
//!
//! Counters are collected into fixed-length intervals and summed into
//! reporting buckets on demand. Accuracy is bounded by the interval length.

use recon_common::time::now_secs;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Length of one collection interval in seconds
pub const DEFAULT_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Queries,
    Errors,
}

#[derive(Debug)]
struct Interval {
    start: i64,
    length: i64,
    queries: u64,
    errors: u64,
}

impl Interval {
    fn new(start: i64, length: i64) -> Self {
        Self {
            start,
            length,
            queries: 0,
            errors: 0,
        }
    }

    fn is_over(&self, now: i64) -> bool {
        now - self.start > self.length
    }

    fn add(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::Queries => self.queries += value,
            Counter::Errors => self.errors += value,
        }
    }
}

/// Reporting window, smallest first
#[derive(Debug, Clone, Copy)]
struct Bucket {
    label: &'static str,
    length: i64,
}

const BUCKETS: [Bucket; 4] = [
    Bucket { label: "Last 5 mins", length: 5 * 60 },
    Bucket { label: "Last hour", length: 60 * 60 },
    Bucket { label: "Last day", length: 24 * 60 * 60 },
    Bucket { label: "Last week", length: 7 * 24 * 60 * 60 },
];

/// Totals for one reporting window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketReport {
    pub label: String,
    pub queries: u64,
    pub errors: u64,
}

/// Report for one data source
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub name: String,
    pub intervals_stored: usize,
    pub buckets: Vec<BucketReport>,
}

/// Per data source query and error counters
pub struct Stats {
    name: String,
    interval_secs: i64,
    intervals: Mutex<VecDeque<Interval>>,
}

impl Stats {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_interval(name, DEFAULT_INTERVAL_SECS)
    }

    pub fn with_interval(name: impl Into<String>, interval_secs: i64) -> Self {
        Self {
            name: name.into(),
            interval_secs: interval_secs.max(1),
            intervals: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, counter: Counter, value: u64) {
        self.record_at(now_secs(), counter, value);
    }

    pub fn record_at(&self, now: i64, counter: Counter, value: u64) {
        let mut intervals = self.intervals.lock().unwrap_or_else(PoisonError::into_inner);
        self.current_interval(&mut intervals, now).add(counter, value);
    }

    pub fn report(&self) -> StatsReport {
        self.report_at(now_secs())
    }

    pub fn report_at(&self, now: i64) -> StatsReport {
        let mut intervals = self.intervals.lock().unwrap_or_else(PoisonError::into_inner);
        // roll over and trim before tallying
        self.current_interval(&mut intervals, now);

        let buckets = BUCKETS
            .iter()
            .map(|bucket| {
                let window_start = now - bucket.length;
                let (queries, errors) = intervals
                    .iter()
                    .filter(|interval| interval.start >= window_start)
                    .fold((0, 0), |(q, e), interval| {
                        (q + interval.queries, e + interval.errors)
                    });
                BucketReport {
                    label: bucket.label.to_string(),
                    queries,
                    errors,
                }
            })
            .collect();

        StatsReport {
            name: self.name.clone(),
            intervals_stored: intervals.len(),
            buckets,
        }
    }

    fn current_interval<'a>(
        &self,
        intervals: &'a mut VecDeque<Interval>,
        now: i64,
    ) -> &'a mut Interval {
        let needs_new = intervals.back().map_or(true, |last| last.is_over(now));
        if needs_new {
            intervals.push_back(Interval::new(now, self.interval_secs));
            let horizon = BUCKETS[BUCKETS.len() - 1].length;
            while intervals
                .front()
                .is_some_and(|first| now - first.start > horizon)
            {
                intervals.pop_front();
            }
        }
        // non-empty: an interval was pushed above if there was none
        let last = intervals.len() - 1;
        &mut intervals[last]
    }
}
