//! Rolling response-time samples per endpoint.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Samples kept per endpoint; the mean is taken over this window.
pub const MAX_RESPONSE_TIME_SAMPLES: usize = 10;

/// Sort key for endpoints that have never answered a latency probe.
pub const UNMEASURED_RESPONSE_TIME_MS: f64 = 99_999.0;

#[derive(Debug, Clone, Default)]
pub struct ResponseTimes {
    samples: HashMap<String, VecDeque<u64>>,
}

/// Serializable form of [`ResponseTimes`], oldest sample first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTimesSnapshot {
    pub samples: BTreeMap<String, Vec<u64>>,
}

impl ResponseTimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, endpoint: &str, millis: u64) {
        let window = self.samples.entry(endpoint.to_string()).or_default();
        if window.len() == MAX_RESPONSE_TIME_SAMPLES {
            window.pop_front();
        }
        window.push_back(millis);
    }

    pub fn mean(&self, endpoint: &str) -> Option<f64> {
        let window = self.samples.get(endpoint)?;
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<u64>() as f64 / window.len() as f64)
    }

    pub fn sort_key(&self, endpoint: &str) -> f64 {
        self.mean(endpoint).unwrap_or(UNMEASURED_RESPONSE_TIME_MS)
    }

    pub fn means(&self) -> BTreeMap<String, f64> {
        self.samples
            .keys()
            .filter_map(|k| self.mean(k).map(|m| (k.clone(), m)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_snapshot(&self) -> ResponseTimesSnapshot {
        ResponseTimesSnapshot {
            samples: self
                .samples
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
        }
    }

    /// Rebuild from a snapshot, keeping only the newest samples of each window.
    pub fn from_snapshot(snapshot: ResponseTimesSnapshot) -> Self {
        let samples = snapshot
            .samples
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| {
                let skip = v.len().saturating_sub(MAX_RESPONSE_TIME_SAMPLES);
                (k, v.into_iter().skip(skip).collect())
            })
            .collect();
        Self { samples }
    }
}
