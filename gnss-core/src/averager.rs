//! Gated position averaging with a fix-quality histogram.
//!
//! Every offered sample is counted in the histogram; only samples at or
//! above the minimum fix quality enter the mean. Statistics use the
//! population standard deviation (divide by N).

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::trace;
use serde::Serialize;

use crate::nmea::GgaFix;
use crate::position::{Position, PositionStats};
use crate::rtk::RtkSolution;
use crate::types::{RtkError, Result};

/// A solution accepted for averaging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub fix_quality: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AveragerState {
    samples: Vec<PositionSample>,
    histogram: BTreeMap<u8, u64>,
}

/// Collects samples from any thread; all methods take `&self`.
#[derive(Debug)]
pub struct PositionAverager {
    min_fix_quality: u8,
    state: Mutex<AveragerState>,
}

impl PositionAverager {
    pub fn new(min_fix_quality: u8) -> Self {
        Self {
            min_fix_quality,
            state: Mutex::new(AveragerState::default()),
        }
    }

    pub fn min_fix_quality(&self) -> u8 {
        self.min_fix_quality
    }

    /// Offer a sample. Returns true if it passed the quality gate.
    pub fn add_sample(
        &self,
        fix_quality: u8,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        self.add(PositionSample {
            latitude,
            longitude,
            altitude,
            fix_quality,
            timestamp,
        })
    }

    pub fn add(&self, sample: PositionSample) -> bool {
        let mut state = self.lock();
        *state.histogram.entry(sample.fix_quality).or_insert(0) += 1;
        if sample.fix_quality < self.min_fix_quality {
            trace!(
                "sample with fix quality {} below minimum {}",
                sample.fix_quality,
                self.min_fix_quality
            );
            return false;
        }
        state.samples.push(sample);
        true
    }

    pub fn add_solution(&self, solution: &RtkSolution) -> bool {
        self.add_sample(
            solution.fix_quality(),
            solution.latitude,
            solution.longitude,
            solution.altitude,
            solution.timestamp,
        )
    }

    pub fn add_fix(&self, fix: &GgaFix, timestamp: DateTime<Utc>) -> bool {
        self.add_sample(
            fix.fix_quality,
            fix.latitude,
            fix.longitude,
            fix.altitude,
            timestamp,
        )
    }

    /// Drain every solution currently queued on `rx` without blocking.
    /// Returns how many were accepted.
    pub fn consume_pending(&self, rx: &Receiver<RtkSolution>) -> usize {
        rx.try_iter().filter(|s| self.add_solution(s)).count()
    }

    pub fn sample_count(&self) -> usize {
        self.lock().samples.len()
    }

    /// Copy of the histogram of all offered fix qualities.
    pub fn fix_quality_distribution(&self) -> BTreeMap<u8, u64> {
        self.lock().histogram.clone()
    }

    /// Clear samples and histogram.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.samples.clear();
        state.histogram.clear();
    }

    /// Mean position over accepted samples, with statistics attached.
    pub fn averaged_position(&self) -> Result<(Position, PositionStats)> {
        let state = self.lock();
        let samples = &state.samples;
        if samples.is_empty() {
            return Err(RtkError::NoSamples);
        }

        let n = samples.len() as f64;
        let mean_lat = samples.iter().map(|s| s.latitude).sum::<f64>() / n;
        let mean_lon = samples.iter().map(|s| s.longitude).sum::<f64>() / n;
        let mean_alt = samples.iter().map(|s| s.altitude).sum::<f64>() / n;

        // Samples can arrive out of order
        let mut start = samples[0].timestamp;
        let mut end = samples[0].timestamp;
        for s in samples.iter().skip(1) {
            start = start.min(s.timestamp);
            end = end.max(s.timestamp);
        }

        let stats = PositionStats {
            sample_count: samples.len(),
            duration: (end - start).to_std().map_or(0.0, |d| d.as_secs_f64()),
            latitude_std_dev: std_dev(samples, mean_lat, |s| s.latitude),
            longitude_std_dev: std_dev(samples, mean_lon, |s| s.longitude),
            altitude_std_dev: std_dev(samples, mean_alt, |s| s.altitude),
            start_time: start,
            end_time: end,
            fix_quality_distribution: state.histogram.clone(),
        };

        let position = Position {
            latitude: mean_lat,
            longitude: mean_lon,
            altitude: mean_alt,
            fix_quality: self.min_fix_quality,
            satellites: 0,
            hdop: 0.0,
            timestamp: Utc::now(),
            description: format!("Averaged position from {} samples", samples.len()),
            stats: Some(stats.clone()),
        };
        Ok((position, stats))
    }

    fn lock(&self) -> MutexGuard<'_, AveragerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Population standard deviation of one axis.
fn std_dev(samples: &[PositionSample], mean: f64, axis: impl Fn(&PositionSample) -> f64) -> f64 {
    let variance = samples.iter().map(|s| (axis(s) - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
