//! One live averaging session: caster stream -> pipeline -> averaged position.
//!
//! Task layout:
//! - the reader loop (this task) pulls body chunks and runs the pipeline inline
//! - a blocking consumer drains the solution channel into the averager
//! - a 1 s ticker prints progress
//! - a Ctrl-C watcher
//!
//! All of them stop through one `watch` channel carrying the stop reason.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use gnss_core::frame::DemuxStats;
use gnss_core::rtk::AggregatorStats;
use gnss_core::types::RtkError;
use gnss_core::{
    Position, PositionAverager, PositionStats, RtkAggregator, RtkMode, SampleSource,
    StreamProcessor,
};

use crate::error::Result;
use crate::ntrip::NtripClient;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mountpoint: String,
    pub source: SampleSource,
    pub mode: RtkMode,
    pub min_fix_quality: u8,
    /// Stop once this many samples were accepted
    pub samples: usize,
    pub timeout: Duration,
    /// Status lines as JSON instead of text
    pub json_status: bool,
    pub status_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Timeout,
    Interrupted,
    StreamEnded,
    StreamError,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::TargetReached => "sample target reached",
            StopReason::Timeout => "timeout",
            StopReason::Interrupted => "interrupted",
            StopReason::StreamEnded => "caster closed the stream",
            StopReason::StreamError => "stream read error",
        };
        f.write_str(text)
    }
}

/// Progress snapshot printed by the ticker.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub elapsed_seconds: f64,
    pub messages: u64,
    pub solutions: u64,
    pub dropped: u64,
    pub fix_ratio: f64,
    pub samples: usize,
    pub target: usize,
    pub status: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_solution: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn line(&self) -> String {
        let mut line = format!(
            "[{:>6.1}s] {} msgs, {} solutions ({} dropped, {:.0}% fixed), samples {}/{}",
            self.elapsed_seconds,
            self.messages,
            self.solutions,
            self.dropped,
            self.fix_ratio * 100.0,
            self.samples,
            self.target
        );
        if let (Some(status), Some(lat), Some(lon)) = (&self.status, self.latitude, self.longitude) {
            line.push_str(&format!(", last {status} {lat:.7}, {lon:.7}"));
        }
        line
    }
}

/// Result of a finished session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub reason: StopReason,
    pub elapsed: Duration,
    pub demux: DemuxStats,
    pub aggregator: AggregatorStats,
    pub fix_quality_distribution: std::collections::BTreeMap<u8, u64>,
    pub result: std::result::Result<(Position, PositionStats), RtkError>,
}

type StopSender = Arc<watch::Sender<Option<StopReason>>>;

/// Request a stop unless one was already requested. The first reason wins.
fn request_stop(stop: &watch::Sender<Option<StopReason>>, reason: StopReason) {
    stop.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

pub async fn run(client: &NtripClient, opts: &SessionOptions) -> Result<SessionOutcome> {
    let mut response = client.connect(&opts.mountpoint).await?;
    info!(
        "streaming {} ({} source, {} mode, min fix {}, {} samples, {:?} timeout)",
        opts.mountpoint, opts.source, opts.mode, opts.min_fix_quality, opts.samples, opts.timeout
    );

    let started = Instant::now();
    let (aggregator, rx) = RtkAggregator::new(opts.mode);
    let aggregator = Arc::new(aggregator);
    let averager = Arc::new(PositionAverager::new(opts.min_fix_quality));

    let (stop_tx, stop_rx) = watch::channel(None);
    let stop: StopSender = Arc::new(stop_tx);

    // Ctrl-C
    let ctrl_c = {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted");
                request_stop(&stop, StopReason::Interrupted);
            }
        })
    };

    // Solution consumer; ends when the last aggregator handle is dropped
    let consumer = {
        let averager = Arc::clone(&averager);
        let stop = Arc::clone(&stop);
        let (source, target) = (opts.source, opts.samples);
        tokio::task::spawn_blocking(move || {
            for solution in rx.iter() {
                if source != SampleSource::Rtk {
                    continue;
                }
                if averager.add_solution(&solution) && averager.sample_count() >= target {
                    request_stop(&stop, StopReason::TargetReached);
                }
            }
            debug!("solution consumer finished");
        })
    };

    // Status ticker
    let ticker = {
        let aggregator = Arc::clone(&aggregator);
        let averager = Arc::clone(&averager);
        let mut stop_rx = stop_rx.clone();
        let (period, target, json) = (opts.status_interval, opts.samples, opts.json_status);
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let snapshot = snapshot(&aggregator, &averager, started, target);
                        print_status(&snapshot, json);
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || stop_rx.borrow().is_some() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let mut processor = StreamProcessor::new(Arc::clone(&aggregator), Arc::clone(&averager), opts.source);
    let mut stop_rx = stop_rx;
    let deadline = sleep(opts.timeout);
    tokio::pin!(deadline);

    let reason = loop {
        if let Some(reason) = *stop_rx.borrow() {
            break reason;
        }
        tokio::select! {
            _ = &mut deadline => {
                info!("timeout after {:?}", opts.timeout);
                break StopReason::Timeout;
            }
            _ = stop_rx.changed() => continue,
            chunk = response.chunk() => match chunk {
                Ok(Some(bytes)) => {
                    processor.ingest(&bytes);
                    if opts.source == SampleSource::Nmea && averager.sample_count() >= opts.samples {
                        break StopReason::TargetReached;
                    }
                }
                Ok(None) => {
                    info!("caster closed the stream");
                    break StopReason::StreamEnded;
                }
                Err(e) => {
                    warn!("stream read failed: {e}");
                    break StopReason::StreamError;
                }
            },
        }
    };
    request_stop(&stop, reason);
    // A consumer may have hit the target while this loop stopped for another reason
    let reason = (*stop_rx.borrow()).unwrap_or(reason);

    let demux = processor.demux_stats().clone();
    drop(processor);
    drop(response);
    if let Err(e) = ticker.await {
        warn!("status task failed: {e}");
    }
    ctrl_c.abort();

    let aggregator_stats = aggregator.stats();
    drop(aggregator);
    if let Err(e) = consumer.await {
        warn!("solution consumer failed: {e}");
    }

    Ok(SessionOutcome {
        reason,
        elapsed: started.elapsed(),
        demux,
        aggregator: aggregator_stats,
        fix_quality_distribution: averager.fix_quality_distribution(),
        result: averager.averaged_position(),
    })
}

fn snapshot(
    aggregator: &RtkAggregator,
    averager: &PositionAverager,
    started: Instant,
    target: usize,
) -> StatusSnapshot {
    let stats = aggregator.stats();
    let last = aggregator.last_solution();
    StatusSnapshot {
        elapsed_seconds: started.elapsed().as_secs_f64(),
        messages: stats.messages,
        solutions: stats.solutions,
        dropped: stats.dropped,
        fix_ratio: stats.fix_ratio(),
        samples: averager.sample_count(),
        target,
        status: last.as_ref().map(|s| s.status.to_string()),
        latitude: last.as_ref().map(|s| s.latitude),
        longitude: last.as_ref().map(|s| s.longitude),
        last_solution: last.map(|s| s.timestamp),
    }
}

fn print_status(snapshot: &StatusSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("status serialization failed: {e}"),
        }
    } else {
        eprintln!("{}", snapshot.line());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
