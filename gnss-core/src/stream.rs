//! Per-stream pipeline: demultiplexer -> dispatch -> aggregator / averager.
//!
//! One [`StreamProcessor`] per byte stream. The aggregator and averager are
//! shared via `Arc` so a consumer thread and a status ticker can read them
//! while the reader keeps ingesting.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};

use log::debug;

use crate::averager::PositionAverager;
use crate::frame::{DemuxStats, Demuxer};
use crate::rtk::{RtkAggregator, RtkSolution, Solver};
use crate::types::{Message, Result, RtkError};

/// Where averaging samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleSource {
    /// GGA fixes reported by the receiver
    Nmea,
    /// Solutions published by the RTK aggregator
    #[default]
    Rtk,
}

impl FromStr for SampleSource {
    type Err = RtkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nmea" | "gga" => Ok(SampleSource::Nmea),
            "rtk" => Ok(SampleSource::Rtk),
            other => Err(RtkError::Config(format!("unknown sample source '{other}'"))),
        }
    }
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleSource::Nmea => write!(f, "nmea"),
            SampleSource::Rtk => write!(f, "rtk"),
        }
    }
}

/// What one `ingest` call produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub messages: Vec<Message>,
    /// Solutions published by the aggregator
    pub solutions: usize,
    /// GGA samples offered to the averager (NMEA source only)
    pub gga_offered: usize,
    pub gga_accepted: usize,
    /// Solutions drained by the inline consumer and accepted by the averager
    pub rtk_accepted: usize,
}

pub struct StreamProcessor<S: Solver> {
    demux: Demuxer,
    aggregator: Arc<RtkAggregator<S>>,
    averager: Arc<PositionAverager>,
    source: SampleSource,
    /// Date attached to GGA time-of-day stamps
    date: NaiveDate,
    last_gga_time: Option<NaiveTime>,
    inline_consumer: Option<Receiver<RtkSolution>>,
}

impl<S: Solver> StreamProcessor<S> {
    pub fn new(
        aggregator: Arc<RtkAggregator<S>>,
        averager: Arc<PositionAverager>,
        source: SampleSource,
    ) -> Self {
        Self {
            demux: Demuxer::new(),
            aggregator,
            averager,
            source,
            date: Utc::now().date_naive(),
            last_gga_time: None,
            inline_consumer: None,
        }
    }

    /// Override the date used for GGA timestamps (replaying old captures).
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Drain the solution channel on the ingesting thread after every
    /// message. Offline replay has no I/O waits, so a separate consumer would
    /// fall behind the bounded channel and lose solutions.
    pub fn with_inline_consumer(mut self, rx: Receiver<RtkSolution>) -> Self {
        self.inline_consumer = Some(rx);
        self
    }

    /// Push raw bytes through the pipeline.
    pub fn ingest(&mut self, data: &[u8]) -> IngestReport {
        let mut report = IngestReport {
            messages: self.demux.ingest(data),
            ..IngestReport::default()
        };

        for msg in &report.messages {
            if self.aggregator.feed(msg).is_some() {
                report.solutions += 1;
                if let Some(rx) = &self.inline_consumer {
                    if self.source == SampleSource::Rtk {
                        report.rtk_accepted += self.averager.consume_pending(rx);
                    } else {
                        rx.try_iter().for_each(drop);
                    }
                }
            }

            if self.source == SampleSource::Nmea {
                if let Message::Nmea(sentence) = msg {
                    if let Some(fix) = sentence.gga() {
                        if let Some(time) = fix.time {
                            self.track_midnight(time);
                        }
                        let timestamp = fix.timestamp_on(self.date).unwrap_or_else(Utc::now);
                        report.gga_offered += 1;
                        if self.averager.add_fix(&fix, timestamp) {
                            report.gga_accepted += 1;
                        }
                    }
                }
            }
        }
        report
    }

    /// GGA carries no date: advance it when the time of day falls back by
    /// more than 12 h.
    fn track_midnight(&mut self, time: NaiveTime) {
        if let Some(last) = self.last_gga_time {
            if last.signed_duration_since(time) > Duration::hours(12) {
                if let Some(next) = self.date.succ_opt() {
                    debug!("GGA time wrapped {last} -> {time}, date now {next}");
                    self.date = next;
                }
            }
        }
        self.last_gga_time = Some(time);
    }

    pub fn source(&self) -> SampleSource {
        self.source
    }

    pub fn demux_stats(&self) -> &DemuxStats {
        &self.demux.stats
    }

    pub fn buffered(&self) -> usize {
        self.demux.buffered()
    }

    pub fn aggregator(&self) -> &Arc<RtkAggregator<S>> {
        &self.aggregator
    }

    pub fn averager(&self) -> &Arc<PositionAverager> {
        &self.averager
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcm;
    use crate::rtk::{HeuristicSolver, RtkMode};
    use crate::ubx::{self, testutil::nav_pvt_payload};

    const GGA_RTK: &[u8] =
        b"$GNGGA,092725.00,4717.11399,N,00833.91590,E,4,08,1.01,499.6,M,48.0,M,1.0,0000*6F\r\n";
    const GGA_GPS: &[u8] = b"$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

    fn pipeline(
        mode: RtkMode,
        source: SampleSource,
        min_fix: u8,
    ) -> (StreamProcessor<HeuristicSolver>, Receiver<RtkSolution>) {
        let (agg, rx) = RtkAggregator::new(mode);
        let averager = Arc::new(PositionAverager::new(min_fix));
        (StreamProcessor::new(Arc::new(agg), averager, source), rx)
    }

    #[test]
    fn test_source_parse() {
        assert_eq!("NMEA".parse::<SampleSource>().unwrap(), SampleSource::Nmea);
        assert_eq!("rtk".parse::<SampleSource>().unwrap(), SampleSource::Rtk);
        assert!("serial".parse::<SampleSource>().is_err());
    }

    #[test]
    fn test_nmea_source_feeds_averager() {
        let (mut proc, _rx) = pipeline(RtkMode::Kinematic, SampleSource::Nmea, 4);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        proc = proc.with_date(date);

        let mut stream = GGA_RTK.to_vec();
        stream.extend_from_slice(GGA_GPS);
        stream.extend_from_slice(GGA_RTK);
        let report = proc.ingest(&stream);

        assert_eq!(report.messages.len(), 3);
        assert_eq!(report.gga_offered, 3);
        assert_eq!(report.gga_accepted, 2);
        assert_eq!(report.solutions, 0);

        let (pos, stats) = proc.averager().averaged_position().unwrap();
        assert!((pos.latitude - 47.285_233_166).abs() < 1e-6);
        assert_eq!(stats.start_time.to_rfc3339(), "2024-05-01T09:27:25+00:00");
        assert_eq!(stats.fix_quality_distribution.get(&1), Some(&1));
    }

    fn gga(time: &str) -> Vec<u8> {
        let body = format!("GNGGA,{time},4717.11399,N,00833.91590,E,4,08,1.01,499.6,M,48.0,M,1.0,0000");
        let checksum = crate::crc::nmea_checksum(body.as_bytes());
        format!("${body}*{checksum:02X}\r\n").into_bytes()
    }

    #[test]
    fn test_gga_date_rolls_over_midnight() {
        let (proc, _rx) = pipeline(RtkMode::Kinematic, SampleSource::Nmea, 4);
        let mut proc = proc.with_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let mut stream = gga("235959.00");
        stream.extend(gga("000001.00"));
        let report = proc.ingest(&stream);
        assert_eq!(report.gga_accepted, 2);

        let (_, stats) = proc.averager().averaged_position().unwrap();
        assert_eq!(stats.start_time.to_rfc3339(), "2024-05-01T23:59:59+00:00");
        assert_eq!(stats.end_time.to_rfc3339(), "2024-05-02T00:00:01+00:00");
        assert!((stats.duration - 2.0).abs() < 1e-9);

        // Small steps back in time do not advance the date
        proc.ingest(&gga("000000.50"));
        let (_, stats) = proc.averager().averaged_position().unwrap();
        assert_eq!(stats.start_time.to_rfc3339(), "2024-05-01T23:59:59+00:00");
        assert_eq!(stats.sample_count, 3);
    }

    #[test]
    fn test_rtk_source_publishes_solutions() {
        let (mut proc, rx) = pipeline(RtkMode::Static, SampleSource::Rtk, 4);
        let station = rtcm::testutil::station_arp(2003, 4_278_000.1234, 651_000.5678, 4_672_000.9012);
        let mut stream = GGA_RTK.to_vec();
        stream.extend_from_slice(&rtcm::encode_frame(&station.payload).unwrap());
        let report = proc.ingest(&stream);

        assert_eq!(report.solutions, 1);
        // GGA is not sampled with the RTK source
        assert_eq!(report.gga_offered, 0);
        assert_eq!(proc.averager().consume_pending(&rx), 1);
        let (pos, _) = proc.averager().averaged_position().unwrap();
        assert!((pos.latitude - 47.385_631_56).abs() < 1e-6);
    }

    #[test]
    fn test_inline_consumer_keeps_every_solution() {
        let (agg, rx) = RtkAggregator::new(RtkMode::Kinematic);
        let agg = Arc::new(agg);
        let averager = Arc::new(PositionAverager::new(1));
        let mut proc = StreamProcessor::new(Arc::clone(&agg), Arc::clone(&averager), SampleSource::Rtk)
            .with_inline_consumer(rx);

        let frame = ubx::encode_frame(0x01, 0x07, &nav_pvt_payload(3, 0x01, 9, 51.5, -0.12, 40.0));
        let stream = frame.repeat(50);
        let report = proc.ingest(&stream);

        assert_eq!(report.solutions, 50);
        assert_eq!(report.rtk_accepted, 50);
        assert_eq!(agg.stats().dropped, 0);
        assert_eq!(averager.sample_count(), 50);
    }

    #[test]
    fn test_chunked_ingest_matches_single() {
        let payload = nav_pvt_payload(3, 0x83, 14, 51.5, -0.12, 40.0);
        let mut stream = ubx::encode_frame(0x01, 0x07, &payload);
        stream.extend_from_slice(GGA_RTK);
        stream.extend_from_slice(&ubx::encode_frame(0x01, 0x07, &payload));

        let (mut whole, _rx1) = pipeline(RtkMode::Kinematic, SampleSource::Nmea, 1);
        let total = whole.ingest(&stream);

        let (mut pieces, _rx2) = pipeline(RtkMode::Kinematic, SampleSource::Nmea, 1);
        let mut messages = Vec::new();
        let mut solutions = 0;
        for chunk in stream.chunks(5) {
            let report = pieces.ingest(chunk);
            messages.extend(report.messages);
            solutions += report.solutions;
        }
        assert_eq!(messages, total.messages);
        assert_eq!(solutions, total.solutions);
        assert_eq!(solutions, 2);
        assert_eq!(pieces.demux_stats(), whole.demux_stats());
        assert_eq!(pieces.buffered(), 0);
        assert_eq!(pieces.aggregator().stats().solutions, 2);
    }
}
