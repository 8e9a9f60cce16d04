//! gnss-core: Pure decode + aggregation library for GNSS receiver streams.
//!
//! No async, no network I/O, just algorithms. Splits mixed NMEA-0183 / RTCM3 /
//! UBX byte streams into frames, decodes them, folds them into RTK solutions
//! and averages those into a surveyed base position. Shared by `gnss-feeder`
//! (capture files) and `gnss-receiver` (NTRIP client).

pub mod averager;
pub mod config;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod geodesy;
pub mod nmea;
pub mod position;
pub mod rtcm;
pub mod rtk;
pub mod sourcetable;
pub mod stream;
pub mod types;
pub mod ubx;

// Re-export commonly used types at crate root
pub use averager::PositionAverager;
pub use decode::{decode, describe};
pub use frame::{DemuxStats, Demuxer, RawFrame};
pub use position::{Position, PositionStats};
pub use rtk::{HeuristicSolver, RtkAggregator, RtkMode, RtkSolution, Solver};
pub use stream::{IngestReport, SampleSource, StreamProcessor};
pub use types::*;
