//! gnss-feeder: Offline replay of raw GNSS receiver captures.
//!
//! Supports:
//! - Decoding mixed NMEA / RTCM3 / UBX captures into message listings
//! - Averaging a capture into a surveyed base position (JSON)
//! - Inspecting saved position files and the local config

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use log::{debug, info};

use gnss_core::config::{self, Config};
use gnss_core::decode;
use gnss_core::frame::{DemuxStats, Demuxer};
use gnss_core::rtcm::StationCoordinates;
use gnss_core::rtk::AggregatorStats;
use gnss_core::types::{fix_quality_description, Protocol};
use gnss_core::{Position, PositionAverager, RtkAggregator, RtkMode, SampleSource, StreamProcessor};

mod capture;

use capture::{CaptureFormat, CaptureReader};

#[derive(Parser)]
#[command(
    name = "gnss-feeder",
    version,
    about = "Replay GNSS receiver captures through the decode and averaging pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a capture and print a per-message-type summary
    Decode {
        /// Capture file, or `-` for stdin (defaults to receiver.device)
        file: Option<PathBuf>,

        /// Bytes per read
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Print every decoded message instead of the summary table
        #[arg(short, long)]
        raw: bool,

        /// Input is a hex dump rather than raw bytes
        #[arg(long)]
        hex: bool,
    },

    /// Average positions from a capture and save them as JSON
    Average {
        /// Capture file, or `-` for stdin (defaults to receiver.device)
        file: Option<PathBuf>,

        /// Sample source: nmea (GGA fixes) or rtk (aggregator solutions)
        #[arg(long)]
        source: Option<SampleSource>,

        /// RTK mode: static or kinematic
        #[arg(long)]
        mode: Option<RtkMode>,

        /// Minimum fix quality accepted into the average
        #[arg(long)]
        min_fix: Option<u8>,

        /// Output JSON path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Date for GGA timestamps (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Bytes per read
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Input is a hex dump rather than raw bytes
        #[arg(long)]
        hex: bool,
    },

    /// Print a saved position file
    Show {
        /// Position JSON file
        file: PathBuf,
    },

    /// Show the config file location and effective values
    Config {
        /// Write the effective values to the config file
        #[arg(long)]
        init: bool,
    },
}

/// Per-message-type tally for the decode summary.
struct KindSummary {
    protocol: Protocol,
    description: String,
    count: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = config::load_config();

    match cli.command {
        Commands::Decode {
            file,
            chunk_size,
            raw,
            hex,
        } => {
            let mut reader = open_capture(&config, file, chunk_size, hex);
            cmd_decode(&mut reader, raw);
        }
        Commands::Average {
            file,
            source,
            mode,
            min_fix,
            output,
            date,
            chunk_size,
            hex,
        } => {
            let mut reader = open_capture(&config, file, chunk_size, hex);
            let opts = AverageOptions {
                source: source.unwrap_or(config.averaging.source),
                mode: mode.unwrap_or(config.rtk.mode),
                min_fix: min_fix.unwrap_or(config.averaging.min_fix_quality),
                output: output.unwrap_or_else(|| PathBuf::from(&config.averaging.output)),
                date,
            };
            cmd_average(&mut reader, opts);
        }
        Commands::Show { file } => cmd_show(&file),
        Commands::Config { init } => cmd_config(&config, init),
    }
}

fn open_capture(
    config: &Config,
    file: Option<PathBuf>,
    chunk_size: Option<usize>,
    hex: bool,
) -> CaptureReader {
    let Some(path) = file.or_else(|| config.receiver.device.as_ref().map(PathBuf::from)) else {
        eprintln!("Error: no input file given and receiver.device is not set");
        std::process::exit(2);
    };
    let format = if hex {
        CaptureFormat::Hex
    } else {
        CaptureFormat::Raw
    };
    let chunk_size = chunk_size.unwrap_or(config.receiver.chunk_size);

    info!("reading {} ({format:?}, {chunk_size} byte chunks)", path.display());
    CaptureReader::open(&path, format, chunk_size).unwrap_or_else(|e| {
        eprintln!("Error opening {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn cmd_decode(reader: &mut CaptureReader, raw: bool) {
    let mut demux = Demuxer::new();
    let mut kinds: BTreeMap<String, KindSummary> = BTreeMap::new();

    for chunk in reader.by_ref() {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        };

        for msg in demux.ingest(&chunk) {
            if raw {
                println!("{}", decode::describe(&msg));
            }
            kinds
                .entry(msg.label())
                .or_insert_with(|| KindSummary {
                    protocol: msg.protocol(),
                    description: decode::kind_description(&msg),
                    count: 0,
                })
                .count += 1;
        }
    }

    if demux.buffered() > 0 {
        debug!("{} trailing bytes left unframed", demux.buffered());
    }
    if !raw {
        print_decode_summary(&kinds, &demux.stats, reader.bytes_read, reader.bad_lines);
    }
}

struct AverageOptions {
    source: SampleSource,
    mode: RtkMode,
    min_fix: u8,
    output: PathBuf,
    date: Option<NaiveDate>,
}

/// Outcome of pushing a whole capture through the pipeline.
struct Replay {
    averager: Arc<PositionAverager>,
    messages: usize,
    /// RTK solutions that passed the averager's quality gate
    accepted_solutions: usize,
    demux: DemuxStats,
    aggregator: AggregatorStats,
    station: Option<StationCoordinates>,
}

/// Replay a capture on the calling thread. Solutions are drained into the
/// averager after every message, so none are lost to the bounded channel.
fn replay(chunks: impl Iterator<Item = io::Result<Vec<u8>>>, opts: &AverageOptions) -> Replay {
    let (aggregator, rx) = RtkAggregator::new(opts.mode);
    let aggregator = Arc::new(aggregator);
    let averager = Arc::new(PositionAverager::new(opts.min_fix));

    let mut processor = StreamProcessor::new(Arc::clone(&aggregator), Arc::clone(&averager), opts.source)
        .with_inline_consumer(rx);
    if let Some(date) = opts.date {
        processor = processor.with_date(date);
    }

    let mut messages = 0usize;
    let mut accepted_solutions = 0usize;
    for chunk in chunks {
        match chunk {
            Ok(c) => {
                let report = processor.ingest(&c);
                messages += report.messages.len();
                accepted_solutions += report.rtk_accepted;
            }
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        }
    }

    Replay {
        averager,
        messages,
        accepted_solutions,
        demux: processor.demux_stats().clone(),
        aggregator: aggregator.stats(),
        station: aggregator.with_solver_state(|s| s.station().cloned()),
    }
}

fn cmd_average(reader: &mut CaptureReader, opts: AverageOptions) {
    eprintln!(
        "Averaging {} samples ({} mode, min fix quality {})",
        opts.source, opts.mode, opts.min_fix
    );

    let replay = replay(reader.by_ref(), &opts);

    eprintln!(
        "{} messages from {} bytes, {} solutions ({} dropped, fix ratio {:.1}%)",
        replay.messages,
        replay.demux.bytes_in,
        replay.aggregator.solutions,
        replay.aggregator.dropped,
        replay.aggregator.fix_ratio() * 100.0
    );
    if reader.bad_lines > 0 {
        eprintln!("{} hex lines skipped", reader.bad_lines);
    }
    if let Some(station) = &replay.station {
        let geo = station.geodetic();
        eprintln!(
            "Reference station {}: {:.9}, {:.9}, {:.3} m",
            station.station_id, geo.latitude, geo.longitude, geo.altitude
        );
    }
    if opts.source == SampleSource::Rtk {
        debug!("{} solutions accepted from the channel", replay.accepted_solutions);
    }

    let (position, _) = match replay.averager.averaged_position() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            print_histogram(&replay.averager.fix_quality_distribution());
            std::process::exit(1);
        }
    };

    print_position(&position);

    if let Err(e) = position.save_to_file(&opts.output) {
        eprintln!("Error writing {}: {e}", opts.output.display());
        std::process::exit(1);
    }
    println!();
    println!("Saved: {}", opts.output.display());
}

fn cmd_show(file: &Path) {
    let position = Position::load_from_file(file).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", file.display());
        std::process::exit(1);
    });
    println!();
    println!("Position file: {}", file.display());
    print_position(&position);
}

fn cmd_config(config: &Config, init: bool) {
    if init {
        match config::save_config(config) {
            Ok(path) => println!("Wrote {}", path.display()),
            Err(e) => {
                eprintln!("Error writing config: {e}");
                std::process::exit(1);
            }
        }
    }

    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());

    println!();
    println!("Config: {}", config::config_file().display());
    println!();
    println!("  receiver.name:             {}", config.receiver.name);
    println!("  receiver.device:           {}", dash(&config.receiver.device));
    println!("  receiver.chunk_size:       {}", config.receiver.chunk_size);
    println!("  ntrip.host:                {}", dash(&config.ntrip.host));
    println!("  ntrip.port:                {}", config.ntrip.port);
    println!("  ntrip.mountpoint:          {}", dash(&config.ntrip.mountpoint));
    println!("  ntrip.username:            {}", dash(&config.ntrip.username));
    println!(
        "  ntrip.password:            {}",
        if config.ntrip.password.is_some() { "****" } else { "-" }
    );
    println!("  averaging.source:          {}", config.averaging.source);
    println!("  averaging.min_fix_quality: {}", config.averaging.min_fix_quality);
    println!("  averaging.samples:         {}", config.averaging.samples);
    println!("  averaging.timeout:         {}", config.averaging.timeout_secs);
    println!("  averaging.output:          {}", config.averaging.output);
    println!("  rtk.mode:                  {}", config.rtk.mode);
    println!();
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_decode_summary(
    kinds: &BTreeMap<String, KindSummary>,
    stats: &DemuxStats,
    bytes: u64,
    bad_lines: u64,
) {
    println!();
    println!(
        "Bytes: {bytes} read, {} skipped. Frames: {} RTCM3, {} UBX, {} NMEA, {} checksum failures",
        stats.bytes_skipped, stats.rtcm_frames, stats.ubx_frames, stats.nmea_frames, stats.checksum_failures
    );
    if bad_lines > 0 {
        println!("Hex lines skipped: {bad_lines}");
    }
    println!();

    if kinds.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Protocol", "Message", "Description", "Count"]);

    let mut sorted: Vec<_> = kinds.iter().collect();
    sorted.sort_by_key(|(_, k)| std::cmp::Reverse(k.count));

    for (label, kind) in sorted {
        table.add_row(vec![
            Cell::new(kind.protocol),
            Cell::new(label),
            Cell::new(&kind.description),
            Cell::new(kind.count),
        ]);
    }

    println!("{table}");
}

fn print_position(position: &Position) {
    println!();
    println!("  {}", position.description);
    println!("  Latitude:    {:.9}", position.latitude);
    println!("  Longitude:   {:.9}", position.longitude);
    println!("  Altitude:    {:.3} m", position.altitude);
    println!(
        "  Fix quality: {} ({})",
        position.fix_quality,
        position.fix_quality_description()
    );
    println!("  Timestamp:   {}", position.timestamp.to_rfc3339());

    if let Some(stats) = &position.stats {
        println!();
        println!("  Samples:     {} over {:.1} s", stats.sample_count, stats.duration);
        println!("  From:        {}", stats.start_time.to_rfc3339());
        println!("  To:          {}", stats.end_time.to_rfc3339());

        let mut table = Table::new();
        table.set_header(vec!["Axis", "Mean", "Std dev"]);
        table.add_row(vec![
            Cell::new("Latitude"),
            Cell::new(format!("{:.9}", position.latitude)),
            Cell::new(format!("{:.9} deg", stats.latitude_std_dev)),
        ]);
        table.add_row(vec![
            Cell::new("Longitude"),
            Cell::new(format!("{:.9}", position.longitude)),
            Cell::new(format!("{:.9} deg", stats.longitude_std_dev)),
        ]);
        table.add_row(vec![
            Cell::new("Altitude"),
            Cell::new(format!("{:.3}", position.altitude)),
            Cell::new(format!("{:.3} m", stats.altitude_std_dev)),
        ]);
        println!();
        println!("{table}");

        print_histogram(&stats.fix_quality_distribution);
    }
}

fn print_histogram(histogram: &BTreeMap<u8, u64>) {
    if histogram.is_empty() {
        return;
    }
    let total: u64 = histogram.values().sum();

    let mut table = Table::new();
    table.set_header(vec!["Fix", "Quality", "Solutions", "Share"]);
    for (&quality, &count) in histogram {
        table.add_row(vec![
            Cell::new(quality),
            Cell::new(fix_quality_description(quality)),
            Cell::new(count),
            Cell::new(format!("{:.1}%", count as f64 * 100.0 / total as f64)),
        ]);
    }
    println!();
    println!("{table}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gnss_core::ubx;
    use std::io::Cursor;

    /// NAV-PVT payload with an RTK fixed carrier solution, 47 m geoid separation.
    fn nav_pvt_payload(itow_ms: u32, lat: f64, lon: f64, height_msl: f64) -> Vec<u8> {
        let mut p = vec![0u8; 92];
        p[0..4].copy_from_slice(&itow_ms.to_le_bytes());
        p[4..6].copy_from_slice(&2024u16.to_le_bytes());
        p[6] = 5;
        p[7] = 1;
        p[8] = 10;
        p[9] = 20;
        p[10] = 30;
        p[11] = 0x07;
        p[20] = 3;
        p[21] = 0x83;
        p[23] = 18;
        p[24..28].copy_from_slice(&((lon * 1e7).round() as i32).to_le_bytes());
        p[28..32].copy_from_slice(&((lat * 1e7).round() as i32).to_le_bytes());
        p[32..36].copy_from_slice(&((height_msl * 1000.0 + 47_000.0).round() as i32).to_le_bytes());
        p[36..40].copy_from_slice(&((height_msl * 1000.0).round() as i32).to_le_bytes());
        p[76..78].copy_from_slice(&95u16.to_le_bytes());
        p
    }

    fn reader(bytes: Vec<u8>, chunk_size: usize) -> CaptureReader {
        CaptureReader::from_reader(Box::new(Cursor::new(bytes)), CaptureFormat::Raw, chunk_size)
    }

    fn options(source: SampleSource, min_fix: u8) -> AverageOptions {
        AverageOptions {
            source,
            mode: RtkMode::Kinematic,
            min_fix,
            output: PathBuf::from("unused.json"),
            date: NaiveDate::from_ymd_opt(2024, 5, 1),
        }
    }

    #[test]
    fn test_replay_keeps_every_nav_pvt_solution() {
        let capture: Vec<u8> = (0..200u32)
            .flat_map(|i| {
                let payload = nav_pvt_payload(123_456_000 + i * 200, 47.385_6, 8.652_5, 400.0);
                ubx::encode_frame(ubx::CLASS_NAV, ubx::ID_NAV_PVT, &payload)
            })
            .collect();
        // One 4096-byte chunk carries about 40 frames, more than the channel holds
        let mut reader = reader(capture, 4096);

        let replay = replay(reader.by_ref(), &options(SampleSource::Rtk, 4));

        assert_eq!(replay.messages, 200);
        assert_eq!(replay.aggregator.solutions, 200);
        assert_eq!(replay.aggregator.dropped, 0);
        assert_eq!(replay.accepted_solutions, 200);
        assert_eq!(replay.averager.sample_count(), 200);
        assert!(replay.station.is_none());

        let (position, stats) = replay.averager.averaged_position().unwrap();
        assert_eq!(stats.sample_count, 200);
        assert_eq!(position.fix_quality, 4);
        assert!((position.latitude - 47.385_6).abs() < 1e-7);
        // Ellipsoidal height
        assert!((position.altitude - 447.0).abs() < 1e-6);
    }

    #[test]
    fn test_replay_nmea_source() {
        let fix = "$GNGGA,092725.00,4717.11399,N,00833.91590,E,4,08,1.01,499.6,M,48.0,M,1.0,0000*6F\r\n";
        let single = "$GNGGA,092726.00,4717.11400,N,00833.91600,E,1,08,1.01,499.6,M,48.0,M,,*47\r\n";
        let capture = [fix, single, fix, fix].concat().into_bytes();

        let replay = replay(reader(capture, 64).by_ref(), &options(SampleSource::Nmea, 4));

        assert_eq!(replay.messages, 4);
        assert_eq!(replay.demux.nmea_frames, 4);
        assert_eq!(replay.accepted_solutions, 0);
        let (position, stats) = replay.averager.averaged_position().unwrap();
        assert_eq!(stats.sample_count, 3);
        assert!((position.latitude - 47.285_233_166).abs() < 1e-6);
        assert_eq!(replay.averager.fix_quality_distribution().get(&1), Some(&1));
    }
}
