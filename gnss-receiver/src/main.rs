//! gnss-receiver: NTRIP client for live base position surveys.
//!
//! Streams a caster mountpoint through the gnss-core pipeline, averages the
//! accepted solutions and writes the result as JSON. Also lists caster
//! sourcetables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, Table};

use gnss_core::config::{self, Config};
use gnss_core::sourcetable::{MountPoint, Sourcetable};
use gnss_core::types::{fix_quality_description, RtkError};
use gnss_core::{RtkMode, SampleSource};

mod error;
mod ntrip;
mod session;

use error::{ReceiverError, Result};
use ntrip::NtripClient;
use session::SessionOptions;

#[derive(Parser)]
#[command(
    name = "gnss-receiver",
    version,
    about = "NTRIP client: stream a caster mountpoint and average the base position"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct CasterArgs {
    /// Caster host name or address
    #[arg(long, env = "NTRIP_HOST")]
    host: Option<String>,

    /// Caster port
    #[arg(long, env = "NTRIP_PORT")]
    port: Option<u16>,

    /// Username for HTTP basic auth
    #[arg(long, env = "NTRIP_USER")]
    user: Option<String>,

    /// Password for HTTP basic auth
    #[arg(long, env = "NTRIP_PASS", hide_env_values = true)]
    pass: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a mountpoint and average the position
    Stream {
        #[command(flatten)]
        caster: CasterArgs,

        /// Mountpoint name
        #[arg(long, env = "NTRIP_MOUNT")]
        mount: Option<String>,

        /// Sample source: nmea (GGA fixes) or rtk (aggregator solutions)
        #[arg(long)]
        source: Option<SampleSource>,

        /// RTK mode: static or kinematic
        #[arg(long)]
        mode: Option<RtkMode>,

        /// Minimum fix quality (4 = RTK fix, 5 = float RTK)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=8))]
        min_fix: Option<u8>,

        /// Number of samples to collect
        #[arg(long)]
        samples: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Output JSON path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print status lines as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// List the mountpoints offered by a caster
    Sourcetable {
        #[command(flatten)]
        caster: CasterArgs,

        /// Only show this mountpoint
        #[arg(long)]
        mount: Option<String>,

        /// Print the parsed table as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = config::load_config();

    let result = match cli.command {
        Commands::Stream {
            caster,
            mount,
            source,
            mode,
            min_fix,
            samples,
            timeout,
            output,
            json,
        } => {
            let Some(mountpoint) = mount.or_else(|| config.ntrip.mountpoint.clone()) else {
                eprintln!("Error: mountpoint is required (--mount or ntrip.mountpoint)");
                std::process::exit(2);
            };
            let samples = samples.unwrap_or(config.averaging.samples);
            if samples == 0 {
                eprintln!("Error: sample count must be greater than 0");
                std::process::exit(2);
            }
            let opts = SessionOptions {
                mountpoint,
                source: source.unwrap_or(config.averaging.source),
                mode: mode.unwrap_or(config.rtk.mode),
                min_fix_quality: min_fix.unwrap_or(config.averaging.min_fix_quality),
                samples,
                timeout: Duration::from_secs(timeout.unwrap_or(config.averaging.timeout_secs)),
                json_status: json,
                status_interval: Duration::from_secs(1),
            };
            let output = output.unwrap_or_else(|| PathBuf::from(&config.averaging.output));
            cmd_stream(&config, caster, opts, output).await
        }
        Commands::Sourcetable { caster, mount, json } => {
            cmd_sourcetable(&config, caster, mount.as_deref(), json).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Build a client from flags, falling back to the config file.
fn caster_client(config: &Config, args: CasterArgs) -> Result<NtripClient> {
    let host = args
        .host
        .or_else(|| config.ntrip.host.clone())
        .ok_or_else(|| ReceiverError::Address("caster host is required (--host or ntrip.host)".into()))?;
    NtripClient::new(
        &host,
        args.port.unwrap_or(config.ntrip.port),
        args.user.or_else(|| config.ntrip.username.clone()),
        args.pass.or_else(|| config.ntrip.password.clone()),
    )
}

async fn cmd_stream(
    config: &Config,
    caster: CasterArgs,
    opts: SessionOptions,
    output: PathBuf,
) -> Result<()> {
    let client = caster_client(config, caster)?;
    eprintln!(
        "Collecting {} samples (min fix quality {}: {}) from {}",
        opts.samples,
        opts.min_fix_quality,
        fix_quality_description(opts.min_fix_quality),
        client.mount_url(&opts.mountpoint)
    );

    let outcome = session::run(&client, &opts).await?;

    eprintln!();
    eprintln!(
        "Stopped: {} after {:.1} s",
        outcome.reason,
        outcome.elapsed.as_secs_f64()
    );
    eprintln!(
        "  Bytes: {} in, {} skipped. Frames: {} RTCM3, {} UBX, {} NMEA",
        outcome.demux.bytes_in,
        outcome.demux.bytes_skipped,
        outcome.demux.rtcm_frames,
        outcome.demux.ubx_frames,
        outcome.demux.nmea_frames
    );
    eprintln!(
        "  Solutions: {} ({} dropped, {:.1}% fixed)",
        outcome.aggregator.solutions,
        outcome.aggregator.dropped,
        outcome.aggregator.fix_ratio() * 100.0
    );
    print_histogram(&outcome.fix_quality_distribution);

    let (position, stats) = outcome.result?;

    println!();
    println!("Averaged position:");
    println!("  Latitude:  {:.9} (σ {:.9})", position.latitude, stats.latitude_std_dev);
    println!("  Longitude: {:.9} (σ {:.9})", position.longitude, stats.longitude_std_dev);
    println!("  Altitude:  {:.3} m (σ {:.3} m)", position.altitude, stats.altitude_std_dev);
    println!("  Samples:   {} over {:.1} s", stats.sample_count, stats.duration);

    position.save_to_file(&output)?;
    println!();
    println!("Saved: {}", output.display());
    Ok(())
}

async fn cmd_sourcetable(
    config: &Config,
    caster: CasterArgs,
    mount: Option<&str>,
    json: bool,
) -> Result<()> {
    let client = caster_client(config, caster)?;
    let table = client.sourcetable().await?;
    if !table.complete {
        eprintln!("warning: sourcetable was not terminated by ENDSOURCETABLE");
    }
    let mounts = select_mounts(&table, mount)?;

    if json {
        let text = serde_json::to_string_pretty(&mounts).map_err(RtkError::from)?;
        println!("{text}");
        return Ok(());
    }

    println!();
    println!("{} ({} mountpoints)", client.base_url(), table.mounts.len());
    println!();
    println!("{}", mount_table(&mounts));
    Ok(())
}

/// Every mountpoint, or just the named one.
fn select_mounts<'a>(table: &'a Sourcetable, name: Option<&str>) -> Result<Vec<&'a MountPoint>> {
    match name {
        Some(name) => table
            .find(name)
            .map(|m| vec![m])
            .ok_or_else(|| ReceiverError::UnknownMount(name.to_string())),
        None => Ok(table.mounts.iter().collect()),
    }
}

fn mount_table(mounts: &[&MountPoint]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Mountpoint", "Identifier", "Format", "Nav", "Lat", "Lon", "Auth"]);
    let coord = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    for m in mounts {
        table.add_row(vec![
            Cell::new(&m.name),
            Cell::new(&m.identifier),
            Cell::new(&m.format),
            Cell::new(&m.nav_system),
            Cell::new(coord(m.latitude)).set_alignment(CellAlignment::Right),
            Cell::new(coord(m.longitude)).set_alignment(CellAlignment::Right),
            Cell::new(if m.requires_auth() { "yes" } else { "no" }),
        ]);
    }
    table
}

fn print_histogram(histogram: &BTreeMap<u8, u64>) {
    if histogram.is_empty() {
        return;
    }
    eprintln!("  Fix quality distribution:");
    for (&quality, &count) in histogram {
        eprintln!("    {quality} {:<24} {count}", fix_quality_description(quality));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gnss_core::sourcetable::parse_sourcetable;

    const TABLE: &str = "SOURCETABLE 200 OK\r\n\
        STR;ZUR1;Zurich;RTCM 3.2;1005(10),1077(1);2;GPS;SNIP;CHE;47.39;8.65;0;0;sNTRIP;none;B;N;3600\r\n\
        STR;OPEN;Open;RTCM 3.3;1005(10);2;GPS+GLO;SNIP;CHE;;;0;0;sNTRIP;none;N;N;2400\r\n\
        ENDSOURCETABLE\r\n";

    #[test]
    fn test_select_mounts() {
        let table = parse_sourcetable(TABLE);
        assert_eq!(select_mounts(&table, None).unwrap().len(), 2);

        let one = select_mounts(&table, Some("OPEN")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].identifier, "Open");

        let err = select_mounts(&table, Some("NOPE")).unwrap_err();
        assert!(matches!(err, ReceiverError::UnknownMount(name) if name == "NOPE"));
    }

    #[test]
    fn test_mount_table_rows() {
        let table = parse_sourcetable(TABLE);
        let mounts = select_mounts(&table, None).unwrap();
        let text = mount_table(&mounts).to_string();
        assert!(text.contains("Mountpoint"));
        assert!(text.contains("ZUR1"));
        assert!(text.contains("47.39"));
        assert!(text.contains("yes"));
        // OPEN has no coordinates
        let open_line = text.lines().find(|l| l.contains("OPEN")).unwrap();
        assert!(open_line.contains('-'));
        assert!(open_line.contains("no"));
    }
}
