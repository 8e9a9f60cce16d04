//! Configuration file management for gnss-rtk.
//!
//! Reads/writes `~/.gnss-rtk/config.yaml` with receiver input, NTRIP caster,
//! averaging and RTK settings. Command-line flags override these values.

use std::path::{Path, PathBuf};

use log::warn;

use crate::rtk::RtkMode;
use crate::stream::SampleSource;
use crate::types::Result;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub ntrip: NtripConfig,
    pub averaging: AveragingConfig,
    pub rtk: RtkConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub name: String,
    /// Capture file or serial device node read by the feeder
    pub device: Option<String>,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NtripConfig {
    pub host: Option<String>,
    pub port: u16,
    pub mountpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AveragingConfig {
    pub source: SampleSource,
    pub min_fix_quality: u8,
    pub samples: usize,
    pub timeout_secs: u64,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtkConfig {
    pub mode: RtkMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver: ReceiverConfig {
                name: "default".into(),
                device: None,
                chunk_size: 4096,
            },
            ntrip: NtripConfig {
                host: None,
                port: 2101,
                mountpoint: None,
                username: None,
                password: None,
            },
            averaging: AveragingConfig {
                source: SampleSource::Rtk,
                min_fix_quality: 4,
                samples: 60,
                timeout_secs: 300,
                output: "base_position_avg.json".into(),
            },
            rtk: RtkConfig {
                mode: RtkMode::Kinematic,
            },
        }
    }
}

/// Get the config directory path (`~/.gnss-rtk/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".gnss-rtk")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.gnss-rtk/config.yaml`.
///
/// Returns default config if the file doesn't exist or cannot be parsed.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("ignoring {}: {e}", path.display());
            Config::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.gnss-rtk/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config))?;
    Ok(())
}

/// Parse simple YAML-like config text.
///
/// Unknown keys are ignored; malformed numbers keep their defaults. An
/// unknown RTK mode or sample source is an error.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("receiver", "name") => {
                if let Some(v) = parse_string_value(val) {
                    config.receiver.name = v;
                }
            }
            ("receiver", "device") => config.receiver.device = parse_string_value(val),
            ("receiver", "chunk_size") => {
                if let Some(v) = val.parse::<usize>().ok().filter(|&n| n > 0) {
                    config.receiver.chunk_size = v;
                }
            }
            ("ntrip", "host") => config.ntrip.host = parse_string_value(val),
            ("ntrip", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.ntrip.port = v;
                }
            }
            ("ntrip", "mountpoint") => config.ntrip.mountpoint = parse_string_value(val),
            ("ntrip", "username") => config.ntrip.username = parse_string_value(val),
            ("ntrip", "password") => config.ntrip.password = parse_string_value(val),
            ("averaging", "source") => {
                if let Some(v) = parse_string_value(val) {
                    config.averaging.source = v.parse()?;
                }
            }
            ("averaging", "min_fix_quality") => {
                if let Ok(v) = val.parse::<u8>() {
                    config.averaging.min_fix_quality = v;
                }
            }
            ("averaging", "samples") => {
                if let Ok(v) = val.parse::<usize>() {
                    config.averaging.samples = v;
                }
            }
            ("averaging", "timeout") => {
                if let Ok(v) = val.parse::<u64>() {
                    config.averaging.timeout_secs = v;
                }
            }
            ("averaging", "output") => {
                if let Some(v) = parse_string_value(val) {
                    config.averaging.output = v;
                }
            }
            ("rtk", "mode") => {
                if let Some(v) = parse_string_value(val) {
                    config.rtk.mode = v.parse()?;
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn optional_line(key: &str, value: &Option<String>) -> String {
    match value {
        Some(v) => format!("  {key}: \"{v}\""),
        None => format!("  {key}: null"),
    }
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# gnss-rtk configuration".to_string(), String::new()];

    lines.push("receiver:".into());
    lines.push(format!("  name: \"{}\"", config.receiver.name));
    lines.push(optional_line("device", &config.receiver.device));
    lines.push(format!("  chunk_size: {}", config.receiver.chunk_size));
    lines.push(String::new());

    lines.push("ntrip:".into());
    lines.push(optional_line("host", &config.ntrip.host));
    lines.push(format!("  port: {}", config.ntrip.port));
    lines.push(optional_line("mountpoint", &config.ntrip.mountpoint));
    lines.push(optional_line("username", &config.ntrip.username));
    lines.push(optional_line("password", &config.ntrip.password));
    lines.push(String::new());

    lines.push("averaging:".into());
    lines.push(format!("  source: {}", config.averaging.source));
    lines.push(format!("  min_fix_quality: {}", config.averaging.min_fix_quality));
    lines.push(format!("  samples: {}", config.averaging.samples));
    lines.push(format!("  timeout: {}", config.averaging.timeout_secs));
    lines.push(format!("  output: \"{}\"", config.averaging.output));
    lines.push(String::new());

    lines.push("rtk:".into());
    lines.push(format!("  mode: {}", config.rtk.mode));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RtkError;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ntrip.port, 2101);
        assert_eq!(config.averaging.min_fix_quality, 4);
        assert_eq!(config.averaging.output, "base_position_avg.json");
        assert_eq!(config.rtk.mode, RtkMode::Kinematic);
        assert!(config.ntrip.host.is_none());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
# base station
receiver:
  name: "roof"
  device: /dev/ttyACM0
  chunk_size: 512

ntrip:
  host: "rtk2go.com"
  port: 2102
  mountpoint: ZUR1
  username: 'me@example.com'
  password: none

averaging:
  source: nmea
  min_fix_quality: 5
  samples: 120
  timeout: 600
  output: "/tmp/base.json"

rtk:
  mode: static
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.receiver.name, "roof");
        assert_eq!(config.receiver.device.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.receiver.chunk_size, 512);
        assert_eq!(config.ntrip.host.as_deref(), Some("rtk2go.com"));
        assert_eq!(config.ntrip.port, 2102);
        assert_eq!(config.ntrip.mountpoint.as_deref(), Some("ZUR1"));
        assert_eq!(config.ntrip.username.as_deref(), Some("me@example.com"));
        assert_eq!(config.averaging.source, SampleSource::Nmea);
        assert_eq!(config.averaging.min_fix_quality, 5);
        assert_eq!(config.averaging.samples, 120);
        assert_eq!(config.averaging.timeout_secs, 600);
        assert_eq!(config.averaging.output, "/tmp/base.json");
        assert_eq!(config.rtk.mode, RtkMode::Static);
    }

    #[test]
    fn test_parse_config_null_and_bad_numbers() {
        let text = r#"
ntrip:
  host: null
  port: not-a-port
receiver:
  device: ~
  chunk_size: 0
"#;
        let config = parse_config(text).unwrap();
        assert!(config.ntrip.host.is_none());
        assert_eq!(config.ntrip.port, 2101);
        assert!(config.receiver.device.is_none());
        assert_eq!(config.receiver.chunk_size, 4096);
    }

    #[test]
    fn test_unknown_mode_is_error() {
        let err = parse_config("rtk:\n  mode: hovering\n").unwrap_err();
        assert!(matches!(err, RtkError::Config(_)));
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.receiver.device = Some("capture.bin".into());
        config.ntrip.host = Some("caster.example".into());
        config.ntrip.mountpoint = Some("MOUNT".into());
        config.averaging.source = SampleSource::Nmea;
        config.averaging.samples = 10;
        config.rtk.mode = RtkMode::Static;

        let text = serialize_config(&config);
        assert_eq!(parse_config(&text).unwrap(), config);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/config.yaml");
        let mut config = Config::default();
        config.ntrip.username = Some("user".into());
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_save_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let err = save_config_to(&Config::default(), &blocker.join("config.yaml")).unwrap_err();
        assert!(matches!(err, RtkError::Io(_)));
    }
}
