//! Run configuration: interactive startup prompts plus `ALTCAP_*`
//! environment overrides.
//!
//! | Variable              | Meaning                               | Default           |
//! |-----------------------|---------------------------------------|-------------------|
//! | `ALTCAP_TRACK`        | enable tracking, skips the prompt     | prompt            |
//! | `ALTCAP_CAMERA_INDEX` | camera index, skips the prompt        | prompt            |
//! | `ALTCAP_OUTPUT_DIR`   | directory of the text logs            | `.`               |
//! | `ALTCAP_IMAGE_DIR`    | full-rate frame archive               | `../images`       |
//! | `ALTCAP_KEYFRAME_DIR` | decimated frame archive               | `../images_10fps` |
//! | `ALTCAP_DECIMATION`   | keyframe every N frames               | `10`              |
//! | `ALTCAP_MAX_TICKS`    | stop after N ticks                    | unbounded         |
//! | `ALTCAP_BUS`          | `sim` or `usb`                        | `sim`             |
//! | `ALTCAP_ENVIRONMENT`  | storage subkey of the environment     | `default`         |
//! | `ALTCAP_PLACEMENT`    | storage subkey of the placement       | `default`         |

use crate::sink::{SinkPaths, DEFAULT_DECIMATION};
use crate::{AltcapError, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Which bus gateway backs device discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Sim,
    Usb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub track_enabled: bool,
    pub camera_index: u32,
    pub paths: SinkPaths,
    pub decimation: u64,
    pub max_ticks: Option<u64>,
    pub bus: BusBackend,
    pub environment_key: String,
    pub placement_key: String,
}

impl RunConfig {
    /// Build from the process environment, prompting on `input`/`output` for
    /// whatever the environment leaves unset.
    pub fn from_env<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), input, output)
    }

    pub fn from_lookup<F, R, W>(lookup: F, input: &mut R, output: &mut W) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
        R: BufRead,
        W: Write,
    {
        let track_enabled = match read_env_bool(&lookup, "ALTCAP_TRACK") {
            Some(v) => v,
            None => prompt_track_enabled(input, output)?,
        };
        let camera_index = match read_env_u64(&lookup, "ALTCAP_CAMERA_INDEX") {
            Some(v) => u32::try_from(v)
                .map_err(|_| AltcapError::InvalidInput(format!("camera index {} out of range", v)))?,
            None => prompt_camera_index(input, output)?,
        };

        let paths = SinkPaths {
            log_dir: read_env_path(&lookup, "ALTCAP_OUTPUT_DIR", "."),
            image_dir: read_env_path(&lookup, "ALTCAP_IMAGE_DIR", "../images"),
            keyframe_dir: read_env_path(&lookup, "ALTCAP_KEYFRAME_DIR", "../images_10fps"),
        };

        let decimation = read_env_u64(&lookup, "ALTCAP_DECIMATION").unwrap_or(DEFAULT_DECIMATION);
        if decimation == 0 {
            return Err(AltcapError::InvalidInput("ALTCAP_DECIMATION must be at least 1".into()));
        }

        let bus_name = read_env_string(&lookup, "ALTCAP_BUS", "sim").to_ascii_lowercase();
        let bus = match bus_name.as_str() {
            "sim" => BusBackend::Sim,
            "usb" => BusBackend::Usb,
            other => {
                log::warn!("Unknown ALTCAP_BUS='{}', using sim (supported: sim|usb)", other);
                BusBackend::Sim
            }
        };

        Ok(Self {
            track_enabled,
            camera_index,
            paths,
            decimation,
            max_ticks: read_env_u64(&lookup, "ALTCAP_MAX_TICKS"),
            bus,
            environment_key: read_env_string(&lookup, "ALTCAP_ENVIRONMENT", "default"),
            placement_key: read_env_string(&lookup, "ALTCAP_PLACEMENT", "default"),
        })
    }
}

/// Only `Y` (either case) enables tracking.
pub fn parse_track_answer(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

pub fn prompt_track_enabled<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<bool> {
    writeln!(output, "track enabled? (Y/N)")?;
    output.flush()?;
    let line = read_line(input)?;
    Ok(parse_track_answer(&line))
}

/// Ask until a non-negative integer is entered.
pub fn prompt_camera_index<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<u32> {
    loop {
        write!(output, "camera index (integer): ")?;
        output.flush()?;
        let line = read_line(input)?;
        match line.trim().parse::<u32>() {
            Ok(index) => return Ok(index),
            Err(_) => writeln!(output, "'{}' is not a camera index", line.trim())?,
        }
    }
}

fn read_line<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(AltcapError::InvalidInput("unexpected end of input".into()));
    }
    Ok(line)
}

fn read_env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<bool> {
    lookup(name).and_then(|v| {
        let v = v.trim().to_ascii_lowercase();
        match v.as_str() {
            "1" | "true" | "yes" | "on" | "y" => Some(true),
            "0" | "false" | "no" | "off" | "n" => Some(false),
            _ => None,
        }
    })
}

fn read_env_u64<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<u64> {
    lookup(name).and_then(|v| v.trim().parse::<u64>().ok())
}

fn read_env_string<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: &str) -> String {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_env_path<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: &str) -> PathBuf {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_prompts_fill_unset_values() {
        let mut input = Cursor::new("Y\nabc\n2\n");
        let mut output = Vec::new();
        let cfg = RunConfig::from_lookup(env(&[]), &mut input, &mut output).unwrap();

        assert!(cfg.track_enabled);
        assert_eq!(cfg.camera_index, 2);
        assert_eq!(cfg.paths.image_dir, PathBuf::from("../images"));
        assert_eq!(cfg.paths.keyframe_dir, PathBuf::from("../images_10fps"));
        assert_eq!(cfg.decimation, 10);
        assert_eq!(cfg.bus, BusBackend::Sim);
        assert_eq!(cfg.max_ticks, None);

        let transcript = String::from_utf8(output).unwrap();
        assert!(transcript.contains("track enabled? (Y/N)"));
        assert!(transcript.contains("'abc' is not a camera index"));
    }

    #[test]
    fn test_environment_skips_prompts() {
        let lookup = env(&[
            ("ALTCAP_TRACK", "no"),
            ("ALTCAP_CAMERA_INDEX", "1"),
            ("ALTCAP_BUS", "USB"),
            ("ALTCAP_MAX_TICKS", "25"),
            ("ALTCAP_OUTPUT_DIR", "/tmp/run"),
            ("ALTCAP_ENVIRONMENT", "lab"),
        ]);
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        let cfg = RunConfig::from_lookup(lookup, &mut input, &mut output).unwrap();

        assert!(!cfg.track_enabled);
        assert_eq!(cfg.camera_index, 1);
        assert_eq!(cfg.bus, BusBackend::Usb);
        assert_eq!(cfg.max_ticks, Some(25));
        assert_eq!(cfg.paths.log_dir, PathBuf::from("/tmp/run"));
        assert_eq!(cfg.environment_key, "lab");
        assert_eq!(cfg.placement_key, "default");
        assert!(output.is_empty());
    }

    #[test]
    fn test_track_answer() {
        assert!(parse_track_answer("Y\n"));
        assert!(parse_track_answer("y"));
        assert!(!parse_track_answer("N"));
        assert!(!parse_track_answer("yes"));
        assert!(!parse_track_answer(""));
    }

    #[test]
    fn test_eof_is_an_error() {
        let mut input = Cursor::new("N\n");
        let mut output = Vec::new();
        assert!(RunConfig::from_lookup(env(&[]), &mut input, &mut output).is_err());
    }

    #[test]
    fn test_zero_decimation_rejected() {
        let lookup = env(&[
            ("ALTCAP_TRACK", "0"),
            ("ALTCAP_CAMERA_INDEX", "0"),
            ("ALTCAP_DECIMATION", "0"),
        ]);
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        assert!(RunConfig::from_lookup(lookup, &mut input, &mut output).is_err());
    }
}
