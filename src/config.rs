use log::{info, warn};
use std::path::Path;
use std::time::Duration;

const DEFAULT_GC_INTERVAL_SECS: f32 = 30.0;

/// Loader settings read from a small line-oriented key/value file.
///
/// Recognized keys:
/// - `garbage_collection_interval`: float seconds between periodic GC passes.
///   Non-positive or unparseable values fall back to the default (30s).
/// - `blacklist`: repeatable; each value is matched case-insensitively as a
///   substring against bare filenames during index scans.
/// - `normal_map_suffixes`: comma-separated key suffixes that force the
///   alpha-capable block format and the normal-map channel repack.
///
/// A missing or malformed file is never fatal: defaults apply and the parse
/// problem is logged.
#[derive(Debug, Clone)]
pub struct Config {
    pub gc_interval: Duration,
    pub blacklist: Vec<String>,
    pub normal_map_suffixes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs_f32(DEFAULT_GC_INTERVAL_SECS),
            blacklist: Vec::new(),
            normal_map_suffixes: vec!["_bump".to_string(), "_nrm".to_string()],
        }
    }
}

impl Config {
    /// Reads settings from `path`, falling back to defaults when the file is
    /// absent or a line does not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                info!(
                    "Settings file '{}' not readable ({e}); using defaults.",
                    path.display()
                );
                return Self::default();
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Self {
        let mut cfg = Self::default();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let Some(eq_idx) = line.find('=') else {
                warn!("Ignoring malformed settings line: '{line}'");
                continue;
            };
            let (key_raw, value_raw) = line.split_at(eq_idx);
            let key = key_raw.trim().to_ascii_lowercase();
            let value = value_raw[1..].trim();
            if key.is_empty() {
                continue;
            }

            match key.as_str() {
                "garbage_collection_interval" => match value.parse::<f32>() {
                    Ok(secs) if secs > 0.0 && secs.is_finite() => {
                        cfg.gc_interval = Duration::from_secs_f32(secs);
                    }
                    Ok(secs) => {
                        warn!(
                            "garbage_collection_interval={secs} is not positive; \
                             keeping default {DEFAULT_GC_INTERVAL_SECS}s."
                        );
                    }
                    Err(e) => {
                        warn!("Could not parse garbage_collection_interval '{value}': {e}");
                    }
                },
                "blacklist" => {
                    if !value.is_empty() {
                        cfg.blacklist.push(value.to_ascii_lowercase());
                    }
                }
                "normal_map_suffixes" => {
                    let suffixes: Vec<String> = value
                        .split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                    if suffixes.is_empty() {
                        warn!("normal_map_suffixes is empty; keeping defaults.");
                    } else {
                        cfg.normal_map_suffixes = suffixes;
                    }
                }
                other => {
                    warn!("Unknown settings key '{other}' ignored.");
                }
            }
        }

        cfg
    }
}
