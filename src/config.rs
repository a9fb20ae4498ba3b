use std::path::Path;
use std::str::FromStr;

use ini::Ini;
use log::{info, warn};
use thiserror::Error;

use crate::game::stage_stats::DEFAULT_STAR_THRESHOLDS;
use crate::game::timing_windows::{
    GOOD_BACKEND_S, GOOD_FRONTEND_S, HitWindow, LIFT_TIMING_MULT, PERFECT_BACKEND_S,
    PERFECT_FRONTEND_S, TimingPolicy, WindowKind,
};

pub const CONFIG_PATH: &str = "fretline.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] ini::Error),

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("'{other}' is not a valid LogLevel setting")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub chord_matching: bool,
    pub extended_sustain: bool,
    pub overdrive_strum: bool,
    pub bot_perfect: bool,
    pub timing: TimingPolicy,
    pub star_thresholds: [f64; 6],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            chord_matching: false,
            extended_sustain: false,
            overdrive_strum: false,
            bot_perfect: false,
            timing: TimingPolicy::default(),
            star_thresholds: DEFAULT_STAR_THRESHOLDS,
        }
    }
}

#[inline(always)]
const fn flag(v: bool) -> &'static str {
    if v { "1" } else { "0" }
}

fn create_default_config_file(path: &Path) -> Result<(), ConfigError> {
    info!("'{}' not found, creating with default values.", path.display());
    let default = Config::default();
    let good = default.timing.good(WindowKind::Press);
    let perfect = default.timing.perfect();
    let thresholds = default
        .star_thresholds
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut conf = Ini::new();
    conf.with_section(Some("Options"))
        .set("BotPerfect", flag(default.bot_perfect))
        .set("ChordMatching", flag(default.chord_matching))
        .set("ExtendedSustain", flag(default.extended_sustain))
        .set("LogLevel", default.log_level.as_str())
        .set("OverdriveStrum", flag(default.overdrive_strum));
    conf.with_section(Some("Timing"))
        .set("GoodBackend", good.back.to_string())
        .set("GoodFrontend", good.front.to_string())
        .set("InputOffsetMs", "0")
        .set("LiftTimingMult", default.timing.lift_timing_mult().to_string())
        .set("PerfectBackend", perfect.back.to_string())
        .set("PerfectFrontend", perfect.front.to_string())
        .set("VideoOffsetMs", "0");
    conf.with_section(Some("Stars")).set("Thresholds", thresholds);
    conf.write_to_file(path)?;
    Ok(())
}

fn read<T: FromStr>(conf: &Ini, section: &str, key: &str, default: T) -> T {
    let Some(raw) = conf.get_from(Some(section), key) else {
        return default;
    };
    raw.trim().parse::<T>().unwrap_or_else(|_| {
        warn!("Invalid value '{raw}' for [{section}] {key}; using default.");
        default
    })
}

#[inline(always)]
fn read_flag(conf: &Ini, section: &str, key: &str, default: bool) -> bool {
    read::<u8>(conf, section, key, u8::from(default)) != 0
}

fn parse_thresholds(raw: &str) -> Option<[f64; 6]> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect::<Option<_>>()?;
    let table: [f64; 6] = values.try_into().ok()?;
    let ordered = table.iter().all(|v| v.is_finite() && *v >= 0.0)
        && table.windows(2).all(|w| w[0] <= w[1]);
    ordered.then_some(table)
}

/// Builds a config from parsed INI contents. Missing keys take their default;
/// malformed keys and invalid timing combinations warn and take their default.
pub fn from_ini(conf: &Ini) -> Config {
    let default = Config::default();

    let log_level = read(conf, "Options", "LogLevel", default.log_level);
    let chord_matching = read_flag(conf, "Options", "ChordMatching", default.chord_matching);
    let extended_sustain = read_flag(conf, "Options", "ExtendedSustain", default.extended_sustain);
    let overdrive_strum = read_flag(conf, "Options", "OverdriveStrum", default.overdrive_strum);
    let bot_perfect = read_flag(conf, "Options", "BotPerfect", default.bot_perfect);

    let good = HitWindow {
        back: read(conf, "Timing", "GoodBackend", GOOD_BACKEND_S),
        front: read(conf, "Timing", "GoodFrontend", GOOD_FRONTEND_S),
    };
    let perfect = HitWindow {
        back: read(conf, "Timing", "PerfectBackend", PERFECT_BACKEND_S),
        front: read(conf, "Timing", "PerfectFrontend", PERFECT_FRONTEND_S),
    };
    let lift_mult = read(conf, "Timing", "LiftTimingMult", LIFT_TIMING_MULT);
    let input_offset = read(conf, "Timing", "InputOffsetMs", 0.0_f64) / 1000.0;
    let video_offset = read(conf, "Timing", "VideoOffsetMs", 0.0_f64) / 1000.0;
    let timing = TimingPolicy::new(good, perfect, lift_mult, input_offset, video_offset)
        .unwrap_or_else(|e| {
            warn!("Invalid [Timing] settings ({e}); using default windows.");
            default.timing
        });

    let star_thresholds = match conf.get_from(Some("Stars"), "Thresholds") {
        None => default.star_thresholds,
        Some(raw) => parse_thresholds(raw).unwrap_or_else(|| {
            warn!("Invalid [Stars] Thresholds '{raw}'; expected six ascending ratios.");
            default.star_thresholds
        }),
    };

    Config {
        log_level,
        chord_matching,
        extended_sustain,
        overdrive_strum,
        bot_perfect,
        timing,
        star_thresholds,
    }
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let conf = Ini::load_from_file(path)?;
    Ok(from_ini(&conf))
}

/// Loads the config at `path`, creating it with defaults when missing. Never
/// fails: read problems fall back to defaults with a warning.
pub fn load(path: &Path) -> Config {
    if !path.exists()
        && let Err(e) = create_default_config_file(path)
    {
        warn!("Failed to create default config file: {e}");
    }
    match load_from(path) {
        Ok(cfg) => {
            info!("Configuration loaded from '{}'.", path.display());
            cfg
        }
        Err(e) => {
            warn!("Failed to load '{}': {e}. Using default values.", path.display());
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let cfg = load(&path);
        assert!(path.exists());
        assert_eq!(cfg, Config::default());
        // The written file reads back to the same values.
        assert_eq!(load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn reads_options_and_timing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.ini");
        fs::write(
            &path,
            "[Options]\nLogLevel=debug\nChordMatching=1\nBotPerfect=1\n\
             [Timing]\nGoodBackend=0.1\nGoodFrontend=0.09\nPerfectBackend=0.03\n\
             PerfectFrontend=0.03\nInputOffsetMs=20\n\
             [Stars]\nThresholds=0.1,0.2,0.3,0.4,0.5,0.9\n",
        )
        .unwrap();
        let cfg = load(&path);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert!(cfg.chord_matching && cfg.bot_perfect && !cfg.overdrive_strum);
        assert!((cfg.timing.input_offset() - 0.02).abs() < 1e-12);
        assert_eq!(cfg.timing.perfect().front, 0.03);
        assert_eq!(cfg.star_thresholds[5], 0.9);
    }

    #[test]
    fn malformed_values_fall_back() {
        let conf = Ini::load_from_str(
            "[Options]\nLogLevel=loud\nOverdriveStrum=yes\n\
             [Timing]\nPerfectBackend=0.2\n\
             [Stars]\nThresholds=1,2,3\n",
        )
        .unwrap();
        let cfg = from_ini(&conf);
        assert_eq!(cfg.log_level, LogLevel::Warn);
        assert!(!cfg.overdrive_strum);
        // Perfect wider than good is rejected as a whole.
        assert_eq!(cfg.timing, TimingPolicy::default());
        assert_eq!(cfg.star_thresholds, DEFAULT_STAR_THRESHOLDS);
    }

    #[test]
    fn log_level_round_trips_names() {
        for level in [LogLevel::Off, LogLevel::Info, LogLevel::Trace] {
            assert_eq!(level.as_str().parse::<LogLevel>(), Ok(level));
        }
        assert_eq!(LogLevel::Debug.as_level_filter(), log::LevelFilter::Debug);
    }
}
