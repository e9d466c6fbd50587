//! Configuration module - command line and settings file parsing
//!
//! Every setting can come from the command line or from the optional TOML
//! settings file given with `--inifile`. The command line wins over the file,
//! the file wins over the built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::time::{MAX_TIME_FACTOR, MINUTES_PER_DAY};

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_TELNET_PORT: u16 = 1235;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOGIC_TICK_MS: u64 = 10;
pub const DEFAULT_SEND_TICK_MS: u64 = 100;
pub const DEFAULT_TIME_FACTOR: u32 = 60;
pub const DEFAULT_NIGHT_STARTING_TIME: i16 = 1080;
pub const DEFAULT_NIGHT_ENDING_TIME: i16 = 480;
pub const DEFAULT_GAME_STARTING_TIME: i16 = 480;
pub const DEFAULT_ASSETS: &str = "data";

/// Command line arguments
#[derive(Parser, Debug, Default, Clone)]
#[clap(author, version, about = "Surviveler game server")]
pub struct Cli {
    /// Game server port
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error), RUST_LOG wins if set
    #[clap(short, long)]
    pub log_level: Option<String>,

    /// Period of the logic tick, in milliseconds
    #[clap(long)]
    pub logic_tick_period: Option<u64>,

    /// Period between two game state snapshots, in milliseconds
    #[clap(long)]
    pub send_tick_period: Option<u64>,

    /// In-game minutes per real minute
    #[clap(long)]
    pub time_factor: Option<u32>,

    /// In-game minute at which night starts
    #[clap(long)]
    pub night_starting_time: Option<i16>,

    /// In-game minute at which night ends
    #[clap(long)]
    pub night_ending_time: Option<i16>,

    /// In-game minute at server start
    #[clap(long)]
    pub game_starting_time: Option<i16>,

    /// Admin console port
    #[clap(short, long)]
    pub telnet_port: Option<u16>,

    /// Assets directory
    #[clap(short, long)]
    pub assets: Option<PathBuf>,

    /// TOML settings file
    #[clap(short, long)]
    pub inifile: Option<PathBuf>,

    /// Seed of the game random generator
    #[clap(long)]
    pub seed: Option<u64>,
}

/// Contents of the settings file, same keys as the long flags
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub logic_tick_period: Option<u64>,
    pub send_tick_period: Option<u64>,
    pub time_factor: Option<u32>,
    pub night_starting_time: Option<i16>,
    pub night_ending_time: Option<i16>,
    pub game_starting_time: Option<i16>,
    pub telnet_port: Option<u16>,
    pub assets: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Game timing and day/night settings
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    pub logic_tick_period: Duration,
    pub send_tick_period: Duration,
    pub time_factor: u32,
    pub night_starting_time: i16,
    pub night_ending_time: i16,
    pub game_starting_time: i16,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            logic_tick_period: Duration::from_millis(DEFAULT_LOGIC_TICK_MS),
            send_tick_period: Duration::from_millis(DEFAULT_SEND_TICK_MS),
            time_factor: DEFAULT_TIME_FACTOR,
            night_starting_time: DEFAULT_NIGHT_STARTING_TIME,
            night_ending_time: DEFAULT_NIGHT_ENDING_TIME,
            game_starting_time: DEFAULT_GAME_STARTING_TIME,
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub telnet_port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub assets: PathBuf,
    pub seed: Option<u64>,
    pub game: GameConfig,
}

impl Config {
    /// Merge the command line with the settings file it points to, if any
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.inifile {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };
        Self::from_parts(cli, file)
    }

    pub fn from_parts(cli: Cli, file: FileSettings) -> Result<Self, ConfigError> {
        let config = Self {
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            telnet_port: cli
                .telnet_port
                .or(file.telnet_port)
                .unwrap_or(DEFAULT_TELNET_PORT),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            assets: cli
                .assets
                .or(file.assets)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS)),
            seed: cli.seed.or(file.seed),
            game: GameConfig {
                logic_tick_period: Duration::from_millis(
                    cli.logic_tick_period
                        .or(file.logic_tick_period)
                        .unwrap_or(DEFAULT_LOGIC_TICK_MS),
                ),
                send_tick_period: Duration::from_millis(
                    cli.send_tick_period
                        .or(file.send_tick_period)
                        .unwrap_or(DEFAULT_SEND_TICK_MS),
                ),
                time_factor: cli
                    .time_factor
                    .or(file.time_factor)
                    .unwrap_or(DEFAULT_TIME_FACTOR),
                night_starting_time: cli
                    .night_starting_time
                    .or(file.night_starting_time)
                    .unwrap_or(DEFAULT_NIGHT_STARTING_TIME),
                night_ending_time: cli
                    .night_ending_time
                    .or(file.night_ending_time)
                    .unwrap_or(DEFAULT_NIGHT_ENDING_TIME),
                game_starting_time: cli
                    .game_starting_time
                    .or(file.game_starting_time)
                    .unwrap_or(DEFAULT_GAME_STARTING_TIME),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let game = &self.game;
        if game.logic_tick_period.is_zero() {
            return Err(ConfigError::Invalid("logic_tick_period must be positive"));
        }
        if game.send_tick_period.is_zero() {
            return Err(ConfigError::Invalid("send_tick_period must be positive"));
        }
        if game.time_factor == 0 {
            return Err(ConfigError::Invalid("time_factor must be positive"));
        }
        if game.time_factor > MAX_TIME_FACTOR {
            return Err(ConfigError::Invalid("time_factor must be at most 60000"));
        }
        let in_day = |t: i16| (0..MINUTES_PER_DAY).contains(&t);
        if !in_day(game.night_starting_time)
            || !in_day(game.night_ending_time)
            || !in_day(game.game_starting_time)
        {
            return Err(ConfigError::Invalid("clock values must lie in 0..1440"));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.telnet_port))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
