//! Bot configuration: a TOML file naming the nick, the rooms to join, the
//! program to run, and how long to let its output settle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adventure_pty::session::DEFAULT_PROGRAM;
use adventure_pty::SessionConfig;
use serde::Deserialize;

use crate::settle::{Settle, SettleMode, DEFAULT_DELAY, DEFAULT_MAX_WAIT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A room to join, with its password if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub name: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub nick: String,
    pub cookiefile: Option<PathBuf>,
    pub rooms: Vec<RoomConfig>,
    pub session: SessionConfig,
    pub settle: Settle,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    general: GeneralSection,
    #[serde(default)]
    rooms: BTreeMap<String, String>,
    #[serde(default)]
    adventure: AdventureSection,
    #[serde(default)]
    settle: SettleSection,
}

#[derive(Debug, Deserialize)]
struct GeneralSection {
    nick: String,
    cookiefile: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct AdventureSection {
    #[serde(default = "default_program")]
    program: String,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<PathBuf>,
    #[serde(default = "default_term_grace_ms")]
    term_grace_ms: u64,
}

impl Default for AdventureSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            cwd: None,
            term_grace_ms: default_term_grace_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SettleSection {
    #[serde(default)]
    mode: SettleMode,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    max_wait_ms: u64,
}

impl Default for SettleSection {
    fn default() -> Self {
        Self {
            mode: SettleMode::default(),
            delay_ms: default_delay_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_term_grace_ms() -> u64 {
    500
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY.as_millis() as u64
}

fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT.as_millis() as u64
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;

        let nick = file.general.nick.trim().to_string();
        if nick.is_empty() {
            return Err(ConfigError::Invalid("general.nick must not be empty".into()));
        }
        if file.settle.delay_ms == 0 {
            return Err(ConfigError::Invalid("settle.delay_ms must be positive".into()));
        }
        if file.settle.max_wait_ms < file.settle.delay_ms {
            return Err(ConfigError::Invalid(
                "settle.max_wait_ms must be at least settle.delay_ms".into(),
            ));
        }

        let rooms = file
            .rooms
            .into_iter()
            .map(|(name, password)| RoomConfig {
                name,
                password: (!password.is_empty()).then_some(password),
            })
            .collect();

        let adventure = file.adventure;
        let mut session = SessionConfig::new(adventure.program)
            .with_args(adventure.args)
            .with_term_grace(Duration::from_millis(adventure.term_grace_ms));
        if let Some(cwd) = adventure.cwd {
            session = session.with_cwd(cwd);
        }

        let delay = Duration::from_millis(file.settle.delay_ms);
        let settle = match file.settle.mode {
            SettleMode::Fixed => Settle::fixed(delay),
            SettleMode::Quiet => {
                Settle::quiet(delay, Duration::from_millis(file.settle.max_wait_ms))
            }
        };

        Ok(Self {
            nick,
            cookiefile: file.general.cookiefile,
            rooms,
            session,
            settle,
        })
    }
}
