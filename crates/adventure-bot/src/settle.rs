//! How long to wait between sending input and draining output.
//!
//! The child never says "done", so this is a guess either way. `Fixed`
//! sleeps a set delay. `Quiet` waits until output has stopped arriving for
//! that delay, but never longer than `max_wait` overall.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleMode {
    #[default]
    Fixed,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settle {
    pub mode: SettleMode,
    pub delay: Duration,
    pub max_wait: Duration,
}

impl Settle {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            mode: SettleMode::Fixed,
            delay,
            max_wait: delay,
        }
    }

    pub fn quiet(delay: Duration, max_wait: Duration) -> Self {
        Self {
            mode: SettleMode::Quiet,
            delay,
            max_wait,
        }
    }

    /// Wait for output to settle. `signal` is the session's output notifier.
    pub async fn wait(&self, signal: &Notify) {
        match self.mode {
            SettleMode::Fixed => time::sleep(self.delay).await,
            SettleMode::Quiet => {
                let deadline = Instant::now() + self.max_wait;
                loop {
                    tokio::select! {
                        _ = time::sleep(self.delay) => return,
                        _ = time::sleep_until(deadline) => return,
                        _ = signal.notified() => {}
                    }
                }
            }
        }
    }
}

impl Default for Settle {
    fn default() -> Self {
        Self::fixed(DEFAULT_DELAY)
    }
}
