use game2048_host_runtime::{ResilienceConfig, RuntimeConfig, ThemeDescriptor};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SESSION_LABEL: &str = "S1";
pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;
pub const DEFAULT_STATE_FILE: &str = "game2048-state.json";
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub session_label: String,
    pub outbound_queue_cap: usize,
    pub theme_kind: Option<i64>,
    pub state_file: PathBuf,
    pub markup_file: Option<PathBuf>,
    pub max_errors: Option<u32>,
    pub decay_cooldown: Option<Duration>,
    pub issue_url: Option<String>,
    pub tick: Duration,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|raw| !raw.trim().is_empty());

        Self {
            session_label: non_empty("GAME2048_SESSION")
                .unwrap_or_else(|| DEFAULT_SESSION_LABEL.to_string()),
            outbound_queue_cap: non_empty("GAME2048_OUTBOUND_QUEUE_CAP")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAP),
            theme_kind: non_empty("GAME2048_THEME_KIND")
                .and_then(|raw| raw.trim().parse::<i64>().ok()),
            state_file: non_empty("GAME2048_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            markup_file: non_empty("GAME2048_MARKUP_FILE").map(PathBuf::from),
            max_errors: non_empty("GAME2048_MAX_ERRORS")
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|value| *value > 0),
            decay_cooldown: non_empty("GAME2048_DECAY_SECS")
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
            issue_url: non_empty("GAME2048_ISSUE_URL"),
            tick: DEFAULT_TICK,
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let defaults = ResilienceConfig::default();
        RuntimeConfig {
            resilience: ResilienceConfig {
                max_errors: self.max_errors.unwrap_or(defaults.max_errors),
                decay_cooldown: self.decay_cooldown.unwrap_or(defaults.decay_cooldown),
                issue_url: self.issue_url.clone(),
                ..defaults
            },
            theme: self.theme_kind.map(ThemeDescriptor::new),
        }
    }
}
