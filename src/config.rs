use crate::apply::ApplyMode;
use crate::timeline::DEFAULT_GROUP_NAME;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

const ENV_APPLY_MODE: &str = "PATTERN_AGENT_APPLY_MODE";
const ENV_POLL_INTERVAL_MS: &str = "PATTERN_AGENT_POLL_INTERVAL_MS";
const ENV_DEFAULT_GROUP_NAME: &str = "PATTERN_AGENT_DEFAULT_GROUP_NAME";
const ENV_PATTERN_STORE: &str = "PATTERN_AGENT_PATTERN_STORE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentConfig {
    pub apply_mode: ApplyMode,
    pub poll_interval_ms: u64,
    pub default_group_name: String,
    pub pattern_store_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            apply_mode: ApplyMode::Local,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_group_name: DEFAULT_GROUP_NAME.to_string(),
            pattern_store_path: None,
        }
    }
}

impl AgentConfig {
    /// Environment over the optional config file over defaults.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file_config = match config_file {
            Some(path) => load_config_file(path)?,
            None => PartialConfig::default(),
        };
        let env_config = PartialConfig::from_env()?;
        let config = Self::from_layers(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn from_layers(primary: PartialConfig, fallback: PartialConfig) -> Self {
        let defaults = Self::default();
        Self {
            apply_mode: primary
                .apply_mode
                .or(fallback.apply_mode)
                .unwrap_or(defaults.apply_mode),
            poll_interval_ms: primary
                .poll_interval_ms
                .or(fallback.poll_interval_ms)
                .unwrap_or(defaults.poll_interval_ms),
            default_group_name: primary
                .default_group_name
                .or(fallback.default_group_name)
                .map(|name| name.trim().to_string())
                .unwrap_or(defaults.default_group_name),
            pattern_store_path: primary.pattern_store_path.or(fallback.pattern_store_path),
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.poll_interval_ms > 0,
            "poll_interval_ms must be greater than zero"
        );
        anyhow::ensure!(
            !self.default_group_name.trim().is_empty(),
            "default_group_name must not be blank"
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    apply_mode: Option<ApplyMode>,
    poll_interval_ms: Option<u64>,
    default_group_name: Option<String>,
    pattern_store_path: Option<PathBuf>,
}

impl PartialConfig {
    fn from_env() -> Result<Self> {
        let apply_mode = match env::var(ENV_APPLY_MODE) {
            Ok(raw) => Some(match raw.trim().to_ascii_lowercase().as_str() {
                "local" => ApplyMode::Local,
                "remote" | "job" => ApplyMode::Remote,
                other => anyhow::bail!("invalid {ENV_APPLY_MODE}: {other}"),
            }),
            Err(_) => None,
        };
        let poll_interval_ms = match env::var(ENV_POLL_INTERVAL_MS) {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid {ENV_POLL_INTERVAL_MS}: {raw}"))?,
            ),
            Err(_) => None,
        };
        Ok(Self {
            apply_mode,
            poll_interval_ms,
            default_group_name: env::var(ENV_DEFAULT_GROUP_NAME).ok(),
            pattern_store_path: env::var_os(ENV_PATTERN_STORE).map(PathBuf::from),
        })
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
