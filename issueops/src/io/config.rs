//! Configuration stored in `issueops.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::folder_naming::sanitize_component;

pub const DEFAULT_CONFIG_FILE: &str = "issueops.toml";

/// Top-level configuration (TOML).
///
/// Missing tables and fields fall back to defaults, so an absent file is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IssueOpsConfig {
    /// Root under which `item-<id>/op-<operation>-<timestamp>` folders are created.
    pub workspace_root: PathBuf,

    /// Directory holding `general.md` and one `<operation>.md` per operation.
    pub templates_dir: PathBuf,

    pub agent: AgentConfig,
    pub reports: ReportsConfig,
    pub publish: PublishConfig,
    pub lookup_cache: LookupCacheConfig,

    /// Per-operation status names, keyed by operation name.
    pub operations: BTreeMap<String, OperationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    pub headed: bool,
    pub skip_permissions: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportNaming {
    /// `report-<action>-1.md`, `-2.md`, ...
    #[default]
    Sequence,
    /// `report-<action>-<YYYYMMDDHHMMSSmmm>.md`
    Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportsConfig {
    pub naming: ReportNaming,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Skip result comments; a continuous-save mechanism already posts them.
    pub suppress_comments: bool,
    /// Skip the body update; a continuous-save mechanism already owns it.
    pub suppress_body: bool,
    /// Inject the save-protocol block into assembled instructions.
    pub save_protocol: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LookupCacheConfig {
    pub path: PathBuf,
    pub staleness_minutes: u64,
    pub lock_timeout_secs: u64,
    pub lock_retry_millis: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperationConfig {
    /// Remote status the work item must have before publishing.
    pub expected_status: Option<String>,
    /// Status to transition to after a `Complete` outcome.
    pub complete_status: Option<String>,
    /// Status to transition to after a `Blocked` outcome.
    pub blocked_status: Option<String>,
}

impl Default for IssueOpsConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(".issueops/work"),
            templates_dir: PathBuf::from(".issueops/templates"),
            agent: AgentConfig::default(),
            reports: ReportsConfig::default(),
            publish: PublishConfig::default(),
            lookup_cache: LookupCacheConfig::default(),
            operations: BTreeMap::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            extra_args: Vec::new(),
            timeout_secs: 60 * 60,
            output_limit_bytes: 4 * 1024 * 1024,
            headed: false,
            skip_permissions: true,
        }
    }
}

impl Default for LookupCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".issueops/cache/workflow-states.json"),
            staleness_minutes: 90,
            lock_timeout_secs: 10,
            lock_retry_millis: 100,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LookupCacheConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_minutes.saturating_mul(60))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_millis)
    }
}

impl IssueOpsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(anyhow!("workspace_root must not be empty"));
        }
        if self.templates_dir.as_os_str().is_empty() {
            return Err(anyhow!("templates_dir must not be empty"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.lookup_cache.path.as_os_str().is_empty() {
            return Err(anyhow!("lookup_cache.path must not be empty"));
        }
        if self.lookup_cache.lock_timeout_secs == 0 {
            return Err(anyhow!("lookup_cache.lock_timeout_secs must be > 0"));
        }
        if self.lookup_cache.lock_retry_millis == 0 {
            return Err(anyhow!("lookup_cache.lock_retry_millis must be > 0"));
        }
        Ok(())
    }

    /// Settings for `operation`, or all-`None` defaults when unconfigured.
    pub fn operation(&self, operation: &str) -> OperationConfig {
        self.operations.get(operation).cloned().unwrap_or_default()
    }

    pub fn general_template(&self) -> PathBuf {
        self.templates_dir.join("general.md")
    }

    /// Template path for `operation`; the name is sanitized so it stays inside `templates_dir`.
    pub fn operation_template(&self, operation: &str) -> PathBuf {
        self.templates_dir
            .join(format!("{}.md", sanitize_component(operation)))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `IssueOpsConfig::default()`.
pub fn load_config(path: &Path) -> Result<IssueOpsConfig> {
    if !path.exists() {
        let cfg = IssueOpsConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: IssueOpsConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &IssueOpsConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::fs_atomic::write_atomic(path, buf.as_bytes())
}
