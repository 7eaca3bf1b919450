use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.yaml";
pub const PID_FILE: &str = "worker.pid";
pub const DEFAULT_WORKER_PORT: u16 = 37778;
pub const DEFAULT_TMUX_SESSION: &str = "claude-telegram";
pub const DEFAULT_CLAUDE_CMD: &str = "claude --dangerously-skip-permissions";

fn default_worker_port() -> u16 {
    DEFAULT_WORKER_PORT
}

fn default_tmux_session() -> String {
    DEFAULT_TMUX_SESSION.to_string()
}

fn default_claude_cmd() -> String {
    DEFAULT_CLAUDE_CMD.to_string()
}

fn default_api_base_url() -> String {
    tgrelay_channels::telegram::DEFAULT_API_BASE.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Target chat. `0` means not configured.
    #[serde(default)]
    pub chat_id: i64,
    /// Empty list allows everyone in the chat.
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,
    #[serde(default = "default_tmux_session")]
    pub tmux_session: String,
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub verbose_mode: bool,
    #[serde(default = "default_true")]
    pub ask_via_telegram: bool,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: 0,
            allowed_user_ids: Vec::new(),
            worker_port: default_worker_port(),
            tmux_session: default_tmux_session(),
            claude_cmd: default_claude_cmd(),
            workdir: None,
            verbose_mode: false,
            ask_via_telegram: true,
            api_base_url: default_api_base_url(),
        }
    }
}

impl BridgeConfig {
    /// Returns the list of problems that prevent the worker from starting.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.bot_token.trim().is_empty() {
            errors.push("bot_token is required".to_string());
        }
        if self.chat_id == 0 {
            errors.push("chat_id is required".to_string());
        }
        errors
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("configuration incomplete: {}", errors.join(", ")))
        }
    }

    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }
}

/// `~/.tgrelay`, or `./.tgrelay` when `HOME` is unset.
pub fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tgrelay")
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Load the config with `${VAR}` references resolved. A missing file yields defaults.
pub fn load_config(root: &Path) -> Result<BridgeConfig> {
    let mut config = read_raw(root)?;
    config.bot_token = resolve_env_var(&config.bot_token);
    config.api_base_url = resolve_env_var(&config.api_base_url);
    Ok(config)
}

pub fn save_config(root: &Path, config: &BridgeConfig) -> Result<()> {
    fs::create_dir_all(root)
        .with_context(|| format!("failed to create config dir: {}", root.display()))?;
    let path = config_path(root);
    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    fs::write(&path, yaml)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    restrict_permissions(&path);
    Ok(())
}

/// Apply `f` to the on-disk config and write it back. `${VAR}` references
/// are preserved because the file is edited unresolved.
pub fn update_config<F>(root: &Path, f: F) -> Result<BridgeConfig>
where
    F: FnOnce(&mut BridgeConfig),
{
    let mut config = read_raw(root)?;
    f(&mut config);
    save_config(root, &config)?;
    Ok(config)
}

fn read_raw(root: &Path) -> Result<BridgeConfig> {
    let path = config_path(root);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BridgeConfig::default()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file: {}", path.display()))
        }
    };
    if content.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("failed to restrict permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.worker_port, 37778);
        assert_eq!(config.tmux_session, "claude-telegram");
        assert!(config.ask_via_telegram);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            config_path(tmp.path()),
            "bot_token: \"123:abc\"\nchat_id: -100042\nallowed_user_ids: [7, 8]\n",
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.chat_id, -100042);
        assert_eq!(config.allowed_user_ids, vec![7, 8]);
        assert_eq!(config.worker_port, DEFAULT_WORKER_PORT);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(config_path(tmp.path()), "chat_id: [not a number").unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse yaml file"));
    }

    #[test]
    fn validate_reports_missing_credentials() {
        let errors = BridgeConfig::default().validate();
        assert_eq!(errors, vec!["bot_token is required", "chat_id is required"]);
        assert!(BridgeConfig::default().ensure_valid().is_err());
    }

    #[test]
    fn update_preserves_env_references() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            config_path(tmp.path()),
            "bot_token: \"${TGRELAY_TEST_TOKEN_UNSET}\"\nchat_id: 5\n",
        )
        .unwrap();
        update_config(tmp.path(), |c| c.verbose_mode = true).unwrap();

        let raw = fs::read_to_string(config_path(tmp.path())).unwrap();
        assert!(raw.contains("${TGRELAY_TEST_TOKEN_UNSET}"));
        assert!(raw.contains("verbose_mode: true"));
        assert!(load_config(tmp.path()).unwrap().verbose_mode);
    }

    #[test]
    fn resolve_env_var_handles_missing_and_unterminated() {
        assert_eq!(resolve_env_var("plain"), "plain");
        assert_eq!(resolve_env_var("a${TGRELAY_TEST_NOPE}b"), "ab");
        assert_eq!(resolve_env_var("x${OPEN"), "x${OPEN");
    }

    #[test]
    fn empty_allowlist_allows_everyone() {
        let mut config = BridgeConfig::default();
        assert!(config.is_user_allowed(1));
        config.allowed_user_ids = vec![2];
        assert!(!config.is_user_allowed(1));
        assert!(config.is_user_allowed(2));
    }
}
