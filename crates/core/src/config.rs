use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,

    // Storage
    pub db_path: String,
    pub file_store_dir: String,
    pub max_upload_mb: usize,

    // Debug & logging
    pub debug: bool,
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    // Timeouts (seconds) for outbound requests performed by the executor.
    pub connect_timeout: u64,
    pub request_timeout: u64,

    // Request body size limit (MB) for the HTTP API surface.
    pub body_limit_mb: usize,

    // Execution limits
    pub limits: LimitsConfig,

    // Daemon
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            tls: TlsConfig::default(),
            db_path: "workbench.db".to_string(),
            file_store_dir: "files".to_string(),
            max_upload_mb: 25,
            debug: false,
            logging_to_file: false,
            log_dir: None,
            connect_timeout: 30,
            request_timeout: 300,
            body_limit_mb: 10,
            limits: LimitsConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml_ng::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.tls.enable {
            anyhow::ensure!(self.tls.cert.is_some(), "TLS enabled but cert path missing");
            anyhow::ensure!(self.tls.key.is_some(), "TLS enabled but key path missing");
        }
        anyhow::ensure!(self.limits.max_flow_iterations > 0, "max-flow-iterations must be > 0");
        anyhow::ensure!(self.limits.max_goto_jumps > 0, "max-goto-jumps must be > 0");
        Ok(())
    }
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct TlsConfig {
    pub enable: bool,
    pub cert: Option<String>,
    pub key: Option<String>,
}

/// Bounds on flow-runner and script behaviour, preventing a misconfigured
/// flow (a `goto` cycle, an unbounded loop) from running forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LimitsConfig {
    /// Total step executions (across all iterations) a single flow run may perform.
    pub max_flow_iterations: u32,
    /// Total `goto` control transfers a single flow run may perform.
    pub max_goto_jumps: u32,
    /// Calls to `pm.sendRequest` a single script invocation may make.
    pub max_send_request_calls: u32,
    /// Wall-clock budget for a single script invocation, in milliseconds.
    pub script_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_flow_iterations: 1000,
            max_goto_jumps: 100,
            max_send_request_calls: 10,
            script_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DaemonConfig {
    pub pid_file: String,
    pub shutdown_timeout: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: "./workbenchd.pid".to_string(),
            shutdown_timeout: 10,
        }
    }
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching a config file. On changes (debounced 150ms, SHA256 dedup),
    /// reload the config and atomically swap it in via ArcSwap.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.blocking_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        let path_clone = path.clone();
        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            let mut debounce: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    Some(()) = rx.recv() => {
                        debounce = Some(tokio::time::Instant::now() + Duration::from_millis(150));
                    }
                    _ = async {
                        match debounce {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce = None;
                        match std::fs::read(&path_clone) {
                            Ok(contents) => {
                                let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                                if last_hash.as_ref() == Some(&hash) {
                                    continue;
                                }
                                last_hash = Some(hash);

                                match Config::load(&path_clone) {
                                    Ok(new_cfg) => {
                                        tracing::info!("configuration reloaded");
                                        on_reload(&new_cfg);
                                        config.store(Arc::new(new_cfg));
                                    }
                                    Err(e) => {
                                        tracing::error!("config reload failed: {e}");
                                    }
                                }
                            }
                            Err(e) => tracing::error!("config file read failed: {e}"),
                        }
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8787);
        assert!(!cfg.tls.enable);
        assert_eq!(cfg.connect_timeout, 30);
        assert_eq!(cfg.request_timeout, 300);
        assert_eq!(cfg.limits.max_flow_iterations, 1000);
        assert_eq!(cfg.limits.max_goto_jumps, 100);
        assert_eq!(cfg.limits.max_send_request_calls, 10);
    }

    #[test]
    fn test_yaml_deserialization() {
        let yaml = r#"
host: "127.0.0.1"
port: 9000
db-path: "/tmp/workbench.db"
limits:
  max-flow-iterations: 500
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.db_path, "/tmp/workbench.db");
        assert_eq!(config.limits.max_flow_iterations, 500);
        // Unset limits fields fall back to their own defaults via serde(default).
        assert_eq!(config.limits.max_goto_jumps, 100);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut cfg = Config::default();
        cfg.limits.max_flow_iterations = 0;
        assert!(cfg.validate().is_err());
    }
}
