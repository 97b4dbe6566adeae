use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::ConnectionOptions;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ws_url: String,
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub notify_throttle_ms: u64,
    pub state_db_url: String,
    pub runtime_host: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws".into(),
            token: None,
            session_id: None,
            reconnect_interval_ms: 3000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 5000,
            notify_throttle_ms: 50,
            state_db_url: "sqlite://./data/shipfeed.db".into(),
            runtime_host: None,
        }
    }
}

/// Shape of `shipfeed.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    ws_url: Option<String>,
    token: Option<String>,
    session_id: Option<String>,
    reconnect_interval_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    connect_timeout_ms: Option<u64>,
    notify_throttle_ms: Option<u64>,
    state_db_url: Option<String>,
    runtime_host: Option<String>,
}

impl Settings {
    pub fn connection_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::new(self.ws_url.clone())
            .with_reconnect(
                Duration::from_millis(self.reconnect_interval_ms),
                self.max_reconnect_attempts,
            )
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        if let Some(token) = self.token.as_deref().filter(|token| !token.is_empty()) {
            options = options.with_token(token);
        }
        if let Some(session_id) = self.session_id.as_deref().filter(|id| !id.is_empty()) {
            options = options.with_session_id(session_id);
        }
        options.runtime_host = self.runtime_host.clone();
        options
    }

    pub fn notify_throttle(&self) -> Duration {
        Duration::from_millis(self.notify_throttle_ms)
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.ws_url {
            self.ws_url = v;
        }
        if let Some(v) = file.token {
            self.token = Some(v);
        }
        if let Some(v) = file.session_id {
            self.session_id = Some(v);
        }
        if let Some(v) = file.reconnect_interval_ms {
            self.reconnect_interval_ms = v;
        }
        if let Some(v) = file.max_reconnect_attempts {
            self.max_reconnect_attempts = v;
        }
        if let Some(v) = file.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = file.notify_throttle_ms {
            self.notify_throttle_ms = v;
        }
        if let Some(v) = file.state_db_url {
            self.state_db_url = v;
        }
        if let Some(v) = file.runtime_host {
            self.runtime_host = Some(v);
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("SHIPFEED_WS_URL") {
            self.ws_url = v;
        }
        if let Some(v) = var("APP__WS_URL") {
            self.ws_url = v;
        }

        if let Some(v) = var("SHIPFEED_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = var("SHIPFEED_SESSION_ID") {
            self.session_id = Some(v);
        }

        if let Some(parsed) = var("APP__RECONNECT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_interval_ms = parsed;
        }
        if let Some(parsed) = var("APP__MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_reconnect_attempts = parsed;
        }
        if let Some(parsed) = var("APP__CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = parsed;
        }
        if let Some(parsed) = var("APP__NOTIFY_THROTTLE_MS").and_then(|v| v.parse().ok()) {
            self.notify_throttle_ms = parsed;
        }

        if let Some(v) = var("SHIPFEED_STATE_DB") {
            self.state_db_url = v;
        }
        if let Some(v) = var("SHIPFEED_RUNTIME_HOST") {
            self.runtime_host = Some(v);
        }
    }
}

/// Defaults, then the optional config file, then the environment.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    match fs::read_to_string(config_path) {
        Ok(raw) => {
            if let Err(err) = settings.apply_file(&raw) {
                warn!(path = %config_path.display(), error = %err, "ignoring unreadable config file");
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %config_path.display(), error = %err, "failed to read config file");
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    if let Some(parent) = sqlite_parent_dir(&database_url) {
        fs::create_dir_all(&parent).with_context(|| {
            format!(
                "failed to create parent directory '{}' for database url '{database_url}'",
                parent.display()
            )
        })?;
    }
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().state_db_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn sqlite_parent_dir(database_url: &str) -> Option<std::path::PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")?
        .split('?')
        .next()
        .filter(|path| !path.is_empty())?;
    Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
