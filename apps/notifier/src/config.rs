use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use notify_core::{
    dispatcher::{
        DispatchConfig, DEFAULT_BODY_MAX_CHARS, DEFAULT_DEEP_LINK_PREFIX, DEFAULT_ELLIPSIS,
        DEFAULT_PUSH_CHANNEL_ID, DEFAULT_TITLE,
    },
    groups::DEFAULT_GROUP_LIST_TTL,
};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "notifier.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub push_url: String,
    pub stream_url: String,
    pub group_cache_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub body_max_chars: usize,
    pub ellipsis: String,
    pub default_title: String,
    pub push_channel_id: String,
    pub deep_link_prefix: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8443/api".into(),
            push_url: "http://127.0.0.1:8450/push".into(),
            stream_url: "http://127.0.0.1:8443".into(),
            group_cache_ttl_secs: DEFAULT_GROUP_LIST_TTL.as_secs(),
            refresh_interval_secs: 60,
            body_max_chars: DEFAULT_BODY_MAX_CHARS,
            ellipsis: DEFAULT_ELLIPSIS.into(),
            default_title: DEFAULT_TITLE.into(),
            push_channel_id: DEFAULT_PUSH_CHANNEL_ID.into(),
            deep_link_prefix: DEFAULT_DEEP_LINK_PREFIX.into(),
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn group_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.group_cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            body_max_chars: self.body_max_chars,
            ellipsis: self.ellipsis.clone(),
            default_title: self.default_title.clone(),
            channel_id: self.push_channel_id.clone(),
            deep_link_prefix: self.deep_link_prefix.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    backend_url: Option<String>,
    push_url: Option<String>,
    stream_url: Option<String>,
    group_cache_ttl_secs: Option<u64>,
    refresh_interval_secs: Option<u64>,
    body_max_chars: Option<usize>,
    ellipsis: Option<String>,
    default_title: Option<String>,
    push_channel_id: Option<String>,
    deep_link_prefix: Option<String>,
    log_filter: Option<String>,
}

/// Defaults, then the TOML file (if present), then environment variables.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = toml::from_str::<FileSettings>(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file_cfg.push_url {
        settings.push_url = v;
    }
    if let Some(v) = file_cfg.stream_url {
        settings.stream_url = v;
    }
    if let Some(v) = file_cfg.group_cache_ttl_secs {
        settings.group_cache_ttl_secs = v;
    }
    if let Some(v) = file_cfg.refresh_interval_secs {
        settings.refresh_interval_secs = v;
    }
    if let Some(v) = file_cfg.body_max_chars {
        settings.body_max_chars = v;
    }
    if let Some(v) = file_cfg.ellipsis {
        settings.ellipsis = v;
    }
    if let Some(v) = file_cfg.default_title {
        settings.default_title = v;
    }
    if let Some(v) = file_cfg.push_channel_id {
        settings.push_channel_id = v;
    }
    if let Some(v) = file_cfg.deep_link_prefix {
        settings.deep_link_prefix = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| {
        lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("NOTIFIER_{name}")))
    };

    if let Some(v) = var("BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = var("PUSH_URL") {
        settings.push_url = v;
    }
    if let Some(v) = var("STREAM_URL") {
        settings.stream_url = v;
    }
    if let Some(v) = var("GROUP_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
        settings.group_cache_ttl_secs = v;
    }
    if let Some(v) = var("REFRESH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        settings.refresh_interval_secs = v;
    }
    if let Some(v) = var("BODY_MAX_CHARS").and_then(|v| v.parse().ok()) {
        settings.body_max_chars = v;
    }
    if let Some(v) = var("ELLIPSIS") {
        settings.ellipsis = v;
    }
    if let Some(v) = var("DEFAULT_TITLE") {
        settings.default_title = v;
    }
    if let Some(v) = var("PUSH_CHANNEL_ID") {
        settings.push_channel_id = v;
    }
    if let Some(v) = var("DEEP_LINK_PREFIX") {
        settings.deep_link_prefix = v;
    }
    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn temp_config(contents: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("notifier_config_test_{suffix}.toml"));
        fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = env::temp_dir().join("notifier_config_test_does_not_exist.toml");
        let mut expected = Settings::default();
        apply_env(&mut expected, |key| env::var(key).ok());

        let settings = load_settings(Some(&path)).expect("defaults");

        assert_eq!(settings, expected);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        let file_cfg: FileSettings = toml::from_str(
            r#"
            backend_url = "https://api.example.com/v1"
            group_cache_ttl_secs = 45
            ellipsis = "…"
            "#,
        )
        .expect("parse");

        apply_file(&mut settings, file_cfg);

        assert_eq!(settings.backend_url, "https://api.example.com/v1");
        assert_eq!(settings.group_cache_ttl(), Duration::from_secs(45));
        assert_eq!(settings.dispatch_config().ellipsis, "…");
        assert_eq!(settings.push_url, Settings::default().push_url);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let path = temp_config("bind_addr = \"0.0.0.0:1\"\n");

        let err = load_settings(Some(&path)).expect_err("unknown key");

        assert!(format!("{err:#}").contains("invalid config file"));
        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn env_overrides_file_and_prefers_app_prefix() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APP__PUSH_URL", "https://push.example.com/send"),
            ("NOTIFIER_PUSH_URL", "https://ignored.example.com"),
            ("NOTIFIER_BODY_MAX_CHARS", "64"),
            ("NOTIFIER_GROUP_CACHE_TTL_SECS", "not-a-number"),
        ]);
        let mut settings = Settings::default();

        apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.push_url, "https://push.example.com/send");
        assert_eq!(settings.body_max_chars, 64);
        assert_eq!(
            settings.group_cache_ttl_secs,
            Settings::default().group_cache_ttl_secs
        );
    }

    #[test]
    fn env_overrides_message_formatting() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("NOTIFIER_ELLIPSIS", "…"),
            ("APP__DEFAULT_TITLE", "Circle update"),
            ("NOTIFIER_DEEP_LINK_PREFIX", "circle://g"),
        ]);
        let mut settings = Settings::default();

        apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

        let dispatch = settings.dispatch_config();
        assert_eq!(dispatch.ellipsis, "…");
        assert_eq!(dispatch.default_title, "Circle update");
        assert_eq!(dispatch.deep_link_prefix, "circle://g");
    }

    #[test]
    fn refresh_interval_is_never_zero() {
        let settings = Settings {
            refresh_interval_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.refresh_interval(), Duration::from_secs(1));
    }
}
