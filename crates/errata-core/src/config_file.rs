use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::{Config, Credentials, Endpoints};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub models: Option<ModelsConfig>,
    pub endpoints: Option<EndpointsConfig>,
    pub retry: Option<RetryConfig>,
    pub judge: Option<JudgeConfig>,
    pub http: Option<HttpConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub reviewer_api_key: Option<String>,
    pub judge_api_key: Option<String>,
    pub dataset_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub reviewer: Option<String>,
    pub judge: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub openai_base_url: Option<String>,
    pub openrouter_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
}

/// Platform config directory path: `<config_dir>/errata/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("errata").join("config.toml"))
}

/// Load config by cascading CWD `.errata.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".errata.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<S, T: Clone>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> &Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(|s| field(s).clone())
        .or_else(|| base.as_ref().and_then(|s| field(s).clone()))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (b, o) = (&base, &overlay);
    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            reviewer_api_key: pick(&o.api_keys, &b.api_keys, |a| &a.reviewer_api_key),
            judge_api_key: pick(&o.api_keys, &b.api_keys, |a| &a.judge_api_key),
            dataset_token: pick(&o.api_keys, &b.api_keys, |a| &a.dataset_token),
        }),
        models: Some(ModelsConfig {
            reviewer: pick(&o.models, &b.models, |m| &m.reviewer),
            judge: pick(&o.models, &b.models, |m| &m.judge),
        }),
        endpoints: Some(EndpointsConfig {
            openai_base_url: pick(&o.endpoints, &b.endpoints, |e| &e.openai_base_url),
            openrouter_base_url: pick(&o.endpoints, &b.endpoints, |e| &e.openrouter_base_url),
        }),
        retry: Some(RetryConfig {
            max_attempts: pick(&o.retry, &b.retry, |r| &r.max_attempts),
            delay_ms: pick(&o.retry, &b.retry, |r| &r.delay_ms),
        }),
        judge: Some(JudgeConfig {
            concurrency: pick(&o.judge, &b.judge, |j| &j.concurrency),
        }),
        http: Some(HttpConfig {
            timeout_secs: pick(&o.http, &b.http, |h| &h.timeout_secs),
        }),
    }
}

impl ConfigFile {
    /// Credentials from the `[api_keys]` section.
    pub fn credentials(&self) -> Credentials {
        let keys = self.api_keys.clone().unwrap_or_default();
        Credentials {
            reviewer_api_key: keys.reviewer_api_key,
            judge_api_key: keys.judge_api_key,
            dataset_token: keys.dataset_token,
        }
    }

    /// Run configuration with unset fields taken from [`Config::default`].
    pub fn to_config(&self) -> Config {
        let defaults = Config::default();
        let endpoints = self.endpoints.clone().unwrap_or_default();
        let retry = self.retry.clone().unwrap_or_default();

        Config {
            credentials: self.credentials(),
            endpoints: Endpoints {
                openai_base_url: endpoints
                    .openai_base_url
                    .unwrap_or(defaults.endpoints.openai_base_url),
                openrouter_base_url: endpoints
                    .openrouter_base_url
                    .unwrap_or(defaults.endpoints.openrouter_base_url),
            },
            retry: RetryPolicy::immediate(
                retry.max_attempts.unwrap_or(defaults.retry.max_attempts),
            )
            .with_delay(Duration::from_millis(retry.delay_ms.unwrap_or(0))),
            judge_concurrency: self
                .judge
                .as_ref()
                .and_then(|j| j.concurrency)
                .unwrap_or(defaults.judge_concurrency),
            timeout_secs: self
                .http
                .as_ref()
                .and_then(|h| h.timeout_secs)
                .unwrap_or(defaults.timeout_secs),
        }
    }
}
