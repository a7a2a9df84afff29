use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub fetch: Option<FetchConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub search_url: Option<String>,
    pub image_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub max_concurrent_fetches: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
}

/// Platform config directory path: `<config_dir>/moviesearch/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("moviesearch").join("config.toml"))
}

/// Load config by cascading CWD `.moviesearch.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".moviesearch.toml"));

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
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let base_api = base.api.unwrap_or_default();
    let overlay_api = overlay.api.unwrap_or_default();
    let base_fetch = base.fetch.unwrap_or_default();
    let overlay_fetch = overlay.fetch.unwrap_or_default();

    ConfigFile {
        api: Some(ApiConfig {
            api_key: overlay_api.api_key.or(base_api.api_key),
            search_url: overlay_api.search_url.or(base_api.search_url),
            image_base_url: overlay_api.image_base_url.or(base_api.image_base_url),
        }),
        fetch: Some(FetchConfig {
            max_concurrent_fetches: overlay_fetch
                .max_concurrent_fetches
                .or(base_fetch.max_concurrent_fetches),
            fetch_timeout_secs: overlay_fetch
                .fetch_timeout_secs
                .or(base_fetch.fetch_timeout_secs),
            search_timeout_secs: overlay_fetch
                .search_timeout_secs
                .or(base_fetch.search_timeout_secs),
        }),
    }
}

impl ConfigFile {
    /// Overwrite the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(api) = &self.api {
            if let Some(key) = &api.api_key {
                config.api_key = Some(key.clone());
            }
            if let Some(url) = &api.search_url {
                config.search_url = url.clone();
            }
            if let Some(url) = &api.image_base_url {
                config.image_base_url = url.clone();
            }
        }
        if let Some(fetch) = &self.fetch {
            if let Some(n) = fetch.max_concurrent_fetches {
                config.max_concurrent_fetches = n.max(1);
            }
            if let Some(secs) = fetch.fetch_timeout_secs {
                config.fetch_timeout_secs = Some(secs);
            }
            if let Some(secs) = fetch.search_timeout_secs {
                config.search_timeout_secs = secs;
            }
        }
    }
}
