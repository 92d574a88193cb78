use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CoreError, InspireConfig, RelatedOptions};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub search: Option<SearchConfig>,
    pub related: Option<RelatedConfig>,
    pub cocitation: Option<CoCitationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_window: Option<u32>,
    pub window_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedConfig {
    pub max_anchors: Option<usize>,
    pub per_anchor: Option<usize>,
    pub max_results: Option<usize>,
    pub concurrency: Option<usize>,
    pub exclude_review_articles: Option<bool>,
    pub sweet_spot_min: Option<u32>,
    pub sweet_spot_max: Option<u32>,
    pub too_high: Option<u32>,
    pub target_citations: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoCitationConfig {
    pub enabled: Option<bool>,
    pub budget: Option<usize>,
    pub min_seed_citing: Option<u64>,
    pub max_weight: Option<f64>,
    pub saturation: Option<u64>,
    pub score_scale: Option<f64>,
}

impl ConfigFile {
    /// Overwrite the fields of `options` that this config sets.
    pub fn apply(&self, options: &mut RelatedOptions) {
        if let Some(r) = &self.related {
            set(&mut options.max_anchors, r.max_anchors);
            set(&mut options.per_anchor, r.per_anchor);
            set(&mut options.max_results, r.max_results);
            set(&mut options.concurrency, r.concurrency);
            set(&mut options.exclude_review_articles, r.exclude_review_articles);
            set(&mut options.anchor_tuning.sweet_spot_min, r.sweet_spot_min);
            set(&mut options.anchor_tuning.sweet_spot_max, r.sweet_spot_max);
            set(&mut options.anchor_tuning.too_high, r.too_high);
            set(&mut options.anchor_tuning.target_citations, r.target_citations);
        }
        if let Some(c) = &self.cocitation {
            let params = &mut options.cocitation;
            set(&mut params.enabled, c.enabled);
            set(&mut params.budget, c.budget);
            set(&mut params.min_seed_citing, c.min_seed_citing);
            set(&mut params.max_weight, c.max_weight);
            set(&mut params.saturation, c.saturation);
            set(&mut params.score_scale, c.score_scale);
        }
    }

    /// Client settings: defaults overridden by the `[search]` section.
    pub fn inspire_config(&self) -> InspireConfig {
        let mut config = InspireConfig::default();
        if let Some(s) = &self.search {
            set(&mut config.base_url, s.base_url.clone());
            set(&mut config.timeout_secs, s.timeout_secs);
            set(&mut config.requests_per_window, s.requests_per_window);
            set(&mut config.window_secs, s.window_secs);
        }
        config
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

/// Platform config directory path: `<config_dir>/relatedlit/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("relatedlit").join("config.toml"))
}

/// Load config by cascading CWD `.relatedlit.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".relatedlit.toml"));

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
    let search = match (base.search, overlay.search) {
        (Some(b), Some(o)) => Some(SearchConfig {
            base_url: o.base_url.or(b.base_url),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
            requests_per_window: o.requests_per_window.or(b.requests_per_window),
            window_secs: o.window_secs.or(b.window_secs),
        }),
        (b, o) => o.or(b),
    };

    let related = match (base.related, overlay.related) {
        (Some(b), Some(o)) => Some(RelatedConfig {
            max_anchors: o.max_anchors.or(b.max_anchors),
            per_anchor: o.per_anchor.or(b.per_anchor),
            max_results: o.max_results.or(b.max_results),
            concurrency: o.concurrency.or(b.concurrency),
            exclude_review_articles: o.exclude_review_articles.or(b.exclude_review_articles),
            sweet_spot_min: o.sweet_spot_min.or(b.sweet_spot_min),
            sweet_spot_max: o.sweet_spot_max.or(b.sweet_spot_max),
            too_high: o.too_high.or(b.too_high),
            target_citations: o.target_citations.or(b.target_citations),
        }),
        (b, o) => o.or(b),
    };

    let cocitation = match (base.cocitation, overlay.cocitation) {
        (Some(b), Some(o)) => Some(CoCitationConfig {
            enabled: o.enabled.or(b.enabled),
            budget: o.budget.or(b.budget),
            min_seed_citing: o.min_seed_citing.or(b.min_seed_citing),
            max_weight: o.max_weight.or(b.max_weight),
            saturation: o.saturation.or(b.saturation),
            score_scale: o.score_scale.or(b.score_scale),
        }),
        (b, o) => o.or(b),
    };

    ConfigFile {
        search,
        related,
        cocitation,
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, CoreError> {
    let path = config_path()
        .ok_or_else(|| CoreError::Config("could not determine config directory".into()))?;
    save_to_path(config, &path)?;
    Ok(path)
}

/// Write `config` as pretty TOML to `path`, creating parent directories.
pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::Config(format!("failed to create config directory: {e}")))?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))?;
    std::fs::write(path, content)
        .map_err(|e| CoreError::Config(format!("failed to write config: {e}")))?;
    Ok(())
}
