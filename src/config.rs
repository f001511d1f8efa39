use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::reconcile::MergePolicy;
use crate::store::{DocumentStore, HttpDocumentStore, LocalFsDocumentStore};

pub const DEBOUNCE_ENV: &str = "WHITESPACE_SAVE_DEBOUNCE_MS";
pub const MAX_RETRIES_ENV: &str = "WHITESPACE_SAVE_MAX_RETRIES";
pub const MERGE_POLICY_ENV: &str = "WHITESPACE_MERGE_POLICY";
pub const STORE_DIR_ENV: &str = "WHITESPACE_STORE_DIR";
pub const STORE_URL_ENV: &str = "WHITESPACE_STORE_URL";
pub const USER_ENV: &str = "WHITESPACE_USER";

/// Autosave tuning for an open chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorConfig {
    pub debounce: Duration,
    /// Extra save cycles scheduled after a failed save. Zero disables retry.
    pub max_retries: u32,
    pub merge_policy: MergePolicy,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(Self::default_debounce_ms()),
            max_retries: Self::default_max_retries(),
            merge_policy: MergePolicy::default(),
        }
    }
}

impl EditorConfig {
    pub fn default_debounce_ms() -> u64 {
        2000
    }

    pub fn default_max_retries() -> u32 {
        2
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(DEBOUNCE_ENV) {
            let ms = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid {DEBOUNCE_ENV}={raw:?}"))?;
            if ms == 0 {
                anyhow::bail!("{DEBOUNCE_ENV} must be greater than zero");
            }
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(MAX_RETRIES_ENV) {
            config.max_retries = raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid {MAX_RETRIES_ENV}={raw:?}"))?;
        }
        if let Some(raw) = lookup(MERGE_POLICY_ENV) {
            config.merge_policy = MergePolicy::parse(&raw).with_context(|| {
                format!(
                    "invalid {MERGE_POLICY_ENV}={raw:?}. expected one of: block-count, reject-dirty"
                )
            })?;
        }
        Ok(config)
    }
}

/// Where documents are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    LocalFs(PathBuf),
    Http(String),
}

impl StoreBackend {
    /// Explicit arguments win over the environment; the URL wins over the
    /// directory when both are present.
    pub fn resolve(store_dir: Option<PathBuf>, store_url: Option<String>) -> anyhow::Result<Self> {
        let store_url = store_url
            .or_else(|| std::env::var(STORE_URL_ENV).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(url) = store_url {
            return Ok(Self::Http(url));
        }
        let store_dir = store_dir
            .or_else(|| std::env::var(STORE_DIR_ENV).ok().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty());
        match store_dir {
            Some(dir) => Ok(Self::LocalFs(dir)),
            None => anyhow::bail!(
                "no document store configured. pass --store-dir/--store-url or set {STORE_DIR_ENV}/{STORE_URL_ENV}"
            ),
        }
    }

    pub fn open(&self) -> anyhow::Result<Arc<dyn DocumentStore>> {
        match self {
            Self::LocalFs(dir) => {
                tracing::debug!(dir = %dir.display(), "using local filesystem store");
                Ok(Arc::new(LocalFsDocumentStore::new(dir.clone())))
            }
            Self::Http(url) => {
                tracing::debug!(url = %url, "using http store");
                Ok(Arc::new(HttpDocumentStore::new(url)?))
            }
        }
    }
}
