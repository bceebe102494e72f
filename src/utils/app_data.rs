use crate::index::types::{LatestPointer, SnapshotMeta, Terminology};
use crate::index::writer::STAGING_SUFFIX;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "termidx";
const CONFIG_FILE: &str = "config.json";
const SNAPSHOTS_DIR: &str = "snapshots";
const LATEST_FILE: &str = "latest.json";

/// Environment variable overriding the app data directory
pub const DATA_DIR_ENV: &str = "TERMIDX_DATA_DIR";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Searches whose result set grows past this many concepts are abandoned
    #[serde(default = "default_result_cap")]
    pub result_cap: usize,

    /// Maximum number of autocomplete suggestions returned
    #[serde(default = "default_autocomplete_limit")]
    pub autocomplete_limit: usize,

    /// Replace concept codes with short aliases in words.json.
    /// Unset means SNOMED CT only.
    #[serde(default)]
    pub compact_ids: Option<bool>,

    /// Recent search outcomes cached per terminology by the daemon
    #[serde(default = "default_search_cache_size")]
    pub search_cache_size: usize,

    /// Label patterns excluded in addition to the built-in list
    #[serde(default)]
    pub extra_exclusion_patterns: Vec<String>,
}

fn default_result_cap() -> usize {
    10_000
}

fn default_autocomplete_limit() -> usize {
    20
}

fn default_search_cache_size() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            result_cap: default_result_cap(),
            autocomplete_limit: default_autocomplete_limit(),
            compact_ids: None,
            search_cache_size: default_search_cache_size(),
            extra_exclusion_patterns: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Whether builds of `terminology` compact ids when the CLI does not say
    pub fn compact_ids_for(&self, terminology: Terminology) -> bool {
        self.compact_ids
            .unwrap_or_else(|| terminology.compacts_ids_by_default())
    }

    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            let config: AppConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory for storing snapshots
pub fn get_app_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        let app_dir = PathBuf::from(dir);
        fs::create_dir_all(&app_dir)?;
        return Ok(app_dir);
    }

    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Reject version ids that would not name a single directory inside the store
pub fn check_version(version: &str) -> Result<()> {
    if version.is_empty()
        || version.contains(['/', '\\'])
        || version.contains("..")
        || version.ends_with(STAGING_SUFFIX)
    {
        anyhow::bail!("Invalid snapshot version {:?}", version);
    }
    Ok(())
}

/// Versioned snapshot directories, one subtree per terminology
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Store rooted in the app data directory
    pub fn open_default() -> Result<Self> {
        Ok(Self::at(get_app_data_dir()?.join(SNAPSHOTS_DIR)))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn terminology_dir(&self, terminology: Terminology) -> PathBuf {
        self.root.join(terminology.name())
    }

    pub fn version_dir(&self, terminology: Terminology, version: &str) -> PathBuf {
        self.terminology_dir(terminology).join(version)
    }

    /// Read the pointer naming the current snapshot, if one was ever published
    pub fn latest(&self, terminology: Terminology) -> Result<Option<LatestPointer>> {
        let path = self.terminology_dir(terminology).join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let pointer = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(pointer))
    }

    /// Directory of the current snapshot
    pub fn latest_dir(&self, terminology: Terminology) -> Result<PathBuf> {
        match self.latest(terminology)? {
            Some(pointer) => Ok(pointer.path),
            None => anyhow::bail!(
                "No snapshot for {}. Run 'termidx build {} --source <DIR>' first.",
                terminology,
                terminology
            ),
        }
    }

    /// Point "latest" at a version. The pointer is written to a temp file and renamed.
    pub fn set_latest(&self, terminology: Terminology, version: &str) -> Result<LatestPointer> {
        let dir = self.terminology_dir(terminology);
        fs::create_dir_all(&dir)?;
        let pointer = LatestPointer {
            version: version.to_string(),
            path: self.version_dir(terminology, version),
        };
        let tmp = dir.join(format!("{}.tmp", LATEST_FILE));
        let content = serde_json::to_string_pretty(&pointer)?;
        fs::write(&tmp, content).context("Failed to write latest pointer")?;
        fs::rename(&tmp, dir.join(LATEST_FILE)).context("Failed to publish latest pointer")?;
        Ok(pointer)
    }

    /// List every complete snapshot, ordered by terminology then version
    pub fn list(&self) -> Result<Vec<SnapshotLocation>> {
        let mut snapshots = Vec::new();

        for terminology in Terminology::ALL {
            let dir = self.terminology_dir(terminology);
            if !dir.exists() {
                continue;
            }
            let latest = self.latest(terminology)?.map(|p| p.version);

            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_dir() || path.to_string_lossy().ends_with(STAGING_SUFFIX) {
                    continue;
                }
                let meta_path = path.join("meta.json");
                let Ok(file) = fs::File::open(&meta_path) else {
                    continue;
                };
                let Ok(meta) = serde_json::from_reader::<_, SnapshotMeta>(file) else {
                    continue;
                };
                snapshots.push(SnapshotLocation {
                    is_latest: latest.as_deref() == Some(meta.version.as_str()),
                    meta,
                    dir: path,
                });
            }
        }

        snapshots.sort_by(|a, b| {
            a.meta
                .terminology
                .cmp(&b.meta.terminology)
                .then_with(|| a.meta.version.cmp(&b.meta.version))
        });
        Ok(snapshots)
    }

    /// Remove one version, or every version of a terminology when `version` is None
    pub fn remove(&self, terminology: Terminology, version: Option<&str>) -> Result<()> {
        match version {
            Some(version) => {
                check_version(version)?;
                let dir = self.version_dir(terminology, version);
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                let latest = self.latest(terminology)?;
                if latest.is_some_and(|p| p.version == version) {
                    fs::remove_file(self.terminology_dir(terminology).join(LATEST_FILE))?;
                }
            }
            None => {
                let dir = self.terminology_dir(terminology);
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
            }
        }
        Ok(())
    }
}

/// A snapshot found on disk
#[derive(Debug, Clone)]
pub struct SnapshotLocation {
    pub meta: SnapshotMeta,
    pub dir: PathBuf,
    pub is_latest: bool,
}
