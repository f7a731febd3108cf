//! Layered configuration for shadow.
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. Built-in defaults (including an encoder profile for every common format).
//! 2. A YAML or TOML file, chosen by extension: the explicit path, or
//!    `config.yaml` in the platform configuration directory if it exists.
//! 3. Environment variables prefixed with `SHADOW_`, with `__` separating
//!    nested keys (`SHADOW_COLLECTIONS__PHONE__QUERY=genre:jazz`).
//!
//! ```yaml
//! library: /home/me/music/library.json
//! directory: /home/me/music
//! encoders:
//!   ogg: { command: 'oggenc -o "$dest" "$source"', extension: ogg }
//! collections:
//!   myplayer:
//!     directory: /media/player/Music
//!     formats: aac mp3
//!     query: onplayer:true
//!     paths:
//!       default: "{{ artist }}/{{ title }}"
//! ```

mod collection;
pub mod error;
mod format;

pub use crate::collection::{
    ArtFormat, ArtOptions, CollectionOptions, CollectionSpec, Condition, FormatList, LINK_FORMAT, LinkType, Mode,
    PathOptions, PathRule, PathRuleOption,
};
pub use crate::format::{EncoderProfile, normalize_format};
use crate::error::{ErrorKind, Result};
use directories::{ProjectDirs, UserDirs};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SHADOW_";
const CONFIG_FILE: &str = "config.yaml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shadow")
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON export of the host library.
    pub library: Option<PathBuf>,
    /// SQLite manifest database.
    pub manifest: PathBuf,
    /// Base for relative collection directories.
    pub directory: PathBuf,
    /// Maximum number of concurrent encodes.
    pub max_workers: usize,
    /// Encoder profile per canonical format name.
    pub encoders: BTreeMap<String, EncoderProfile>,
    pub collections: BTreeMap<String, CollectionOptions>,
}
impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".shadow"));
        let directory = UserDirs::new()
            .and_then(|dirs| dirs.audio_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            library: None,
            manifest: data_dir.join("manifest.db"),
            directory,
            max_workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2),
            encoders: format::default_encoders(),
            collections: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// With `path` set, the file must exist. Without it, the default file is
    /// read only when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => project_dirs()
                .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
                .filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            if !file.is_file() {
                exn::bail!(ErrorKind::NotFound(file));
            }
            figment = Self::merge_file(figment, &file)?;
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Directory the default configuration file is read from.
    pub fn default_dir() -> Result<PathBuf> {
        Ok(project_dirs().ok_or_raise(|| ErrorKind::NoConfigDir)?.config_dir().to_path_buf())
    }

    fn merge_file(figment: Figment, file: &Path) -> Result<Figment> {
        let ext = file.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
        Ok(match ext.as_deref() {
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
            Some("toml") => figment.merge(Toml::file_exact(file)),
            _ => exn::bail!(ErrorKind::UnsupportedFile(file.to_path_buf())),
        })
    }

    fn extract(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.encoders = std::mem::take(&mut config.encoders)
            .into_iter()
            .map(|(name, profile)| (normalize_format(&name), profile))
            .collect();
        config.max_workers = config.max_workers.max(1);
        Ok(config)
    }

    /// Validate a single collection by name.
    pub fn collection(&self, name: &str) -> Result<CollectionSpec> {
        let options = self
            .collections
            .get(name)
            .ok_or_raise(|| ErrorKind::UnknownCollection(name.to_string()))?;
        options.validate(name, &self.directory, &self.encoders)
    }

    /// Validate every configured collection, in name order.
    pub fn collection_specs(&self) -> Result<Vec<CollectionSpec>> {
        self.collections
            .iter()
            .map(|(name, options)| options.validate(name, &self.directory, &self.encoders))
            .collect()
    }
}
