//! Layered configuration loading on top of figment.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. `ColloquyConfig::default()`
//! 2. the profile file next to the main file (`colloquy.production.toml`)
//! 3. the main file (`colloquy.toml`, or the one passed to [`ConfigLoader::file`])
//! 4. `COLLOQUY_*` environment variables, nested with `__`
//! 5. values passed to [`ConfigLoader::merge`]
//!
//! `COLLOQUY_TURNS__SERIALIZE_TURNS=false` therefore beats whatever the file
//! says about `turns.serialize_turns`.
//!
//! TOML files need the `toml-config` feature (on by default), YAML files the
//! `yaml-config` feature.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/colloquy.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ColloquyConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "COLLOQUY_";
const PROFILE_VAR: &str = "COLLOQUY_PROFILE";
const FILE_STEM: &str = "colloquy";

/// Deployment profile, used to pick `colloquy.<profile>.<ext>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Test,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
            Self::Custom(name) => name,
        }
    }

    /// Case-insensitive; `dev` and `prod` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Custom(name),
        }
    }

    /// The profile named by `COLLOQUY_PROFILE`, if set.
    pub fn from_env() -> Self {
        match std::env::var(PROFILE_VAR) {
            Ok(name) if !name.trim().is_empty() => Self::parse(&name),
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File formats the loader can read with the enabled features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    const ENABLED: &'static [(Self, &'static [&'static str])] = &[
        #[cfg(feature = "toml-config")]
        (Self::Toml, &["toml"]),
        #[cfg(feature = "yaml-config")]
        (Self::Yaml, &["yaml", "yml"]),
    ];

    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ENABLED
            .iter()
            .find(|(_, exts)| exts.iter().any(|known| *known == ext))
            .map(|(format, _)| *format)
    }

    #[allow(unused_variables)]
    fn layer(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(Yaml::file(path)),
        }
    }
}

/// `colloquy.toml` in `dir` plus its profile sibling, first enabled extension wins.
fn discover(dir: &Path, profile: &Profile) -> Option<(PathBuf, PathBuf)> {
    FileFormat::ENABLED
        .iter()
        .flat_map(|(_, exts)| exts.iter())
        .map(|ext| {
            (
                dir.join(format!("{FILE_STEM}.{ext}")),
                dir.join(format!("{FILE_STEM}.{}.{ext}", profile.as_str())),
            )
        })
        .find(|(main, _)| main.is_file())
}

/// Builds a [`ColloquyConfig`] from files, the environment and code.
#[derive(Debug)]
pub struct ConfigLoader {
    profile: Profile,
    dirs: Vec<PathBuf>,
    explicit: Option<PathBuf>,
    env: bool,
    overrides: Vec<ColloquyConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader for the profile in `COLLOQUY_PROFILE`, reading the environment.
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            dirs: Vec::new(),
            explicit: None,
            env: true,
            overrides: Vec::new(),
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a directory to look for `colloquy.<ext>` in. Directories are
    /// tried in the order added and the first one holding a file is used.
    pub fn search_path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dirs.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/colloquy`, e.g. `~/.config/colloquy` on Linux.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(base) => self.search_path(base.join(FILE_STEM)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching. It must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.explicit = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Layers `config` over every other source.
    pub fn merge(mut self, config: ColloquyConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Merges all sources, then validates the result.
    pub fn load(self) -> ConfigResult<ColloquyConfig> {
        let profile = self.profile.clone();
        let config: ColloquyConfig = self
            .figment()?
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        validate_config(&config)?;

        debug!(
            %profile,
            level = %config.logging.level,
            storage = ?config.storage.backend,
            serialize_turns = config.turns.serialize_turns,
            "Configuration ready"
        );
        Ok(config)
    }

    fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(ColloquyConfig::default()));

        figment = match &self.explicit {
            Some(path) => self.layer_explicit(figment, path)?,
            None => self.layer_discovered(figment),
        };

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(self
            .overrides
            .into_iter()
            .fold(figment, |figment, config| {
                figment.merge(Serialized::defaults(config))
            }))
    }

    fn layer_explicit(&self, figment: Figment, path: &Path) -> ConfigResult<Figment> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let format = FileFormat::of(path).ok_or_else(|| {
            ConfigError::ParseError(format!(
                "{} is not a configuration format this build can read",
                path.display()
            ))
        })?;

        info!(path = %path.display(), "Reading configuration");
        Ok(format.layer(figment, path))
    }

    fn layer_discovered(&self, mut figment: Figment) -> Figment {
        let dirs = if self.dirs.is_empty() {
            Self::default_dirs()
        } else {
            self.dirs.clone()
        };

        let Some((main, profiled)) = dirs.iter().find_map(|dir| discover(dir, &self.profile))
        else {
            warn!(searched = ?dirs, "No configuration file, using defaults");
            return figment;
        };

        // Both paths share an extension, so `of` only fails if `discover` is wrong.
        let Some(format) = FileFormat::of(&main) else {
            return figment;
        };
        if profiled.is_file() {
            debug!(path = %profiled.display(), profile = %self.profile, "Reading profile configuration");
            figment = format.layer(figment, &profiled);
        }
        info!(path = %main.display(), "Reading configuration");
        format.layer(figment, &main)
    }

    fn default_dirs() -> Vec<PathBuf> {
        Self::new()
            .with_current_dir()
            .with_user_config_dir()
            .dirs
    }
}

/// Loads from the working directory or the user config directory.
pub fn load_config() -> ConfigResult<ColloquyConfig> {
    ConfigLoader::new().load()
}

/// Loads `path`, still honouring `COLLOQUY_*` variables.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ColloquyConfig> {
    ConfigLoader::new().file(path).load()
}
