//! Configuration for seedbed.
//!
//! One [`Config`] value object is constructed at startup and handed by
//! reference to every component. Values are layered with [`figment`]:
//!
//! 1. `config.toml` in the platform configuration directory (if present),
//! 2. `seedbed.toml` in the working directory (if present),
//! 3. an explicitly requested file (TOML, YAML or JSON; must exist),
//! 4. `SEEDBED_`-prefixed environment variables, using `__` to nest
//!    (`SEEDBED_LIMITS__MAX_COUNT=10`).
//!
//! Required values have no defaults. A missing or unacceptable value is a
//! fatal error raised before any import work begins.

pub mod error;
mod size;

pub use crate::size::ByteSize;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SEEDBED_";
const LOCAL_FILE: &str = "seedbed.toml";
const BIN_DIRECTORY: &str = "bin";
const LEDGER_FILE: &str = "invalid.json";

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    300
}

fn default_page_size() -> u32 {
    1000
}

fn default_extension() -> String {
    "zip".to_string()
}

fn default_progress_interval() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the data image. Artifacts live under `<data_image_path>/bin`.
    pub data_image_path: PathBuf,
    /// Connection string for the local catalog mirror.
    pub database: String,
    pub remote: RemoteConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base address of the remote content service.
    pub base_url: String,
    /// Bearer token sent with every download request.
    #[serde(default)]
    pub token: Option<String>,
    /// Deadline for establishing a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between two reads of a response body. There
    /// is no deadline on a whole download.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Cap on the cumulative size of downloaded artifacts.
    pub max_bytes: ByteSize,
    /// Cap on the number of successfully downloaded artifacts.
    pub max_count: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// File extension given to downloaded artifacts.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Location of the failure ledger. Defaults to `<data_image_path>/invalid.json`.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    /// Log a progress line every N successful downloads.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Import on top of the artifacts already on disk instead of emptying the
    /// artifact directory first. The caps then only bound the new downloads.
    #[serde(default)]
    pub keep_existing: bool,
}
impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            ledger_path: None,
            progress_interval: default_progress_interval(),
            keep_existing: false,
        }
    }
}

impl Config {
    /// Load configuration from the default locations, an optional explicit
    /// file, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path)?)
    }

    /// Build the layered provider stack without extracting it.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new();
        if let Some(dirs) = ProjectDirs::from("", "", "seedbed") {
            figment = figment.merge(Toml::file(dirs.config_dir().join("config.toml")));
        }
        figment = figment.merge(Toml::file(LOCAL_FILE));
        if let Some(path) = path {
            if !path.is_file() {
                exn::bail!(ErrorKind::FileNotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate configuration from an already-built provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            data_image_path = %config.data_image_path.display(),
            max_bytes = config.limits.max_bytes.bytes(),
            max_count = config.limits.max_count,
            "configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.data_image_path.is_absolute() {
            exn::bail!(ErrorKind::Invalid("data_image_path", "must be an absolute path".to_string()));
        }
        if self.database.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("database", "must not be empty".to_string()));
        }
        let base_url = self.remote.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::Invalid("remote.base_url", format!("`{base_url}` is not an HTTP(S) address")));
        }
        if self.remote.connect_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("remote.connect_timeout_secs", "must be positive".to_string()));
        }
        if self.remote.read_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("remote.read_timeout_secs", "must be positive".to_string()));
        }
        if self.limits.max_bytes.bytes() == 0 {
            exn::bail!(ErrorKind::Invalid("limits.max_bytes", "must be positive".to_string()));
        }
        if self.limits.max_count == 0 {
            exn::bail!(ErrorKind::Invalid("limits.max_count", "must be positive".to_string()));
        }
        if self.limits.page_size == 0 {
            exn::bail!(ErrorKind::Invalid("limits.page_size", "must be positive".to_string()));
        }
        let extension = &self.import.extension;
        if extension.is_empty() || extension.contains(['.', '/', '\\']) {
            exn::bail!(ErrorKind::Invalid("import.extension", format!("`{extension}` is not a bare file extension")));
        }
        if self.import.progress_interval == 0 {
            exn::bail!(ErrorKind::Invalid("import.progress_interval", "must be positive".to_string()));
        }
        Ok(())
    }

    /// Directory holding the sharded artifact tree.
    pub fn bin_path(&self) -> PathBuf {
        self.data_image_path.join(BIN_DIRECTORY)
    }

    /// Backing file of the failure ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.import.ledger_path.clone().unwrap_or_else(|| self.data_image_path.join(LEDGER_FILE))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MINIMAL: &str = r#"
        data_image_path = "/srv/image"
        database = "sqlite:///srv/image/catalog.db"

        [remote]
        base_url = "https://files.example.com"

        [limits]
        max_bytes = "2GiB"
        max_count = 500
    "#;

    fn figment(toml: &str) -> Figment {
        Figment::new().merge(Toml::string(toml))
    }

    #[test]
    fn test_minimal_configuration_gets_defaults() {
        let config = Config::from_figment(figment(MINIMAL)).unwrap();
        assert_eq!(config.limits.max_bytes.bytes(), 2 * 1024 * 1024 * 1024);
        assert_eq!(config.limits.max_count, 500);
        assert_eq!(config.limits.page_size, 1000);
        assert_eq!(config.import.extension, "zip");
        assert_eq!(config.import.progress_interval, 100);
        assert!(!config.import.keep_existing);
        assert!(config.remote.token.is_none());
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.read_timeout(), Duration::from_secs(300));
        assert_eq!(config.bin_path(), PathBuf::from("/srv/image/bin"));
        assert_eq!(config.ledger_path(), PathBuf::from("/srv/image/invalid.json"));
    }

    #[test]
    fn test_integer_byte_cap() {
        let toml = MINIMAL.replace(r#"max_bytes = "2GiB""#, "max_bytes = 4096");
        let config = Config::from_figment(figment(&toml)).unwrap();
        assert_eq!(config.limits.max_bytes, ByteSize::new(4096));
    }

    #[test]
    fn test_explicit_ledger_path() {
        let toml = format!("{MINIMAL}\n[import]\nledger_path = \"/var/lib/seedbed/failed.json\"\nkeep_existing = true\n");
        let config = Config::from_figment(figment(&toml)).unwrap();
        assert_eq!(config.ledger_path(), PathBuf::from("/var/lib/seedbed/failed.json"));
        assert!(config.import.keep_existing);
    }

    #[rstest]
    #[case("data_image_path")]
    #[case("database")]
    #[case("base_url")]
    #[case("max_bytes")]
    #[case("max_count")]
    fn test_missing_required_value_is_fatal(#[case] key: &str) {
        let toml: String =
            MINIMAL.lines().filter(|line| !line.trim_start().starts_with(key)).collect::<Vec<_>>().join("\n");
        let err = Config::from_figment(figment(&toml)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[rstest]
    #[case("max_count = 500", "max_count = 0", "limits.max_count")]
    #[case(r#"max_bytes = "2GiB""#, "max_bytes = 0", "limits.max_bytes")]
    #[case(r#""/srv/image""#, r#""relative/image""#, "data_image_path")]
    #[case(r#""https://files.example.com""#, r#""ftp://files.example.com""#, "remote.base_url")]
    #[case("[remote]", "[remote]\nread_timeout_secs = 0", "remote.read_timeout_secs")]
    fn test_invalid_value_is_fatal(#[case] from: &str, #[case] to: &str, #[case] field: &str) {
        let toml = MINIMAL.replace(from, to);
        let err = Config::from_figment(figment(&toml)).unwrap_err();
        match &*err {
            ErrorKind::Invalid(name, _) => assert_eq!(*name, field),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_extension() {
        let toml = format!("{MINIMAL}\n[import]\nextension = \"tar.gz\"\n");
        let err = Config::from_figment(figment(&toml)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid("import.extension", _)));
    }

    #[test]
    fn test_load_explicit_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seedbed.yaml");
        std::fs::write(
            &path,
            "data_image_path: /srv/image\n\
             database: \"sqlite::memory:\"\n\
             remote:\n  base_url: http://localhost:8080\n  token: secret\n\
             limits:\n  max_bytes: 1MiB\n  max_count: 3\n  page_size: 2\n",
        )
        .unwrap();
        let config = Config::from_figment(Config::figment(Some(&path)).unwrap()).unwrap();
        assert_eq!(config.limits.page_size, 2);
        assert_eq!(config.remote.token.as_deref(), Some("secret"));
        assert_eq!(config.limits.max_bytes.bytes(), 1024 * 1024);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::figment(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
    }

    #[test]
    fn test_unsupported_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seedbed.ini");
        std::fs::write(&path, "[limits]").unwrap();
        let err = Config::figment(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }
}
