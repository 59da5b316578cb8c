//! Node configuration: a line-oriented `key=value` file bootstrapped from a
//! bundled default template on first start.
//!
//! Keys and values are normalized (trimmed, lower-cased) on load and on every
//! lookup, so `Auto_Update ` and `auto_update` address the same entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "vigil.conf";
pub const DEFAULT_CONFIG_FILE_NAME: &str = "vigil.default.conf";
pub const VERSION_FILE_NAME: &str = "version";
/// Token in the default template replaced by the generated node secret.
pub const SECRET_PLACEHOLDER: &str = "_SECRET_";
/// Version reported when no version marker file is installed.
pub const DEFAULT_VERSION: &str = "repos";
pub const DEFAULT_CONTROLLER: &str = "http://cheesepi.sics.se";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config: default template not found at {}", path.display())]
    MissingTemplate { path: PathBuf },

    #[error("Config: cannot write {}, check permissions of the install directory: {source}", path.display())]
    Bootstrap {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config: cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Trims and lower-cases an identifier. Idempotent.
///
/// # Examples
///
/// ```
/// use vigil_common::config::clean;
///
/// assert_eq!(clean("  Auto_Update\n"), "auto_update");
/// assert_eq!(clean(&clean(" X ")), clean(" X "));
/// ```
pub fn clean(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Identity data the node attaches to everything it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub secret: String,
    pub version: String,
    pub controller: String,
}

/// Immutable configuration of this node, loaded once at startup and passed
/// by reference to every component that needs it.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    entries: BTreeMap<String, String>,
    install_dir: PathBuf,
    config_file: PathBuf,
    version: String,
}

impl NodeConfig {
    /// Loads `<install_dir>/vigil.conf`, creating it from the default template
    /// first if it does not exist.
    pub fn load(install_dir: &Path) -> Result<Self, ConfigError> {
        Self::bootstrap(install_dir)?;
        let config_file = install_dir.join(CONFIG_FILE_NAME);
        let text = std::fs::read_to_string(&config_file).map_err(|source| ConfigError::Read {
            path: config_file.clone(),
            source,
        })?;
        let version = read_version(install_dir);
        let config = Self::parse(&text, install_dir, &config_file, &version);
        tracing::info!(
            config_file = %config_file.display(),
            version = %version,
            keys = config.entries.len(),
            "Loaded node config"
        );
        Ok(config)
    }

    /// Copies the default template into place with a fresh secret if no
    /// config file exists yet. Returns `true` when a file was created; an
    /// existing file is never touched.
    pub fn bootstrap(install_dir: &Path) -> Result<bool, ConfigError> {
        let config_file = install_dir.join(CONFIG_FILE_NAME);
        if config_file.is_file() {
            return Ok(false);
        }

        tracing::warn!(
            config_file = %config_file.display(),
            "No local config, copying default template"
        );
        let template = install_dir.join(DEFAULT_CONFIG_FILE_NAME);
        if !template.is_file() {
            return Err(ConfigError::MissingTemplate { path: template });
        }

        let secret = generate_secret();
        copy_replacing(&template, &config_file, SECRET_PLACEHOLDER, &secret).map_err(
            |source| ConfigError::Bootstrap {
                path: config_file.clone(),
                source,
            },
        )?;
        Ok(true)
    }

    /// Parses config text. Comment lines (`#` after optional whitespace) and
    /// lines without `=` are ignored; the rest split on the first `=`.
    pub fn parse(text: &str, install_dir: &Path, config_file: &Path, version: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            if line.trim_start().starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            entries.insert(clean(key), clean(value));
        }
        entries.insert(
            "install_dir".to_string(),
            install_dir.to_string_lossy().to_string(),
        );
        entries.insert(
            "config_file".to_string(),
            config_file.to_string_lossy().to_string(),
        );
        entries.insert("version".to_string(), version.to_string());

        Self {
            entries,
            install_dir: install_dir.to_path_buf(),
            config_file: config_file.to_path_buf(),
            version: version.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&clean(key)).map(String::as_str)
    }

    /// Parses a value, returning `None` when it is unset or malformed.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn is_defined(&self, key: &str) -> bool {
        self.entries.contains_key(&clean(key))
    }

    /// True iff the key is set to exactly `true` (after normalization).
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn equals(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(clean(value).as_str())
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn secret(&self) -> Option<&str> {
        self.get("secret")
    }

    pub fn controller(&self) -> &str {
        self.get("controller")
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTROLLER)
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            secret: self.secret().unwrap_or_default().to_string(),
            version: self.version.clone(),
            controller: self.controller().to_string(),
        }
    }

    /// Hosts to probe, from the whitespace-separated `landmarks` key.
    pub fn landmarks(&self) -> Vec<String> {
        self.get("landmarks")
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Iterates all entries in key order, derived entries included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Fresh per-node secret used to sign outgoing records.
pub fn generate_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// First non-blank line of the version marker file, or [`DEFAULT_VERSION`].
pub fn read_version(install_dir: &Path) -> String {
    let path = install_dir.join(VERSION_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        Err(_) => {
            tracing::warn!(path = %path.display(), "No version file");
            DEFAULT_VERSION.to_string()
        }
    }
}

fn copy_replacing(from: &Path, to: &Path, token: &str, replacement: &str) -> std::io::Result<()> {
    let text = std::fs::read_to_string(from)?;
    std::fs::write(to, text.replace(token, replacement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "# node config\nsecret=_SECRET_\ndatabase=null\nauto_update=true\n";

    fn parse(text: &str) -> NodeConfig {
        NodeConfig::parse(
            text,
            Path::new("/opt/vigil"),
            Path::new("/opt/vigil/vigil.conf"),
            "1.2.0",
        )
    }

    fn install_with_template() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE_NAME), TEMPLATE).unwrap();
        dir
    }

    #[test]
    fn parse_skips_comments_and_lines_without_equals() {
        let config = parse("# a=b\n   # c=d\nnot a setting\n\nkey=value\n");
        assert!(!config.is_defined("a"));
        assert!(!config.is_defined("c"));
        assert_eq!(config.get("key"), Some("value"));
    }

    #[test]
    fn parse_splits_on_first_equals() {
        let config = parse("controller = http://host/?a=b\n");
        assert_eq!(config.get("controller"), Some("http://host/?a=b"));
    }

    #[test]
    fn lookups_are_normalized() {
        let config = parse("  Auto_Update = TRUE \nDatabase=Influx\n");
        for key in ["auto_update", "AUTO_UPDATE", "  auto_update\t", "Auto_Update"] {
            assert_eq!(config.get(key), config.get(&clean(key)));
            assert_eq!(config.get(key), Some("true"));
        }
        assert!(config.is_true(" AUTO_update"));
        assert!(config.equals("database", " INFLUX "));
        assert!(!config.equals("database", "sqlite"));
        assert!(!config.equals("missing", ""));
    }

    #[test]
    fn is_true_requires_literal_true() {
        let config = parse("a=yes\nb=1\nc=true\nd=false\n");
        assert!(!config.is_true("a"));
        assert!(!config.is_true("b"));
        assert!(config.is_true("c"));
        assert!(!config.is_true("d"));
        assert!(!config.is_true("undefined"));
    }

    #[test]
    fn derived_entries_are_injected() {
        let config = parse("");
        assert_eq!(config.get("version"), Some("1.2.0"));
        assert_eq!(config.get("install_dir"), Some("/opt/vigil"));
        assert_eq!(config.get("config_file"), Some("/opt/vigil/vigil.conf"));
        assert_eq!(config.version(), "1.2.0");
    }

    #[test]
    fn controller_falls_back_to_default() {
        assert_eq!(parse("").controller(), DEFAULT_CONTROLLER);
        assert_eq!(parse("controller=\n").controller(), DEFAULT_CONTROLLER);
        assert_eq!(
            parse("controller=http://10.0.0.1:8000\n").controller(),
            "http://10.0.0.1:8000"
        );
    }

    #[test]
    fn landmarks_split_on_whitespace() {
        assert!(parse("").landmarks().is_empty());
        assert_eq!(
            parse("landmarks=a.example  b.example\tc.example\n").landmarks(),
            vec!["a.example", "b.example", "c.example"]
        );
    }

    #[test]
    fn get_parsed_ignores_malformed_values() {
        let config = parse("interval=60\nbad=sixty\n");
        assert_eq!(config.get_parsed::<u64>("interval"), Some(60));
        assert_eq!(config.get_parsed::<u64>("bad"), None);
        assert_eq!(config.get_parsed::<u64>("absent"), None);
    }

    #[test]
    fn load_bootstraps_with_generated_secret() {
        let dir = install_with_template();
        let config = NodeConfig::load(dir.path()).unwrap();

        let secret = config.secret().unwrap();
        assert_ne!(secret, clean(SECRET_PLACEHOLDER));
        assert!(uuid::Uuid::parse_str(secret).is_ok());
        assert!(config.equals("database", "null"));
        assert_eq!(config.version(), DEFAULT_VERSION);
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let dir = install_with_template();
        assert!(NodeConfig::bootstrap(dir.path()).unwrap());
        let first = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();

        assert!(!NodeConfig::bootstrap(dir.path()).unwrap());
        let second = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(first, second);

        let a = NodeConfig::load(dir.path()).unwrap();
        let b = NodeConfig::load(dir.path()).unwrap();
        assert_eq!(a.secret(), b.secret());
    }

    #[test]
    fn missing_template_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = NodeConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTemplate { .. }));
    }

    #[test]
    fn unwritable_config_target_is_a_bootstrap_error() {
        let dir = install_with_template();
        // A directory where the config file belongs cannot be written.
        std::fs::create_dir(dir.path().join(CONFIG_FILE_NAME)).unwrap();

        let err = NodeConfig::bootstrap(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Bootstrap { ref path, .. } if path.ends_with(CONFIG_FILE_NAME)));
        assert!(dir.path().join(CONFIG_FILE_NAME).is_dir());
        assert!(matches!(
            NodeConfig::load(dir.path()),
            Err(ConfigError::Bootstrap { .. })
        ));
    }

    #[test]
    fn blank_version_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(VERSION_FILE_NAME), "\n  \n").unwrap();
        assert_eq!(read_version(dir.path()), DEFAULT_VERSION);

        std::fs::write(dir.path().join(VERSION_FILE_NAME), "\n 2.0.1\n").unwrap();
        assert_eq!(read_version(dir.path()), "2.0.1");
    }

    #[test]
    fn version_file_first_line_is_used() {
        let dir = install_with_template();
        std::fs::write(dir.path().join(VERSION_FILE_NAME), "  0.9.3 \nignored\n").unwrap();
        let config = NodeConfig::load(dir.path()).unwrap();
        assert_eq!(config.version(), "0.9.3");
        assert_eq!(config.identity().version, "0.9.3");
    }
}
