//! Layered configuration: built-in defaults, a global TOML file, and a
//! repository-local layer stored in the repository record.
//!
//! A single [`Config`] is resolved once per command and handed to the
//! components that need it. Layers only hold the keys they override.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HoardError, HoardResult};
use crate::fsutil::write_with_backup;

/// Environment variable pointing at an alternative global config file.
pub const ENV_CONFIG_FILE: &str = "HOARD_CONFIG";

const CONFIG_DIR_NAME: &str = "hoard";
const CONFIG_FILE_NAME: &str = "config.toml";

const TRUTH_VALUES: &[&str] = &["true", "yes", "on", "1", "enable", "enabled"];
const FALSE_VALUES: &[&str] = &["false", "no", "off", "0", "disable", "disabled"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Compare file contents by hash instead of trusting size and mtime.
    pub strict: bool,
    /// Default for new repositories: track explicit patterns only.
    pub track: bool,
    /// Default for new repositories: stage patterns before each commit.
    pub picky: bool,
    /// Deflate-compress stored blobs.
    pub compress: bool,
    /// Report `changes` instead of `status` as the no-argument command.
    pub use_changes_command: bool,
    /// Branch name used when going offline without a name.
    pub default_branch: Option<String>,
    /// File globs always treated as text.
    pub texttype: Vec<String>,
    /// File globs always treated as binary.
    pub bintype: Vec<String>,
    /// File globs excluded from versioning.
    pub ignores: Vec<String>,
    /// Directory globs excluded from the walk.
    pub ignore_dirs: Vec<String>,
    /// File globs re-included despite `ignores`.
    pub ignores_whitelist: Vec<String>,
    /// Directory globs re-included despite `ignore_dirs`.
    pub ignore_dirs_whitelist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strict: false,
            track: false,
            picky: false,
            compress: false,
            use_changes_command: false,
            default_branch: None,
            texttype: strings(&["*.md", "*.coco", "*.py", "*.pyi", "*.pth"]),
            bintype: Vec::new(),
            ignores: strings(&[
                "*.bak",
                "*.py[cdo]",
                "*.class",
                ".fslckout",
                "_FOSSIL_",
                "*.hoard.tar.gz",
            ]),
            ignore_dirs: strings(&[".*", "__pycache__", ".mypy_cache"]),
            ignores_whitelist: Vec::new(),
            ignore_dirs_whitelist: Vec::new(),
        }
    }
}

/// One configuration layer. `None` means "inherit from the layer below".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picky: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_changes_command: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texttype: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bintype: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignores: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignores_whitelist: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_dirs_whitelist: Option<Vec<String>>,
}

/// Keys accepted by the `config` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Strict,
    Track,
    Picky,
    Compress,
    UseChangesCommand,
    DefaultBranch,
    Texttype,
    Bintype,
    Ignores,
    IgnoreDirs,
    IgnoresWhitelist,
    IgnoreDirsWhitelist,
}

/// Shape of the value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Flag,
    Text,
    List,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 12] = [
        ConfigKey::Strict,
        ConfigKey::Track,
        ConfigKey::Picky,
        ConfigKey::Compress,
        ConfigKey::UseChangesCommand,
        ConfigKey::DefaultBranch,
        ConfigKey::Texttype,
        ConfigKey::Bintype,
        ConfigKey::Ignores,
        ConfigKey::IgnoreDirs,
        ConfigKey::IgnoresWhitelist,
        ConfigKey::IgnoreDirsWhitelist,
    ];

    /// Parse a key name; both `ignore_dirs` and `ignoreDirs` are accepted.
    pub fn parse(name: &str) -> HoardResult<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        ConfigKey::ALL
            .iter()
            .copied()
            .find(|k| k.name().replace('_', "") == normalized)
            .ok_or_else(|| HoardError::UnsupportedConfigKey(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::Strict => "strict",
            ConfigKey::Track => "track",
            ConfigKey::Picky => "picky",
            ConfigKey::Compress => "compress",
            ConfigKey::UseChangesCommand => "use_changes_command",
            ConfigKey::DefaultBranch => "default_branch",
            ConfigKey::Texttype => "texttype",
            ConfigKey::Bintype => "bintype",
            ConfigKey::Ignores => "ignores",
            ConfigKey::IgnoreDirs => "ignore_dirs",
            ConfigKey::IgnoresWhitelist => "ignores_whitelist",
            ConfigKey::IgnoreDirsWhitelist => "ignore_dirs_whitelist",
        }
    }

    pub fn kind(self) -> KeyKind {
        match self {
            ConfigKey::Strict
            | ConfigKey::Track
            | ConfigKey::Picky
            | ConfigKey::Compress
            | ConfigKey::UseChangesCommand => KeyKind::Flag,
            ConfigKey::DefaultBranch => KeyKind::Text,
            _ => KeyKind::List,
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interpret a user-supplied flag value.
pub fn parse_flag(key: ConfigKey, value: &str) -> HoardResult<bool> {
    let lower = value.trim().to_lowercase();
    if TRUTH_VALUES.contains(&lower.as_str()) {
        Ok(true)
    } else if FALSE_VALUES.contains(&lower.as_str()) {
        Ok(false)
    } else {
        Err(HoardError::InvalidConfigValue {
            key: key.name().to_string(),
            value: value.to_string(),
        })
    }
}

/// Split a `;`-separated list value, dropping empty items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Merge layers: local overrides global overrides the built-in default.
    pub fn resolve(global: &ConfigLayer, local: &ConfigLayer) -> Config {
        let d = Config::default();
        macro_rules! pick {
            ($field:ident) => {
                local
                    .$field
                    .clone()
                    .or_else(|| global.$field.clone())
                    .unwrap_or(d.$field)
            };
        }
        Config {
            strict: pick!(strict),
            track: pick!(track),
            picky: pick!(picky),
            compress: pick!(compress),
            use_changes_command: pick!(use_changes_command),
            default_branch: local
                .default_branch
                .clone()
                .or_else(|| global.default_branch.clone())
                .or(d.default_branch),
            texttype: pick!(texttype),
            bintype: pick!(bintype),
            ignores: pick!(ignores),
            ignore_dirs: pick!(ignore_dirs),
            ignores_whitelist: pick!(ignores_whitelist),
            ignore_dirs_whitelist: pick!(ignore_dirs_whitelist),
        }
    }

    /// List value for a key, or `None` for flags and text keys.
    pub fn list(&self, key: ConfigKey) -> Option<&[String]> {
        match key {
            ConfigKey::Texttype => Some(&self.texttype),
            ConfigKey::Bintype => Some(&self.bintype),
            ConfigKey::Ignores => Some(&self.ignores),
            ConfigKey::IgnoreDirs => Some(&self.ignore_dirs),
            ConfigKey::IgnoresWhitelist => Some(&self.ignores_whitelist),
            ConfigKey::IgnoreDirsWhitelist => Some(&self.ignore_dirs_whitelist),
            _ => None,
        }
    }

    /// Render a key's effective value for display.
    pub fn value_string(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::Strict => self.strict.to_string(),
            ConfigKey::Track => self.track.to_string(),
            ConfigKey::Picky => self.picky.to_string(),
            ConfigKey::Compress => self.compress.to_string(),
            ConfigKey::UseChangesCommand => self.use_changes_command.to_string(),
            ConfigKey::DefaultBranch => self.default_branch.clone().unwrap_or_default(),
            _ => self.list(key).map(|l| l.join(";")).unwrap_or_default(),
        }
    }
}

impl ConfigLayer {
    /// Location of the global configuration file.
    ///
    /// `$HOARD_CONFIG` wins over the platform configuration directory.
    pub fn global_path() -> Option<PathBuf> {
        if let Some(path) = env::var_os(ENV_CONFIG_FILE) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the global layer; a missing file yields an empty layer.
    pub fn load_global() -> HoardResult<Self> {
        match Self::global_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> HoardResult<Self> {
        if !path.exists() {
            debug!("no configuration file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_global(&self) -> HoardResult<()> {
        let path = Self::global_path()
            .ok_or_else(|| HoardError::Other("cannot locate configuration directory".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> HoardResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        write_with_backup(path, content.as_bytes())
    }

    fn list_mut(&mut self, key: ConfigKey) -> Option<&mut Option<Vec<String>>> {
        match key {
            ConfigKey::Texttype => Some(&mut self.texttype),
            ConfigKey::Bintype => Some(&mut self.bintype),
            ConfigKey::Ignores => Some(&mut self.ignores),
            ConfigKey::IgnoreDirs => Some(&mut self.ignore_dirs),
            ConfigKey::IgnoresWhitelist => Some(&mut self.ignores_whitelist),
            ConfigKey::IgnoreDirsWhitelist => Some(&mut self.ignore_dirs_whitelist),
            _ => None,
        }
    }

    fn flag_mut(&mut self, key: ConfigKey) -> Option<&mut Option<bool>> {
        match key {
            ConfigKey::Strict => Some(&mut self.strict),
            ConfigKey::Track => Some(&mut self.track),
            ConfigKey::Picky => Some(&mut self.picky),
            ConfigKey::Compress => Some(&mut self.compress),
            ConfigKey::UseChangesCommand => Some(&mut self.use_changes_command),
            _ => None,
        }
    }

    /// Set a key. Lists take `;`-separated items and replace the inherited list.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> HoardResult<()> {
        match key.kind() {
            KeyKind::Flag => {
                let flag = parse_flag(key, value)?;
                if let Some(slot) = self.flag_mut(key) {
                    *slot = Some(flag);
                }
            }
            KeyKind::Text => self.default_branch = Some(value.to_string()),
            KeyKind::List => {
                if let Some(slot) = self.list_mut(key) {
                    *slot = Some(parse_list(value));
                }
            }
        }
        Ok(())
    }

    /// Remove a key from this layer so the layer below applies again.
    pub fn unset(&mut self, key: ConfigKey) {
        match key.kind() {
            KeyKind::Flag => {
                if let Some(slot) = self.flag_mut(key) {
                    *slot = None;
                }
            }
            KeyKind::Text => self.default_branch = None,
            KeyKind::List => {
                if let Some(slot) = self.list_mut(key) {
                    *slot = None;
                }
            }
        }
    }

    /// Append to a list key. An unset list starts from `inherited`.
    pub fn add(&mut self, key: ConfigKey, value: &str, inherited: &[String]) -> HoardResult<()> {
        let slot = self
            .list_mut(key)
            .ok_or_else(|| HoardError::UnsupportedConfigKey(key.name().to_string()))?;
        let list = slot.get_or_insert_with(|| inherited.to_vec());
        if list.iter().any(|v| v == value) {
            return Err(HoardError::InvalidConfigValue {
                key: key.name().to_string(),
                value: format!("{value} (already present)"),
            });
        }
        list.push(value.to_string());
        Ok(())
    }

    /// Remove an item from a list key. An unset list starts from `inherited`.
    pub fn remove(&mut self, key: ConfigKey, value: &str, inherited: &[String]) -> HoardResult<()> {
        let slot = self
            .list_mut(key)
            .ok_or_else(|| HoardError::UnsupportedConfigKey(key.name().to_string()))?;
        let list = slot.get_or_insert_with(|| inherited.to_vec());
        let before = list.len();
        list.retain(|v| v != value);
        if list.len() == before {
            return Err(HoardError::InvalidConfigValue {
                key: key.name().to_string(),
                value: format!("{value} (not present)"),
            });
        }
        Ok(())
    }

    /// Whether this layer overrides `key`.
    pub fn is_set(&self, key: ConfigKey) -> bool {
        match key {
            ConfigKey::Strict => self.strict.is_some(),
            ConfigKey::Track => self.track.is_some(),
            ConfigKey::Picky => self.picky.is_some(),
            ConfigKey::Compress => self.compress.is_some(),
            ConfigKey::UseChangesCommand => self.use_changes_command.is_some(),
            ConfigKey::DefaultBranch => self.default_branch.is_some(),
            ConfigKey::Texttype => self.texttype.is_some(),
            ConfigKey::Bintype => self.bintype.is_some(),
            ConfigKey::Ignores => self.ignores.is_some(),
            ConfigKey::IgnoreDirs => self.ignore_dirs.is_some(),
            ConfigKey::IgnoresWhitelist => self.ignores_whitelist.is_some(),
            ConfigKey::IgnoreDirsWhitelist => self.ignore_dirs_whitelist.is_some(),
        }
    }
}

/// A change requested through the `config` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    Set(ConfigKey, String),
    Unset(ConfigKey),
    Add(ConfigKey, String),
    Remove(ConfigKey, String),
}

impl ConfigCommand {
    pub fn key(&self) -> ConfigKey {
        match self {
            ConfigCommand::Set(key, _)
            | ConfigCommand::Unset(key)
            | ConfigCommand::Add(key, _)
            | ConfigCommand::Remove(key, _) => *key,
        }
    }
}

impl ConfigLayer {
    /// Apply a command to this layer. List edits start from `inherited`
    /// when the layer does not override the key yet.
    pub fn apply(&mut self, command: &ConfigCommand, inherited: &Config) -> HoardResult<()> {
        let inherited_list = |key: ConfigKey| inherited.list(key).unwrap_or(&[]).to_vec();
        match command {
            ConfigCommand::Set(key, value) => self.set(*key, value),
            ConfigCommand::Unset(key) => {
                self.unset(*key);
                Ok(())
            }
            ConfigCommand::Add(key, value) => self.add(*key, value, &inherited_list(*key)),
            ConfigCommand::Remove(key, value) => self.remove(*key, value, &inherited_list(*key)),
        }
    }
}

/// Where an effective configuration value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Global,
    Local,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::Default => "default",
            ConfigSource::Global => "global",
            ConfigSource::Local => "local",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: ConfigKey,
    pub value: String,
    pub source: ConfigSource,
}

/// Effective value and origin of every key.
pub fn describe(global: &ConfigLayer, local: Option<&ConfigLayer>) -> Vec<ConfigEntry> {
    let empty = ConfigLayer::default();
    let local = local.unwrap_or(&empty);
    let config = Config::resolve(global, local);
    ConfigKey::ALL
        .iter()
        .map(|&key| ConfigEntry {
            key,
            value: config.value_string(key),
            source: if local.is_set(key) {
                ConfigSource::Local
            } else if global.is_set(key) {
                ConfigSource::Global
            } else {
                ConfigSource::Default
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.strict);
        assert!(config.ignore_dirs.contains(&".*".to_string()));
        assert!(config.texttype.contains(&"*.md".to_string()));
        assert!(config.ignores_whitelist.is_empty());
    }

    #[test]
    fn test_resolve_precedence() {
        let mut global = ConfigLayer::default();
        global.strict = Some(true);
        global.ignores = Some(vec!["*.tmp".into()]);
        let mut local = ConfigLayer::default();
        local.ignores = Some(vec!["*.log".into()]);

        let config = Config::resolve(&global, &local);
        assert!(config.strict);
        assert_eq!(config.ignores, vec!["*.log".to_string()]);
        assert_eq!(config.ignore_dirs, Config::default().ignore_dirs);
    }

    #[test]
    fn test_parse_key_variants() {
        assert_eq!(ConfigKey::parse("ignoreDirs").unwrap(), ConfigKey::IgnoreDirs);
        assert_eq!(ConfigKey::parse("ignore_dirs").unwrap(), ConfigKey::IgnoreDirs);
        assert_eq!(
            ConfigKey::parse("useChangesCommand").unwrap(),
            ConfigKey::UseChangesCommand
        );
        assert!(matches!(
            ConfigKey::parse("colour"),
            Err(HoardError::UnsupportedConfigKey(_))
        ));
    }

    #[test]
    fn test_set_flag_values() {
        let mut layer = ConfigLayer::default();
        layer.set(ConfigKey::Strict, "Yes").unwrap();
        assert_eq!(layer.strict, Some(true));
        layer.set(ConfigKey::Strict, "disabled").unwrap();
        assert_eq!(layer.strict, Some(false));
        assert!(layer.set(ConfigKey::Strict, "maybe").is_err());
    }

    #[test]
    fn test_list_add_remove() {
        let mut layer = ConfigLayer::default();
        let inherited = Config::default().ignores;
        layer.add(ConfigKey::Ignores, "*.tmp", &inherited).unwrap();
        let list = layer.ignores.clone().unwrap();
        assert_eq!(list.len(), inherited.len() + 1);
        assert!(layer.add(ConfigKey::Ignores, "*.tmp", &inherited).is_err());

        layer.remove(ConfigKey::Ignores, "*.bak", &inherited).unwrap();
        assert!(!layer.ignores.clone().unwrap().contains(&"*.bak".to_string()));
        assert!(layer.remove(ConfigKey::Ignores, "*.nope", &inherited).is_err());

        layer.unset(ConfigKey::Ignores);
        assert!(!layer.is_set(ConfigKey::Ignores));
    }

    #[test]
    fn test_set_list_splits() {
        let mut layer = ConfigLayer::default();
        layer.set(ConfigKey::Bintype, "*.bin; *.dat").unwrap();
        assert_eq!(layer.bintype, Some(vec!["*.bin".into(), "*.dat".into()]));
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");
        let mut layer = ConfigLayer::default();
        layer.set(ConfigKey::Compress, "on").unwrap();
        layer.set(ConfigKey::DefaultBranch, "trunk").unwrap();
        layer.save_to(&path).unwrap();

        let loaded = ConfigLayer::load_from(&path).unwrap();
        assert_eq!(loaded, layer);
        let missing = ConfigLayer::load_from(&dir.path().join("missing.toml")).unwrap();
        assert!(!missing.is_set(ConfigKey::Compress));
    }

    #[test]
    fn test_apply_add_starts_from_inherited() {
        let mut layer = ConfigLayer::default();
        let inherited = Config::default();
        layer
            .apply(&ConfigCommand::Add(ConfigKey::Ignores, "*.log".into()), &inherited)
            .unwrap();
        let ignores = layer.ignores.clone().unwrap();
        assert!(ignores.contains(&"*.bak".to_string()));
        assert_eq!(ignores.last().map(String::as_str), Some("*.log"));

        layer.apply(&ConfigCommand::Unset(ConfigKey::Ignores), &inherited).unwrap();
        assert!(layer.ignores.is_none());
    }

    #[test]
    fn test_describe_reports_sources() {
        let mut global = ConfigLayer::default();
        global.strict = Some(true);
        let mut local = ConfigLayer::default();
        local.default_branch = Some("main".into());

        let entries = describe(&global, Some(&local));
        let find = |key| entries.iter().find(|e| e.key == key).unwrap();
        assert_eq!(find(ConfigKey::Strict).source, ConfigSource::Global);
        assert_eq!(find(ConfigKey::Strict).value, "true");
        assert_eq!(find(ConfigKey::DefaultBranch).source, ConfigSource::Local);
        assert_eq!(find(ConfigKey::DefaultBranch).value, "main");
        assert_eq!(find(ConfigKey::Track).source, ConfigSource::Default);
    }
}
