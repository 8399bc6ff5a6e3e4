//! Error types for hoard operations.

use std::fmt;
use std::io;

/// All possible hoard errors.
#[derive(Debug)]
pub enum HoardError {
    /// No `.hoard/` folder was found from the working directory upwards.
    NotOffline,
    /// A `.hoard/` folder already exists here.
    AlreadyOffline,
    /// An I/O error occurred.
    Io(io::Error),
    /// JSON serialization/deserialization failed.
    Json(serde_json::Error),
    /// The global configuration file could not be parsed.
    TomlDe(toml::de::Error),
    /// The global configuration file could not be written.
    TomlSer(toml::ser::Error),
    /// A branch reference did not resolve.
    UnknownBranch(String),
    /// A revision reference did not resolve.
    UnknownRevision(String),
    /// A branch with this name already exists.
    BranchExists(String),
    /// The working tree has changes that would be lost.
    UncommittedChanges(usize),
    /// Some branches were modified since going offline.
    DirtyBranches(Vec<String>),
    /// No changes to commit.
    NothingToCommit,
    /// Commit message is already in use as a tag.
    TagAlreadyUsed(String),
    /// Picky mode commit without any staged pattern.
    NoPatternsStaged,
    /// Configuration key is not known.
    UnsupportedConfigKey(String),
    /// Configuration value could not be interpreted.
    InvalidConfigValue { key: String, value: String },
    /// Tracking pattern is already registered.
    PatternExists(String),
    /// Tracking pattern is not registered.
    PatternNotFound(String),
    /// No file matched the given pattern.
    NoMatchingFiles(String),
    /// Operation requires track or picky mode.
    SimpleMode,
    /// The only remaining branch cannot be destroyed.
    LastBranch,
    /// A content blob already exists at the target location.
    HashCollision(String),
    /// Timed out waiting for the repository lock.
    LockTimeout,
    /// Generic error with a message.
    Other(String),
}

impl fmt::Display for HoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoardError::NotOffline => write!(f, "not an offline repository (missing .hoard/)"),
            HoardError::AlreadyOffline => {
                write!(f, "repository is already offline (use --force to start over)")
            }
            HoardError::Io(e) => write!(f, "I/O error: {e}"),
            HoardError::Json(e) => write!(f, "JSON error: {e}"),
            HoardError::TomlDe(e) => write!(f, "configuration parse error: {e}"),
            HoardError::TomlSer(e) => write!(f, "configuration write error: {e}"),
            HoardError::UnknownBranch(b) => write!(f, "unknown branch: {b}"),
            HoardError::UnknownRevision(r) => write!(f, "unknown revision: {r}"),
            HoardError::BranchExists(name) => write!(f, "branch name already exists: {name}"),
            HoardError::UncommittedChanges(n) => {
                write!(f, "{n} file change(s) would be lost (use --force to proceed)")
            }
            HoardError::DirtyBranches(names) => write!(
                f,
                "branches modified since going offline: {} (use --force to go online anyway)",
                names.join(", ")
            ),
            HoardError::NothingToCommit => write!(f, "nothing to commit (use --force to commit anyway)"),
            HoardError::TagAlreadyUsed(tag) => write!(f, "tag already in use: {tag}"),
            HoardError::NoPatternsStaged => {
                write!(f, "no file patterns staged for commit in picky mode")
            }
            HoardError::UnsupportedConfigKey(key) => write!(f, "unsupported configuration key: {key}"),
            HoardError::InvalidConfigValue { key, value } => {
                write!(f, "invalid value for {key}: {value}")
            }
            HoardError::PatternExists(p) => write!(f, "pattern already tracked: {p}"),
            HoardError::PatternNotFound(p) => write!(f, "pattern not tracked: {p}"),
            HoardError::NoMatchingFiles(p) => write!(f, "no file matches pattern: {p}"),
            HoardError::SimpleMode => {
                write!(f, "repository is in simple mode (use --track or --picky when going offline)")
            }
            HoardError::LastBranch => write!(f, "cannot destroy the only remaining branch"),
            HoardError::HashCollision(path) => write!(f, "content blob already exists: {path}"),
            HoardError::LockTimeout => write!(f, "timed out waiting for repository lock"),
            HoardError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for HoardError {}

impl From<io::Error> for HoardError {
    fn from(e: io::Error) -> Self {
        HoardError::Io(e)
    }
}

impl From<serde_json::Error> for HoardError {
    fn from(e: serde_json::Error) -> Self {
        HoardError::Json(e)
    }
}

impl From<toml::de::Error> for HoardError {
    fn from(e: toml::de::Error) -> Self {
        HoardError::TomlDe(e)
    }
}

impl From<toml::ser::Error> for HoardError {
    fn from(e: toml::ser::Error) -> Self {
        HoardError::TomlSer(e)
    }
}

impl From<walkdir::Error> for HoardError {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => HoardError::Io(io),
            None => HoardError::Other("directory walk failed".to_string()),
        }
    }
}

/// Convenience alias for Results in hoard.
pub type HoardResult<T> = Result<T, HoardError>;
