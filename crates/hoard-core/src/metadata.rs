//! Repository, branch and revision records.
//!
//! Layout under `.hoard/`:
//! - `.meta`              repository record (flags, tags, branch table, local config)
//! - `b<N>/.meta`         ordered commit list of branch N
//! - `b<N>/r<M>/.meta`    path -> PathInfo map of revision M
//!
//! Every save copies the previous record to `<file>_last` first. Records
//! written by format 1 stored fields by position; they are read through the
//! `Legacy*` shapes below and rewritten with named fields on the next save.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::{ConfigKey, ConfigLayer, KeyKind};
use crate::error::HoardResult;
use crate::fsutil::write_with_backup;

/// Current metadata format written by this crate.
pub const FORMAT_VERSION: u32 = 2;

/// File name of every structured record.
pub const META_FILE: &str = ".meta";

/// Recorded state of one file at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathInfo {
    /// Hash of the relative path; names the content blob.
    pub name_hash: String,
    /// Size in bytes. `None` marks a deletion (tombstone).
    pub size: Option<u64>,
    /// Modification time in milliseconds.
    pub mtime: i64,
    /// Content hash. Absent for empty files and tombstones.
    pub hash: Option<String>,
}

impl PathInfo {
    pub fn tombstone(name_hash: String, mtime: i64) -> Self {
        PathInfo {
            name_hash,
            size: None,
            mtime,
            hash: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.size.is_none()
    }
}

/// Path set of a revision, or accumulated over several revisions.
pub type PathSet = BTreeMap<String, PathInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitInfo {
    pub number: u32,
    /// Creation time in milliseconds.
    pub ctime: i64,
    /// Commit message; unique messages double as tags.
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchInfo {
    pub number: u32,
    pub ctime: i64,
    pub name: Option<String>,
    /// False once the branch has diverged from the backing VCS.
    pub in_sync: bool,
    /// Tracking patterns (track/picky mode).
    #[serde(default)]
    pub tracked: Vec<String>,
    /// Patterns excluded from tracking.
    #[serde(default)]
    pub untracked: Vec<String>,
    /// Reference ("fast") branches: parent branch and branch point.
    #[serde(default)]
    pub parent: Option<u32>,
    #[serde(default)]
    pub revision: Option<u32>,
}

impl BranchInfo {
    /// Display name: the branch name if set, else its number.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.number.to_string(),
        }
    }
}

/// The repository record stored in `.hoard/.meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoRecord {
    pub format: u32,
    /// Version of the tool that created the repository.
    pub version: String,
    pub tags: Vec<String>,
    /// Active branch.
    pub branch: u32,
    pub track: bool,
    pub picky: bool,
    pub strict: bool,
    pub compress: bool,
    pub branches: Vec<BranchInfo>,
    /// Repository-local configuration layer.
    #[serde(default)]
    pub config: ConfigLayer,
}

impl Default for RepoRecord {
    fn default() -> Self {
        RepoRecord {
            format: FORMAT_VERSION,
            version: env!("CARGO_PKG_VERSION").to_string(),
            tags: Vec::new(),
            branch: 0,
            track: false,
            picky: false,
            strict: false,
            compress: false,
            branches: Vec::new(),
            config: ConfigLayer::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathInfoRepr {
    Named(PathInfo),
    Legacy(String, Option<u64>, i64, Option<String>),
}

impl From<PathInfoRepr> for PathInfo {
    fn from(repr: PathInfoRepr) -> Self {
        match repr {
            PathInfoRepr::Named(info) => info,
            PathInfoRepr::Legacy(name_hash, size, mtime, hash) => PathInfo {
                name_hash,
                size,
                mtime,
                hash,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommitRepr {
    Named(CommitInfo),
    Legacy(u32, i64, Option<String>),
}

impl From<CommitRepr> for CommitInfo {
    fn from(repr: CommitRepr) -> Self {
        match repr {
            CommitRepr::Named(info) => info,
            CommitRepr::Legacy(number, ctime, message) => CommitInfo {
                number,
                ctime,
                message,
            },
        }
    }
}

type LegacyBranch8 = (u32, i64, Option<String>, bool, Vec<String>, Vec<String>, Option<u32>, Option<u32>);

/// Positional branch rows: older repositories lack the trailing fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyBranch {
    Full(LegacyBranch8),
    WithUntracked(u32, i64, Option<String>, bool, Vec<String>, Vec<String>),
    Basic(u32, i64, Option<String>, bool, Vec<String>),
}

impl From<LegacyBranch> for BranchInfo {
    fn from(row: LegacyBranch) -> Self {
        let (number, ctime, name, in_sync, tracked, untracked, parent, revision) = match row {
            LegacyBranch::Full(t) => t,
            LegacyBranch::WithUntracked(n, c, name, s, t, u) => (n, c, name, s, t, u, None, None),
            LegacyBranch::Basic(n, c, name, s, t) => (n, c, name, s, t, Vec::new(), None, None),
        };
        BranchInfo {
            number,
            ctime,
            name,
            in_sync,
            tracked,
            untracked,
            parent,
            revision,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LegacyRepo {
    version: Option<String>,
    tags: Vec<String>,
    branch: u32,
    track: bool,
    picky: bool,
    strict: bool,
    compress: bool,
}

/// Upgrade a format 1 record `[repo, branches, config]` to the current schema.
pub fn migrate_v1(value: Value) -> HoardResult<RepoRecord> {
    let (repo, branches, config): (LegacyRepo, Vec<LegacyBranch>, Map<String, Value>) =
        serde_json::from_value(value)?;
    Ok(RepoRecord {
        format: FORMAT_VERSION,
        version: repo
            .version
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        tags: repo.tags,
        branch: repo.branch,
        track: repo.track,
        picky: repo.picky,
        strict: repo.strict,
        compress: repo.compress,
        branches: branches.into_iter().map(BranchInfo::from).collect(),
        config: legacy_config_layer(&config),
    })
}

/// Carry over the keys of an untyped config map that still exist.
fn legacy_config_layer(map: &Map<String, Value>) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    for (name, value) in map {
        let Ok(key) = ConfigKey::parse(name) else {
            warn!("dropping unsupported configuration key during migration: {name}");
            continue;
        };
        let text = match (key.kind(), value) {
            (KeyKind::Flag, Value::Bool(b)) => b.to_string(),
            (KeyKind::Text, Value::String(s)) => s.clone(),
            (KeyKind::List, Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            _ => {
                warn!("dropping malformed configuration value for {name}");
                continue;
            }
        };
        if let Err(e) = layer.set(key, &text) {
            warn!("dropping configuration value for {name}: {e}");
        }
    }
    layer
}

/// Reads and writes the structured records under the metadata folder.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    meta_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(meta_dir: &Path) -> Self {
        MetadataStore {
            meta_dir: meta_dir.to_path_buf(),
        }
    }

    fn repo_path(&self) -> PathBuf {
        self.meta_dir.join(META_FILE)
    }

    fn branch_path(&self, branch: u32) -> PathBuf {
        self.meta_dir.join(format!("b{branch}")).join(META_FILE)
    }

    fn revision_path(&self, branch: u32, revision: u32) -> PathBuf {
        self.meta_dir
            .join(format!("b{branch}"))
            .join(format!("r{revision}"))
            .join(META_FILE)
    }

    /// Load the repository record.
    ///
    /// Returns `None` when no record exists, and whether it was migrated.
    pub fn load_repo(&self) -> HoardResult<Option<(RepoRecord, bool)>> {
        let path = self.repo_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&data)?;
        if value.is_array() {
            return Ok(Some((migrate_v1(value)?, true)));
        }
        let record: RepoRecord = serde_json::from_value(value)?;
        Ok(Some((record, false)))
    }

    pub fn save_repo(&self, record: &RepoRecord) -> HoardResult<()> {
        fs::create_dir_all(&self.meta_dir)?;
        write_json(&self.repo_path(), record)
    }

    pub fn load_commits(&self, branch: u32) -> HoardResult<Vec<CommitInfo>> {
        let data = fs::read_to_string(self.branch_path(branch))?;
        let rows: Vec<CommitRepr> = serde_json::from_str(&data)?;
        Ok(rows.into_iter().map(CommitInfo::from).collect())
    }

    pub fn save_commits(&self, branch: u32, commits: &[CommitInfo]) -> HoardResult<()> {
        let path = self.branch_path(branch);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&path, &commits)
    }

    pub fn load_revision(&self, branch: u32, revision: u32) -> HoardResult<PathSet> {
        let data = fs::read_to_string(self.revision_path(branch, revision))?;
        let rows: BTreeMap<String, PathInfoRepr> = serde_json::from_str(&data)?;
        Ok(rows
            .into_iter()
            .map(|(path, info)| (path, PathInfo::from(info)))
            .collect())
    }

    pub fn save_revision(&self, branch: u32, revision: u32, paths: &PathSet) -> HoardResult<()> {
        let path = self.revision_path(branch, revision);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&path, paths)
    }

    pub fn has_revision(&self, branch: u32, revision: u32) -> bool {
        self.revision_path(branch, revision).exists()
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> HoardResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_with_backup(path, json.as_bytes())
}
