//! Repository state of an offline repository and the branch lifecycle.
//!
//! A `Repository` ties the metadata records, the content store and the
//! resolved configuration together. Command-level operations live in
//! [`crate::ops`]; this module owns loading and saving, history resolution
//! across reference branches, and creating or removing branches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::changes::{find_changes, DetectOptions, Detection};
use crate::config::{Config, ConfigLayer};
use crate::error::{HoardError, HoardResult};
use crate::fsutil::{backup_path, now_ms, remove_all, set_mtime_ms, BACKUP_SUFFIX};
use crate::lock::RepoLock;
use crate::metadata::{BranchInfo, CommitInfo, MetadataStore, PathInfo, PathSet, RepoRecord};
use crate::pattern::IgnoreRules;
use crate::store::ContentStore;

/// The metadata folder name.
pub const META_DIR: &str = ".hoard";

/// An offline repository rooted at a working tree.
pub struct Repository {
    pub(crate) root: PathBuf,
    pub(crate) meta_dir: PathBuf,
    pub(crate) version: String,
    pub(crate) tags: Vec<String>,
    /// Active branch.
    pub(crate) branch: u32,
    pub(crate) branches: BTreeMap<u32, BranchInfo>,
    pub(crate) track: bool,
    pub(crate) picky: bool,
    pub(crate) strict: bool,
    pub(crate) compress: bool,
    /// Configuration layer stored in the repository record.
    pub(crate) local_config: ConfigLayer,
    pub(crate) global_config: ConfigLayer,
    /// Effective configuration (local > global > default).
    pub(crate) config: Config,
    pub(crate) rules: IgnoreRules,
    pub(crate) meta: MetadataStore,
    pub(crate) store: ContentStore,
}

impl Repository {
    const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open the offline repository at `root`.
    ///
    /// A missing or unreadable repository record falls back to defaults. A
    /// format-1 record is migrated and written back right away.
    pub fn open(root: &Path, global: &ConfigLayer) -> HoardResult<Self> {
        let meta_dir = root.join(META_DIR);
        if !meta_dir.is_dir() {
            return Err(HoardError::NotOffline);
        }
        let meta = MetadataStore::new(&meta_dir);
        let record = match meta.load_repo() {
            Ok(Some((record, migrated))) => {
                if migrated {
                    warn!("upgrading repository metadata to format {}", record.format);
                    meta.save_repo(&record)?;
                }
                record
            }
            Ok(None) => {
                warn!("repository record missing, using defaults");
                RepoRecord::default()
            }
            Err(e) => {
                warn!("cannot read repository record ({e}), using defaults");
                RepoRecord::default()
            }
        };
        Ok(Self::from_record(root, record, global))
    }

    /// Create the metadata folder for a new repository.
    ///
    /// Mode flags start from the configuration; no branch exists yet.
    pub(crate) fn create(root: &Path, global: &ConfigLayer) -> HoardResult<Self> {
        let meta_dir = root.join(META_DIR);
        fs::create_dir_all(&meta_dir)?;
        debug!("created {}", meta_dir.display());
        let mut repo = Self::from_record(root, RepoRecord::default(), global);
        repo.track = repo.config.track;
        repo.picky = repo.config.picky;
        repo.strict = repo.config.strict;
        repo.compress = repo.config.compress;
        repo.store = ContentStore::new(&repo.meta_dir, repo.compress);
        Ok(repo)
    }

    fn from_record(root: &Path, record: RepoRecord, global: &ConfigLayer) -> Self {
        let meta_dir = root.join(META_DIR);
        let config = Config::resolve(global, &record.config);
        let rules = IgnoreRules::from_config(&config);
        Repository {
            root: root.to_path_buf(),
            meta: MetadataStore::new(&meta_dir),
            store: ContentStore::new(&meta_dir, record.compress),
            meta_dir,
            version: record.version,
            tags: record.tags,
            branch: record.branch,
            branches: record
                .branches
                .into_iter()
                .map(|b| (b.number, b))
                .collect(),
            track: record.track,
            picky: record.picky,
            strict: record.strict,
            compress: record.compress,
            local_config: record.config,
            global_config: global.clone(),
            config,
            rules,
        }
    }

    fn record(&self) -> RepoRecord {
        RepoRecord {
            version: self.version.clone(),
            tags: self.tags.clone(),
            branch: self.branch,
            track: self.track,
            picky: self.picky,
            strict: self.strict,
            compress: self.compress,
            branches: self.branches.values().cloned().collect(),
            config: self.local_config.clone(),
            ..RepoRecord::default()
        }
    }

    /// Persist the repository record (flags, tags, branch table, local config).
    pub fn save(&self) -> HoardResult<()> {
        self.meta.save_repo(&self.record())
    }

    /// Take the exclusive repository lock.
    pub(crate) fn lock(&self) -> HoardResult<RepoLock> {
        RepoLock::acquire(&self.meta_dir, Self::LOCK_TIMEOUT)
    }

    /// Re-derive the effective configuration after a layer changed.
    pub(crate) fn refresh_config(&mut self) {
        self.config = Config::resolve(&self.global_config, &self.local_config);
        self.rules = IgnoreRules::from_config(&self.config);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_branch(&self) -> u32 {
        self.branch
    }

    pub fn branches(&self) -> &BTreeMap<u32, BranchInfo> {
        &self.branches
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_track(&self) -> bool {
        self.track
    }

    pub fn is_picky(&self) -> bool {
        self.picky
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Human-readable tracking mode.
    pub fn mode_name(&self) -> &'static str {
        if self.picky {
            "picky"
        } else if self.track {
            "track"
        } else {
            "simple"
        }
    }

    pub fn branch_info(&self, branch: u32) -> HoardResult<&BranchInfo> {
        self.branches
            .get(&branch)
            .ok_or_else(|| HoardError::UnknownBranch(branch.to_string()))
    }

    /// Working tree location of a `/`-separated relative path.
    pub(crate) fn work_path(&self, rel_path: &str) -> PathBuf {
        rel_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Branch number for a reference token: a number, else a branch name.
    pub fn find_branch(&self, token: &str) -> Option<u32> {
        if let Ok(number) = token.parse::<u32>() {
            if self.branches.contains_key(&number) {
                return Some(number);
            }
        }
        self.branches
            .values()
            .find(|b| b.name.as_deref() == Some(token))
            .map(|b| b.number)
    }

    // -- commits and history -------------------------------------------------

    /// Commits recorded by `branch` itself (empty for an unchanged fast branch).
    pub fn own_commits(&self, branch: u32) -> HoardResult<BTreeMap<u32, CommitInfo>> {
        self.branch_info(branch)?;
        Ok(self
            .meta
            .load_commits(branch)?
            .into_iter()
            .map(|c| (c.number, c))
            .collect())
    }

    pub(crate) fn save_commits(
        &self,
        branch: u32,
        commits: &BTreeMap<u32, CommitInfo>,
    ) -> HoardResult<()> {
        let rows: Vec<CommitInfo> = commits.values().cloned().collect();
        self.meta.save_commits(branch, &rows)
    }

    /// Highest revision visible on `branch`.
    ///
    /// A fast branch without own commits sits at its branch point.
    pub fn latest_revision(&self, branch: u32) -> HoardResult<u32> {
        let commits = self.own_commits(branch)?;
        if let Some(max) = commits.keys().next_back() {
            return Ok(*max);
        }
        let info = self.branch_info(branch)?;
        info.revision
            .ok_or_else(|| HoardError::UnknownRevision(format!("{}/", info.label())))
    }

    /// The branch that physically holds `revision` as seen from `branch`.
    ///
    /// Revisions at or before a fast branch's branch point belong to its
    /// parent, recursively.
    pub fn resolve_parent_branch(&self, branch: u32, revision: u32) -> u32 {
        let mut current = branch;
        for _ in 0..=self.branches.len() {
            let Some(info) = self.branches.get(&current) else {
                break;
            };
            match (info.parent, info.revision) {
                (Some(parent), Some(point)) if revision <= point => current = parent,
                _ => break,
            }
        }
        current
    }

    /// Every commit visible on `branch`, inherited ones included, in order.
    pub fn history(&self, branch: u32) -> HoardResult<Vec<CommitInfo>> {
        let latest = self.latest_revision(branch)?;
        let mut by_owner: BTreeMap<u32, BTreeMap<u32, CommitInfo>> = BTreeMap::new();
        let mut history = Vec::new();
        for revision in 0..=latest {
            let owner = self.resolve_parent_branch(branch, revision);
            if !by_owner.contains_key(&owner) {
                by_owner.insert(owner, self.own_commits(owner)?);
            }
            match by_owner.get(&owner).and_then(|c| c.get(&revision)) {
                Some(commit) => history.push(commit.clone()),
                None => warn!("no commit record for revision {revision} in branch {owner}"),
            }
        }
        Ok(history)
    }

    /// Accumulate revision records `0..=revision` of `branch`.
    ///
    /// `visit` sees each revision number with the path set accumulated so
    /// far and that revision's own record. Tombstones remove their path.
    pub fn for_each_revision<F>(&self, branch: u32, revision: u32, mut visit: F) -> HoardResult<PathSet>
    where
        F: FnMut(u32, &PathSet, &PathSet) -> HoardResult<()>,
    {
        let mut paths = PathSet::new();
        for r in 0..=revision {
            let owner = self.resolve_parent_branch(branch, r);
            if !self.meta.has_revision(owner, r) {
                warn!("revision record {owner}/{r} missing, skipped");
                continue;
            }
            let delta = self.meta.load_revision(owner, r)?;
            visit(r, &paths, &delta)?;
            for (path, info) in delta {
                if info.is_tombstone() {
                    paths.remove(&path);
                } else {
                    paths.insert(path, info);
                }
            }
        }
        Ok(paths)
    }

    /// Path set of `branch` as of `revision`.
    pub fn path_set(&self, branch: u32, revision: u32) -> HoardResult<PathSet> {
        self.for_each_revision(branch, revision, |_, _, _| Ok(()))
    }

    // -- versioned content ---------------------------------------------------

    /// Location of the newest blob for `name_hash` at or before `revision`.
    pub fn find_revision(&self, branch: u32, revision: u32, name_hash: &str) -> Option<PathBuf> {
        (0..=revision).rev().find_map(|r| {
            let owner = self.resolve_parent_branch(branch, r);
            let location = self.store.blob_path(owner, r, name_hash);
            location.exists().then_some(location)
        })
    }

    /// Full content of a versioned file, or `None` when its blob is missing.
    pub fn read_versioned(
        &self,
        branch: u32,
        revision: u32,
        info: &PathInfo,
    ) -> HoardResult<Option<Vec<u8>>> {
        match info.size {
            None => Ok(None),
            Some(0) => Ok(Some(Vec::new())),
            Some(_) => match self.find_revision(branch, revision, &info.name_hash) {
                Some(location) => self.store.read(&location),
                None => {
                    warn!("no stored content for {} up to revision {revision}", info.name_hash);
                    Ok(None)
                }
            },
        }
    }

    /// Restore a versioned file into the working tree, with its recorded mtime.
    ///
    /// Returns false when the content could not be found.
    pub fn restore_file(
        &self,
        rel_path: &str,
        branch: u32,
        revision: u32,
        info: &PathInfo,
    ) -> HoardResult<bool> {
        let target = self.work_path(rel_path);
        match info.size {
            None => return Ok(false),
            Some(0) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::File::create(&target)?;
            }
            Some(_) => {
                let Some(location) = self.find_revision(branch, revision, &info.name_hash) else {
                    warn!("cannot restore {rel_path}: no stored content");
                    return Ok(false);
                };
                if self.store.restore_to(&location, &target)?.is_none() {
                    return Ok(false);
                }
            }
        }
        if let Err(e) = set_mtime_ms(&target, info.mtime) {
            warn!("cannot set modification time of {rel_path}: {e}");
        }
        Ok(true)
    }

    /// Copy a versioned file's blob into another branch/revision.
    pub fn copy_versioned_file(
        &self,
        branch: u32,
        revision: u32,
        to_branch: u32,
        to_revision: u32,
        info: &PathInfo,
    ) -> HoardResult<bool> {
        if info.size.unwrap_or(0) == 0 {
            return Ok(true);
        }
        match self.find_revision(branch, revision, &info.name_hash) {
            Some(location) => {
                let target = self.store.blob_path(to_branch, to_revision, &info.name_hash);
                self.store.copy_blob(&location, &target)
            }
            None => {
                warn!("no stored content for {} up to revision {revision}", info.name_hash);
                Ok(false)
            }
        }
    }

    // -- tracking patterns ---------------------------------------------------

    /// Tracking patterns of `branch`, empty in simple mode.
    pub fn tracking_patterns(&self, branch: u32, negative: bool) -> Vec<String> {
        if !(self.track || self.picky) {
            return Vec::new();
        }
        match self.branches.get(&branch) {
            Some(info) if negative => info.untracked.clone(),
            Some(info) => info.tracked.clone(),
            None => Vec::new(),
        }
    }

    /// Sorted union of two branches' tracking patterns.
    pub fn tracking_union(&self, a: u32, b: u32, negative: bool) -> Vec<String> {
        let mut union = self.tracking_patterns(a, negative);
        union.extend(self.tracking_patterns(b, negative));
        union.sort();
        union.dedup();
        union
    }

    // -- branch lifecycle ----------------------------------------------------

    /// Create branch `number` as a snapshot.
    ///
    /// Simple mode stores the filtered working tree as revision 0. Track and
    /// picky mode copy the current branch's latest revision instead.
    pub fn create_branch(
        &mut self,
        number: u32,
        name: Option<String>,
        message: String,
        progress: bool,
    ) -> HoardResult<Detection> {
        let now = now_ms();
        let mut detection = Detection::default();
        let current = self.branches.get(&self.branch).cloned();

        let paths = if self.track || self.picky {
            match &current {
                Some(cur) => {
                    let latest = self.latest_revision(cur.number)?;
                    let paths = self.path_set(cur.number, latest)?;
                    for info in paths.values() {
                        self.copy_versioned_file(cur.number, latest, number, 0, info)?;
                    }
                    paths
                }
                None => PathSet::new(),
            }
        } else {
            let opts = DetectOptions {
                check_content: self.strict,
                target: Some((number, 0)),
                progress,
                ..Default::default()
            };
            detection = find_changes(&self.root, &PathSet::new(), &self.rules, &self.store, &opts)?;
            detection.changes.additions.clone()
        };

        self.meta.save_revision(number, 0, &paths)?;
        let commit = CommitInfo {
            number: 0,
            ctime: now,
            message: Some(message),
        };
        self.meta.save_commits(number, &[commit])?;

        let (in_sync, tracked, untracked) = match current {
            Some(cur) if self.track => (cur.in_sync, cur.tracked, cur.untracked),
            Some(cur) => (cur.in_sync, Vec::new(), Vec::new()),
            None => (true, Vec::new(), Vec::new()),
        };
        self.branches.insert(
            number,
            BranchInfo {
                number,
                ctime: now,
                name,
                in_sync,
                tracked,
                untracked,
                parent: None,
                revision: None,
            },
        );
        info!("created branch {number} with {} file(s)", paths.len());
        Ok(detection)
    }

    /// Create branch `number` from the current branch's latest revision.
    ///
    /// A full copy duplicates every referenced blob into revision 0; a fast
    /// copy only records the parent and branch point.
    pub fn duplicate_branch(
        &mut self,
        number: u32,
        name: Option<String>,
        message: String,
        full: bool,
    ) -> HoardResult<()> {
        let now = now_ms();
        let source = self.branch_info(self.branch)?.clone();
        let latest = self.latest_revision(source.number)?;

        if full {
            let paths = self.path_set(source.number, latest)?;
            for info in paths.values() {
                self.copy_versioned_file(source.number, latest, number, 0, info)?;
            }
            self.meta.save_revision(number, 0, &paths)?;
            let commit = CommitInfo {
                number: 0,
                ctime: now,
                message: Some(message),
            };
            self.meta.save_commits(number, &[commit])?;
        } else {
            self.meta.save_commits(number, &[])?;
        }

        self.branches.insert(
            number,
            BranchInfo {
                number,
                ctime: now,
                name,
                in_sync: source.in_sync,
                tracked: source.tracked,
                untracked: source.untracked,
                parent: (!full).then_some(source.number),
                revision: (!full).then_some(latest),
            },
        );
        info!(
            "branched {number} from {}/{latest} ({})",
            source.number,
            if full { "full copy" } else { "reference" }
        );
        Ok(())
    }

    /// Remove a branch, keeping every dependent branch's history intact.
    ///
    /// Direct dependents first receive their own copy of each revision they
    /// resolved to the removed branch, then point at the removed branch's
    /// parent (or become full branches). The branch folder is kept as
    /// `b<N>_last` and the highest remaining branch becomes active.
    pub fn remove_branch(&mut self, number: u32) -> HoardResult<BranchInfo> {
        let removed = self.branch_info(number)?.clone();
        if self.branches.len() == 1 {
            return Err(HoardError::LastBranch);
        }

        let first_owned = match (removed.parent, removed.revision) {
            (Some(_), Some(point)) => point + 1,
            _ => 0,
        };
        let dependents: Vec<u32> = self
            .branches
            .values()
            .filter(|b| b.parent == Some(number))
            .map(|b| b.number)
            .collect();

        if !dependents.is_empty() {
            let source_commits = self.own_commits(number)?;
            for dep in dependents {
                let point = self.branch_info(dep)?.revision.unwrap_or(0);
                if first_owned <= point {
                    let mut dep_commits = self.own_commits(dep)?;
                    for r in first_owned..=point {
                        info!("integrating revision {r} into dependent branch {dep}");
                        self.copy_revision(number, dep, r)?;
                        if let Some(commit) = source_commits.get(&r) {
                            dep_commits.insert(r, commit.clone());
                        }
                    }
                    self.save_commits(dep, &dep_commits)?;
                }
                if let Some(info) = self.branches.get_mut(&dep) {
                    match (removed.parent, removed.revision) {
                        (Some(parent), Some(v)) => {
                            info.parent = Some(parent);
                            info.revision = Some(point.min(v));
                        }
                        _ => {
                            info.parent = None;
                            info.revision = None;
                        }
                    }
                }
            }
        }

        let folder = self.store.branch_dir(number);
        let backup = backup_path(&folder);
        remove_all(&backup)?;
        fs::rename(&folder, &backup)?;

        self.branches.remove(&number);
        if let Some(max) = self.branches.keys().next_back() {
            self.branch = *max;
        }
        info!("removed branch {number}");
        Ok(removed)
    }

    /// Copy revision folder `revision` (blobs and record) between branches.
    fn copy_revision(&self, from: u32, to: u32, revision: u32) -> HoardResult<()> {
        let source = self.store.revision_dir(from, revision);
        let target = self.store.revision_dir(to, revision);
        fs::create_dir_all(&target)?;
        for entry in fs::read_dir(&source)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(BACKUP_SUFFIX) || !entry.file_type()?.is_file() {
                continue;
            }
            fs::copy(entry.path(), target.join(&name))?;
        }
        Ok(())
    }

    /// Branches no longer in sync with the backing VCS.
    pub fn dirty_branches(&self) -> Vec<&BranchInfo> {
        self.branches.values().filter(|b| !b.in_sync).collect()
    }

    // -- revision references -------------------------------------------------

    /// Resolve a revision reference to `(branch, revision)`.
    ///
    /// Accepted forms: empty or `/` (current branch, latest), `/R`, `B/`,
    /// `B/R`, and a bare token that names a branch if one exists, else a
    /// revision of the current branch. Revisions are numbers (negative counts
    /// back from the latest, -1 being the latest) or commit messages.
    pub fn parse_revision(&self, reference: Option<&str>) -> HoardResult<(u32, u32)> {
        let text = reference.unwrap_or("").trim();
        let (branch_token, revision_token) = if text.is_empty() || text == "/" {
            (None, None)
        } else if let Some((b, r)) = text.split_once('/') {
            (
                Some(b).filter(|s| !s.is_empty()),
                Some(r).filter(|s| !s.is_empty()),
            )
        } else if self.find_branch(text).is_some() {
            (Some(text), None)
        } else {
            (None, Some(text))
        };

        let branch = match branch_token {
            Some(token) => self
                .find_branch(token)
                .ok_or_else(|| HoardError::UnknownBranch(token.to_string()))?,
            None => self.branch,
        };
        let latest = self.latest_revision(branch)?;
        let revision = match revision_token {
            None => latest,
            Some(token) => self.resolve_revision_token(branch, latest, token)?,
        };
        Ok((branch, revision))
    }

    fn resolve_revision_token(&self, branch: u32, latest: u32, token: &str) -> HoardResult<u32> {
        let unknown = || HoardError::UnknownRevision(token.to_string());
        if let Ok(number) = token.parse::<i64>() {
            let resolved = if number < 0 {
                latest as i64 + 1 + number
            } else {
                number
            };
            if resolved < 0 || resolved > latest as i64 {
                return Err(unknown());
            }
            return Ok(resolved as u32);
        }
        self.history(branch)?
            .into_iter()
            .find(|c| c.message.as_deref() == Some(token))
            .map(|c| c.number)
            .ok_or_else(unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_str;

    fn info(path: &str, size: u64, mtime: i64) -> PathInfo {
        PathInfo {
            name_hash: hash_str(path),
            size: Some(size),
            mtime,
            hash: Some(format!("h{size}")),
        }
    }

    fn commit(number: u32, message: &str) -> CommitInfo {
        CommitInfo {
            number,
            ctime: number as i64,
            message: Some(message.to_string()),
        }
    }

    fn branch(number: u32, parent: Option<u32>, revision: Option<u32>) -> BranchInfo {
        BranchInfo {
            number,
            ctime: 0,
            name: Some(format!("b{number}")),
            in_sync: true,
            tracked: Vec::new(),
            untracked: Vec::new(),
            parent,
            revision,
        }
    }

    /// Record a revision with a blob per non-empty file.
    fn record_revision(repo: &Repository, b: u32, r: u32, files: &[(&str, &str)], deleted: &[&str]) {
        let mut paths = PathSet::new();
        for (path, content) in files {
            let mut pi = info(path, content.len() as u64, r as i64);
            pi.hash = Some(hash_str(content));
            if !content.is_empty() {
                let target = repo.store.blob_path(b, r, &pi.name_hash);
                fs::create_dir_all(target.parent().unwrap()).unwrap();
                repo.store
                    .store_reader(&mut content.as_bytes(), &target)
                    .unwrap();
            }
            paths.insert(path.to_string(), pi);
        }
        for path in deleted {
            paths.insert(path.to_string(), PathInfo::tombstone(hash_str(path), 0));
        }
        repo.meta.save_revision(b, r, &paths).unwrap();
    }

    fn setup() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::create(dir.path(), &ConfigLayer::default()).unwrap();
        (dir, repo)
    }

    /// Branch 0 with r0..r3, fast branch 1 at 0/3 with own r4.
    fn reference_fixture(repo: &mut Repository) {
        repo.branches.insert(0, branch(0, None, None));
        record_revision(repo, 0, 0, &[("a.txt", "zero")], &[]);
        record_revision(repo, 0, 1, &[("b.txt", "one")], &[]);
        record_revision(repo, 0, 2, &[("a.txt", "two!")], &[]);
        record_revision(repo, 0, 3, &[], &["b.txt"]);
        repo.meta
            .save_commits(0, &[commit(0, "init"), commit(1, "add b"), commit(2, "edit a"), commit(3, "drop b")])
            .unwrap();

        repo.branches.insert(1, branch(1, Some(0), Some(3)));
        record_revision(repo, 1, 4, &[("c.txt", "four")], &[]);
        repo.meta.save_commits(1, &[commit(4, "add c")]).unwrap();
        repo.save().unwrap();
    }

    #[test]
    fn test_open_requires_metadata_folder() {
        let dir = tempfile::tempdir().unwrap();
        let result = Repository::open(dir.path(), &ConfigLayer::default());
        assert!(matches!(result, Err(HoardError::NotOffline)));
    }

    #[test]
    fn test_open_missing_record_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(META_DIR)).unwrap();
        let repo = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        assert!(repo.branches().is_empty());
        assert_eq!(repo.mode_name(), "simple");
    }

    #[test]
    fn test_save_and_reopen() {
        let (dir, mut repo) = setup();
        repo.branches.insert(0, branch(0, None, None));
        repo.tags.push("v1".to_string());
        repo.picky = true;
        repo.save().unwrap();

        let reopened = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        assert_eq!(reopened.tags(), ["v1".to_string()]);
        assert!(reopened.is_picky());
        assert_eq!(reopened.branches().len(), 1);
    }

    #[test]
    fn test_resolve_parent_branch() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);

        assert_eq!(repo.resolve_parent_branch(1, 2), 0);
        assert_eq!(repo.resolve_parent_branch(1, 3), 0);
        assert_eq!(repo.resolve_parent_branch(1, 4), 1);
        assert_eq!(repo.resolve_parent_branch(0, 2), 0);
    }

    #[test]
    fn test_path_set_through_reference() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);

        let paths = repo.path_set(1, 4).unwrap();
        let names: Vec<&str> = paths.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
        assert_eq!(paths["a.txt"].size, Some(4));

        let before_delete = repo.path_set(0, 2).unwrap();
        assert!(before_delete.contains_key("b.txt"));
    }

    #[test]
    fn test_latest_revision_of_fast_branch_is_branch_point() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        repo.branches.insert(2, branch(2, Some(1), Some(4)));
        repo.meta.save_commits(2, &[]).unwrap();

        assert_eq!(repo.latest_revision(2).unwrap(), 4);
        assert_eq!(repo.latest_revision(1).unwrap(), 4);
        assert_eq!(repo.latest_revision(0).unwrap(), 3);
    }

    #[test]
    fn test_history_includes_inherited_commits() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);

        let messages: Vec<String> = repo
            .history(1)
            .unwrap()
            .into_iter()
            .filter_map(|c| c.message)
            .collect();
        assert_eq!(messages, vec!["init", "add b", "edit a", "drop b", "add c"]);
    }

    #[test]
    fn test_find_revision_walks_back() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);

        let a = hash_str("a.txt");
        let found = repo.find_revision(1, 4, &a).unwrap();
        assert_eq!(found, repo.store.blob_path(0, 2, &a));
        let early = repo.find_revision(0, 1, &a).unwrap();
        assert_eq!(early, repo.store.blob_path(0, 0, &a));
        assert!(repo.find_revision(0, 3, &hash_str("nope")).is_none());
    }

    #[test]
    fn test_restore_file_sets_content_and_mtime() {
        let (dir, mut repo) = setup();
        reference_fixture(&mut repo);
        let paths = repo.path_set(1, 4).unwrap();

        assert!(repo.restore_file("sub/a.txt", 1, 4, &paths["a.txt"]).unwrap());
        let target = dir.path().join("sub").join("a.txt");
        assert_eq!(fs::read_to_string(&target).unwrap(), "two!");
        let mtime = crate::fsutil::mtime_ms(&fs::metadata(&target).unwrap()).unwrap();
        assert_eq!(mtime, paths["a.txt"].mtime);
    }

    #[test]
    fn test_restore_empty_file_without_blob() {
        let (dir, repo) = setup();
        let empty = PathInfo {
            name_hash: hash_str("e"),
            size: Some(0),
            mtime: 1_000,
            hash: None,
        };
        assert!(repo.restore_file("e", 0, 0, &empty).unwrap());
        assert_eq!(fs::read(dir.path().join("e")).unwrap().len(), 0);
    }

    #[test]
    fn test_parse_revision_forms() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        repo.branch = 0;

        assert_eq!(repo.parse_revision(None).unwrap(), (0, 3));
        assert_eq!(repo.parse_revision(Some("/")).unwrap(), (0, 3));
        assert_eq!(repo.parse_revision(Some("/1")).unwrap(), (0, 1));
        assert_eq!(repo.parse_revision(Some("/-2")).unwrap(), (0, 2));
        assert_eq!(repo.parse_revision(Some("b1/")).unwrap(), (1, 4));
        assert_eq!(repo.parse_revision(Some("1/2")).unwrap(), (1, 2));
        assert_eq!(repo.parse_revision(Some("b1")).unwrap(), (1, 4));
        assert_eq!(repo.parse_revision(Some("2")).unwrap(), (0, 2));
        assert_eq!(repo.parse_revision(Some("/edit a")).unwrap(), (0, 2));
        assert_eq!(repo.parse_revision(Some("b1/add c")).unwrap(), (1, 4));
    }

    #[test]
    fn test_parse_revision_errors() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        repo.branch = 0;

        assert!(matches!(
            repo.parse_revision(Some("nope/")),
            Err(HoardError::UnknownBranch(_))
        ));
        assert!(matches!(
            repo.parse_revision(Some("/9")),
            Err(HoardError::UnknownRevision(_))
        ));
        assert!(matches!(
            repo.parse_revision(Some("/-5")),
            Err(HoardError::UnknownRevision(_))
        ));
    }

    #[test]
    fn test_remove_last_branch_refused() {
        let (_dir, mut repo) = setup();
        repo.branches.insert(0, branch(0, None, None));
        repo.meta.save_commits(0, &[commit(0, "init")]).unwrap();
        assert!(matches!(repo.remove_branch(0), Err(HoardError::LastBranch)));
    }

    #[test]
    fn test_remove_full_parent_materializes_dependent() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        let expected = repo.path_set(1, 4).unwrap();

        repo.branch = 0;
        let removed = repo.remove_branch(0).unwrap();
        assert_eq!(removed.number, 0);
        assert_eq!(repo.current_branch(), 1);
        assert!(repo.store.branch_dir(0).with_file_name("b0_last").is_dir());

        let dep = repo.branch_info(1).unwrap();
        assert_eq!(dep.parent, None);
        assert_eq!(dep.revision, None);
        assert_eq!(repo.path_set(1, 4).unwrap(), expected);
        assert_eq!(repo.history(1).unwrap().len(), 5);

        let a = &expected["a.txt"];
        assert_eq!(repo.read_versioned(1, 4, a).unwrap().unwrap(), b"two!");
    }

    #[test]
    fn test_remove_middle_of_reference_chain() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        // 2 -> 1 at revision 4, with its own revision 5
        repo.branches.insert(2, branch(2, Some(1), Some(4)));
        record_revision(&repo, 2, 5, &[("d.txt", "five")], &["a.txt"]);
        repo.meta.save_commits(2, &[commit(5, "add d")]).unwrap();
        let expected = repo.path_set(2, 5).unwrap();

        repo.remove_branch(1).unwrap();

        let relinked = repo.branch_info(2).unwrap();
        assert_eq!(relinked.parent, Some(0));
        assert_eq!(relinked.revision, Some(3));
        assert_eq!(repo.resolve_parent_branch(2, 4), 2);
        assert_eq!(repo.resolve_parent_branch(2, 3), 0);
        assert_eq!(repo.path_set(2, 5).unwrap(), expected);

        let c = &expected["c.txt"];
        assert_eq!(repo.read_versioned(2, 5, c).unwrap().unwrap(), b"four");
        let messages: Vec<String> = repo
            .history(2)
            .unwrap()
            .into_iter()
            .filter_map(|c| c.message)
            .collect();
        assert_eq!(messages.last().map(String::as_str), Some("add d"));
        assert!(messages.contains(&"add c".to_string()));
    }

    #[test]
    fn test_remove_root_of_two_level_chain() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        repo.branches.insert(2, branch(2, Some(1), Some(4)));
        repo.meta.save_commits(2, &[]).unwrap();
        let expected = repo.path_set(2, 4).unwrap();

        repo.remove_branch(0).unwrap();

        // 1 becomes full, 2 still resolves through 1
        assert_eq!(repo.branch_info(1).unwrap().parent, None);
        assert_eq!(repo.branch_info(2).unwrap().parent, Some(1));
        assert_eq!(repo.path_set(2, 4).unwrap(), expected);
        let a = &expected["a.txt"];
        assert_eq!(repo.read_versioned(2, 4, a).unwrap().unwrap(), b"two!");
    }

    #[test]
    fn test_remove_replaces_older_backup() {
        let (_dir, mut repo) = setup();
        reference_fixture(&mut repo);
        let backup = backup_path(&repo.store.branch_dir(1));
        fs::create_dir_all(backup.join("stale")).unwrap();

        repo.remove_branch(1).unwrap();
        assert!(backup.join("r4").is_dir());
        assert!(!backup.join("stale").exists());
    }

    #[test]
    fn test_tracking_patterns_empty_in_simple_mode() {
        let (_dir, mut repo) = setup();
        let mut b = branch(0, None, None);
        b.tracked.push("*.rs".to_string());
        repo.branches.insert(0, b);

        assert!(repo.tracking_patterns(0, false).is_empty());
        repo.track = true;
        assert_eq!(repo.tracking_patterns(0, false), vec!["*.rs".to_string()]);
    }
}
