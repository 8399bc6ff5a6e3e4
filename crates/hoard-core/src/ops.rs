//! Command-level repository operations.
//!
//! Every operation returns a report struct; rendering is left to the caller.
//! Operations that write take the repository lock for their duration.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::changes::{find_changes, ChangeSet, DetectOptions, Detection};
use crate::config::{describe, Config, ConfigCommand, ConfigEntry, ConfigLayer, KeyKind};
use crate::diff::{
    detect_block_moves, diff_blocks, is_binary, is_text_type, load_lines, render_diff, Eol, MergeBlock,
};
use crate::error::{HoardError, HoardResult};
use crate::fsutil::{backup_path, format_time, now_ms, rel_path_string, remove_all, BACKUP_SUFFIX};
use crate::lock::LOCK_FILE;
use crate::merge::{merge, Conflict, MergeOperation, MergeOptions, Prompt, Resolution};
use crate::metadata::{BranchInfo, CommitInfo, PathInfo, PathSet, FORMAT_VERSION};
use crate::pattern::{capture, glob_match, normalize_pattern, split_pattern, substitute, wildcard_count};
use crate::probe::{self, Vcs};
use crate::repo::{Repository, META_DIR};
use crate::store::ContentStore;

/// File name suffix of repository dumps.
pub const DUMP_SUFFIX: &str = ".hoard.tar.gz";

/// Tracking filters for one detection pass.
#[derive(Debug, Clone, Default)]
struct Tracking {
    tracked: Vec<String>,
    untracked: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OfflineOptions {
    /// Name of the first branch.
    pub name: Option<String>,
    pub message: Option<String>,
    /// Wipe an existing offline repository.
    pub force: bool,
    pub track: bool,
    pub picky: bool,
    pub strict: bool,
    pub compress: bool,
    pub progress: bool,
}

#[derive(Debug, Clone)]
pub struct OfflineReport {
    pub branch: String,
    pub mode: &'static str,
    pub files: usize,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OnlineReport {
    /// Dirty branches discarded by a forced exit.
    pub discarded: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BranchOptions {
    pub name: Option<String>,
    pub message: Option<String>,
    /// Branch from the latest revision instead of the working tree.
    pub last: bool,
    /// Stay on the current branch.
    pub stay: bool,
    /// Reference the latest revision instead of copying it (implies `last`).
    pub fast: bool,
    pub progress: bool,
}

#[derive(Debug, Clone)]
pub struct BranchReport {
    pub number: u32,
    pub label: String,
    pub switched: bool,
    pub files: usize,
    pub summary: Option<String>,
}

/// Options shared by read-only comparisons.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub strict: bool,
    pub progress: bool,
}

#[derive(Debug, Clone)]
pub struct ChangesReport {
    pub branch: u32,
    pub revision: u32,
    pub label: String,
    pub changes: ChangeSet,
    pub summary: Option<String>,
    /// Plausibility notes for modified files.
    pub notes: BTreeMap<String, String>,
}

impl ChangesReport {
    pub fn lines(&self) -> Vec<String> {
        list_changes(&self.changes, &self.notes)
    }
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub eol: Option<Eol>,
    pub blocks: Vec<MergeBlock>,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub label: String,
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
    /// Modified files that are not diffed line by line.
    pub binary: Vec<String>,
    pub files: Vec<FileDiff>,
}

impl DiffReport {
    pub fn lines(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        out.extend(self.additions.iter().map(|p| format!("ADD {p}")));
        out.extend(self.deletions.iter().map(|p| format!("DEL {p}")));
        out.extend(self.binary.iter().map(|p| format!("MOD {p}")));
        for file in &self.files {
            out.extend(render_diff(&file.path, &file.blocks, file.eol));
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Also record the message as a tag.
    pub tag: bool,
    pub force: bool,
    pub strict: bool,
    pub progress: bool,
}

#[derive(Debug, Clone)]
pub struct CommitReport {
    pub branch: u32,
    pub revision: u32,
    pub message: Option<String>,
    pub changes: ChangeSet,
    pub summary: Option<String>,
}

impl CommitReport {
    /// `(added, deleted, modified, moved)`, moves not counted twice.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let moved = self.changes.moves.len();
        (
            self.changes.additions.len().saturating_sub(moved),
            self.changes.deletions.len().saturating_sub(moved),
            self.changes.modifications.len(),
            moved,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchOptions {
    /// Only take over the target's tracking patterns.
    pub meta_only: bool,
    pub force: bool,
    pub strict: bool,
    pub progress: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SwitchReport {
    pub branch: u32,
    pub revision: u32,
    pub label: String,
    pub restored: Vec<String>,
    pub removed: Vec<String>,
    pub overwritten: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Whole-file policy.
    pub files: MergeOperation,
    /// Line policy, defaults to `files`.
    pub lines: Option<MergeOperation>,
    /// Character policy, defaults to the line policy.
    pub chars: Option<MergeOperation>,
    /// Convert merged files to the incoming line ending.
    pub eol: bool,
    pub strict: bool,
    pub progress: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            files: MergeOperation::Both,
            lines: None,
            chars: None,
            eol: false,
            strict: false,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub label: String,
    /// Target-only files written into the tree.
    pub restored: Vec<String>,
    /// Target-only files left out by the file policy.
    pub not_restored: Vec<String>,
    /// Tree-only files deleted.
    pub removed: Vec<String>,
    /// Tree-only files kept by the file policy.
    pub kept: Vec<String>,
    pub merged: Vec<String>,
    pub theirs: Vec<String>,
    pub mine: Vec<String>,
    /// The current branch gained tracking patterns from the target.
    pub patterns_merged: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    pub force: bool,
    /// Only rewrite the tracking pattern, leave files alone.
    pub soft: bool,
    pub negative: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MoveReport {
    /// `(old path, new path)` in execution order.
    pub renames: Vec<(String, String)>,
    pub performed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LsOptions {
    pub recursive: bool,
    /// List tracking patterns per folder instead of files.
    pub patterns: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Hidden by this ignore pattern.
    Ignored(String),
    /// Selected by these tracking patterns, shortest first.
    Tracked(Vec<String>),
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub name: String,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDir {
    pub rel_path: String,
    pub files: Vec<ListedFile>,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub number: u32,
    pub ctime: i64,
    pub message: Option<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
    /// Added files of a text type.
    pub text_added: usize,
    pub tagged: bool,
    /// Latest revision of the branch.
    pub current: bool,
}

#[derive(Debug, Clone)]
pub struct LogReport {
    pub label: String,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct BranchStatus {
    pub number: u32,
    pub label: String,
    pub ctime: i64,
    pub in_sync: bool,
    pub commits: usize,
    pub latest: u32,
    /// Parent branch and branch point of a fast branch.
    pub reference: Option<(u32, u32)>,
    pub current: bool,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub root: PathBuf,
    pub vcs: Option<Vcs>,
    pub vcs_root: Option<PathBuf>,
    pub version: String,
    pub format: u32,
    pub mode: &'static str,
    pub strict: bool,
    pub compress: bool,
    /// Number of changed paths against the current branch.
    pub changed: usize,
    pub branches: Vec<BranchStatus>,
    pub tracked: Vec<String>,
    pub untracked: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DumpReport {
    pub archive: PathBuf,
    pub entries: usize,
    pub backed_up: bool,
}

/// Render a change set the way `changes` and `commit` list it.
pub fn list_changes(changes: &ChangeSet, notes: &BTreeMap<String, String>) -> Vec<String> {
    let moved_from: BTreeSet<&str> = changes.moves.values().map(|(old, _)| old.as_str()).collect();
    let mut out = Vec::new();
    for (new, (old, _)) in &changes.moves {
        out.push(format!("MOV {new}  <-  {old}"));
    }
    for path in changes.additions.keys() {
        if !changes.moves.contains_key(path) {
            out.push(format!("ADD {path}"));
        }
    }
    for path in changes.deletions.keys() {
        if !moved_from.contains(path.as_str()) {
            out.push(format!("DEL {path}"));
        }
    }
    for path in changes.modifications.keys() {
        match notes.get(path) {
            Some(note) => out.push(format!("MOD {path} {note}")),
            None => out.push(format!("MOD {path}")),
        }
    }
    out
}

fn same_file(a: &PathInfo, b: &PathInfo, strict: bool) -> bool {
    a.size == b.size && if strict { a.hash == b.hash } else { a.mtime == b.mtime }
}

/// Order same-folder renames so no file is overwritten before it moved away.
///
/// A cycle is an error unless `strict` is false, in which case the remaining
/// renames keep their order.
fn order_renames(
    mut pending: Vec<(String, String)>,
    strict: bool,
) -> HoardResult<Vec<(String, String)>> {
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending.iter().position(|(source, target)| {
            !pending
                .iter()
                .any(|(other, _)| other == target && other != source)
        });
        match ready {
            Some(i) => ordered.push(pending.remove(i)),
            None if strict => {
                return Err(HoardError::Other(
                    "renames form a cycle, no safe order exists".to_string(),
                ))
            }
            None => ordered.append(&mut pending),
        }
    }
    Ok(ordered)
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

impl Repository {
    /// Start working offline in `root`.
    pub fn offline(
        root: &Path,
        global: &ConfigLayer,
        opts: &OfflineOptions,
    ) -> HoardResult<(Repository, OfflineReport)> {
        let meta_dir = root.join(META_DIR);
        if meta_dir.exists() {
            if !opts.force {
                return Err(HoardError::AlreadyOffline);
            }
            warn!("wiping existing offline repository in {}", meta_dir.display());
            remove_all(&meta_dir)?;
        }

        let mut repo = Repository::create(root, global)?;
        let _lock = repo.lock()?;
        repo.picky |= opts.picky;
        repo.track = !repo.picky && (repo.track || opts.track);
        repo.strict |= opts.strict;
        repo.compress |= opts.compress;
        repo.store = ContentStore::new(&repo.meta_dir, repo.compress);

        let name = opts
            .name
            .clone()
            .or_else(|| repo.config.default_branch.clone())
            .or_else(|| {
                probe::probe(root)
                    .vcs
                    .and_then(Vcs::default_branch)
                    .map(String::from)
            });
        let message = opts
            .message
            .clone()
            .unwrap_or_else(|| format!("Offline repository created on {}", format_time(now_ms())));
        let detection = repo.create_branch(0, name, message, opts.progress)?;
        repo.branch = 0;
        repo.save()?;
        info!("offline repository prepared in {} ({} mode)", root.display(), repo.mode_name());

        let report = OfflineReport {
            branch: repo.branch_info(0)?.label(),
            mode: repo.mode_name(),
            files: detection.changes.additions.len(),
            summary: detection.summary,
        };
        Ok((repo, report))
    }

    /// Leave offline mode by deleting the metadata folder.
    ///
    /// `force` 1 ignores dirty branches, 2 also ignores working tree changes.
    pub fn online(self, force: u8, progress: bool) -> HoardResult<OnlineReport> {
        let lock = self.lock()?;
        let dirty: Vec<String> = self.dirty_branches().iter().map(|b| b.label()).collect();
        if !dirty.is_empty() && force < 1 {
            return Err(HoardError::DirtyBranches(dirty));
        }
        if force < 2 {
            let local = self.local_changes(self.strict, progress)?;
            if !local.is_empty() {
                return Err(HoardError::UncommittedChanges(local.len()));
            }
        }
        drop(lock);
        remove_all(&self.meta_dir)?;
        info!("offline repository removed from {}", self.root.display());
        Ok(OnlineReport { discarded: dirty })
    }

    /// Create a new branch and, unless `stay`, continue on it.
    pub fn branch(&mut self, opts: &BranchOptions) -> HoardResult<BranchReport> {
        let _lock = self.lock()?;
        if let Some(name) = &opts.name {
            if self.find_branch(name).is_some() {
                return Err(HoardError::BranchExists(name.clone()));
            }
        }
        let number = self.branches.keys().next_back().map_or(0, |n| n + 1);
        let source = self.branch;
        let latest = self.latest_revision(source)?;

        let mut files = 0;
        let mut summary = None;
        if opts.last || opts.fast {
            let mut message = opts.message.clone().map(|m| m + " ").unwrap_or_default();
            message.push_str(&format!("(branched from {source}/r{latest})"));
            self.duplicate_branch(number, opts.name.clone(), message, !opts.fast)?;
        } else {
            let message = opts
                .message
                .clone()
                .unwrap_or_else(|| format!("Branched from file tree after {source}/r{latest}"));
            let detection = self.create_branch(number, opts.name.clone(), message, opts.progress)?;
            files = detection.changes.additions.len();
            summary = detection.summary;
        }
        if !opts.stay {
            self.branch = number;
        }
        self.save()?;

        Ok(BranchReport {
            number,
            label: self.branch_info(number)?.label(),
            switched: !opts.stay,
            files,
            summary,
        })
    }

    /// Compare the working tree with a revision.
    pub fn changes(&self, reference: Option<&str>, opts: ScanOptions) -> HoardResult<ChangesReport> {
        let (branch, revision) = self.parse_revision(reference)?;
        let known = self.path_set(branch, revision)?;
        let tracking = self.tracking_for(self.branch, branch);
        let detection = self.detect(
            &known,
            &tracking,
            DetectOptions {
                check_content: opts.strict || self.strict,
                progress: opts.progress,
                ..Default::default()
            },
        )?;

        let commit_time = self.commit_info(branch, revision).map(|c| c.ctime);
        let mut notes = BTreeMap::new();
        for (path, live) in &detection.changes.modifications {
            let mut note = Vec::new();
            if known.get(path).is_some_and(|old| live.mtime < old.mtime) {
                note.push("<older than previously committed>");
            }
            if commit_time.is_some_and(|t| live.mtime < t) {
                note.push("<older than last revision>");
            }
            if !note.is_empty() {
                notes.insert(path.clone(), note.join(" "));
            }
        }

        Ok(ChangesReport {
            branch,
            revision,
            label: self.revision_label(branch, revision),
            changes: detection.changes,
            summary: detection.summary,
            notes,
        })
    }

    /// Whether `status` lists changes, as `changes` does, instead of
    /// repository facts.
    ///
    /// `repo_facts` asks for the facts explicitly. When `use_changes_command`
    /// is not configured, fossil checkouts keep `status` for the facts since
    /// fossil lists changes with its own `changes` command.
    pub fn status_lists_changes(&self, repo_facts: bool) -> bool {
        let use_changes = match self.global_config.use_changes_command {
            Some(_) => self.config.use_changes_command,
            None => probe::probe(&self.root).vcs == Some(Vcs::Fossil),
        };
        !(use_changes || repo_facts)
    }

    /// Repository facts, per-branch summary and whether the tree changed.
    pub fn status(&self, opts: ScanOptions) -> HoardResult<StatusReport> {
        let local = self.local_changes(opts.strict || self.strict, opts.progress)?;
        let mut branches = Vec::new();
        for info in self.branches.values() {
            branches.push(BranchStatus {
                number: info.number,
                label: info.label(),
                ctime: info.ctime,
                in_sync: info.in_sync,
                commits: self.own_commits(info.number)?.len(),
                latest: self.latest_revision(info.number)?,
                reference: info.parent.zip(info.revision),
                current: info.number == self.branch,
            });
        }
        let found = probe::probe(&self.root);
        Ok(StatusReport {
            root: self.root.clone(),
            vcs: found.vcs,
            vcs_root: found.vcs_root,
            version: self.version.clone(),
            format: FORMAT_VERSION,
            mode: self.mode_name(),
            strict: self.strict,
            compress: self.compress,
            changed: local.len(),
            branches,
            tracked: self.tracking_patterns(self.branch, false),
            untracked: self.tracking_patterns(self.branch, true),
        })
    }

    /// Line diff of modified text files against a revision.
    pub fn diff(
        &self,
        reference: Option<&str>,
        ignore_whitespace: bool,
        opts: ScanOptions,
    ) -> HoardResult<DiffReport> {
        let (branch, revision) = self.parse_revision(reference)?;
        let known = self.path_set(branch, revision)?;
        let tracking = self.tracking_for(self.branch, branch);
        let changes = self
            .detect(
                &known,
                &tracking,
                DetectOptions {
                    check_content: opts.strict || self.strict,
                    inverse: true,
                    progress: opts.progress,
                    ..Default::default()
                },
            )?
            .changes;

        let mut report = DiffReport {
            label: self.revision_label(branch, revision),
            additions: changes.additions.keys().cloned().collect(),
            deletions: changes.deletions.keys().cloned().collect(),
            binary: Vec::new(),
            files: Vec::new(),
        };
        for (path, info) in &changes.modifications {
            if !is_text_type(path, &self.config) {
                report.binary.push(path.clone());
                continue;
            }
            let Some(stored) = self.read_versioned(branch, revision, info)? else {
                continue;
            };
            let working = fs::read(self.work_path(path))?;
            if is_binary(&stored) || is_binary(&working) {
                debug!("{path}: binary content, not diffed");
                report.binary.push(path.clone());
                continue;
            }
            let into = load_lines(&stored, ignore_whitespace);
            let other = load_lines(&working, ignore_whitespace);
            let blocks = detect_block_moves(diff_blocks(&other.lines, &into.lines));
            report.files.push(FileDiff {
                path: path.clone(),
                eol: into.eol.or(other.eol),
                blocks,
            });
        }
        Ok(report)
    }

    /// Record the working tree changes as the next revision.
    pub fn commit(&mut self, message: Option<&str>, opts: &CommitOptions) -> HoardResult<CommitReport> {
        let _lock = self.lock()?;
        if let Some(text) = message {
            if self.tags.iter().any(|t| t == text) {
                return Err(HoardError::TagAlreadyUsed(text.to_string()));
            }
        }
        let branch = self.branch;
        if self.picky && self.branch_info(branch)?.tracked.is_empty() {
            return Err(HoardError::NoPatternsStaged);
        }

        let latest = self.latest_revision(branch)?;
        let revision = latest + 1;
        let known = self.path_set(branch, latest)?;
        let tracking = self.tracking_for(branch, branch);
        let detection = self.detect(
            &known,
            &tracking,
            DetectOptions {
                check_content: opts.strict || self.strict,
                target: Some((branch, revision)),
                progress: opts.progress,
                ..Default::default()
            },
        )?;
        let changes = detection.changes;
        if changes.is_empty() && !opts.force {
            return Err(HoardError::NothingToCommit);
        }

        let mut record: PathSet = changes.additions.clone();
        record.extend(changes.modifications.clone());
        for (path, old) in &changes.deletions {
            record.insert(path.clone(), PathInfo::tombstone(old.name_hash.clone(), old.mtime));
        }
        self.meta.save_revision(branch, revision, &record)?;

        let mut commits = self.own_commits(branch)?;
        commits.insert(
            revision,
            CommitInfo {
                number: revision,
                ctime: now_ms(),
                message: message.map(String::from),
            },
        );
        self.save_commits(branch, &commits)?;

        let picky = self.picky;
        if let Some(info) = self.branches.get_mut(&branch) {
            info.in_sync = false;
            if picky {
                info.tracked.clear();
            }
        }
        if opts.tag {
            match message {
                Some(text) => self.tags.push(text.to_string()),
                None => warn!("commit has no message, nothing to tag"),
            }
        }
        self.save()?;
        info!("committed {branch}/r{revision} with {} change(s)", changes.len());

        Ok(CommitReport {
            branch,
            revision,
            message: message.map(String::from),
            changes,
            summary: detection.summary,
        })
    }

    /// Replace the working tree with another branch or revision.
    pub fn switch(&mut self, reference: &str, opts: SwitchOptions) -> HoardResult<SwitchReport> {
        let _lock = self.lock()?;
        let (branch, revision) = self.parse_revision(Some(reference))?;
        let mut report = SwitchReport {
            branch,
            revision,
            label: self.revision_label(branch, revision),
            ..Default::default()
        };

        if opts.meta_only {
            let target = self.branch_info(branch)?.clone();
            if let Some(info) = self.branches.get_mut(&self.branch) {
                info.tracked = target.tracked;
                info.untracked = target.untracked;
            }
            self.branch = branch;
            self.save()?;
            info!("switched to {} without touching files", report.label);
            return Ok(report);
        }

        let check = opts.strict || self.strict;
        let mut conflicts = self.local_changes(check, opts.progress)?;
        let known = self.path_set(branch, revision)?;
        let tracking = self.tracking_for(self.branch, branch);
        let todos = self
            .detect(
                &known,
                &tracking,
                DetectOptions {
                    check_content: check,
                    inverse: true,
                    progress: opts.progress,
                    ..Default::default()
                },
            )?
            .changes;

        conflicts.deletions.clear();
        conflicts.moves.clear();
        let strict = self.strict;
        conflicts.additions.retain(|path, live| {
            !todos
                .deletions
                .get(path)
                .is_some_and(|target| same_file(live, target, strict))
        });
        if !conflicts.is_empty() && !opts.force {
            return Err(HoardError::UncommittedChanges(conflicts.len()));
        }

        for (path, info) in &todos.deletions {
            if self.restore_file(path, branch, revision, info)? {
                report.restored.push(path.clone());
            }
        }
        for path in todos.additions.keys() {
            remove_all(&self.work_path(path))?;
            report.removed.push(path.clone());
        }
        for (path, info) in &todos.modifications {
            if self.restore_file(path, branch, revision, info)? {
                report.overwritten.push(path.clone());
            }
        }
        self.branch = branch;
        self.save()?;
        info!("switched to {}", report.label);
        Ok(report)
    }

    /// Merge another branch or revision into the working tree.
    pub fn update(
        &mut self,
        reference: &str,
        opts: UpdateOptions,
        prompt: &mut dyn Prompt,
    ) -> HoardResult<UpdateReport> {
        let _lock = self.lock()?;
        let (branch, revision) = self.parse_revision(Some(reference))?;
        let current = self.branch;
        let known = self.path_set(branch, revision)?;
        let tracking = self.tracking_for(current, branch);
        let changes = self
            .detect(
                &known,
                &tracking,
                DetectOptions {
                    check_content: opts.strict || self.strict,
                    inverse: true,
                    progress: opts.progress,
                    ..Default::default()
                },
            )?
            .changes;

        let lines = opts.lines.unwrap_or(opts.files);
        let merge_opts = MergeOptions {
            lines,
            chars: opts.chars.unwrap_or(lines),
            eol: opts.eol,
            ignore_whitespace: false,
        };
        let mut report = UpdateReport {
            label: self.revision_label(branch, revision),
            ..Default::default()
        };

        for (path, info) in &changes.deletions {
            if opts.files.inserts() {
                if self.restore_file(path, branch, revision, info)? {
                    report.restored.push(path.clone());
                }
            } else {
                report.not_restored.push(path.clone());
            }
        }
        for path in changes.additions.keys() {
            if opts.files.removes() {
                remove_all(&self.work_path(path))?;
                report.removed.push(path.clone());
            } else {
                report.kept.push(path.clone());
            }
        }
        for (path, info) in &changes.modifications {
            let target = self.work_path(path);
            let mine = fs::read(&target)?;
            let binary = !is_text_type(path, &self.config) || is_binary(&mine);
            let resolution = if opts.files == MergeOperation::Ask || binary {
                prompt.resolve(&Conflict::File {
                    path: path.as_str(),
                    binary,
                })?
            } else {
                Resolution::Merge
            };
            match resolution {
                Resolution::Theirs => {
                    if self.restore_file(path, branch, revision, info)? {
                        report.theirs.push(path.clone());
                    }
                }
                Resolution::Merge if !binary => {
                    let Some(incoming) = self.read_versioned(branch, revision, info)? else {
                        report.mine.push(path.clone());
                        continue;
                    };
                    if incoming == mine {
                        debug!("{path}: no difference to the versioned file");
                        continue;
                    }
                    let (merged, _) = merge(&incoming, &mine, &merge_opts, prompt)?;
                    if merged != mine {
                        fs::write(&target, &merged)?;
                    }
                    report.merged.push(path.clone());
                }
                _ => report.mine.push(path.clone()),
            }
        }

        report.patterns_merged = tracking.tracked != self.tracking_patterns(current, false);
        let tracking_mode = self.track || self.picky;
        if let Some(info) = self.branches.get_mut(&current) {
            info.in_sync = false;
            if tracking_mode {
                info.tracked = tracking.tracked;
            }
        }
        self.save()?;
        info!("integrated changes from {}", report.label);
        Ok(report)
    }

    /// Remove a branch entirely.
    pub fn destroy(&mut self, reference: &str, force: bool) -> HoardResult<BranchInfo> {
        let _lock = self.lock()?;
        if self.branches.len() == 1 {
            return Err(HoardError::LastBranch);
        }
        if !force {
            let local = self.local_changes(self.strict, false)?;
            if !local.is_empty() {
                return Err(HoardError::UncommittedChanges(local.len()));
            }
        }
        let token = reference.trim_end_matches('/');
        let number = self
            .find_branch(token)
            .ok_or_else(|| HoardError::UnknownBranch(token.to_string()))?;
        let removed = self.remove_branch(number)?;
        self.save()?;
        Ok(removed)
    }

    /// Add a tracking pattern (`dir/glob`, relative to the root).
    pub fn add_pattern(&mut self, pattern: &str, negative: bool, force: bool) -> HoardResult<()> {
        let _lock = self.lock()?;
        if !(self.track || self.picky) {
            return Err(HoardError::SimpleMode);
        }
        let pattern = normalize_pattern(pattern);
        if self.patterns_mut(negative)?.contains(&pattern) {
            return Err(HoardError::PatternExists(pattern));
        }
        if !force {
            let (dir, glob) = split_pattern(&pattern);
            let folder = self.work_path(dir);
            if !folder.is_dir() {
                return Err(HoardError::NoMatchingFiles(pattern));
            }
            let matched = fs::read_dir(&folder)?
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .any(|e| glob_match(glob, &e.file_name().to_string_lossy()));
            if !matched {
                return Err(HoardError::NoMatchingFiles(pattern));
            }
        }
        self.patterns_mut(negative)?.push(pattern);
        self.save()
    }

    /// Remove a tracking pattern.
    pub fn remove_pattern(&mut self, pattern: &str, negative: bool) -> HoardResult<()> {
        let _lock = self.lock()?;
        if !(self.track || self.picky) {
            return Err(HoardError::SimpleMode);
        }
        let pattern = normalize_pattern(pattern);
        let list = self.patterns_mut(negative)?;
        match list.iter().position(|p| *p == pattern) {
            Some(i) => {
                list.remove(i);
            }
            None => {
                let similar: Vec<&str> = list
                    .iter()
                    .filter(|p| glob_match(p, &pattern))
                    .map(String::as_str)
                    .collect();
                let hint = if similar.is_empty() {
                    pattern
                } else {
                    format!("{pattern} (did you mean {})", similar.join(", "))
                };
                return Err(HoardError::PatternNotFound(hint));
            }
        }
        self.save()
    }

    /// Rename the files matched by a tracked pattern following a new pattern
    /// with the same wildcards, then replace the pattern.
    pub fn move_pattern(&mut self, from: &str, to: &str, opts: MoveOptions) -> HoardResult<MoveReport> {
        let _lock = self.lock()?;
        if !(self.track || self.picky) {
            return Err(HoardError::SimpleMode);
        }
        let from = normalize_pattern(from);
        let to = normalize_pattern(to);
        let (from_dir, from_glob) = split_pattern(&from);
        let (to_dir, to_glob) = split_pattern(&to);
        let source = self.work_path(from_dir);
        let target = self.work_path(to_dir);
        if !source.is_dir() && !opts.force {
            return Err(HoardError::Other(format!("source folder '{from_dir}' does not exist")));
        }

        let mut matching: Vec<String> = Vec::new();
        if source.is_dir() {
            for entry in fs::read_dir(&source)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if glob_match(from_glob, &name) && !self.rules.is_file_ignored(&name) {
                    matching.push(name);
                }
            }
        }
        matching.sort();
        if matching.is_empty() && !opts.force {
            return Err(HoardError::NoMatchingFiles(from));
        }
        let tracked = self.patterns_mut(opts.negative)?.contains(&from);
        if !tracked && !(opts.force || opts.soft) {
            return Err(HoardError::PatternNotFound(from));
        }
        if wildcard_count(from_glob) != wildcard_count(to_glob) {
            return Err(HoardError::Other(format!(
                "wildcards of '{from_glob}' and '{to_glob}' do not correspond"
            )));
        }

        let mut pairs = Vec::with_capacity(matching.len());
        for name in &matching {
            let captures = capture(from_glob, name)
                .ok_or_else(|| HoardError::NoMatchingFiles(name.clone()))?;
            pairs.push((name.clone(), substitute(to_glob, &captures)?));
        }
        let targets: BTreeSet<&str> = pairs.iter().map(|(_, t)| t.as_str()).collect();
        if targets.len() != pairs.len() {
            return Err(HoardError::Other(
                "several files would be renamed to the same name".to_string(),
            ));
        }
        let same_folder = from_dir == to_dir;
        let pairs = if same_folder {
            order_renames(pairs, !opts.soft)?
        } else {
            pairs
        };

        if target.is_dir() {
            let leaving: BTreeSet<&str> = if same_folder {
                pairs.iter().map(|(s, _)| s.as_str()).collect()
            } else {
                BTreeSet::new()
            };
            let clashes = pairs
                .iter()
                .filter(|(_, t)| target.join(t).exists() && !leaving.contains(t.as_str()))
                .count();
            if clashes > 0 && !(opts.force || opts.soft) {
                return Err(HoardError::Other(format!(
                    "{clashes} existing file(s) would be overwritten (use --force)"
                )));
            }
        } else if !opts.soft {
            fs::create_dir_all(&target)?;
        }

        if !opts.soft {
            for (old, new) in &pairs {
                if let Err(e) = fs::rename(source.join(old), target.join(new)) {
                    error!("cannot move '{old}' to '{new}': {e}");
                }
            }
        }

        let list = self.patterns_mut(opts.negative)?;
        match list.iter().position(|p| *p == from) {
            Some(i) => list[i] = to.clone(),
            None => list.push(to.clone()),
        }
        self.save()?;

        Ok(MoveReport {
            renames: pairs
                .into_iter()
                .map(|(old, new)| (join_rel(from_dir, &old), join_rel(to_dir, &new)))
                .collect(),
            performed: !opts.soft,
        })
    }

    /// List a folder (relative to the root) with ignore and tracking marks.
    pub fn ls(&self, folder: &str, opts: LsOptions) -> HoardResult<Vec<ListedDir>> {
        let start = self.work_path(normalize_pattern(folder).trim_end_matches('/'));
        if !start.is_dir() {
            return Err(HoardError::Other(format!("not a folder: {folder}")));
        }
        let tracked = self.tracking_patterns(self.branch, false);
        let rules = &self.rules;
        let walker = WalkDir::new(&start)
            .sort_by_file_name()
            .max_depth(if opts.recursive { usize::MAX } else { 0 })
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !e.file_type().is_dir() || !rules.is_dir_ignored(&e.file_name().to_string_lossy())
            });

        let mut listing = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let rel = rel_path_string(entry.path().strip_prefix(&self.root).unwrap_or(entry.path()));
            let globs: Vec<String> = tracked
                .iter()
                .map(|p| split_pattern(p))
                .filter(|(dir, _)| *dir == rel)
                .map(|(_, glob)| glob.to_string())
                .collect();
            if opts.patterns {
                if !globs.is_empty() {
                    listing.push(ListedDir {
                        rel_path: rel,
                        files: Vec::new(),
                        patterns: globs,
                    });
                }
                continue;
            }

            let mut names: Vec<String> = fs::read_dir(entry.path())?
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            let files: Vec<ListedFile> = names
                .into_iter()
                .map(|name| {
                    let status = match rules.ignored_by(&name) {
                        Some(pattern) => EntryStatus::Ignored(pattern.to_string()),
                        None => {
                            let mut hits: Vec<String> =
                                globs.iter().filter(|g| glob_match(g, &name)).cloned().collect();
                            hits.sort_by_key(String::len);
                            if hits.is_empty() {
                                EntryStatus::Plain
                            } else {
                                EntryStatus::Tracked(hits)
                            }
                        }
                    };
                    ListedFile { name, status }
                })
                .collect();
            if !files.is_empty() {
                listing.push(ListedDir {
                    rel_path: rel,
                    files,
                    patterns: globs,
                });
            }
        }
        Ok(listing)
    }

    /// Commit history of the current branch with per-revision change counts.
    pub fn log(&self) -> HoardResult<LogReport> {
        let branch = self.branch;
        let latest = self.latest_revision(branch)?;
        let commits: BTreeMap<u32, CommitInfo> = self
            .history(branch)?
            .into_iter()
            .map(|c| (c.number, c))
            .collect();

        let mut entries = Vec::new();
        self.for_each_revision(branch, latest, |number, before, delta| {
            let mut added = Vec::new();
            let mut deleted = Vec::new();
            let mut modified = Vec::new();
            for (path, info) in delta {
                match before.get(path) {
                    Some(_) if info.is_tombstone() => deleted.push(path.clone()),
                    None if info.is_tombstone() => {}
                    None => added.push(path.clone()),
                    Some(old) if !same_file(old, info, self.strict) => modified.push(path.clone()),
                    Some(_) => {}
                }
            }
            let commit = commits.get(&number);
            let message = commit.and_then(|c| c.message.clone());
            entries.push(LogEntry {
                number,
                ctime: commit.map_or(0, |c| c.ctime),
                text_added: added.iter().filter(|p| is_text_type(p, &self.config)).count(),
                tagged: message.as_ref().is_some_and(|m| self.tags.contains(m)),
                message,
                added,
                deleted,
                modified,
                current: number == latest,
            });
            Ok(())
        })?;

        Ok(LogReport {
            label: self.branch_info(branch)?.label(),
            entries,
        })
    }

    /// Archive the metadata folder (backups excluded) as a gzipped tarball.
    pub fn dump(&self, archive: &Path, skip_backup: bool) -> HoardResult<DumpReport> {
        let _lock = self.lock()?;
        let archive = if archive.to_string_lossy().ends_with(DUMP_SUFFIX) {
            archive.to_path_buf()
        } else {
            let mut name = archive.as_os_str().to_os_string();
            name.push(DUMP_SUFFIX);
            PathBuf::from(name)
        };
        let mut backed_up = false;
        if archive.exists() && !skip_backup {
            fs::copy(&archive, backup_path(&archive))?;
            backed_up = true;
        }

        let file = File::create(&archive)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(enc);
        let mut entries = 0;
        let walker = WalkDir::new(&self.meta_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().ends_with(BACKUP_SUFFIX));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.file_name() == LOCK_FILE {
                continue;
            }
            let name = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            tar.append_path_with_name(entry.path(), name)?;
            entries += 1;
        }
        tar.into_inner()?.finish()?;
        info!("dumped {entries} file(s) to {}", archive.display());

        Ok(DumpReport {
            archive,
            entries,
            backed_up,
        })
    }

    /// Change the repository-local configuration layer.
    ///
    /// Mode flags belong to the repository record and cannot be set here.
    pub fn configure(&mut self, command: &ConfigCommand) -> HoardResult<()> {
        let _lock = self.lock()?;
        let key = command.key();
        if key.kind() == KeyKind::Flag {
            return Err(HoardError::InvalidConfigValue {
                key: key.name().to_string(),
                value: "mode flags cannot be set per repository".to_string(),
            });
        }
        let inherited = Config::resolve(&self.global_config, &ConfigLayer::default());
        self.local_config.apply(command, &inherited)?;
        self.refresh_config();
        self.save()
    }

    /// Effective configuration with the origin of each value.
    pub fn config_entries(&self) -> Vec<ConfigEntry> {
        describe(&self.global_config, Some(&self.local_config))
    }

    // -- helpers ---------------------------------------------------------------

    fn tracking_for(&self, a: u32, b: u32) -> Tracking {
        Tracking {
            tracked: self.tracking_union(a, b, false),
            untracked: self.tracking_union(a, b, true),
        }
    }

    fn detect<'a>(
        &self,
        known: &PathSet,
        tracking: &'a Tracking,
        mut opts: DetectOptions<'a>,
    ) -> HoardResult<Detection> {
        if self.track || self.picky {
            opts.consider_only = Some(tracking.tracked.as_slice());
            opts.dont_consider = Some(tracking.untracked.as_slice());
        }
        find_changes(&self.root, known, &self.rules, &self.store, &opts)
    }

    /// Working tree changes against the current branch's latest revision.
    fn local_changes(&self, check_content: bool, progress: bool) -> HoardResult<ChangeSet> {
        let branch = self.branch;
        let latest = self.latest_revision(branch)?;
        let known = self.path_set(branch, latest)?;
        let tracking = self.tracking_for(branch, branch);
        let detection = self.detect(
            &known,
            &tracking,
            DetectOptions {
                check_content,
                progress,
                ..Default::default()
            },
        )?;
        Ok(detection.changes)
    }

    fn commit_info(&self, branch: u32, revision: u32) -> Option<CommitInfo> {
        let owner = self.resolve_parent_branch(branch, revision);
        self.own_commits(owner).ok()?.remove(&revision)
    }

    fn revision_label(&self, branch: u32, revision: u32) -> String {
        match self.branches.get(&branch) {
            Some(info) => format!("{}/r{revision}", info.label()),
            None => format!("{branch}/r{revision}"),
        }
    }

    fn patterns_mut(&mut self, negative: bool) -> HoardResult<&mut Vec<String>> {
        let branch = self.branch;
        let info = self
            .branches
            .get_mut(&branch)
            .ok_or_else(|| HoardError::UnknownBranch(branch.to_string()))?;
        Ok(if negative {
            &mut info.untracked
        } else {
            &mut info.tracked
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::KeepMine;
    use std::io::Read;

    fn offline_with(dir: &Path, files: &[(&str, &str)], opts: OfflineOptions) -> Repository {
        for (path, content) in files {
            let target = dir.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        let (repo, _) = Repository::offline(dir, &ConfigLayer::default(), &opts).unwrap();
        repo
    }

    fn simple(dir: &Path, files: &[(&str, &str)]) -> Repository {
        offline_with(dir, files, OfflineOptions::default())
    }

    fn names(set: &PathSet) -> Vec<&str> {
        set.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_offline_snapshots_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("old.bak"), "x").unwrap();
        let (repo, report) =
            Repository::offline(dir.path(), &ConfigLayer::default(), &OfflineOptions::default()).unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.mode, "simple");
        assert_eq!(names(&repo.path_set(0, 0).unwrap()), vec!["a.txt"]);
        assert!(repo.branch_info(0).unwrap().in_sync);
    }

    #[test]
    fn test_offline_twice_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        simple(dir.path(), &[("a.txt", "hello")]);
        let again = Repository::offline(dir.path(), &ConfigLayer::default(), &OfflineOptions::default());
        assert!(matches!(again, Err(HoardError::AlreadyOffline)));

        let forced = OfflineOptions {
            force: true,
            name: Some("main".into()),
            ..Default::default()
        };
        let (_repo, report) = Repository::offline(dir.path(), &ConfigLayer::default(), &forced).unwrap();
        assert_eq!(report.branch, "main");
    }

    #[test]
    fn test_modification_detected_and_committed() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "hello")]);
        fs::write(dir.path().join("a.txt"), "hello!").unwrap();

        let report = repo.changes(None, ScanOptions::default()).unwrap();
        assert_eq!(names(&report.changes.modifications), vec!["a.txt"]);
        let live = &report.changes.modifications["a.txt"];
        assert_eq!(live.size, Some(6));
        assert!(live.hash.is_some());

        let commit = repo.commit(Some("grow"), &CommitOptions::default()).unwrap();
        assert_eq!(commit.revision, 1);
        assert_eq!(commit.counts(), (0, 0, 1, 0));
        assert!(!repo.branch_info(0).unwrap().in_sync);
        let paths = repo.path_set(0, 1).unwrap();
        assert_eq!(repo.read_versioned(0, 1, &paths["a.txt"]).unwrap().unwrap(), b"hello!");
    }

    #[test]
    fn test_deletion_commits_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "hello"), ("b.txt", "keep")]);
        fs::remove_file(dir.path().join("a.txt")).unwrap();

        let report = repo.changes(None, ScanOptions::default()).unwrap();
        assert_eq!(names(&report.changes.deletions), vec!["a.txt"]);

        repo.commit(None, &CommitOptions::default()).unwrap();
        let record = repo.meta.load_revision(0, 1).unwrap();
        assert!(record["a.txt"].is_tombstone());
        assert_eq!(names(&repo.path_set(0, 1).unwrap()), vec!["b.txt"]);
    }

    #[test]
    fn test_rename_detected_as_move() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "same content")]);
        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();

        let report = repo.changes(None, ScanOptions::default()).unwrap();
        let changes = &report.changes;
        assert_eq!(names(&changes.additions), vec!["b.txt"]);
        assert_eq!(names(&changes.deletions), vec!["a.txt"]);
        let (old, info) = &changes.moves["b.txt"];
        assert_eq!(old, "a.txt");
        assert_eq!(info.size, Some(12));
        assert_eq!(report.lines(), vec!["MOV b.txt  <-  a.txt".to_string()]);

        let commit = repo.commit(Some("rename"), &CommitOptions::default()).unwrap();
        assert_eq!(commit.counts(), (0, 0, 0, 1));
    }

    #[test]
    fn test_nothing_to_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "hello")]);
        let result = repo.commit(Some("empty"), &CommitOptions::default());
        assert!(matches!(result, Err(HoardError::NothingToCommit)));

        let forced = CommitOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(repo.commit(Some("empty"), &forced).unwrap().revision, 1);
    }

    #[test]
    fn test_tag_cannot_be_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "hello")]);
        fs::write(dir.path().join("b.txt"), "new").unwrap();
        let tagged = CommitOptions {
            tag: true,
            ..Default::default()
        };
        repo.commit(Some("v1"), &tagged).unwrap();
        assert_eq!(repo.tags(), ["v1".to_string()]);

        fs::write(dir.path().join("c.txt"), "more").unwrap();
        let again = repo.commit(Some("v1"), &CommitOptions::default());
        assert!(matches!(again, Err(HoardError::TagAlreadyUsed(_))));
        assert_eq!(repo.parse_revision(Some("/v1")).unwrap(), (0, 1));
    }

    #[test]
    fn test_fast_branch_combines_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        fs::write(dir.path().join("a.txt"), "v1.").unwrap();
        repo.commit(Some("r1"), &CommitOptions::default()).unwrap();
        fs::write(dir.path().join("a.txt"), "v2..").unwrap();
        repo.commit(Some("r2"), &CommitOptions::default()).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        repo.commit(Some("r3"), &CommitOptions::default()).unwrap();

        let report = repo
            .branch(&BranchOptions {
                name: Some("quick".into()),
                fast: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.number, 1);
        assert_eq!(repo.current_branch(), 1);
        let info = repo.branch_info(1).unwrap();
        assert_eq!((info.parent, info.revision), (Some(0), Some(3)));

        fs::write(dir.path().join("c.txt"), "c").unwrap();
        let commit = repo.commit(Some("r4"), &CommitOptions::default()).unwrap();
        assert_eq!((commit.branch, commit.revision), (1, 4));

        let paths = repo.path_set(1, 4).unwrap();
        assert_eq!(names(&paths), vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(repo.read_versioned(1, 4, &paths["a.txt"]).unwrap().unwrap(), b"v2..");
        assert_eq!(repo.history(1).unwrap().len(), 5);

        let switched = repo.switch("0/", SwitchOptions::default()).unwrap();
        assert_eq!(switched.removed, vec!["c.txt".to_string()]);
        assert!(!dir.path().join("c.txt").exists());
        assert_eq!(repo.current_branch(), 0);
    }

    #[test]
    fn test_full_branch_from_last_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        fs::write(dir.path().join("local.txt"), "uncommitted").unwrap();

        repo.branch(&BranchOptions {
            last: true,
            stay: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(repo.current_branch(), 0);
        let info = repo.branch_info(1).unwrap();
        assert_eq!(info.parent, None);
        assert_eq!(names(&repo.path_set(1, 0).unwrap()), vec!["a.txt"]);
    }

    #[test]
    fn test_branch_name_must_be_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        let opts = BranchOptions {
            name: Some("feature".into()),
            ..Default::default()
        };
        repo.branch(&opts).unwrap();
        assert!(matches!(repo.branch(&opts), Err(HoardError::BranchExists(_))));
    }

    #[test]
    fn test_switch_refuses_local_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        repo.branch(&BranchOptions::default()).unwrap();
        fs::write(dir.path().join("a.txt"), "changed").unwrap();

        let result = repo.switch("0/", SwitchOptions::default());
        assert!(matches!(result, Err(HoardError::UncommittedChanges(1))));

        let forced = SwitchOptions {
            force: true,
            ..Default::default()
        };
        let report = repo.switch("0/", forced).unwrap();
        assert_eq!(report.overwritten, vec!["a.txt".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v0");
    }

    #[test]
    fn test_switch_restores_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0"), ("sub/b.txt", "b")]);
        fs::remove_file(dir.path().join("sub").join("b.txt")).unwrap();

        let report = repo.switch("/", SwitchOptions::default()).unwrap();
        assert_eq!(report.restored, vec!["sub/b.txt".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("sub").join("b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_switch_meta_only_changes_branch_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a.txt", "v0"), ("b.rs", "fn")], opts);
        repo.branch(&BranchOptions::default()).unwrap();
        repo.add_pattern("*.rs", false, false).unwrap();
        repo.branch = 0;
        fs::write(dir.path().join("a.txt"), "local edit").unwrap();

        let report = repo
            .switch(
                "1/",
                SwitchOptions {
                    meta_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(repo.current_branch(), 1);
        assert_eq!(repo.branch_info(0).unwrap().tracked, vec!["*.rs".to_string()]);
        assert!(report.restored.is_empty() && report.removed.is_empty() && report.overwritten.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "local edit");
        assert_eq!(fs::read_to_string(dir.path().join("b.rs")).unwrap(), "fn");

        let reopened = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        assert_eq!(reopened.current_branch(), 1);
    }

    #[test]
    fn test_update_merges_text_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "one\ntwo\nthree\n")]);
        repo.branch(&BranchOptions {
            name: Some("feature".into()),
            ..Default::default()
        })
        .unwrap();
        fs::write(dir.path().join("a.txt"), "one\nTWO!\nthree\n").unwrap();
        repo.commit(Some("shout"), &CommitOptions::default()).unwrap();
        repo.switch("0/", SwitchOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\ntwo\nthree\n");

        let report = repo.update("feature/", UpdateOptions::default(), &mut KeepMine).unwrap();
        assert_eq!(report.merged, vec!["a.txt".to_string()]);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\nTWO!\nthree\n"
        );
        assert!(!repo.branch_info(0).unwrap().in_sync);
    }

    #[test]
    fn test_update_insert_only_keeps_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "base")]);
        repo.branch(&BranchOptions {
            name: Some("feature".into()),
            ..Default::default()
        })
        .unwrap();
        fs::write(dir.path().join("new.txt"), "from feature").unwrap();
        repo.commit(Some("add new"), &CommitOptions::default()).unwrap();
        repo.switch("0/", SwitchOptions::default()).unwrap();
        assert!(!dir.path().join("new.txt").exists());
        fs::write(dir.path().join("local.txt"), "mine").unwrap();

        let opts = UpdateOptions {
            files: MergeOperation::Insert,
            ..Default::default()
        };
        let report = repo.update("feature/", opts, &mut KeepMine).unwrap();
        assert_eq!(report.restored, vec!["new.txt".to_string()]);
        assert_eq!(report.kept, vec!["local.txt".to_string()]);
        assert!(dir.path().join("local.txt").exists());
        assert_eq!(fs::read_to_string(dir.path().join("new.txt")).unwrap(), "from feature");
    }

    #[test]
    fn test_update_binary_asks_prompt() {
        struct Theirs;
        impl Prompt for Theirs {
            fn resolve(&mut self, conflict: &Conflict<'_>) -> HoardResult<Resolution> {
                assert!(matches!(conflict, Conflict::File { binary: true, .. }));
                Ok(Resolution::Theirs)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("img.bin", "\u{0}base")]);
        repo.branch(&BranchOptions::default()).unwrap();
        fs::write(dir.path().join("img.bin"), "\u{0}changed").unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();
        repo.switch("0/", SwitchOptions::default()).unwrap();

        let report = repo.update("1/", UpdateOptions::default(), &mut Theirs).unwrap();
        assert_eq!(report.theirs, vec!["img.bin".to_string()]);
        assert_eq!(fs::read(dir.path().join("img.bin")).unwrap(), b"\0changed");
    }

    #[test]
    fn test_update_nul_bytes_in_text_file_count_as_binary() {
        struct Theirs;
        impl Prompt for Theirs {
            fn resolve(&mut self, conflict: &Conflict<'_>) -> HoardResult<Resolution> {
                assert!(matches!(conflict, Conflict::File { binary: true, .. }));
                Ok(Resolution::Theirs)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("notes.txt", "base\n")]);
        repo.branch(&BranchOptions::default()).unwrap();
        fs::write(dir.path().join("notes.txt"), "incoming\n").unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();
        repo.switch("0/", SwitchOptions::default()).unwrap();
        fs::write(dir.path().join("notes.txt"), "mine\u{0}\n").unwrap();

        let report = repo.update("1/", UpdateOptions::default(), &mut Theirs).unwrap();
        assert_eq!(report.theirs, vec!["notes.txt".to_string()]);
        assert!(report.merged.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "incoming\n");
    }

    #[test]
    fn test_diff_lists_text_file_with_nul_as_binary() {
        let dir = tempfile::tempdir().unwrap();
        let repo = simple(dir.path(), &[("notes.txt", "a\u{0}b"), ("plain.txt", "x\n")]);
        fs::write(dir.path().join("notes.txt"), "a\u{0}bc").unwrap();
        fs::write(dir.path().join("plain.txt"), "yy\n").unwrap();

        let report = repo.diff(None, false, ScanOptions::default()).unwrap();
        assert_eq!(report.binary, vec!["notes.txt".to_string()]);
        let lines = report.lines();
        assert!(lines.contains(&"MOD notes.txt".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("DIF notes.txt")));
        assert!(lines.contains(&"+ | 0 |yy|".to_string()));
    }

    #[test]
    fn test_diff_renders_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let repo = simple(dir.path(), &[("a.txt", "one\ntwo\n"), ("data.bin", "xy")]);
        fs::write(dir.path().join("a.txt"), "one\nTWO!\n").unwrap();
        fs::write(dir.path().join("data.bin"), "xyz").unwrap();
        fs::write(dir.path().join("extra.txt"), "e").unwrap();

        let lines = repo.diff(None, false, ScanOptions::default()).unwrap().lines();
        assert_eq!(lines[0], "ADD extra.txt");
        assert_eq!(lines[1], "MOD data.bin");
        assert_eq!(lines[2], "DIF a.txt  <LF>");
        assert!(lines.contains(&"- | 1 |two|".to_string()));
        assert!(lines.contains(&"+ | 1 |TWO!|".to_string()));
    }

    #[test]
    fn test_destroy_branch() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        assert!(matches!(repo.destroy("0", false), Err(HoardError::LastBranch)));

        repo.branch(&BranchOptions {
            name: Some("temp".into()),
            stay: true,
            ..Default::default()
        })
        .unwrap();
        let removed = repo.destroy("temp", false).unwrap();
        assert_eq!(removed.number, 1);
        assert_eq!(repo.branches().len(), 1);
        assert!(repo.meta_dir().join("b1_last").is_dir());
        assert!(matches!(repo.destroy("temp", false), Err(HoardError::LastBranch)));
    }

    #[test]
    fn test_track_mode_commits_only_tracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a.txt", "text"), ("b.rs", "code")], opts);
        assert!(repo.path_set(0, 0).unwrap().is_empty());

        assert!(matches!(
            repo.add_pattern("*.md", false, false),
            Err(HoardError::NoMatchingFiles(_))
        ));
        repo.add_pattern("*.txt", false, false).unwrap();
        assert!(matches!(
            repo.add_pattern("*.txt", false, false),
            Err(HoardError::PatternExists(_))
        ));

        repo.commit(Some("texts"), &CommitOptions::default()).unwrap();
        assert_eq!(names(&repo.path_set(0, 1).unwrap()), vec!["a.txt"]);
        assert_eq!(repo.branch_info(0).unwrap().tracked, vec!["*.txt".to_string()]);

        repo.remove_pattern("*.txt", false).unwrap();
        assert!(matches!(
            repo.remove_pattern("*.txt", false),
            Err(HoardError::PatternNotFound(_))
        ));
    }

    #[test]
    fn test_picky_mode_requires_and_clears_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            picky: true,
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a.txt", "text")], opts);
        assert!(repo.is_picky() && !repo.is_track());
        assert!(matches!(
            repo.commit(None, &CommitOptions::default()),
            Err(HoardError::NoPatternsStaged)
        ));

        repo.add_pattern("a.txt", false, false).unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();
        assert!(repo.branch_info(0).unwrap().tracked.is_empty());
        assert_eq!(names(&repo.path_set(0, 1).unwrap()), vec!["a.txt"]);
    }

    #[test]
    fn test_simple_mode_rejects_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        assert!(matches!(
            repo.add_pattern("*.txt", false, false),
            Err(HoardError::SimpleMode)
        ));
    }

    #[test]
    fn test_move_pattern_renames_files() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a1.txt", "1"), ("a2.txt", "2"), ("z.txt", "z")], opts);
        repo.add_pattern("a*.txt", false, false).unwrap();

        let report = repo.move_pattern("a*.txt", "docs/b*.txt", MoveOptions::default()).unwrap();
        assert_eq!(
            report.renames,
            vec![
                ("a1.txt".to_string(), "docs/b1.txt".to_string()),
                ("a2.txt".to_string(), "docs/b2.txt".to_string()),
            ]
        );
        assert!(dir.path().join("docs").join("b2.txt").exists());
        assert!(!dir.path().join("a1.txt").exists());
        assert!(dir.path().join("z.txt").exists());
        assert_eq!(repo.branch_info(0).unwrap().tracked, vec!["docs/b*.txt".to_string()]);
    }

    #[test]
    fn test_move_pattern_wildcards_must_correspond() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a1.txt", "1")], opts);
        repo.add_pattern("a*.txt", false, false).unwrap();
        let result = repo.move_pattern("a*.txt", "fixed.txt", MoveOptions::default());
        assert!(matches!(result, Err(HoardError::Other(_))));
    }

    #[test]
    fn test_order_renames_avoids_overwrite() {
        let pairs = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
        ];
        let ordered = order_renames(pairs, true).unwrap();
        assert_eq!(ordered[0], ("b".to_string(), "c".to_string()));

        let cycle = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ];
        assert!(order_renames(cycle.clone(), true).is_err());
        assert_eq!(order_renames(cycle, false).unwrap().len(), 2);
    }

    #[test]
    fn test_ls_marks_entries() {
        let dir = tempfile::tempdir().unwrap();
        let repo = simple(dir.path(), &[("a.txt", "a"), ("x.bak", "x"), ("sub/c.txt", "c")]);

        let flat = repo.ls("", LsOptions::default()).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].rel_path, "");
        assert_eq!(
            flat[0].files,
            vec![
                ListedFile {
                    name: "a.txt".into(),
                    status: EntryStatus::Plain
                },
                ListedFile {
                    name: "x.bak".into(),
                    status: EntryStatus::Ignored("*.bak".into())
                },
            ]
        );

        let deep = repo
            .ls(
                "",
                LsOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let dirs: Vec<&str> = deep.iter().map(|d| d.rel_path.as_str()).collect();
        assert_eq!(dirs, vec!["", "sub"]);
    }

    #[test]
    fn test_ls_shows_tracking_matches() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OfflineOptions {
            track: true,
            ..Default::default()
        };
        let mut repo = offline_with(dir.path(), &[("a.txt", "a")], opts);
        repo.add_pattern("*.txt", false, false).unwrap();
        repo.add_pattern("a.*", false, false).unwrap();

        let listing = repo.ls("", LsOptions::default()).unwrap();
        assert_eq!(
            listing[0].files[0].status,
            EntryStatus::Tracked(vec!["a.*".to_string(), "*.txt".to_string()])
        );
    }

    #[test]
    fn test_log_counts_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        fs::write(dir.path().join("a.txt"), "v1 longer").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let tagged = CommitOptions {
            tag: true,
            ..Default::default()
        };
        repo.commit(Some("second"), &tagged).unwrap();

        let log = repo.log().unwrap();
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[0].added, vec!["a.txt".to_string()]);
        assert!(!log.entries[0].current);
        let last = &log.entries[1];
        assert_eq!(last.added, vec!["b.txt".to_string()]);
        assert_eq!(last.modified, vec!["a.txt".to_string()]);
        assert_eq!(last.text_added, 1);
        assert!(last.tagged && last.current);
        assert_eq!(last.message.as_deref(), Some("second"));
    }

    #[test]
    fn test_dump_archives_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        fs::write(dir.path().join("a.txt"), "v1 longer").unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();

        let report = repo.dump(&out.path().join("backup"), false).unwrap();
        assert_eq!(report.archive, out.path().join("backup.hoard.tar.gz"));
        assert!(!report.backed_up);

        let file = File::open(&report.archive).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            names.push(name);
        }
        assert_eq!(names.len(), report.entries);
        assert!(names.contains(&".hoard/.meta".to_string()));
        assert!(names.contains(&".hoard/b0/r1/.meta".to_string()));
        assert!(names.iter().all(|n| !n.ends_with(BACKUP_SUFFIX) && !n.ends_with(LOCK_FILE)));

        let again = repo.dump(&report.archive, false).unwrap();
        assert!(again.backed_up);
        assert!(backup_path(&report.archive).exists());
    }

    #[test]
    fn test_online_checks_dirty_and_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();
        fs::write(dir.path().join("c.txt"), "c").unwrap();

        let result = repo.online(0, false);
        assert!(matches!(result, Err(HoardError::DirtyBranches(_))));
        let repo = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        let result = repo.online(1, false);
        assert!(matches!(result, Err(HoardError::UncommittedChanges(1))));

        let repo = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        let report = repo.online(2, false).unwrap();
        assert_eq!(report.discarded.len(), 1);
        assert!(!dir.path().join(META_DIR).exists());
    }

    #[test]
    fn test_local_config_rejects_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        let flag = ConfigCommand::Set(crate::config::ConfigKey::Strict, "on".into());
        assert!(matches!(
            repo.configure(&flag),
            Err(HoardError::InvalidConfigValue { .. })
        ));

        let add = ConfigCommand::Add(crate::config::ConfigKey::Ignores, "*.log".into());
        repo.configure(&add).unwrap();
        fs::write(dir.path().join("run.log"), "noise").unwrap();
        let report = repo.changes(None, ScanOptions::default()).unwrap();
        assert!(report.changes.is_empty());

        let reopened = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        assert!(reopened.config().ignores.contains(&"*.log".to_string()));
    }

    #[test]
    fn test_status_lists_changes_unless_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        assert!(repo.status_lists_changes(false));
        assert!(!repo.status_lists_changes(true));

        repo.global_config.use_changes_command = Some(true);
        repo.refresh_config();
        assert!(!repo.status_lists_changes(false));

        let fossil = tempfile::tempdir().unwrap();
        fs::write(fossil.path().join(".fslckout"), "").unwrap();
        let mut repo = simple(fossil.path(), &[("a.txt", "v0")]);
        assert!(!repo.status_lists_changes(false));
        repo.global_config.use_changes_command = Some(false);
        repo.refresh_config();
        assert!(repo.status_lists_changes(false));
    }

    #[test]
    fn test_status_summarizes_branches() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = simple(dir.path(), &[("a.txt", "v0")]);
        repo.branch(&BranchOptions {
            fast: true,
            stay: true,
            ..Default::default()
        })
        .unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();

        let status = repo.status(ScanOptions::default()).unwrap();
        assert_eq!(status.changed, 1);
        assert_eq!(status.branches.len(), 2);
        assert!(status.branches[0].current);
        assert_eq!(status.branches[1].reference, Some((0, 0)));
        assert_eq!(status.branches[1].commits, 0);
    }
}
