//! Working tree change detection.
//!
//! Walks the working tree and compares every candidate file against the
//! accumulated path set of a revision. When a storage target is given the
//! same pass writes new and modified content into the content store.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::HoardResult;
use crate::fsutil::{mtime_ms, rel_path_string};
use crate::hash::{hash_file, hash_str};
use crate::metadata::{PathInfo, PathSet};
use crate::pattern::{any_tracking_match, IgnoreRules};
use crate::store::ContentStore;

/// Differences between a recorded path set and the working tree.
///
/// `moves` is an overlay: each moved file also appears in `additions`
/// (new path) and `deletions` (old path).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub additions: PathSet,
    pub deletions: PathSet,
    pub modifications: PathSet,
    /// new path -> (old path, old PathInfo)
    pub moves: BTreeMap<String, (String, PathInfo)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    /// Number of touched paths, not counting the move overlay.
    pub fn len(&self) -> usize {
        self.additions.len() + self.deletions.len() + self.modifications.len()
    }
}

/// Knobs for one detection pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectOptions<'a> {
    /// Only consider files selected by one of these tracking patterns.
    pub consider_only: Option<&'a [String]>,
    /// Skip files selected by one of these tracking patterns.
    pub dont_consider: Option<&'a [String]>,
    /// Compare content hashes instead of modification times.
    pub check_content: bool,
    /// Report the recorded state of modified files instead of the live one.
    pub inverse: bool,
    /// Write new and modified content as blobs of `(branch, revision)`.
    pub target: Option<(u32, u32)>,
    /// Emit per-file progress lines.
    pub progress: bool,
}

/// Outcome of a detection pass.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub changes: ChangeSet,
    /// Compression and transfer statistics when content was stored.
    pub summary: Option<String>,
}

#[derive(Default)]
struct Transfer {
    original: u64,
    written: u64,
}

impl DetectOptions<'_> {
    fn selects(&self, rel_path: &str) -> bool {
        if let Some(only) = self.consider_only {
            if !any_tracking_match(only, rel_path) {
                return false;
            }
        }
        if let Some(skip) = self.dont_consider {
            if any_tracking_match(skip, rel_path) {
                return false;
            }
        }
        true
    }
}

/// Compare the working tree under `root` against `known`.
pub fn find_changes(
    root: &Path,
    known: &PathSet,
    rules: &IgnoreRules,
    store: &ContentStore,
    opts: &DetectOptions<'_>,
) -> HoardResult<Detection> {
    let started = Instant::now();
    let mut changes = ChangeSet::default();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut transfer = Transfer::default();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !rules.is_dir_ignored(&e.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                error!("cannot read directory entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(p) => rel_path_string(p),
            Err(_) => continue,
        };
        if rules.is_file_ignored(&rel) || !opts.selects(&rel) {
            continue;
        }
        seen.insert(rel.clone());

        let (size, mtime) = match entry.metadata() {
            Ok(meta) => match mtime_ms(&meta) {
                Ok(mtime) => (meta.len(), mtime),
                Err(e) => {
                    error!("cannot read modification time of {rel}: {e}");
                    continue;
                }
            },
            Err(e) => {
                error!("cannot stat {rel}: {e}");
                continue;
            }
        };
        if opts.progress {
            debug!("checking {rel}");
        }

        let last = known.get(&rel);
        match last {
            None => {
                let name_hash = hash_str(&rel);
                if let Some(info) =
                    capture(entry.path(), &rel, name_hash, size, mtime, store, opts, &mut transfer)?
                {
                    changes.additions.insert(rel, info);
                }
            }
            Some(last) if last.is_tombstone() => {
                if let Some(info) = capture(
                    entry.path(),
                    &rel,
                    last.name_hash.clone(),
                    size,
                    mtime,
                    store,
                    opts,
                    &mut transfer,
                )? {
                    changes.additions.insert(rel, info);
                }
            }
            Some(last) => {
                let modified = if Some(size) != last.size {
                    true
                } else if !opts.check_content {
                    mtime != last.mtime
                } else if size == 0 {
                    false
                } else {
                    match hash_file(entry.path()) {
                        Ok((digest, _)) => Some(digest) != last.hash,
                        Err(e) => {
                            error!("cannot hash {rel}: {e}");
                            false
                        }
                    }
                };
                if !modified {
                    continue;
                }
                if opts.inverse {
                    changes.modifications.insert(rel, last.clone());
                    continue;
                }
                if let Some(info) = capture(
                    entry.path(),
                    &rel,
                    last.name_hash.clone(),
                    size,
                    mtime,
                    store,
                    opts,
                    &mut transfer,
                )? {
                    changes.modifications.insert(rel, info);
                }
            }
        }
    }

    for (path, info) in known {
        if info.is_tombstone() || seen.contains(path) {
            continue;
        }
        if rules.is_file_ignored(path) || !opts.selects(path) {
            continue;
        }
        changes.deletions.insert(path.clone(), info.clone());
    }

    changes.moves = detect_moves(&changes, opts.check_content);
    debug!("finished detecting changes: {} path(s)", changes.len());

    Ok(Detection {
        changes,
        summary: summarize(&transfer, store.compress(), opts.target.is_some(), started),
    })
}

/// Hash (and, with a target, store) one file, yielding its new PathInfo.
///
/// Read failures are logged and yield `None`; storage failures propagate.
#[allow(clippy::too_many_arguments)]
fn capture(
    path: &Path,
    rel: &str,
    name_hash: String,
    size: u64,
    mtime: i64,
    store: &ContentStore,
    opts: &DetectOptions<'_>,
    transfer: &mut Transfer,
) -> HoardResult<Option<PathInfo>> {
    if size == 0 {
        return Ok(Some(PathInfo {
            name_hash,
            size: Some(0),
            mtime,
            hash: None,
        }));
    }
    let hash = match opts.target {
        Some((branch, revision)) => {
            let mut source = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    error!("cannot read {rel}: {e}");
                    return Ok(None);
                }
            };
            let target = store.blob_path(branch, revision, &name_hash);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let blob = store.store_reader(&mut source, &target)?;
            transfer.original += blob.size;
            transfer.written += blob.written;
            blob.hash
        }
        None => match hash_file(path) {
            Ok((digest, _)) => digest,
            Err(e) => {
                error!("cannot hash {rel}: {e}");
                return Ok(None);
            }
        },
    };
    Ok(Some(PathInfo {
        name_hash,
        size: Some(size),
        mtime,
        hash: Some(hash),
    }))
}

/// Pair additions with deletions of identical files.
///
/// A pair matches on size plus content hash (`strict`) or modification
/// time. Each addition maps to the first matching deletion in path order.
pub fn detect_moves(changes: &ChangeSet, strict: bool) -> BTreeMap<String, (String, PathInfo)> {
    let mut moves = BTreeMap::new();
    for (path, info) in &changes.additions {
        let found = changes.deletions.iter().find(|(_, old)| {
            old.size == info.size
                && if strict {
                    old.hash == info.hash
                } else {
                    old.mtime == info.mtime
                }
        });
        if let Some((old_path, old_info)) = found {
            moves.insert(path.clone(), (old_path.clone(), old_info.clone()));
        }
    }
    moves
}

fn summarize(transfer: &Transfer, compress: bool, stored: bool, started: Instant) -> Option<String> {
    if !stored || transfer.original == 0 {
        return None;
    }
    let mut parts = Vec::new();
    if compress && transfer.written > 0 {
        let advantage = transfer.original as f64 * 100.0 / transfer.written as f64 - 100.0;
        parts.push(format!("Compression advantage is {advantage:.1}%."));
    }
    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        let kib = transfer.original as f64 / 1024.0 / secs;
        if kib < 1024.0 {
            parts.push(format!("Transfer speed was {kib:.2} kiB/s."));
        } else {
            parts.push(format!("Transfer speed was {:.2} MiB/s.", kib / 1024.0));
        }
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}
