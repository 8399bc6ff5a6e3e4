//! Serializes hoard commands that write to `.hoard/`.
//!
//! Each mutating `Repository` operation holds an `fs2` advisory lock on
//! `.hoard/hoard.lock` for its whole run, including any interactive merge
//! prompt. Read-only commands never take it. A crashed process drops its
//! lock with its file handle.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{HoardError, HoardResult};

/// Name of the lock file inside the metadata folder.
pub const LOCK_FILE: &str = "hoard.lock";

/// An exclusive repository lock, released on drop.
pub struct RepoLock {
    _file: File,
}

impl RepoLock {
    /// Acquire the lock on the metadata folder `meta_dir`.
    ///
    /// Polls until the lock is free or `timeout` expires.
    pub fn acquire(meta_dir: &Path, timeout: Duration) -> HoardResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(meta_dir.join(LOCK_FILE))?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);
        let mut announced = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(RepoLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => return Err(HoardError::LockTimeout),
                Err(_) => {
                    if !announced {
                        debug!("waiting for repository lock in {}", meta_dir.display());
                        announced = true;
                    }
                    std::thread::sleep(poll_interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use crate::merge::{Conflict, MergeOperation, Prompt, Resolution};
    use crate::ops::{BranchOptions, CommitOptions, OfflineOptions, ScanOptions, SwitchOptions, UpdateOptions};
    use crate::repo::{Repository, META_DIR};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Barrier};

    fn offline(dir: &Path) -> Repository {
        fs::write(dir.join("a.txt"), "one\n").unwrap();
        let (repo, _) = Repository::offline(dir, &ConfigLayer::default(), &OfflineOptions::default()).unwrap();
        repo
    }

    #[test]
    fn test_commit_waits_for_other_handle() {
        let dir = tempfile::tempdir().unwrap();
        offline(dir.path());
        let barrier = Arc::new(Barrier::new(2));

        let root = dir.path().to_path_buf();
        let b = barrier.clone();
        let holder = std::thread::spawn(move || {
            let repo = Repository::open(&root, &ConfigLayer::default()).unwrap();
            let _held = repo.lock().unwrap();
            b.wait();
            std::thread::sleep(Duration::from_millis(150));
        });

        barrier.wait();
        fs::write(dir.path().join("a.txt"), "two, longer\n").unwrap();
        let mut repo = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        let start = Instant::now();
        let report = repo.commit(Some("after wait"), &CommitOptions::default()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(report.revision, 1);
        holder.join().unwrap();
    }

    #[test]
    fn test_read_only_commands_skip_lock() {
        let dir = tempfile::tempdir().unwrap();
        let repo = offline(dir.path());
        let _held = repo.lock().unwrap();

        let other = Repository::open(dir.path(), &ConfigLayer::default()).unwrap();
        assert!(other.changes(None, ScanOptions::default()).unwrap().changes.is_empty());
        assert!(other.status(ScanOptions::default()).is_ok());
        assert!(other.log().is_ok());
    }

    #[test]
    fn test_lock_held_while_update_prompts() {
        struct Peek {
            meta_dir: PathBuf,
            seen: Option<bool>,
        }
        impl Prompt for Peek {
            fn resolve(&mut self, _conflict: &Conflict<'_>) -> HoardResult<Resolution> {
                let blocked = matches!(
                    RepoLock::acquire(&self.meta_dir, Duration::from_millis(50)),
                    Err(HoardError::LockTimeout)
                );
                self.seen = Some(blocked);
                Ok(Resolution::Mine)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut repo = offline(dir.path());
        repo.branch(&BranchOptions::default()).unwrap();
        fs::write(dir.path().join("a.txt"), "one\nand two\n").unwrap();
        repo.commit(None, &CommitOptions::default()).unwrap();
        repo.switch("0/", SwitchOptions::default()).unwrap();

        let mut prompt = Peek {
            meta_dir: dir.path().join(META_DIR),
            seen: None,
        };
        let opts = UpdateOptions {
            files: MergeOperation::Ask,
            ..Default::default()
        };
        repo.update("1/", opts, &mut prompt).unwrap();
        assert_eq!(prompt.seen, Some(true));
        assert!(RepoLock::acquire(&prompt.meta_dir, Duration::from_millis(50)).is_ok());
    }
}
