//! Detection of the offline repository root and the backing VCS checkout.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::repo::META_DIR;

/// Version control systems recognized by their checkout marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vcs {
    Svn,
    Git,
    Bzr,
    Hg,
    Fossil,
    Cvs,
}

/// Marker entries in preference order; svn wins when several are present.
const MARKERS: &[(&str, Vcs)] = &[
    (".svn", Vcs::Svn),
    (".git", Vcs::Git),
    (".bzr", Vcs::Bzr),
    (".hg", Vcs::Hg),
    (".fslckout", Vcs::Fossil),
    ("_FOSSIL_", Vcs::Fossil),
    ("CVS", Vcs::Cvs),
];

impl Vcs {
    /// Executable used to talk to this VCS.
    pub fn command(self) -> &'static str {
        match self {
            Vcs::Svn => "svn",
            Vcs::Git => "git",
            Vcs::Bzr => "bzr",
            Vcs::Hg => "hg",
            Vcs::Fossil => "fossil",
            Vcs::Cvs => "cvs",
        }
    }

    /// Name of the main line in a fresh checkout, if the VCS has one.
    pub fn default_branch(self) -> Option<&'static str> {
        match self {
            Vcs::Svn | Vcs::Bzr => Some("trunk"),
            Vcs::Git => Some("master"),
            Vcs::Hg => Some("default"),
            Vcs::Fossil | Vcs::Cvs => None,
        }
    }

    /// The VCS whose checkout marker is present directly in `dir`.
    pub fn detect_in(dir: &Path) -> Option<Vcs> {
        let mut found: Vec<Vcs> = Vec::new();
        for (marker, vcs) in MARKERS {
            if dir.join(marker).exists() && !found.contains(vcs) {
                found.push(*vcs);
            }
        }
        if found.len() > 1 {
            warn!(
                "several VCS checkouts in {}: {:?}, using {}",
                dir.display(),
                found,
                found[0]
            );
        }
        found.first().copied()
    }
}

impl fmt::Display for Vcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Result of searching upwards from a working directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Probe {
    /// Folder containing `.hoard/`.
    pub offline_root: Option<PathBuf>,
    /// Closest folder holding a VCS checkout marker.
    pub vcs_root: Option<PathBuf>,
    pub vcs: Option<Vcs>,
}

/// Search `start` and its ancestors for the offline root and a VCS checkout.
///
/// The VCS search continues above the offline root when needed.
pub fn probe(start: &Path) -> Probe {
    let mut result = Probe::default();
    let mut dir = Some(start);
    while let Some(current) = dir {
        if result.offline_root.is_none() && current.join(META_DIR).is_dir() {
            result.offline_root = Some(current.to_path_buf());
        }
        if result.vcs.is_none() {
            if let Some(vcs) = Vcs::detect_in(current) {
                result.vcs = Some(vcs);
                result.vcs_root = Some(current.to_path_buf());
            }
        }
        if result.offline_root.is_some() && result.vcs.is_some() {
            break;
        }
        dir = current.parent();
    }
    debug!(
        "probe from {}: offline root {:?}, vcs {:?} at {:?}",
        start.display(),
        result.offline_root,
        result.vcs,
        result.vcs_root
    );
    result
}
