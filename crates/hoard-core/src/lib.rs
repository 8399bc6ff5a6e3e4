//! Core library for hoard, an offline version control layer.
//!
//! Hoard keeps incremental snapshots of a working tree in a `.hoard/` folder
//! next to the files, so work can be branched, committed and merged while the
//! real version control system is out of reach. Once back online, the
//! metadata folder is simply removed.

pub mod changes;
pub mod config;
pub mod diff;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod lock;
pub mod merge;
pub mod metadata;
pub mod ops;
pub mod pattern;
pub mod probe;
pub mod repo;
pub mod store;

pub use error::{HoardError, HoardResult};
pub use repo::Repository;
