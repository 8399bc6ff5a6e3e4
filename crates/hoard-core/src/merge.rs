//! Three-way style merge of an incoming version into the current one.
//!
//! The incoming ("other", theirs) text is compared against the current
//! ("into", mine) text; each block is then resolved by a [`MergeOperation`]
//! at line granularity, and single-line replacements again at character
//! granularity. Ambiguous cases go to a [`Prompt`].

use crate::diff::{diff_blocks, load_lines, Block, BlockKind, Eol};
use crate::error::HoardResult;

/// Merge policy. Tested as bits: `Insert` = 1, `Remove` = 2, `Both` = 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOperation {
    /// Add content only present in theirs.
    Insert = 1,
    /// Drop content only present in mine.
    Remove = 2,
    /// Replicate theirs.
    Both = 3,
    /// Decide per block.
    Ask = 4,
}

impl MergeOperation {
    pub fn inserts(self) -> bool {
        self as u8 & MergeOperation::Insert as u8 != 0
    }

    pub fn removes(self) -> bool {
        self as u8 & MergeOperation::Remove as u8 != 0
    }
}

/// A decision the merge cannot take on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict<'a> {
    /// A modified file; binary files cannot be merged.
    File { path: &'a str, binary: bool },
    /// A multi-line replacement block.
    Lines { theirs: &'a [String], mine: &'a [String] },
    /// A character run replacement inside one line.
    Chars {
        theirs_line: &'a str,
        mine_line: &'a str,
        theirs: &'a str,
        mine: &'a str,
    },
}

/// Answer to a [`Conflict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Mine,
    Theirs,
    /// Theirs followed by mine.
    Both,
    /// Merge a file line by line (file conflicts only).
    Merge,
    /// User supplied replacement lines.
    User(Vec<String>),
}

/// Blocking interactive decision source.
pub trait Prompt {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> HoardResult<Resolution>;
}

/// A prompt that never asks: always keeps the current version.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepMine;

impl Prompt for KeepMine {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> HoardResult<Resolution> {
        Ok(match conflict {
            Conflict::File { binary: false, .. } => Resolution::Merge,
            _ => Resolution::Mine,
        })
    }
}

/// Options for merging whole texts.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub lines: MergeOperation,
    pub chars: MergeOperation,
    /// Use theirs line ending for the output.
    pub eol: bool,
    pub ignore_whitespace: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            lines: MergeOperation::Both,
            chars: MergeOperation::Both,
            eol: false,
            ignore_whitespace: false,
        }
    }
}

/// Merge `theirs` into `mine`, returning the merged bytes and the line
/// ending used to join them.
pub fn merge(
    theirs: &[u8],
    mine: &[u8],
    opts: &MergeOptions,
    prompt: &mut dyn Prompt,
) -> HoardResult<(Vec<u8>, Option<Eol>)> {
    let other = load_lines(theirs, opts.ignore_whitespace);
    let current = load_lines(mine, opts.ignore_whitespace);
    if let (Some(a), Some(b)) = (other.eol, current.eol) {
        if a != b && !opts.eol {
            tracing::warn!("differing line endings, keeping the current file's convention");
        }
    }
    let eol = if opts.eol {
        other.eol
    } else {
        current.eol.or(other.eol)
    };

    let mut output: Vec<String> = Vec::new();
    for block in diff_blocks(&other.lines, &current.lines) {
        match block.kind {
            BlockKind::Keep => output.extend(block.lines),
            BlockKind::Insert => {
                if !opts.lines.removes() {
                    output.extend(block.lines);
                }
            }
            BlockKind::Remove => {
                if opts.lines.inserts() {
                    output.extend(block.lines);
                }
            }
            BlockKind::Replace | BlockKind::Move => {
                let replaced = block.replaces.map(|b| b.lines).unwrap_or_default();
                if block.lines.len() == 1 && replaced.len() == 1 {
                    output.push(line_merge(&block.lines[0], &replaced[0], opts.chars, prompt)?);
                    continue;
                }
                match opts.lines {
                    MergeOperation::Ask => {
                        let conflict = Conflict::Lines {
                            theirs: &block.lines,
                            mine: &replaced,
                        };
                        match prompt.resolve(&conflict)? {
                            Resolution::Theirs => output.extend(block.lines.iter().cloned()),
                            Resolution::Both => {
                                output.extend(block.lines.iter().cloned());
                                output.extend(replaced);
                            }
                            Resolution::User(lines) => output.extend(lines),
                            Resolution::Mine | Resolution::Merge => output.extend(replaced),
                        }
                    }
                    MergeOperation::Remove => {}
                    MergeOperation::Both => output.extend(block.lines),
                    MergeOperation::Insert => {
                        output.extend(replaced);
                        output.extend(block.lines);
                    }
                }
            }
        }
    }

    let joined = output.join(eol.unwrap_or(Eol::Lf).as_str());
    Ok((joined.into_bytes(), eol))
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

/// Merge one line of theirs into one line of mine, character by character.
pub fn line_merge(
    theirs: &str,
    mine: &str,
    op: MergeOperation,
    prompt: &mut dyn Prompt,
) -> HoardResult<String> {
    let other: Vec<char> = theirs.chars().collect();
    let into: Vec<char> = mine.chars().collect();
    let blocks: Vec<Block<char>> = diff_blocks(&other, &into);

    let mut out = String::new();
    for block in blocks {
        match block.kind {
            BlockKind::Keep => out.push_str(&collect(&block.lines)),
            BlockKind::Insert => {
                if !op.removes() {
                    out.push_str(&collect(&block.lines));
                }
            }
            BlockKind::Remove => {
                if op.inserts() {
                    out.push_str(&collect(&block.lines));
                }
            }
            BlockKind::Replace | BlockKind::Move => {
                let ours = block.replaces.map(|b| collect(&b.lines)).unwrap_or_default();
                let theirs_run = collect(&block.lines);
                match op {
                    MergeOperation::Ask => {
                        let conflict = Conflict::Chars {
                            theirs_line: theirs,
                            mine_line: mine,
                            theirs: &theirs_run,
                            mine: &ours,
                        };
                        match prompt.resolve(&conflict)? {
                            Resolution::Theirs => out.push_str(&theirs_run),
                            Resolution::Both => {
                                out.push_str(&theirs_run);
                                out.push_str(&ours);
                            }
                            Resolution::User(lines) => out.push_str(&lines.concat()),
                            Resolution::Mine | Resolution::Merge => out.push_str(&ours),
                        }
                    }
                    MergeOperation::Remove => {}
                    MergeOperation::Both => out.push_str(&theirs_run),
                    MergeOperation::Insert => {
                        out.push_str(&ours);
                        out.push_str(&theirs_run);
                    }
                }
            }
        }
    }
    Ok(out)
}
