//! Line and character level difference blocks.
//!
//! Two sequences are compared: "other" (the version being brought in, or
//! the working file when displaying a diff) and "into" (the version it is
//! compared against). Block direction follows that naming:
//! - `Insert`: present only in into
//! - `Remove`: present only in other
//! - `Replace`: other's items in `lines`, into's items in `replaces`
//! - `Move`: an Insert and a Remove with identical content (display only)

use crate::config::Config;
use crate::pattern::{glob_match, split_path};

/// Line ending convention of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    Lf,
    CrLf,
    LfCr,
    Cr,
}

impl Eol {
    pub fn as_str(self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
            Eol::LfCr => "\n\r",
            Eol::Cr => "\r",
        }
    }
}

/// Display name of a line ending, `None` meaning the text has no newline.
pub fn eol_name(eol: Option<Eol>) -> &'static str {
    match eol {
        None => "<No newline>",
        Some(Eol::CrLf) => "<CR+LF>",
        Some(Eol::LfCr) => "<LF+CR>",
        Some(Eol::Lf) => "<LF>",
        Some(Eol::Cr) => "<CR>",
    }
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

/// Determine the dominant line ending of `data`.
pub fn detect_eol(data: &[u8]) -> Option<Eol> {
    let lf = count(data, b"\n");
    let cr = count(data, b"\r");
    let crlf = count(data, b"\r\n");
    if crlf > 0 {
        if lf != crlf || cr != crlf {
            tracing::warn!("mixed line endings detected, merge output may be inconsistent");
        }
        return Some(Eol::CrLf);
    }
    if lf > 0 && cr > 0 {
        if count(data, b"\n\r") == lf.min(cr) {
            return Some(Eol::LfCr);
        }
        tracing::warn!("mixed line endings detected, merge output may be inconsistent");
    }
    if lf > cr {
        Some(Eol::Lf)
    } else if cr > lf {
        Some(Eol::Cr)
    } else {
        None
    }
}

/// Text split at its own line ending.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedText {
    pub eol: Option<Eol>,
    pub lines: Vec<String>,
}

/// Decode and split `data` into lines.
///
/// A trailing newline yields a final empty line so that joining the lines
/// with the same ending reproduces the input.
pub fn load_lines(data: &[u8], ignore_whitespace: bool) -> LoadedText {
    let eol = detect_eol(data);
    let text = String::from_utf8_lossy(data);
    let mut lines: Vec<String> = if text.is_empty() {
        Vec::new()
    } else {
        text.split(eol.unwrap_or(Eol::Lf).as_str())
            .map(String::from)
            .collect()
    };
    if ignore_whitespace {
        for line in &mut lines {
            *line = line.replace('\t', "  ").trim().to_string();
        }
    }
    LoadedText { eol, lines }
}

/// Bytes sniffed for a NUL before content is declared binary.
const BINARY_SNIFF_LEN: usize = 8192;

/// Whether file content holds a NUL byte near its start.
///
/// Content caught here is listed as binary by `diff` and replaced wholesale
/// by `update`, whatever its file name says.
pub fn is_binary(data: &[u8]) -> bool {
    data[..data.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Extensions treated as text when no configured pattern decides.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "rs", "toml", "json", "yaml", "yml", "xml", "html", "htm", "css", "js",
    "ts", "c", "h", "cpp", "hpp", "cc", "java", "py", "sh", "ini", "cfg", "csv", "tex", "go",
];

/// Whether a file is merged and diffed line by line.
pub fn is_text_type(rel_path: &str, config: &Config) -> bool {
    let (_, name) = split_path(rel_path);
    if config.bintype.iter().any(|p| glob_match(p, name)) {
        return false;
    }
    if config.texttype.iter().any(|p| glob_match(p, name)) {
        return true;
    }
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Keep,
    Insert,
    Remove,
    Replace,
    Move,
}

/// A run of items of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<T> {
    pub kind: BlockKind,
    pub lines: Vec<T>,
    /// 0-based position of the first item (into side for Keep/Insert,
    /// other side for Remove/Replace/Move).
    pub line: usize,
    /// Into side of a Replace, or the original position of a Move.
    pub replaces: Option<Box<Block<T>>>,
}

pub type MergeBlock = Block<String>;

impl<T> Block<T> {
    fn new(kind: BlockKind, line: usize) -> Self {
        Block {
            kind,
            lines: Vec::new(),
            line,
            replaces: None,
        }
    }
}

/// Compute the longest common subsequence table for two slices.
fn lcs_table<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Vec<usize>> {
    let m = old.len();
    let n = new.len();
    let mut table = vec![vec![0usize; n + 1]; m + 1];

    for i in 1..=m {
        for j in 1..=n {
            if old[i - 1] == new[j - 1] {
                table[i][j] = table[i - 1][j - 1] + 1;
            } else {
                table[i][j] = table[i - 1][j].max(table[i][j - 1]);
            }
        }
    }

    table
}

/// Edit operation produced by LCS backtracking.
#[derive(Debug, PartialEq)]
enum EditOp {
    Equal(usize, usize), // other_idx, into_idx
    Insert(usize),       // into_idx
    Delete(usize),       // other_idx
}

/// Backtrack through the LCS table to produce a sequence of edit operations.
fn lcs_backtrack<T: PartialEq>(table: &[Vec<usize>], old: &[T], new: &[T]) -> Vec<EditOp> {
    let mut ops = Vec::new();
    let mut i = old.len();
    let mut j = new.len();

    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(EditOp::Equal(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            ops.push(EditOp::Insert(j - 1));
            j -= 1;
        } else {
            ops.push(EditOp::Delete(i - 1));
            i -= 1;
        }
    }

    ops.reverse();
    ops
}

/// Edit script with common prefix and suffix stripped before the LCS pass.
fn edit_script<T: PartialEq>(other: &[T], into: &[T]) -> Vec<EditOp> {
    let prefix = other
        .iter()
        .zip(into.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = other[prefix..]
        .iter()
        .rev()
        .zip(into[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let mid_other = &other[prefix..other.len() - suffix];
    let mid_into = &into[prefix..into.len() - suffix];

    let mut ops: Vec<EditOp> = (0..prefix).map(|k| EditOp::Equal(k, k)).collect();
    let table = lcs_table(mid_other, mid_into);
    ops.extend(
        lcs_backtrack(&table, mid_other, mid_into)
            .into_iter()
            .map(|op| match op {
                EditOp::Equal(i, j) => EditOp::Equal(i + prefix, j + prefix),
                EditOp::Insert(j) => EditOp::Insert(j + prefix),
                EditOp::Delete(i) => EditOp::Delete(i + prefix),
            }),
    );
    let other_tail = other.len() - suffix;
    let into_tail = into.len() - suffix;
    ops.extend((0..suffix).map(|k| EditOp::Equal(other_tail + k, into_tail + k)));
    ops
}

/// Compare two sequences and group the result into blocks.
pub fn diff_blocks<T: PartialEq + Clone>(other: &[T], into: &[T]) -> Vec<Block<T>> {
    let mut blocks: Vec<Block<T>> = Vec::new();
    for op in edit_script(other, into) {
        let (kind, item, line) = match op {
            EditOp::Equal(_, j) => (BlockKind::Keep, &into[j], j),
            EditOp::Insert(j) => (BlockKind::Insert, &into[j], j),
            EditOp::Delete(i) => (BlockKind::Remove, &other[i], i),
        };
        match blocks.last_mut() {
            Some(last) if last.kind == kind => last.lines.push(item.clone()),
            _ => {
                let mut block = Block::new(kind, line);
                block.lines.push(item.clone());
                blocks.push(block);
            }
        }
    }
    fold_replacements(blocks)
}

/// Merge adjacent Remove/Insert pairs (in either order) into Replace blocks.
fn fold_replacements<T>(blocks: Vec<Block<T>>) -> Vec<Block<T>> {
    let mut out: Vec<Block<T>> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let pair = matches!(
            (out.last().map(|b| b.kind), block.kind),
            (Some(BlockKind::Remove), BlockKind::Insert) | (Some(BlockKind::Insert), BlockKind::Remove)
        );
        if !pair {
            out.push(block);
            continue;
        }
        let Some(previous) = out.pop() else {
            continue;
        };
        let (mut remove, insert) = if previous.kind == BlockKind::Remove {
            (previous, block)
        } else {
            (block, previous)
        };
        remove.kind = BlockKind::Replace;
        remove.replaces = Some(Box::new(insert));
        out.push(remove);
    }
    out
}

/// Turn Insert/Remove pairs with identical content into Move blocks.
pub fn detect_block_moves(blocks: Vec<MergeBlock>) -> Vec<MergeBlock> {
    let mut blocks = blocks;
    let mut i = 0;
    while i < blocks.len() {
        if blocks[i].kind != BlockKind::Remove {
            i += 1;
            continue;
        }
        let partner = blocks
            .iter()
            .position(|b| b.kind == BlockKind::Insert && b.lines == blocks[i].lines);
        if let Some(j) = partner {
            let source = blocks.remove(j);
            let target = if j < i { i - 1 } else { i };
            blocks[target].kind = BlockKind::Move;
            blocks[target].replaces = Some(Box::new(source));
            i = target + 1;
        } else {
            i += 1;
        }
    }
    blocks
}

fn digits(n: usize) -> usize {
    n.max(1).to_string().len()
}

/// Render one text file's blocks in the `DIF` display format.
pub fn render_diff(path: &str, blocks: &[MergeBlock], eol: Option<Eol>) -> Vec<String> {
    let mut out = Vec::new();
    let unchanged = blocks.iter().all(|b| b.kind == BlockKind::Keep);
    let note = if unchanged { " <timestamp or newline>" } else { "" };
    out.push(format!("DIF {path}{note}  {}", eol_name(eol)));

    // width follows the largest block start, not the last numbered line
    let max_start = blocks
        .iter()
        .flat_map(|b| [Some(b.line), b.replaces.as_ref().map(|r| r.line)])
        .flatten()
        .max()
        .unwrap_or(1);
    let width = digits(max_start);
    let numbered = |prefix: &str, start: usize, lines: &[String], out: &mut Vec<String>| {
        for (k, line) in lines.iter().enumerate() {
            out.push(format!("{prefix} {:0width$} |{line}|", start + k));
        }
    };

    for block in blocks {
        match block.kind {
            BlockKind::Keep => continue,
            BlockKind::Insert => numbered("---", block.line, &block.lines, &mut out),
            BlockKind::Remove => numbered("+++", block.line, &block.lines, &mut out),
            BlockKind::Replace => {
                if let Some(replaced) = &block.replaces {
                    numbered("- |", replaced.line, &replaced.lines, &mut out);
                }
                numbered("+ |", block.line, &block.lines, &mut out);
            }
            BlockKind::Move => numbered("<->", block.line, &block.lines, &mut out),
        }
        out.push(String::new());
    }
    out
}
