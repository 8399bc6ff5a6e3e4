//! Glob patterns: ignore rules, tracking patterns and pattern-based renames.
//!
//! Globs follow shell conventions and are matched against a single file or
//! directory name, never against a path:
//! - `*` matches any run of characters
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[!abc]` match one character from (or not from) a set
//!
//! A tracking pattern is `dir/glob` (just `glob` at the root). Its directory
//! part must equal the file's directory exactly.

use crate::config::Config;
use crate::error::{HoardError, HoardResult};

/// Directories that are ALWAYS skipped, regardless of configuration.
pub const ALWAYS_IGNORED_DIRS: &[&str] = &[".hoard"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    Star,
    Any,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn is_wildcard(&self) -> bool {
        !matches!(self, Token::Literal(_))
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            '[' => match parse_class(&chars, i) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Parse a `[...]` class starting at `start`; `None` if it is never closed.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    let mut first = true;
    while i < chars.len() {
        let c = chars[i];
        if c == ']' && !first {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        first = false;
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|e| *e != ']') {
            ranges.push((c, chars[i + 2]));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}

fn class_matches(negated: bool, ranges: &[(char, char)], c: char) -> bool {
    ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi) != negated
}

/// Match tokens against text, recording what each wildcard consumed.
fn match_tokens(tokens: &[Token], text: &[char], captures: &mut Vec<String>) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return text.is_empty();
    };
    match token {
        Token::Literal(c) => text.first() == Some(c) && match_tokens(rest, &text[1..], captures),
        Token::Star => {
            for split in 0..=text.len() {
                captures.push(text[..split].iter().collect());
                if match_tokens(rest, &text[split..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Token::Any | Token::Class { .. } => {
            let Some(&c) = text.first() else {
                return false;
            };
            if let Token::Class { negated, ranges } = token {
                if !class_matches(*negated, ranges, c) {
                    return false;
                }
            }
            captures.push(c.to_string());
            if match_tokens(rest, &text[1..], captures) {
                return true;
            }
            captures.pop();
            false
        }
    }
}

/// Match a glob against a single name.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    capture(pattern, text).is_some()
}

/// Match a glob and return the text consumed by each wildcard, in order.
pub fn capture(pattern: &str, text: &str) -> Option<Vec<String>> {
    let tokens = tokenize(pattern);
    let chars: Vec<char> = text.chars().collect();
    let mut captures = Vec::new();
    match_tokens(&tokens, &chars, &mut captures).then_some(captures)
}

/// Number of wildcards in a glob.
pub fn wildcard_count(pattern: &str) -> usize {
    tokenize(pattern).iter().filter(|t| t.is_wildcard()).count()
}

/// Fill the wildcards of `pattern` with `captures`, in order.
pub fn substitute(pattern: &str, captures: &[String]) -> HoardResult<String> {
    let tokens = tokenize(pattern);
    let wildcards = tokens.iter().filter(|t| t.is_wildcard()).count();
    if wildcards != captures.len() {
        return Err(HoardError::Other(format!(
            "pattern {pattern} has {wildcards} wildcard(s) but {} are needed",
            captures.len()
        )));
    }
    let mut out = String::new();
    let mut next = captures.iter();
    for token in tokens {
        match token {
            Token::Literal(c) => out.push(c),
            _ => {
                if let Some(cap) = next.next() {
                    out.push_str(cap);
                }
            }
        }
    }
    Ok(out)
}

/// Split a tracking pattern into its directory and glob parts.
pub fn split_pattern(pattern: &str) -> (&str, &str) {
    pattern.rsplit_once('/').unwrap_or(("", pattern))
}

/// Split a relative path into its directory and file name.
pub fn split_path(rel_path: &str) -> (&str, &str) {
    rel_path.rsplit_once('/').unwrap_or(("", rel_path))
}

/// Normalize a user-supplied tracking pattern to `dir/glob` with `/` separators.
pub fn normalize_pattern(pattern: &str) -> String {
    let unified = pattern.replace('\\', "/");
    let trimmed = unified.trim_start_matches("./");
    trimmed.trim_start_matches('/').to_string()
}

/// Does `pattern` select the file at `rel_path`?
pub fn tracking_matches(pattern: &str, rel_path: &str) -> bool {
    let (pdir, glob) = split_pattern(pattern);
    let (fdir, name) = split_path(rel_path);
    pdir == fdir && glob_match(glob, name)
}

/// Does any pattern in the set select `rel_path`?
pub fn any_tracking_match(patterns: &[String], rel_path: &str) -> bool {
    patterns.iter().any(|p| tracking_matches(p, rel_path))
}

/// Ignore rules derived from the resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    ignores: Vec<String>,
    ignore_dirs: Vec<String>,
    ignores_whitelist: Vec<String>,
    ignore_dirs_whitelist: Vec<String>,
}

impl IgnoreRules {
    pub fn from_config(config: &Config) -> Self {
        IgnoreRules {
            ignores: config.ignores.clone(),
            ignore_dirs: config.ignore_dirs.clone(),
            ignores_whitelist: config.ignores_whitelist.clone(),
            ignore_dirs_whitelist: config.ignore_dirs_whitelist.clone(),
        }
    }

    /// Should this directory name be skipped during the walk?
    pub fn is_dir_ignored(&self, name: &str) -> bool {
        if ALWAYS_IGNORED_DIRS.contains(&name) {
            return true;
        }
        self.ignore_dirs.iter().any(|p| glob_match(p, name))
            && !self.ignore_dirs_whitelist.iter().any(|p| glob_match(p, name))
    }

    /// Should this file be ignored? Checks the file name only.
    pub fn is_file_ignored(&self, rel_path: &str) -> bool {
        self.ignored_by(rel_path).is_some()
    }

    /// The first ignore pattern hiding this file, unless whitelisted.
    pub fn ignored_by(&self, rel_path: &str) -> Option<&str> {
        let (_, name) = split_path(rel_path);
        let pattern = self.ignores.iter().find(|p| glob_match(p, name))?;
        if self.ignores_whitelist.iter().any(|p| glob_match(p, name)) {
            return None;
        }
        Some(pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match_star() {
        assert!(glob_match("*.pyc", "foo.pyc"));
        assert!(!glob_match("*.pyc", "foo.py"));
        assert!(glob_match("test_*", "test_main"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_glob_match_question() {
        assert!(glob_match("?.txt", "a.txt"));
        assert!(!glob_match("?.txt", "ab.txt"));
    }

    #[test]
    fn test_glob_match_class() {
        assert!(glob_match("*.py[cdo]", "mod.pyc"));
        assert!(!glob_match("*.py[cdo]", "mod.py"));
        assert!(glob_match("file[0-9].txt", "file7.txt"));
        assert!(!glob_match("file[!0-9].txt", "file7.txt"));
        assert!(glob_match("file[!0-9].txt", "fileX.txt"));
        // unclosed bracket is a literal
        assert!(glob_match("a[b", "a[b"));
    }

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("Makefile", "Makefile"));
        assert!(!glob_match("Makefile", "makefile"));
    }

    #[test]
    fn test_capture_and_substitute() {
        let caps = capture("*.txt", "notes.txt").unwrap();
        assert_eq!(caps, vec!["notes".to_string()]);
        assert_eq!(substitute("*.md", &caps).unwrap(), "notes.md");

        let caps = capture("v?_*", "v2_final").unwrap();
        assert_eq!(substitute("release-?-*", &caps).unwrap(), "release-2-final");
        assert!(substitute("plain", &caps).is_err());
        assert_eq!(wildcard_count("a*b?[xy]"), 3);
    }

    #[test]
    fn test_tracking_pattern_directory_must_match() {
        assert!(tracking_matches("*.txt", "a.txt"));
        assert!(!tracking_matches("*.txt", "sub/a.txt"));
        assert!(tracking_matches("sub/*.txt", "sub/a.txt"));
        assert!(!tracking_matches("sub/*.txt", "sub/deeper/a.txt"));
        assert_eq!(normalize_pattern("./sub\\*.c"), "sub/*.c");
    }

    #[test]
    fn test_ignore_rules_with_whitelist() {
        let mut config = Config::default();
        config.ignores_whitelist = vec!["keep.bak".into()];
        config.ignore_dirs_whitelist = vec![".github".into()];
        let rules = IgnoreRules::from_config(&config);

        assert!(rules.is_file_ignored("src/old.bak"));
        assert!(!rules.is_file_ignored("src/keep.bak"));
        assert_eq!(rules.ignored_by("x.pyc"), Some("*.py[cdo]"));
        assert_eq!(rules.ignored_by("keep.bak"), None);
        assert!(rules.is_dir_ignored(".git"));
        assert!(!rules.is_dir_ignored(".github"));
        assert!(rules.is_dir_ignored("__pycache__"));
        assert!(!rules.is_dir_ignored("src"));
    }

    #[test]
    fn test_metadata_folder_always_ignored() {
        let mut config = Config::default();
        config.ignore_dirs.clear();
        let rules = IgnoreRules::from_config(&config);
        assert!(rules.is_dir_ignored(".hoard"));
        assert!(!rules.is_dir_ignored(".git"));
    }
}
