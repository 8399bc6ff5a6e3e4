//! hoard CLI: work offline on top of any version control checkout.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use hoard_core::config::{ConfigCommand, ConfigKey, ConfigLayer};
use hoard_core::fsutil::format_time;
use hoard_core::merge::{Conflict, MergeOperation, Prompt, Resolution};
use hoard_core::ops::{
    list_changes, BranchOptions, CommitOptions, EntryStatus, LsOptions, MoveOptions, OfflineOptions,
    ScanOptions, SwitchOptions, UpdateOptions,
};
use hoard_core::probe::probe;
use hoard_core::{HoardError, HoardResult, Repository};
use tracing::Level;

#[derive(Parser)]
#[command(name = "hoard", about = "hoard: offline version control", version)]
struct Cli {
    /// Override safety checks (repeat for stronger overrides).
    #[arg(long, global = true, action = ArgAction::Count)]
    force: u8,

    /// Compare file contents instead of modification times.
    #[arg(long, global = true)]
    strict: bool,

    /// Compress stored file contents (offline only).
    #[arg(long, global = true)]
    compress: bool,

    /// Only version files matching tracking patterns (offline only).
    #[arg(long, global = true)]
    track: bool,

    /// Like --track, but patterns are staged per commit (offline only).
    #[arg(long, global = true)]
    picky: bool,

    /// Report progress while scanning and copying.
    #[arg(long, global = true)]
    progress: bool,

    /// Log informational messages.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log debug messages.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start working offline in the current folder.
    Offline {
        /// Name of the first branch.
        name: Option<String>,

        /// Message of the initial revision.
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Leave offline mode, discarding the offline repository.
    Online,

    /// Create a new branch.
    Branch {
        /// Name of the new branch.
        name: Option<String>,

        /// Message of the branch's initial revision.
        #[arg(long, short)]
        message: Option<String>,

        /// Branch from the last committed revision instead of the file tree.
        #[arg(long)]
        last: bool,

        /// Stay on the current branch.
        #[arg(long)]
        stay: bool,

        /// Reference the parent's history instead of copying it.
        #[arg(long)]
        fast: bool,
    },

    /// List file changes against a revision.
    Changes {
        /// Revision reference, e.g. `2`, `main/`, `main/-1`.
        reference: Option<String>,
    },

    /// Show line differences against a revision.
    Diff {
        reference: Option<String>,

        /// Ignore leading and trailing whitespace.
        #[arg(long)]
        ignore_whitespace: bool,
    },

    /// Record the file tree as a new revision.
    #[command(alias = "ci")]
    Commit {
        message: Option<String>,

        /// Mark the message as a unique tag.
        #[arg(long)]
        tag: bool,
    },

    /// Continue work on another branch or revision.
    #[command(alias = "sw")]
    Switch {
        reference: String,

        /// Only take over the target's tracking patterns.
        #[arg(long)]
        meta: bool,
    },

    /// Integrate another branch or revision into the file tree.
    #[command(alias = "up")]
    Update {
        reference: String,

        /// Only add files and lines.
        #[arg(long)]
        add: bool,
        /// Only remove files and lines.
        #[arg(long)]
        rm: bool,
        /// Ask for every modified file.
        #[arg(long)]
        ask: bool,

        #[arg(long)]
        add_lines: bool,
        #[arg(long)]
        rm_lines: bool,
        #[arg(long)]
        ask_lines: bool,

        #[arg(long)]
        add_chars: bool,
        #[arg(long)]
        rm_chars: bool,
        #[arg(long)]
        ask_chars: bool,

        /// Use the incoming line endings for merged files.
        #[arg(long)]
        eol: bool,
    },

    /// Remove a branch entirely.
    Destroy { branch: String },

    /// Add a tracking pattern, e.g. `src/*.rs`.
    Add {
        pattern: String,

        /// Exclude matching files instead.
        #[arg(long)]
        untracked: bool,
    },

    /// Remove a tracking pattern.
    Rm {
        pattern: String,

        #[arg(long)]
        untracked: bool,
    },

    /// Rename files matched by a tracking pattern and update the pattern.
    Mv {
        from: String,
        to: String,

        /// Only change the pattern.
        #[arg(long)]
        soft: bool,

        #[arg(long)]
        untracked: bool,
    },

    /// List files with their ignore and tracking state.
    Ls {
        folder: Option<String>,

        #[arg(long, short)]
        recursive: bool,

        /// List tracking patterns per folder.
        #[arg(long)]
        patterns: bool,
    },

    /// Show the revision history of the current branch.
    Log,

    /// List changes, or repository and branch information when
    /// `use_changes_command` is set.
    Status {
        /// Show repository and branch information regardless.
        #[arg(long)]
        repo: bool,
    },

    /// Archive the offline repository.
    Dump {
        archive: PathBuf,

        /// Do not keep a copy of an existing archive.
        #[arg(long)]
        skip_backup: bool,
    },

    /// Inspect or change configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a flag or text value.
    Set {
        key: String,
        value: String,
        /// Change the repository's own configuration.
        #[arg(long)]
        local: bool,
    },
    /// Revert a key to its inherited value.
    Unset {
        key: String,
        #[arg(long)]
        local: bool,
    },
    /// Append a list entry.
    Add {
        key: String,
        value: String,
        #[arg(long)]
        local: bool,
    },
    /// Remove a list entry.
    Rm {
        key: String,
        value: String,
        #[arg(long)]
        local: bool,
    },
    /// Show effective values and where they come from.
    Show,
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cwd = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("error: cannot determine current directory: {e}");
        process::exit(1);
    });

    if let Err(e) = run(cli, &cwd) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli, cwd: &Path) -> CmdResult {
    let global = ConfigLayer::load_global()?;
    let scan = ScanOptions {
        strict: cli.strict,
        progress: cli.progress,
    };

    match cli.command {
        Commands::Offline { name, message } => {
            let opts = OfflineOptions {
                name,
                message,
                force: cli.force > 0,
                track: cli.track,
                picky: cli.picky,
                strict: cli.strict,
                compress: cli.compress,
                progress: cli.progress,
            };
            cmd_offline(cwd, &global, &opts)
        }
        Commands::Online => cmd_online(open(cwd, &global)?, cli.force, cli.progress),
        Commands::Branch {
            name,
            message,
            last,
            stay,
            fast,
        } => {
            let opts = BranchOptions {
                name,
                message,
                last,
                stay,
                fast,
                progress: cli.progress,
            };
            cmd_branch(&mut open(cwd, &global)?, &opts)
        }
        Commands::Changes { reference } => cmd_changes(&open(cwd, &global)?, reference.as_deref(), scan),
        Commands::Diff {
            reference,
            ignore_whitespace,
        } => cmd_diff(&open(cwd, &global)?, reference.as_deref(), ignore_whitespace, scan),
        Commands::Commit { message, tag } => {
            let opts = CommitOptions {
                tag,
                force: cli.force > 0,
                strict: cli.strict,
                progress: cli.progress,
            };
            cmd_commit(&mut open(cwd, &global)?, message.as_deref(), &opts)
        }
        Commands::Switch { reference, meta } => {
            let opts = SwitchOptions {
                meta_only: meta,
                force: cli.force > 0,
                strict: cli.strict,
                progress: cli.progress,
            };
            cmd_switch(&mut open(cwd, &global)?, &reference, opts)
        }
        Commands::Update {
            reference,
            add,
            rm,
            ask,
            add_lines,
            rm_lines,
            ask_lines,
            add_chars,
            rm_chars,
            ask_chars,
            eol,
        } => {
            let opts = UpdateOptions {
                files: policy(add, rm, ask).unwrap_or(MergeOperation::Both),
                lines: policy(add_lines, rm_lines, ask_lines),
                chars: policy(add_chars, rm_chars, ask_chars),
                eol,
                strict: cli.strict,
                progress: cli.progress,
            };
            cmd_update(&mut open(cwd, &global)?, &reference, opts)
        }
        Commands::Destroy { branch } => {
            let removed = open(cwd, &global)?.destroy(&branch, cli.force > 0)?;
            println!("removed branch {}", removed.label());
            Ok(())
        }
        Commands::Add { pattern, untracked } => {
            open(cwd, &global)?.add_pattern(&pattern, untracked, cli.force > 0)?;
            println!("added {} pattern '{pattern}'", pattern_kind(untracked));
            Ok(())
        }
        Commands::Rm { pattern, untracked } => {
            open(cwd, &global)?.remove_pattern(&pattern, untracked)?;
            println!("removed {} pattern '{pattern}'", pattern_kind(untracked));
            Ok(())
        }
        Commands::Mv {
            from,
            to,
            soft,
            untracked,
        } => {
            let opts = MoveOptions {
                force: cli.force > 0,
                soft,
                negative: untracked,
            };
            cmd_mv(&mut open(cwd, &global)?, &from, &to, opts)
        }
        Commands::Ls {
            folder,
            recursive,
            patterns,
        } => cmd_ls(cwd, &open(cwd, &global)?, folder, LsOptions { recursive, patterns }),
        Commands::Log => cmd_log(&open(cwd, &global)?),
        Commands::Status { repo } => {
            let handle = open(cwd, &global)?;
            if handle.status_lists_changes(repo) {
                cmd_changes(&handle, None, scan)
            } else {
                cmd_status(&handle, scan)
            }
        }
        Commands::Dump { archive, skip_backup } => {
            let report = open(cwd, &global)?.dump(&archive, skip_backup)?;
            if report.backed_up {
                println!("previous archive kept as {}_last", report.archive.display());
            }
            println!("dumped {} file(s) to {}", report.entries, report.archive.display());
            Ok(())
        }
        Commands::Config { action } => cmd_config(cwd, global, action),
    }
}

/// Open the offline repository containing `cwd`.
fn open(cwd: &Path, global: &ConfigLayer) -> HoardResult<Repository> {
    let root = probe(cwd).offline_root.ok_or(HoardError::NotOffline)?;
    Repository::open(&root, global)
}

fn policy(add: bool, rm: bool, ask: bool) -> Option<MergeOperation> {
    match (add, rm, ask) {
        (_, _, true) => Some(MergeOperation::Ask),
        (true, false, _) => Some(MergeOperation::Insert),
        (false, true, _) => Some(MergeOperation::Remove),
        (true, true, _) => Some(MergeOperation::Both),
        (false, false, false) => None,
    }
}

fn pattern_kind(untracked: bool) -> &'static str {
    if untracked {
        "untracking"
    } else {
        "tracking"
    }
}

fn cmd_offline(cwd: &Path, global: &ConfigLayer, opts: &OfflineOptions) -> CmdResult {
    let (_repo, report) = Repository::offline(cwd, global, opts)?;
    println!("offline repository prepared ({} mode)", report.mode);
    println!("  branch: {}", report.branch);
    println!("  files:  {}", report.files);
    if let Some(summary) = report.summary {
        println!("  {summary}");
    }
    Ok(())
}

fn cmd_online(repo: Repository, force: u8, progress: bool) -> CmdResult {
    let report = repo.online(force, progress)?;
    if !report.discarded.is_empty() {
        println!("discarded changes on branch(es): {}", report.discarded.join(", "));
    }
    println!("offline repository removed, back online");
    Ok(())
}

fn cmd_branch(repo: &mut Repository, opts: &BranchOptions) -> CmdResult {
    let report = repo.branch(opts)?;
    println!("created branch {} ({})", report.label, report.number);
    if report.files > 0 {
        println!("  files: {}", report.files);
    }
    if let Some(summary) = report.summary {
        println!("  {summary}");
    }
    if report.switched {
        println!("switched to branch {}", report.label);
    }
    Ok(())
}

fn cmd_changes(repo: &Repository, reference: Option<&str>, scan: ScanOptions) -> CmdResult {
    let report = repo.changes(reference, scan)?;
    let lines = report.lines();
    if lines.is_empty() {
        println!("no changes against {}", report.label);
    } else {
        println!("changes against {}:", report.label);
        for line in lines {
            println!("{line}");
        }
    }
    if let Some(summary) = report.summary {
        println!("{summary}");
    }
    Ok(())
}

fn cmd_diff(repo: &Repository, reference: Option<&str>, ignore_whitespace: bool, scan: ScanOptions) -> CmdResult {
    let report = repo.diff(reference, ignore_whitespace, scan)?;
    let lines = report.lines();
    if lines.is_empty() {
        println!("no differences to {}", report.label);
        return Ok(());
    }
    println!("differences to {}:", report.label);
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn cmd_commit(repo: &mut Repository, message: Option<&str>, opts: &CommitOptions) -> CmdResult {
    let report = repo.commit(message, opts)?;
    for line in list_changes(&report.changes, &Default::default()) {
        println!("{line}");
    }
    let (added, deleted, modified, moved) = report.counts();
    println!(
        "created revision {}/r{} (+{added}/-{deleted}/~{modified}/#{moved})",
        report.branch, report.revision
    );
    if let Some(summary) = report.summary {
        println!("{summary}");
    }
    Ok(())
}

fn cmd_switch(repo: &mut Repository, reference: &str, opts: SwitchOptions) -> CmdResult {
    let report = repo.switch(reference, opts)?;
    if opts.meta_only {
        println!("took over tracking patterns of {}", report.label);
        return Ok(());
    }
    for path in &report.restored {
        println!("ADD {path}");
    }
    for path in &report.removed {
        println!("DEL {path}");
    }
    for path in &report.overwritten {
        println!("MOD {path}");
    }
    println!("switched to {}", report.label);
    Ok(())
}

fn cmd_update(repo: &mut Repository, reference: &str, opts: UpdateOptions) -> CmdResult {
    let report = repo.update(reference, opts, &mut StdinPrompt)?;
    for path in &report.restored {
        println!("ADD {path}");
    }
    for path in &report.not_restored {
        println!("skipped ADD {path}");
    }
    for path in &report.removed {
        println!("DEL {path}");
    }
    for path in &report.kept {
        println!("kept {path}");
    }
    for path in &report.merged {
        println!("MRG {path}");
    }
    for path in &report.theirs {
        println!("THR {path}");
    }
    for path in &report.mine {
        println!("MNE {path}");
    }
    if report.patterns_merged {
        println!("tracking patterns merged");
    }
    println!("integrated changes from {}", report.label);
    Ok(())
}

fn cmd_mv(repo: &mut Repository, from: &str, to: &str, opts: MoveOptions) -> CmdResult {
    let report = repo.move_pattern(from, to, opts)?;
    for (old, new) in &report.renames {
        println!("MOV {old}  ->  {new}");
    }
    if !report.performed {
        println!("pattern changed, files left in place");
    }
    Ok(())
}

fn cmd_ls(cwd: &Path, repo: &Repository, folder: Option<String>, opts: LsOptions) -> CmdResult {
    let folder = match folder {
        Some(folder) => folder,
        None => cwd
            .strip_prefix(repo.root())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default(),
    };
    for dir in repo.ls(&folder, opts)? {
        let shown = if dir.rel_path.is_empty() { "." } else { &dir.rel_path };
        if opts.patterns {
            println!("{shown}: {}", dir.patterns.join(", "));
            continue;
        }
        if opts.recursive {
            println!("{shown}:");
        }
        for file in &dir.files {
            match &file.status {
                EntryStatus::Ignored(pattern) => println!("IGN {} by {pattern}", file.name),
                EntryStatus::Tracked(patterns) => println!("TRK {} by {}", file.name, patterns.join(", ")),
                EntryStatus::Plain => println!("    {}", file.name),
            }
        }
    }
    Ok(())
}

fn cmd_log(repo: &Repository) -> CmdResult {
    let report = repo.log()?;
    println!("history of branch {}:", report.label);
    for entry in &report.entries {
        let marker = if entry.current { "*" } else { " " };
        let tag = if entry.tagged { " TAG" } else { "" };
        println!(
            "  {marker} r{:02} @{} (+{:02}/-{:02}/~{:02}/T{:02}) |{}|{tag}",
            entry.number,
            format_time(entry.ctime),
            entry.added.len(),
            entry.deleted.len(),
            entry.modified.len(),
            entry.text_added,
            entry.message.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

fn cmd_status(repo: &Repository, scan: ScanOptions) -> CmdResult {
    let status = repo.status(scan)?;
    println!("offline repository at {}", status.root.display());
    match (&status.vcs, &status.vcs_root) {
        (Some(vcs), Some(root)) => println!("  backing VCS: {vcs} at {}", root.display()),
        _ => println!("  backing VCS: none found"),
    }
    println!(
        "  version {} (format {}), {} mode{}{}",
        status.version,
        status.format,
        status.mode,
        if status.strict { ", strict" } else { "" },
        if status.compress { ", compressed" } else { "" },
    );
    if status.changed == 0 {
        println!("  file tree unchanged");
    } else {
        println!("  file tree has {} change(s)", status.changed);
    }
    println!("branches:");
    for branch in &status.branches {
        let marker = if branch.current { "*" } else { " " };
        let sync = if branch.in_sync { "in sync" } else { "modified" };
        let reference = branch
            .reference
            .map(|(parent, revision)| format!(", references {parent}/r{revision}"))
            .unwrap_or_default();
        println!(
            "  {marker} b{:02} '{}' @{} ({sync}) {} commit(s), latest r{:02}{reference}",
            branch.number,
            branch.label,
            format_time(branch.ctime),
            branch.commits,
            branch.latest,
        );
    }
    if !status.tracked.is_empty() {
        println!("tracked patterns: {}", status.tracked.join(", "));
    }
    if !status.untracked.is_empty() {
        println!("untracked patterns: {}", status.untracked.join(", "));
    }
    Ok(())
}

fn cmd_config(cwd: &Path, mut global: ConfigLayer, action: ConfigCommands) -> CmdResult {
    let (command, local) = match action {
        ConfigCommands::Show => {
            let local = probe(cwd)
                .offline_root
                .map(|root| Repository::open(&root, &global))
                .transpose()?;
            let entries = match &local {
                Some(repo) => repo.config_entries(),
                None => hoard_core::config::describe(&global, None),
            };
            for entry in entries {
                println!("{:<24} {:<8} {}", entry.key.name(), entry.source, entry.value);
            }
            return Ok(());
        }
        ConfigCommands::Set { key, value, local } => (ConfigCommand::Set(ConfigKey::parse(&key)?, value), local),
        ConfigCommands::Unset { key, local } => (ConfigCommand::Unset(ConfigKey::parse(&key)?), local),
        ConfigCommands::Add { key, value, local } => (ConfigCommand::Add(ConfigKey::parse(&key)?, value), local),
        ConfigCommands::Rm { key, value, local } => (ConfigCommand::Remove(ConfigKey::parse(&key)?, value), local),
    };

    if local {
        open(cwd, &global)?.configure(&command)?;
        println!("updated repository configuration of {}", command.key().name());
    } else {
        let defaults = hoard_core::config::Config::default();
        global.apply(&command, &defaults)?;
        global.save_global()?;
        println!("updated user configuration of {}", command.key().name());
    }
    Ok(())
}

/// Asks merge questions on the terminal.
struct StdinPrompt;

impl StdinPrompt {
    fn ask(&self, question: &str) -> HoardResult<String> {
        print!("{question} ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

impl Prompt for StdinPrompt {
    fn resolve(&mut self, conflict: &Conflict<'_>) -> HoardResult<Resolution> {
        match conflict {
            Conflict::File { path, binary } => {
                let options = if *binary {
                    "(M)ine/(t)heirs"
                } else {
                    "(m)ine/(t)heirs/(M)erge"
                };
                let answer = self.ask(&format!("{path} was modified on both sides, keep {options}?"))?;
                Ok(match answer.as_str() {
                    "t" | "T" => Resolution::Theirs,
                    "m" if !*binary => Resolution::Mine,
                    "" | "M" if !*binary => Resolution::Merge,
                    _ => Resolution::Mine,
                })
            }
            Conflict::Lines { theirs, mine } => {
                println!("incoming lines:");
                for line in theirs.iter() {
                    println!("  |{line}|");
                }
                println!("current lines:");
                for line in mine.iter() {
                    println!("  |{line}|");
                }
                let answer = self.ask("keep (m)ine/(t)heirs/(b)oth/(u)ser text?")?;
                Ok(match answer.as_str() {
                    "t" => Resolution::Theirs,
                    "b" => Resolution::Both,
                    "u" => {
                        println!("enter replacement lines, end with an empty line:");
                        let mut lines = Vec::new();
                        for line in io::stdin().lock().lines() {
                            let line = line?;
                            if line.is_empty() {
                                break;
                            }
                            lines.push(line);
                        }
                        Resolution::User(lines)
                    }
                    _ => Resolution::Mine,
                })
            }
            Conflict::Chars {
                theirs_line,
                mine_line,
                theirs,
                mine,
            } => {
                println!("incoming: |{theirs_line}|");
                println!("current:  |{mine_line}|");
                let answer = self.ask(&format!("replace '{mine}' by '{theirs}'? (m)ine/(t)heirs/(b)oth"))?;
                Ok(match answer.as_str() {
                    "t" => Resolution::Theirs,
                    "b" => Resolution::Both,
                    _ => Resolution::Mine,
                })
            }
        }
    }
}
