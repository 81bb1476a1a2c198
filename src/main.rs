use anyhow::{Context, Result};
use clap::Parser;
use findstore::db::{self, Store};
use findstore::ledger::Ledger;
use findstore::patch::{LineEditor, carets};
use findstore::report::{Replay, ReplayEvent};
use findstore::rewrite::{self, RewriteRules};
use findstore::{cli, config, sarif};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn open_store(db: Option<PathBuf>) -> Result<Store> {
    let store = match db {
        Some(path) => Store::open(&path)?,
        None => Store::discover(Path::new("."))?,
    };
    Ok(store)
}

fn main() -> ExitCode {
    let args = cli::Args::parse();

    let log_level = config::default_log_filter(args.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Ok(false) when the command finished but hit per-file problems.
fn run(command: cli::Command) -> Result<bool> {
    match command {
        cli::Command::Init { db } => {
            let path = db.unwrap_or_else(|| PathBuf::from(db::FILE_NAME));
            Store::create(&path)?;
            println!("initialized {}", path.display());
            Ok(true)
        }
        cli::Command::Report { db, source, json } => {
            let store = open_store(db)?;
            report(&store, source, json)
        }
        cli::Command::Patch {
            db,
            tool,
            rewrites,
            dry_run,
        } => {
            let store = open_store(db)?;
            let rules = RewriteRules::parse(&rewrites)?;
            let summary = rewrite::apply(&store, &tool, &rules, dry_run)?;
            for failure in &summary.failures {
                println!("{}", failure.finding);
                println!("  error: {}", failure.reason);
                if let Some(line) = &failure.source_line {
                    println!("  {}", String::from_utf8_lossy(line));
                    println!(
                        "  {}",
                        carets(line, failure.finding.column as usize, failure.width)
                    );
                }
            }
            if !summary.succeeded() {
                eprintln!("error: changes not applied because of previous errors");
                return Ok(false);
            }
            if dry_run {
                println!("{} patches checked, no files written", summary.applied);
            } else {
                println!(
                    "{} patches applied to {} files",
                    summary.applied,
                    summary.written.len()
                );
            }
            Ok(true)
        }
        cli::Command::Import { db, sarif, mark } => {
            let mut store = open_store(db)?;
            let content = std::fs::read_to_string(&sarif)
                .with_context(|| format!("read {}", sarif.display()))?;
            let base = std::env::current_dir().with_context(|| "resolve current directory")?;
            let findings = sarif::parse_sarif(&content, &base)?;

            let mut ledger = Ledger::new(&mut store);
            for path in &mark {
                ledger.mark_for_processing(path);
            }
            for finding in &findings {
                if let Err(err) = ledger.record(
                    &finding.path,
                    finding.line,
                    finding.column,
                    &finding.tool,
                    &finding.message,
                ) {
                    eprintln!("error: {err}");
                }
            }
            let stats = ledger.commit()?;
            println!(
                "imported {} findings for {} files",
                stats.findings, stats.files
            );
            Ok(ledger.error_message().is_none())
        }
        cli::Command::Prune { db } => {
            let mut store = open_store(db)?;
            let removed = store.prune_superseded()?;
            println!("removed {removed} superseded file rows");
            Ok(true)
        }
    }
}

fn report(store: &Store, source: bool, json: bool) -> Result<bool> {
    let mut clean = true;
    let mut editors: HashMap<String, Option<LineEditor>> = HashMap::new();
    for event in Replay::new(store)? {
        match event? {
            ReplayEvent::Finding(finding) => {
                if json {
                    println!("{}", serde_json::to_string(&finding)?);
                    continue;
                }
                println!("{finding}");
                if !source {
                    continue;
                }
                let editor = editors
                    .entry(finding.path.clone())
                    .or_insert_with(|| LineEditor::read(Path::new(&finding.path)).ok());
                if let Some(line) = editor
                    .as_ref()
                    .and_then(|editor| editor.line_bytes(finding.line as usize))
                {
                    println!("  {}", String::from_utf8_lossy(line));
                    println!("  {}", carets(line, finding.column as usize, 1));
                }
            }
            ReplayEvent::FileMissing(path) => {
                eprintln!("{path}: error: could not find file on disk");
                clean = false;
            }
            ReplayEvent::NoMatchingReport(path) => {
                eprintln!("{path}: error: could not find report for current file");
                clean = false;
            }
        }
    }
    Ok(clean)
}
