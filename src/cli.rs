use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "findstore",
    version,
    about = "Persistent store for static-analysis findings",
    after_help = r#"Examples:
  findstore init
  findstore import --sarif build/analysis.sarif --mark src/util.c
  findstore report --source
  findstore patch --tool sprintf-overload --rewrite sprintf=formatstr --rewrite vsprintf=vformatstr -n
  findstore prune
"#
)]
pub struct Args {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a store (default ./findstore.sqlite).
    Init {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print every finding that is still valid for the files on disk.
    Report {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Show the source line and a caret marker under each finding.
        #[arg(long)]
        source: bool,
        /// One JSON object per line.
        #[arg(long, conflicts_with = "source")]
        json: bool,
    },
    /// Rewrite identifiers at the locations reported by one tool.
    Patch {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Only findings of this tool are patched.
        #[arg(long)]
        tool: String,
        /// Rewrite rule OLD=NEW; repeatable.
        #[arg(long = "rewrite", value_name = "OLD=NEW", required = true)]
        rewrites: Vec<String>,
        /// Check every patch but leave the files alone.
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Record the results of a SARIF log as one analysis run.
    Import {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        sarif: PathBuf,
        /// Additional files that were analyzed without findings.
        #[arg(long)]
        mark: Vec<PathBuf>,
    },
    /// Delete superseded file rows and their findings.
    Prune {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}
