use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use covmerge::check::Thresholds;
use covmerge::cli::{self, CommandOutput};
use covmerge::config::ReportOptions;

/// covmerge: merge per-process V8 coverage snapshots and check thresholds.
#[derive(Parser)]
#[command(name = "covmerge", version, about)]
struct Cli {
    /// Config file (default: ./.covmergerc.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    options: OptionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override values from the config file.
#[derive(Args)]
struct OptionArgs {
    /// Glob of files to include (repeatable)
    #[arg(long, global = true)]
    include: Vec<String>,

    /// Glob of files to exclude (repeatable)
    #[arg(long, global = true)]
    exclude: Vec<String>,

    /// File extension to include (repeatable)
    #[arg(long, global = true)]
    extension: Vec<String>,

    /// Reporter to use: text, text-summary, json-summary, json (repeatable)
    #[arg(short, long, global = true)]
    reporter: Vec<String>,

    /// Directory reports are written to
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Directory holding the per-process coverage snapshots
    #[arg(long, global = true)]
    temp_directory: Option<PathBuf>,

    /// Base directory for resolving script paths
    #[arg(long, global = true)]
    resolve: Option<PathBuf>,

    /// Keep scripts with relative names instead of filtering them out
    #[arg(long, global = true)]
    no_omit_relative: bool,

    /// Length of the module wrapper prepended to every script
    #[arg(long, global = true)]
    wrapper_length: Option<u64>,

    /// Also report source files that were never loaded
    #[arg(long, global = true)]
    all: bool,

    /// Root to search for never-loaded files (repeatable)
    #[arg(long, global = true)]
    src: Vec<PathBuf>,

    /// Allow files outside the working directory
    #[arg(long, global = true)]
    allow_external: bool,

    /// Hide fully covered files from the text report
    #[arg(long, global = true)]
    skip_full: bool,

    /// Count files under node_modules too
    #[arg(long, global = true)]
    no_exclude_node_modules: bool,

    /// Apply exclude rules only after source-map remapping
    #[arg(long, global = true)]
    exclude_after_remap: bool,

    /// Merge snapshot files one at a time to bound memory
    #[arg(long, global = true)]
    merge_async: bool,

    /// Check thresholds for every file instead of the total
    #[arg(long, global = true)]
    per_file: bool,

    /// Converter turning ranges into file coverage
    #[arg(long, global = true)]
    converter: Option<String>,

    /// Line coverage threshold
    #[arg(long, global = true)]
    lines: Option<f64>,

    /// Function coverage threshold
    #[arg(long, global = true)]
    functions: Option<f64>,

    /// Branch coverage threshold
    #[arg(long, global = true)]
    branches: Option<f64>,

    /// Statement coverage threshold
    #[arg(long, global = true)]
    statements: Option<f64>,

    /// Require 100% for every metric
    #[arg(long = "100", global = true)]
    hundred: bool,
}

impl OptionArgs {
    fn apply(self, options: &mut ReportOptions) {
        if !self.include.is_empty() {
            options.include = self.include;
        }
        if !self.exclude.is_empty() {
            options.exclude = self.exclude;
        }
        if !self.extension.is_empty() {
            options.extension = self.extension;
        }
        if !self.reporter.is_empty() {
            options.reporter = self.reporter;
        }
        if let Some(dir) = self.reports_dir {
            options.reports_dir = dir;
        }
        if let Some(dir) = self.temp_directory {
            options.temp_directory = dir;
        }
        if self.resolve.is_some() {
            options.resolve = self.resolve;
        }
        if self.no_omit_relative {
            options.omit_relative = false;
        }
        if self.no_exclude_node_modules {
            options.exclude_node_modules = false;
        }
        if let Some(len) = self.wrapper_length {
            options.wrapper_length = len;
        }
        if !self.src.is_empty() {
            options.src = self.src;
        }
        if let Some(converter) = self.converter {
            options.converter = converter;
        }
        options.all |= self.all;
        options.allow_external |= self.allow_external;
        options.skip_full |= self.skip_full;
        options.exclude_after_remap |= self.exclude_after_remap;
        options.merge_async |= self.merge_async;
        options.per_file |= self.per_file;

        let t = &mut options.thresholds;
        t.lines = self.lines.unwrap_or(t.lines);
        t.functions = self.functions.unwrap_or(t.functions);
        t.branches = self.branches.unwrap_or(t.branches);
        t.statements = self.statements.unwrap_or(t.statements);
        if self.hundred {
            *t = Thresholds::all(100.0);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge snapshots and print the configured reports.
    Report {
        /// Also check thresholds after reporting.
        #[arg(long)]
        check_coverage: bool,
    },

    /// Merge snapshots and check them against the thresholds.
    CheckCoverage,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let mut options =
        ReportOptions::load(&cwd, args.config.as_deref()).context("Failed to load config")?;
    args.options.apply(&mut options);

    let output = match args.command {
        Commands::Report { check_coverage } => {
            options.check_coverage |= check_coverage;
            cli::cmd_report(options)?
        }
        Commands::CheckCoverage => cli::cmd_check_coverage(options)?,
    };
    Ok(finish(&output))
}

fn finish(output: &CommandOutput) -> ExitCode {
    print!("{}", output.stdout);
    eprint!("{}", output.stderr());
    if output.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
