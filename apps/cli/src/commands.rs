//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Report, Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use metakmer_core::builder::ArtifactLayout;
use metakmer_core::pipeline::{
    ProgressReporter, RunResult, Stage, StageState, plan_pipeline, run_pipeline,
};
use metakmer_core::runner::{Invocation, ProcessRunner};
use metakmer_shared::{AppConfig, MetakmerError, RunConfig, init_config, load_config};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// metakmer: reference-free k-mer features for metagenomic sample categories.
#[derive(Parser, Debug)]
#[command(
    name = "metakmer",
    version,
    about = "Turn categorized metagenomic samples into a per-sample k-mer feature table.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the five-stage pipeline.
    Run(RunArgs),

    /// Print every external call a run would make, without executing anything.
    Plan(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags shared by `run` and `plan`.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// K-mer size (1-31).
    #[arg(short = 'k', long)]
    pub kmer_size: u8,

    /// Two-column manifest: sample path and category label, tab-separated.
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Number of top chi-squared k-mers to extract per comparison.
    #[arg(short, long)]
    pub num_kmers: u32,

    /// Frequency below which k-mers are treated as sequencing errors [default: 1].
    #[arg(long)]
    pub bad_freq: Option<u32>,

    /// Graph traversal depth around pivot k-mers [default: 1].
    #[arg(long)]
    pub depth: Option<u32>,

    /// Directory of pre-computed `<sample>.kmers.bin` files. Skips counting.
    #[arg(long)]
    pub kmers_dir: Option<PathBuf>,

    /// Skip graph and contig export.
    #[arg(long)]
    pub skip_graph: bool,

    /// Engine thread count.
    #[arg(short, long)]
    pub threads: Option<u32>,

    /// Engine memory budget, e.g. 500M or 8G.
    #[arg(long)]
    pub memory: Option<String>,

    /// Working directory for every artifact [default: workDir].
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Exit status for a flag parsing failure. Help and version output succeed;
/// any usage error is an input validation failure.
pub(crate) fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "metakmer=info",
        1 => "metakmer=debug",
        _ => "metakmer=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Plan(args) => cmd_plan(args),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Merge CLI flags over the loaded config file.
fn build_run_config(args: RunArgs, config: &AppConfig) -> RunConfig {
    let mut run = RunConfig::new(args.kmer_size, args.manifest, args.num_kmers, config);

    if let Some(bad_freq) = args.bad_freq {
        run.bad_freq = bad_freq;
    }
    if let Some(depth) = args.depth {
        run.depth = depth;
    }
    if let Some(work_dir) = args.work_dir {
        run.work_dir = work_dir;
    }
    if args.threads.is_some() {
        run.threads = args.threads;
    }
    if args.memory.is_some() {
        run.memory = args.memory;
    }
    run.kmers_dir = args.kmers_dir;
    run.skip_graph = args.skip_graph;
    run
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let run_config = build_run_config(args, &config);

    info!(
        manifest = %run_config.manifest.display(),
        k = run_config.kmer_size,
        top = run_config.num_kmers,
        work_dir = %run_config.work_dir.display(),
        "running pipeline"
    );

    let report_path = ArtifactLayout::new(&run_config).report_file();
    let reporter = CliProgress::new();
    let result = run_pipeline(&run_config, &ProcessRunner, &reporter).await;
    reporter.spinner.finish_and_clear();
    let result = result.map_err(|err| run_failure(err, &report_path))?;

    let skipped: Vec<&str> = Stage::ALL
        .into_iter()
        .filter(|s| result.report.stage(*s).state == StageState::Skipped)
        .map(Stage::name)
        .collect();

    println!();
    println!("  Pipeline completed successfully!");
    println!("  Run:     {}", result.report.run_id);
    println!("  Mode:    {}", result.mode);
    println!("  Units:   {}", result.units.join(", "));
    println!("  Samples: {}", result.rows);
    println!("  Columns: {}", result.columns);
    println!("  Table:   {}", result.feature_table.display());
    if !skipped.is_empty() {
        println!("  Skipped: {}", skipped.join(", "));
    }
    println!("  Time:    {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

/// Add a hint on where to look next: the flags, or the run report.
fn run_failure(err: MetakmerError, report_path: &Path) -> Report {
    let hint = if err.is_input_validation() {
        "invalid input, check the manifest and flags".to_string()
    } else if let Some(stage) = err.stage() {
        format!(
            "pipeline aborted in stage {stage}, see {}",
            report_path.display()
        )
    } else {
        "pipeline failed".to_string()
    };
    Report::new(err).wrap_err(hint)
}

fn cmd_plan(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let run_config = build_run_config(args, &config);

    let plan = plan_pipeline(&run_config)
        .wrap_err("could not plan the run, check the manifest and flags")?;

    println!("# mode: {}", plan.mode);
    println!("# units: {}", plan.units.join(", "));
    for stage in &plan.skipped {
        println!("# {stage}: skipped");
    }
    for invocation in &plan.invocations {
        println!("{}", invocation.command_line());
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("Stage {} ({})", stage.number(), stage.name()));
    }

    fn stage_finished(&self, stage: Stage, state: StageState) {
        if state == StageState::Skipped {
            self.spinner
                .println(format!("  stage {} ({}) skipped", stage.number(), stage.name()));
        }
    }

    fn invocation_started(&self, invocation: &Invocation, current: usize, total: usize) {
        let stage = invocation.stage;
        let unit = invocation.unit.as_deref().unwrap_or("all samples");
        self.spinner.set_message(format!(
            "Stage {} ({}) [{current}/{total}] {unit}",
            stage.number(),
            stage.name()
        ));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("metakmer").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_requires_mandatory_flags() {
        assert!(Cli::try_parse_from(["metakmer", "run", "-k", "21", "-n", "50"]).is_err());
        assert!(Cli::try_parse_from(["metakmer", "run", "-m", "m.tsv", "-n", "50"]).is_err());
    }

    #[test]
    fn usage_errors_exit_with_one() {
        let err = Cli::try_parse_from(["metakmer", "run", "-k", "21", "-n", "50"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_exit_code(&err), 1);

        let err = Cli::try_parse_from(["metakmer", "run", "-k", "x", "-m", "m.tsv", "-n", "5"])
            .unwrap_err();
        assert_eq!(parse_exit_code(&err), 1);

        let help = Cli::try_parse_from(["metakmer", "--help"]).unwrap_err();
        assert_eq!(parse_exit_code(&help), 0);
        let version = Cli::try_parse_from(["metakmer", "--version"]).unwrap_err();
        assert_eq!(parse_exit_code(&version), 0);
    }

    #[test]
    fn run_failures_point_at_flags_or_report() {
        let report = Path::new("workDir/pipeline_report.json");

        let invalid = run_failure(MetakmerError::validation("k too large"), report);
        assert!(invalid.to_string().contains("check the manifest and flags"));

        let aborted = run_failure(
            MetakmerError::assembly("ragged row").in_stage(4, "features", Some("gut")),
            report,
        );
        assert!(aborted.to_string().contains("stage 4"));
        assert!(aborted.to_string().contains("pipeline_report.json"));
    }

    #[test]
    fn flags_override_config_defaults() {
        let cli = parse(&[
            "run", "-k", "25", "-m", "m.tsv", "-n", "100", "--bad-freq", "3", "-t", "8",
            "-w", "/tmp/out", "--skip-graph",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = AppConfig::default();
        config.defaults.depth = 4;
        config.defaults.memory = Some("2G".into());
        let run = build_run_config(args, &config);

        assert_eq!(run.kmer_size, 25);
        assert_eq!(run.num_kmers, 100);
        assert_eq!(run.bad_freq, 3);
        assert_eq!(run.depth, 4);
        assert_eq!(run.threads, Some(8));
        assert_eq!(run.memory.as_deref(), Some("2G"));
        assert_eq!(run.work_dir, PathBuf::from("/tmp/out"));
        assert!(run.skip_graph);
        assert!(run.kmers_dir.is_none());
    }

    #[test]
    fn defaults_come_from_config_file() {
        let cli = parse(&["-vv", "plan", "-k", "21", "-m", "m.tsv", "-n", "10"]);
        assert_eq!(cli.verbose, 2);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };

        let run = build_run_config(args, &AppConfig::default());
        assert_eq!(run.bad_freq, 1);
        assert_eq!(run.depth, 1);
        assert_eq!(run.work_dir, PathBuf::from("workDir"));
        assert_eq!(run.engine, "metakmer-engine");
    }
}
