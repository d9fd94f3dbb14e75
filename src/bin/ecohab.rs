//! EcoHab CLI - Command-line interface for the EcoHab analytics engine
//!
//! Commands:
//! - run: Run every stage in order, printing progress
//! - stage: Run the stage producing one table
//! - show: Print a persisted table
//! - tables: List known table keys
//! - doctor: Diagnose project configuration and artifacts

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ecohab_analytics::config::StageOptions;
use ecohab_analytics::store::{ArtifactStore, LOCK_FILE_NAME};
use ecohab_analytics::types::RankingRow;
use ecohab_analytics::{
    run_pipeline, AnalysisContext, AnalysisError, RankingSeed, TableKey, ENGINE_VERSION,
    PRODUCER_NAME,
};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "ECOHAB_LOG";

/// EcoHab - behavioral analytics for EcoHab antenna recordings
#[derive(Parser)]
#[command(name = "ecohab")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Compute derived behavioral tables for an EcoHab project", long_about = None)]
struct Cli {
    /// Log level when ECOHAB_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline
    Run {
        /// Project directory or config file
        project: PathBuf,

        #[command(flatten)]
        options: OptionArgs,

        /// Print progress as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run the stage producing one table
    Stage {
        /// Project directory or config file
        project: PathBuf,

        /// Table key (see `ecohab tables`)
        table: String,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Print a persisted table
    Show {
        /// Project directory or config file
        project: PathBuf,

        /// Table key
        table: String,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: ShowFormat,

        /// Print at most this many rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List table keys and the stage producing each
    Tables,

    /// Diagnose project configuration and artifacts
    Doctor {
        /// Project directory or config file
        project: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct OptionArgs {
    /// Recompute tables even when artifacts exist
    #[arg(long)]
    overwrite: bool,

    /// Keep results in memory only
    #[arg(long)]
    no_save: bool,

    /// Chasing window in seconds
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    chasing_window: Option<Vec<f64>>,

    /// Minimum overlap in seconds for a pairwise meeting
    #[arg(long)]
    minimum_time: Option<f64>,

    /// Ranking history (parquet) or seed list (JSON) of a previous recording
    #[arg(long)]
    prev_ranking: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum ShowFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
    /// Comma-separated values with a header
    Csv,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // Escape codes only when a terminal reads the log
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), EcohabCliError> {
    match cli.command {
        Commands::Run {
            project,
            options,
            json,
        } => cmd_run(&project, &options, json),
        Commands::Stage {
            project,
            table,
            options,
        } => cmd_stage(&project, &table, &options),
        Commands::Show {
            project,
            table,
            format,
            limit,
        } => cmd_show(&project, &table, format, limit),
        Commands::Tables => cmd_tables(),
        Commands::Doctor { project, json } => cmd_doctor(&project, json),
    }
}

impl OptionArgs {
    /// Project defaults overridden by command-line flags
    fn resolve(&self, ctx: &AnalysisContext) -> Result<StageOptions, EcohabCliError> {
        let mut options = ctx
            .default_options()
            .with_overwrite(self.overwrite)
            .with_save(!self.no_save);

        if let Some(window) = &self.chasing_window {
            if let [min, max] = window.as_slice() {
                options = options.with_chasing_window(*min, *max);
            }
        }
        if let Some(minimum_time) = self.minimum_time {
            options = options.with_minimum_time(minimum_time);
        }
        if let Some(path) = &self.prev_ranking {
            options = options.with_prev_ranking(read_seeds(path)?);
        }

        options.validate()?;
        Ok(options)
    }
}

fn read_seeds(path: &Path) -> Result<Vec<RankingSeed>, EcohabCliError> {
    let is_parquet = path.extension().and_then(|e| e.to_str()) == Some("parquet");
    if !is_parquet {
        return Ok(serde_json::from_str(&fs::read_to_string(path)?)?);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let key = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EcohabCliError::BadArgument(format!("invalid path {}", path.display())))?;
    let history: Vec<RankingRow> = ArtifactStore::new(dir)
        .load(key)?
        .ok_or_else(|| EcohabCliError::BadArgument(format!("{} does not exist", path.display())))?;
    Ok(RankingSeed::from_history(&history))
}

fn cmd_run(project: &Path, args: &OptionArgs, json: bool) -> Result<(), EcohabCliError> {
    let mut ctx = AnalysisContext::open(project)?;
    let options = args.resolve(&ctx)?;
    let mut stdout = io::stdout();

    let mut run = run_pipeline(&mut ctx, options)?;
    for progress in run.by_ref() {
        let progress = progress?;
        if json {
            let line = serde_json::json!({
                "stage": progress.stage.name(),
                "completed": progress.completed,
                "total": progress.total,
                "rows": progress.rows,
                "cache_hit": progress.cache_hit,
            });
            writeln!(stdout, "{}", line)?;
        } else {
            writeln!(
                stdout,
                "[{}/{}] {:<22} {:>8} rows{}",
                progress.completed,
                progress.total,
                progress.stage.name(),
                progress.rows,
                if progress.cache_hit { " (cached)" } else { "" }
            )?;
        }
        stdout.flush()?;
    }

    if !json {
        println!("Run {} complete", run.manifest().run_id);
    }
    Ok(())
}

fn cmd_stage(project: &Path, table: &str, args: &OptionArgs) -> Result<(), EcohabCliError> {
    let key: TableKey = table.parse()?;
    let stage = key.producer().ok_or(EcohabCliError::InputTable(key))?;

    let mut ctx = AnalysisContext::open(project)?;
    let options = args.resolve(&ctx)?;
    let _lock = if options.save {
        Some(ctx.store().lock()?)
    } else {
        None
    };

    let rows = (stage.runner())(&mut ctx, &options)?;
    let report = serde_json::json!({
        "stage": stage.name(),
        "table": stage.output().as_str(),
        "rows": rows,
        "computed": ctx.computations(stage.output()) > 0,
    });
    println!("{}", report);
    Ok(())
}

fn cmd_show(
    project: &Path,
    table: &str,
    format: ShowFormat,
    limit: Option<usize>,
) -> Result<(), EcohabCliError> {
    let key: TableKey = table.parse()?;
    let ctx = AnalysisContext::open(project)?;
    let store = ctx.store();
    let mut batch = store
        .read_batch(key.as_str())?
        .ok_or_else(|| AnalysisError::MissingArtifact {
            table: key.to_string(),
            path: store.path(key.as_str()),
        })?;
    if let Some(limit) = limit {
        batch = batch.slice(0, limit.min(batch.num_rows()));
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        ShowFormat::Ndjson => {
            let mut writer = arrow::json::LineDelimitedWriter::new(&mut out);
            writer.write(&batch)?;
            writer.finish()?;
        }
        ShowFormat::Json => {
            {
                let mut writer = arrow::json::ArrayWriter::new(&mut out);
                writer.write(&batch)?;
                writer.finish()?;
            }
            writeln!(out)?;
        }
        ShowFormat::Csv => {
            let mut writer = arrow::csv::Writer::new(&mut out);
            writer.write(&batch)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn cmd_tables() -> Result<(), EcohabCliError> {
    for key in TableKey::ALL {
        let producer = key
            .producer()
            .map(|stage| stage.name())
            .unwrap_or("(input)");
        println!("{:<22} {}", key.as_str(), producer);
    }
    Ok(())
}

fn doctor_checks(project: &Path) -> Vec<DoctorCheck> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, ENGINE_VERSION),
    });

    match AnalysisContext::open(project) {
        Ok(ctx) => {
            let config = ctx.config();
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} animals, {} cages, {} tunnels",
                    config.animal_ids.len(),
                    config.cages.len(),
                    config.tunnels.len()
                ),
            });

            let store = ctx.store();
            for key in TableKey::ALL {
                let present = store.exists(key.as_str());
                let (status, message) = match (present, key.is_input()) {
                    (true, _) => (CheckStatus::Ok, "present".to_string()),
                    (false, true) => (
                        CheckStatus::Error,
                        format!("missing input {}", store.path(key.as_str()).display()),
                    ),
                    (false, false) => (CheckStatus::Warning, "not computed yet".to_string()),
                };
                checks.push(DoctorCheck {
                    name: key.as_str().to_string(),
                    status,
                    message,
                });
            }

            if store.root().join(LOCK_FILE_NAME).exists() {
                checks.push(DoctorCheck {
                    name: "lock".to_string(),
                    status: CheckStatus::Warning,
                    message: "results are locked; another run may be in progress".to_string(),
                });
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    checks
}

fn cmd_doctor(project: &Path, json: bool) -> Result<(), EcohabCliError> {
    let checks = doctor_checks(project);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        project: project.display().to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("EcoHab Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("Project:  {}", report.project);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(EcohabCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum EcohabCliError {
    Analysis(AnalysisError),
    Io(io::Error),
    Json(serde_json::Error),
    InputTable(TableKey),
    BadArgument(String),
    DoctorFailed,
}

impl From<AnalysisError> for EcohabCliError {
    fn from(e: AnalysisError) -> Self {
        EcohabCliError::Analysis(e)
    }
}

impl From<arrow::error::ArrowError> for EcohabCliError {
    fn from(e: arrow::error::ArrowError) -> Self {
        EcohabCliError::Analysis(e.into())
    }
}

impl From<io::Error> for EcohabCliError {
    fn from(e: io::Error) -> Self {
        EcohabCliError::Io(e)
    }
}

impl From<serde_json::Error> for EcohabCliError {
    fn from(e: serde_json::Error) -> Self {
        EcohabCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EcohabCliError> for CliError {
    fn from(e: EcohabCliError) -> Self {
        match e {
            EcohabCliError::Analysis(e) => {
                let (code, hint) = match &e {
                    AnalysisError::InvalidConfig(_) | AnalysisError::ConfigParse(_) => {
                        ("CONFIG_ERROR", Some("Run 'ecohab doctor' on the project"))
                    }
                    AnalysisError::MissingArtifact { .. } => (
                        "MISSING_ARTIFACT",
                        Some("Run the upstream stage first, or 'ecohab run' for everything"),
                    ),
                    AnalysisError::UnknownTable(_) => {
                        ("UNKNOWN_TABLE", Some("Run 'ecohab tables' for valid keys"))
                    }
                    AnalysisError::InvalidOption(_) => ("INVALID_OPTION", None),
                    AnalysisError::ProjectLocked(_) => (
                        "PROJECT_LOCKED",
                        Some("Wait for the other run, or remove a stale lock file"),
                    ),
                    _ => ("ANALYSIS_ERROR", None),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            EcohabCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EcohabCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EcohabCliError::InputTable(key) => CliError {
                code: "INPUT_TABLE".to_string(),
                message: format!("{} is an input table and has no stage", key),
                hint: Some("Input tables are written by the project bootstrap".to_string()),
            },
            EcohabCliError::BadArgument(message) => CliError {
                code: "BAD_ARGUMENT".to_string(),
                message,
                hint: None,
            },
            EcohabCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    project: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        project_location = "."
        animal_ids = ["m1", "m2"]
        cages = ["cage_1", "cage_2"]
        tunnels = ["tunnel_1"]

        [phase]
        light_start = "07:00:00"
        dark_start = "19:00:00"
    "#;

    fn status<'a>(checks: &'a [DoctorCheck], name: &str) -> Option<&'a CheckStatus> {
        checks.iter().find(|c| c.name == name).map(|c| &c.status)
    }

    #[test]
    fn test_doctor_flags_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
        let checks = doctor_checks(dir.path());

        assert!(matches!(status(&checks, "config"), Some(CheckStatus::Ok)));
        assert!(matches!(status(&checks, "binary_df"), Some(CheckStatus::Error)));
        assert!(matches!(status(&checks, "padded_df"), Some(CheckStatus::Error)));
        assert!(matches!(status(&checks, "ranking"), Some(CheckStatus::Warning)));

        // Every check is about the engine or the project itself
        assert!(checks.iter().all(|c| c.name == "engine_version"
            || c.name == "config"
            || c.name.parse::<TableKey>().is_ok()));
    }

    #[test]
    fn test_doctor_reports_unreadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let checks = doctor_checks(dir.path());
        assert!(matches!(status(&checks, "config"), Some(CheckStatus::Error)));
        assert!(status(&checks, "binary_df").is_none());
    }
}
