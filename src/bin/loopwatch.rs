//! loopwatch CLI - Command-line interface for the death-loop engine
//!
//! Commands:
//! - analyze: Detect death loops in usage rows and generate intervention scripts
//! - validate: Validate usage rows
//! - templates: List or print intervention templates
//! - doctor: Diagnose configuration and data access
//! - schema: Print schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use loopwatch::config::{EngineConfig, LossModel};
use loopwatch::pipeline::DeathLoopEngine;
use loopwatch::report::{UsageReport, REPORT_VERSION};
use loopwatch::schema::{RawUsageRow, UsageRowAdapter, SCHEMA_VERSION};
use loopwatch::templates::TemplateCatalog;
use loopwatch::EngineError;
use loopwatch::{LOOPWATCH_VERSION, PRODUCER_NAME};

/// loopwatch - Find app-switching death loops and generate interventions
#[derive(Parser)]
#[command(name = "loopwatch")]
#[command(version = LOOPWATCH_VERSION)]
#[command(about = "Detect app-switching death loops and generate Hammerspoon interventions", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze usage rows and write the report
    Analyze {
        /// Input path (use - for stdin; sqlite needs a file)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Report output path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Report format
        #[arg(long, default_value = "json-pretty")]
        format: OutputFormat,

        /// Write generated scripts and a manifest into this directory
        #[arg(long)]
        scripts_dir: Option<PathBuf>,

        /// Analysis window in days
        #[arg(long)]
        window_days: Option<u32>,

        /// Bounce threshold in seconds
        #[arg(long)]
        bounce_threshold: Option<f64>,

        /// Hourly valuation rate
        #[arg(long)]
        hourly_rate: Option<f64>,

        /// How minutes lost are estimated
        #[arg(long)]
        loss_model: Option<LossModelArg>,

        /// Number of patterns listed in the report
        #[arg(long)]
        top: Option<usize>,
    },

    /// Validate usage rows
    Validate {
        /// Input path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List templates, or print one template's source
    Templates {
        /// Template id to print
        #[arg(long)]
        show: Option<String>,

        /// Configuration file with extra templates
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and data access
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Usage database to check
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// JSON array of rows
    Json,
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// Knowledge-store SQLite database (ZOBJECT table)
    Sqlite,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Human-readable text
    Text,
}

#[derive(Clone, ValueEnum)]
enum LossModelArg {
    TransitionGap,
    RoundTrip,
    PerSwitch,
}

impl From<LossModelArg> for LossModel {
    fn from(arg: LossModelArg) -> Self {
        match arg {
            LossModelArg::TransitionGap => LossModel::TransitionGap,
            LossModelArg::RoundTrip => LossModel::RoundTrip,
            LossModelArg::PerSwitch => LossModel::PerSwitch,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input rows (usage.row.v1)
    Input,
    /// Report document
    Report,
    /// Engine configuration with every default filled in
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    // RUST_LOG is parsed after the default level so it wins
    env_logger::Builder::new().filter_level(level).parse_default_env().init();
}

fn run(cli: Cli) -> Result<(), LoopwatchCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            input_format,
            config,
            output,
            format,
            scripts_dir,
            window_days,
            bounce_threshold,
            hourly_rate,
            loss_model,
            top,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(days) = window_days {
                config.window_days = days;
            }
            if let Some(secs) = bounce_threshold {
                config.bounce_threshold_secs = secs;
            }
            if let Some(rate) = hourly_rate {
                config.hourly_rate = rate;
            }
            if let Some(model) = loss_model {
                config.loss_model = model.into();
            }
            if let Some(n) = top {
                config.report_top_n = n;
            }
            cmd_analyze(&input, input_format, config, &output, format, scripts_dir.as_deref())
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Templates { show, config, json } => cmd_templates(show.as_deref(), config.as_deref(), json),

        Commands::Doctor { config, db, json } => cmd_doctor(config.as_deref(), db.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn cmd_analyze(
    input: &Path,
    input_format: InputFormat,
    config: EngineConfig,
    output: &Path,
    format: OutputFormat,
    scripts_dir: Option<&Path>,
) -> Result<(), LoopwatchCliError> {
    // Invalid configuration fails before any data is read
    let engine = DeathLoopEngine::new(config)?;
    let rows = read_rows(input, &input_format, &engine.config().stream_tag)?;

    let analysis = engine.analyze(&rows);
    let report = engine.report(&analysis);

    if let Some(dir) = scripts_dir {
        fs::create_dir_all(dir)?;
        for script in &analysis.scripts {
            fs::write(dir.join(&script.file_name), &script.rendered_source)?;
        }
        fs::write(
            dir.join("manifest.json"),
            serde_json::to_string_pretty(&report.generated_scripts)?,
        )?;
        log::info!("Wrote {} scripts to {}", analysis.scripts.len(), dir.display());
    }

    let output_data = format_output(&report, &format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), LoopwatchCliError> {
    // Stream filtering is not validation; keep every row
    let rows = read_rows(input, &input_format, "")?;
    let results = UsageRowAdapter::validate_rows(&rows);

    let report = ValidationReport {
        total_rows: rows.len(),
        valid_rows: rows.len() - results.len(),
        invalid_rows: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                app: r.app.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:   {}", report.total_rows);
        println!("Valid rows:   {}", report.valid_rows);
        println!("Invalid rows: {}", report.invalid_rows);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Row {} ({}): {}",
                    err.index,
                    err.app.as_deref().unwrap_or("no app"),
                    err.error
                );
            }
        }
    }

    if report.invalid_rows > 0 {
        Err(LoopwatchCliError::ValidationFailed(report.invalid_rows))
    } else {
        Ok(())
    }
}

fn cmd_templates(show: Option<&str>, config: Option<&Path>, json: bool) -> Result<(), LoopwatchCliError> {
    let config = load_config(config)?;
    let catalog = TemplateCatalog::with_templates(&config.generation.extra_templates).map_err(EngineError::from)?;

    if let Some(id) = show {
        let template = catalog
            .get(id)
            .ok_or_else(|| LoopwatchCliError::UnknownTemplate(id.to_string()))?;
        if json {
            println!("{}", serde_json::to_string_pretty(template)?);
        } else {
            print!("{}", template.source);
        }
        return Ok(());
    }

    if json {
        let templates: Vec<_> = catalog.iter().collect();
        println!("{}", serde_json::to_string_pretty(&templates)?);
    } else {
        for template in catalog.iter() {
            let params: Vec<&str> = template.params.iter().map(|p| p.name.as_str()).collect();
            println!("{:<24} {}", template.id, template.description);
            println!("{:<24} params: {}", "", params.join(", "));
        }
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, db: Option<&Path>, json: bool) -> Result<(), LoopwatchCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "loopwatch_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("loopwatch version {}", LOOPWATCH_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}, report {}", SCHEMA_VERSION, REPORT_VERSION),
    });

    // Config: parse, validate, resolve template references
    let engine_config = match config {
        Some(path) => match EngineConfig::from_path(path) {
            Ok(c) => Some(c),
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                None
            }
        },
        None => Some(EngineConfig::default()),
    };
    if let Some(engine_config) = engine_config {
        let stream_tag = engine_config.stream_tag.clone();
        match DeathLoopEngine::new(engine_config) {
            Ok(engine) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Configuration valid ({} templates, stream {:?})",
                    engine.templates().len(),
                    stream_tag
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        }

        if let Some(db_path) = db {
            let tag = (!stream_tag.is_empty()).then_some(stream_tag.as_str());
            checks.push(match loopwatch::schema::sqlite::load_rows(db_path, tag) {
                Ok(rows) if rows.is_empty() => DoctorCheck {
                    name: "database".to_string(),
                    status: CheckStatus::Warning,
                    message: "Database readable but holds no usage rows".to_string(),
                },
                Ok(rows) => DoctorCheck {
                    name: "database".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Database readable ({} usage rows)", rows.len()),
                },
                Err(e) => DoctorCheck {
                    name: "database".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input with a file)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: LOOPWATCH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("loopwatch Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(LoopwatchCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), LoopwatchCliError> {
    match schema_type {
        SchemaType::Input => println!("{}", input_json_schema()),
        SchemaType::Report => println!("{}", report_json_schema()),
        SchemaType::Config => println!("{}", EngineConfig::default().to_json()?),
    }
    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<EngineConfig, LoopwatchCliError> {
    Ok(match path {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    })
}

fn read_rows(input: &Path, format: &InputFormat, stream_tag: &str) -> Result<Vec<RawUsageRow>, LoopwatchCliError> {
    let from_stdin = input.to_string_lossy() == "-";

    if let InputFormat::Sqlite = format {
        if from_stdin {
            return Err(LoopwatchCliError::StdinSqlite);
        }
        let tag = (!stream_tag.is_empty()).then_some(stream_tag);
        return Ok(loopwatch::schema::sqlite::load_rows(input, tag)?);
    }

    let rows = if from_stdin {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        match format {
            InputFormat::Ndjson => UsageRowAdapter::parse_ndjson(&buffer)?,
            _ => UsageRowAdapter::parse_array(&buffer)?,
        }
    } else {
        match format {
            InputFormat::Ndjson => UsageRowAdapter::read_ndjson_file(input)?,
            _ => UsageRowAdapter::read_array_file(input)?,
        }
    };
    Ok(rows)
}

fn format_output(report: &UsageReport, format: &OutputFormat) -> Result<String, LoopwatchCliError> {
    Ok(match format {
        OutputFormat::Json => report.to_json(false)? + "\n",
        OutputFormat::JsonPretty => report.to_json(true)? + "\n",
        OutputFormat::Text => report.to_text(),
    })
}

fn input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "One foreground interval of an app, as seconds since the reference epoch",
        "type": "object",
        "required": ["start", "app"],
        "properties": {
            "start": {
                "type": ["number", "string"],
                "description": "Start offset in seconds (aliases: start_offset, ZSTARTDATE)"
            },
            "end": {
                "type": ["number", "string", "null"],
                "description": "End offset in seconds; null while the interval was open (aliases: end_offset, ZENDDATE)"
            },
            "app": {
                "type": "string",
                "description": "App identifier (aliases: app_identifier, bundle_id, ZVALUESTRING)"
            },
            "stream": {
                "type": "string",
                "description": "Stream tag (aliases: stream_tag, ZSTREAMNAME)"
            }
        }
    })
    .to_string()
}

fn report_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": format!("loopwatch report {}", REPORT_VERSION),
        "type": "object",
        "required": [
            "report_version", "producer", "status", "window_days", "total_switches",
            "bounce_count", "bounce_rate", "top_patterns", "estimated_weekly_cost",
            "generated_scripts", "warnings"
        ],
        "properties": {
            "report_version": { "type": "string" },
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" }
                }
            },
            "status": { "enum": ["ok", "ok_with_warnings"] },
            "window_days": { "type": "integer" },
            "window_start": { "type": "string", "format": "date-time" },
            "window_end": { "type": "string", "format": "date-time" },
            "total_switches": { "type": "integer" },
            "bounce_count": { "type": "integer" },
            "bounce_rate": { "type": "number", "minimum": 0, "maximum": 1 },
            "rapid_switches": { "type": "integer" },
            "distinct_apps": { "type": "integer" },
            "top_patterns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "rank": { "type": "integer" },
                        "apps": { "type": "array", "items": { "type": "string" }, "minItems": 2, "maxItems": 2 },
                        "frequency": { "type": "integer" },
                        "directional_counts": {
                            "type": "object",
                            "properties": {
                                "a_to_b": { "type": "integer" },
                                "b_to_a": { "type": "integer" }
                            }
                        },
                        "avg_gap_secs": { "type": "number" },
                        "minutes_lost": { "type": "number" },
                        "severity_tier": { "enum": ["low", "medium", "high"] },
                        "classification": { "enum": ["workflow", "distraction", "ambiguous"] },
                        "classification_source": { "enum": ["rule", "annotation", "default"] },
                        "cost": { "type": "number" },
                        "weekly_cost": { "type": "number" }
                    }
                }
            },
            "estimated_weekly_cost": { "type": "number" },
            "generated_scripts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "template_id": { "type": "string" },
                        "target_apps": { "type": "array", "items": { "type": "string" } },
                        "file_name": { "type": "string" }
                    }
                }
            },
            "script_failures": { "type": "array", "items": { "type": "object" } },
            "warnings": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum LoopwatchCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    UnknownTemplate(String),
    StdinSqlite,
    DoctorFailed,
}

impl From<io::Error> for LoopwatchCliError {
    fn from(e: io::Error) -> Self {
        LoopwatchCliError::Io(e)
    }
}

impl From<EngineError> for LoopwatchCliError {
    fn from(e: EngineError) -> Self {
        LoopwatchCliError::Engine(e)
    }
}

impl From<serde_json::Error> for LoopwatchCliError {
    fn from(e: serde_json::Error) -> Self {
        LoopwatchCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<LoopwatchCliError> for CliError {
    fn from(e: LoopwatchCliError) -> Self {
        match e {
            LoopwatchCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            LoopwatchCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::DataAccess { .. } => (
                        "DATA_ACCESS",
                        "Grant read access to the usage database or pass --input with a copy of it",
                    ),
                    EngineError::Config(_) => ("CONFIG_ERROR", "Run 'loopwatch doctor --config <file>' for details"),
                    EngineError::ParseError(_) | EngineError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure input matches the usage.row.v1 schema")
                    }
                    EngineError::TemplateRender(_) => ("TEMPLATE_ERROR", "Run 'loopwatch templates' to list templates"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            LoopwatchCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            LoopwatchCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} rows failed validation", count),
                hint: Some("Malformed rows are skipped during analysis".to_string()),
            },
            LoopwatchCliError::UnknownTemplate(id) => CliError {
                code: "UNKNOWN_TEMPLATE".to_string(),
                message: format!("No template named {}", id),
                hint: Some("Run 'loopwatch templates' to list templates".to_string()),
            },
            LoopwatchCliError::StdinSqlite => CliError {
                code: "IO_ERROR".to_string(),
                message: "SQLite input cannot be read from stdin".to_string(),
                hint: Some("Pass the database path with --input".to_string()),
            },
            LoopwatchCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_rows: usize,
    valid_rows: usize,
    invalid_rows: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    app: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
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
