//! Scan CLI - Command-line interface for Synheart Scan
//!
//! Commands:
//! - replay: Score a recorded capture (scan.capture_record.v1 NDJSON)
//! - validate: Validate capture record schema
//! - calibration: Print or list calibration presets
//! - doctor: Diagnose configuration and calibration files

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use synheart_scan::calibration::CalibrationTable;
use synheart_scan::config::ScanConfig;
use synheart_scan::encoder::ScanEncoder;
use synheart_scan::schema::{CaptureReplay, CaptureRecord, SCHEMA_VERSION};
use synheart_scan::{PRODUCER_NAME, SCAN_VERSION};

/// Scan - Real-time multimodal feature pipeline
#[derive(Parser)]
#[command(name = "scan")]
#[command(author = "Synheart AI Inc")]
#[command(version = SCAN_VERSION)]
#[command(about = "Score face and voice capture sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a recorded capture
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Calibration preset
        #[arg(long, default_value = "deception", conflicts_with = "table")]
        use_case: String,

        /// Calibration table JSON file (overrides --use-case)
        #[arg(long)]
        table: Option<PathBuf>,

        /// Pipeline configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print the payload
        #[arg(long)]
        pretty: bool,
    },

    /// Validate capture record schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a calibration preset as JSON
    Calibration {
        /// Preset name
        #[arg(required_unless_present = "list")]
        name: Option<String>,

        /// List preset names
        #[arg(long)]
        list: bool,
    },

    /// Diagnose configuration and calibration files
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a calibration table file
        #[arg(long)]
        table: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "synheart_scan=warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ScanCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            use_case,
            table,
            config,
            pretty,
        } => cmd_replay(
            &input,
            &output,
            &use_case,
            table.as_deref(),
            config.as_deref(),
            pretty,
        ),
        Commands::Validate { input, json } => cmd_validate(&input, json),
        Commands::Calibration { name, list } => cmd_calibration(name.as_deref(), list),
        Commands::Doctor {
            config,
            table,
            json,
        } => cmd_doctor(config.as_deref(), table.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, ScanCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_table(use_case: &str, table: Option<&Path>) -> Result<CalibrationTable, ScanCliError> {
    match table {
        Some(path) => Ok(CalibrationTable::from_json(&fs::read_to_string(path)?)?),
        None => CalibrationTable::preset(use_case)
            .ok_or_else(|| ScanCliError::UnknownPreset(use_case.to_string())),
    }
}

fn load_config(config: Option<&Path>) -> Result<ScanConfig, ScanCliError> {
    match config {
        Some(path) => Ok(ScanConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(ScanConfig::default()),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    use_case: &str,
    table: Option<&Path>,
    config: Option<&Path>,
    pretty: bool,
) -> Result<(), ScanCliError> {
    let table = load_table(use_case, table)?;
    let config = load_config(config)?;

    let records = CaptureReplay::parse_ndjson(&read_input(input)?)?;
    if records.is_empty() {
        return Err(ScanCliError::NoRecords);
    }
    info!(records = records.len(), use_case = table.name(), "replaying capture");

    let result = CaptureReplay::replay(&records, &config, Arc::new(table))?;
    let payload = ScanEncoder::new().encode(&result);
    let mut output_data = if pretty {
        serde_json::to_string_pretty(&payload)?
    } else {
        serde_json::to_string(&payload)?
    };
    output_data.push('\n');

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), ScanCliError> {
    let input_data = read_input(input)?;

    let mut report = ValidationReport {
        total_records: 0,
        valid_records: 0,
        invalid_records: 0,
        errors: Vec::new(),
    };

    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        report.total_records += 1;

        let outcome = serde_json::from_str::<CaptureRecord>(trimmed)
            .map_err(|e| e.to_string())
            .and_then(|record| record.validate().map_err(|e| e.to_string()));

        match outcome {
            Ok(()) => report.valid_records += 1,
            Err(error) => {
                report.invalid_records += 1;
                report.errors.push(ValidationErrorDetail {
                    line: index + 1,
                    error,
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Line {}: {}", err.line, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(ScanCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_calibration(name: Option<&str>, list: bool) -> Result<(), ScanCliError> {
    if list {
        for preset in CalibrationTable::PRESETS {
            println!("{preset}");
        }
        return Ok(());
    }

    let name = name.unwrap_or_default();
    let table = CalibrationTable::preset(name)
        .ok_or_else(|| ScanCliError::UnknownPreset(name.to_string()))?;
    println!("{}", table.to_json()?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, table: Option<&Path>, json: bool) -> Result<(), ScanCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "scan_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Scan version {}", SCAN_VERSION),
        },
        DoctorCheck {
            name: "schema_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Capture schema: {}", SCHEMA_VERSION),
        },
        DoctorCheck {
            name: "presets".to_string(),
            status: CheckStatus::Ok,
            message: format!("Presets: {}", CalibrationTable::PRESETS.join(", ")),
        },
    ];

    if let Some(path) = config {
        checks.push(check_file("config", path, |content| {
            ScanConfig::from_json(content).map(|c| {
                format!(
                    "Config valid (tick {} ms, alpha {})",
                    c.tick_interval_ms, c.smoothing_alpha
                )
            })
        }));
    }

    if let Some(path) = table {
        checks.push(check_file("calibration", path, |content| {
            CalibrationTable::from_json(content).map(|t| {
                format!(
                    "Table '{}' valid ({} features, {:?} mode)",
                    t.name(),
                    t.features().len(),
                    t.mode()
                )
            })
        }));
    }

    // Check stdin is available (for piping captures)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay from stdin ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SCAN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scan Doctor Report");
        println!("==================");
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ScanCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_file<F>(name: &str, path: &Path, parse: F) -> DoctorCheck
where
    F: FnOnce(&str) -> Result<String, synheart_scan::ScanError>,
{
    if !path.exists() {
        return DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist", path.display()),
        };
    }

    let (status, message) = match fs::read_to_string(path) {
        Ok(content) => match parse(&content) {
            Ok(message) => (CheckStatus::Ok, message),
            Err(e) => (CheckStatus::Error, format!("Invalid {name} file: {e}")),
        },
        Err(e) => (CheckStatus::Error, format!("Cannot read {name} file: {e}")),
    };

    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

// Error types

#[derive(Debug)]
enum ScanCliError {
    Io(io::Error),
    Scan(synheart_scan::ScanError),
    Json(serde_json::Error),
    UnknownPreset(String),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for ScanCliError {
    fn from(e: io::Error) -> Self {
        ScanCliError::Io(e)
    }
}

impl From<synheart_scan::ScanError> for ScanCliError {
    fn from(e: synheart_scan::ScanError) -> Self {
        ScanCliError::Scan(e)
    }
}

impl From<serde_json::Error> for ScanCliError {
    fn from(e: serde_json::Error) -> Self {
        ScanCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ScanCliError> for CliError {
    fn from(e: ScanCliError) -> Self {
        match e {
            ScanCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ScanCliError::Scan(e) => {
                let code = match &e {
                    synheart_scan::ScanError::InsufficientData(_) => "INSUFFICIENT_DATA",
                    synheart_scan::ScanError::InvalidCalibration(_) => "INVALID_CALIBRATION",
                    synheart_scan::ScanError::InvalidConfig(_) => "INVALID_CONFIG",
                    synheart_scan::ScanError::MissingFeature(_) => "MISSING_FEATURE",
                    _ => "SCAN_ERROR",
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(format!("Ensure input matches {} schema", SCHEMA_VERSION)),
                }
            }
            ScanCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ScanCliError::UnknownPreset(name) => CliError {
                code: "UNKNOWN_PRESET".to_string(),
                message: format!("Unknown calibration preset '{}'", name),
                hint: Some("Run 'scan calibration --list'".to_string()),
            },
            ScanCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            ScanCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            ScanCliError::DoctorFailed => CliError {
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
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
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
