//! Standalone CLI for signed audit-log export and tamper verification
//! (spec.md §6 "Exit codes (CLI audit tool)"), grounded in
//! `shared/audit/export.py`'s command-line entry point.
//!
//! Exit codes: `0` success, `1` tampering detected or usage error, other
//! non-zero on uncaught errors.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use intelligence_service::config::Config;
use intelligence_service::db;
use intelligence_service::services::audit::export::AuditExporter;
use intelligence_service::services::audit::AuditLog;

#[derive(Parser, Debug)]
#[command(name = "audit-export")]
#[command(version, about = "Export and verify the tamper-evident audit log")]
struct Cli {
    /// Path to configuration file (same format as the server's)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export events in `[start, end)` to a signed CSV plus sidecars.
    Export {
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Verify a previously exported CSV against its `.sig`/`.meta.json` sidecars.
    Verify {
        #[arg(value_name = "CSV_PATH")]
        csv_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("audit-export: {e}");
            ExitCode::from(2)
        },
    }
}

async fn run() -> Result<ExitCode, anyhow::Error> {
    let cli = Cli::parse();
    let config = if let Some(path) = &cli.config {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)?
    } else {
        Config::load()?
    };

    let pool = db::connect(&config.database.audit_db_path()).await?;
    let audit = AuditLog::new(pool).await?;

    match cli.command {
        Command::Export { start, end, output } => {
            if end <= start {
                eprintln!("audit-export: --end must be after --start");
                return Ok(ExitCode::from(1));
            }
            let exporter = AuditExporter::new(&audit, config.audit.secret_key.clone());
            let manifest = exporter.export_csv(start, end, &output).await?;
            println!(
                "exported {} events to {} (csv_hash={})",
                manifest.record_count,
                output.display(),
                manifest.csv_hash
            );
            Ok(ExitCode::SUCCESS)
        },
        Command::Verify { csv_path } => {
            let report = AuditExporter::verify_export(&csv_path, &config.audit.secret_key)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.tampered {
                eprintln!("audit-export: tampering detected");
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}
