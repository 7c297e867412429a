#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for reconciling a mail export against a remote IMAP mailbox

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mail_migration_sync::{
    AppendMode, FolderDescriptor, ImapConfig, JsonLedger, MailboxSynchronizer, MigrationStore,
    Reconciler, Sighting, SyncSummary,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migration-cli")]
#[command(about = "Track which messages of a mail export exist in a remote IMAP mailbox")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List remote folders that can hold messages
    Folders,

    /// Show the remote folder tree with message counts
    Topology,

    /// Read every remote folder and update the ledger
    Sync {
        /// Ledger file (created if missing)
        #[arg(long)]
        ledger: PathBuf,
    },

    /// Record a message id found in the local export
    RecordLocal {
        /// Message-ID header value, including angle brackets
        message_id: String,

        /// Ledger file (created if missing)
        #[arg(long)]
        ledger: PathBuf,

        /// Sent date of the message (RFC 3339)
        #[arg(long, value_parser = parse_date)]
        date: Option<DateTime<Utc>>,
    },

    /// Record a local file that has no Message-ID header
    RecordProblem {
        /// File name or path inside the export
        file: String,

        /// Ledger file (created if missing)
        #[arg(long)]
        ledger: PathBuf,

        /// Sent date of the message (RFC 3339)
        #[arg(long, value_parser = parse_date)]
        date: Option<DateTime<Utc>>,

        /// Sender of the message
        #[arg(long)]
        from: Option<String>,
    },

    /// Upload an exported message file to a remote folder
    Append {
        /// Target folder
        folder: String,

        /// RFC 5322 message file (.eml)
        file: PathBuf,
    },

    /// Show migration statistics
    Stats {
        /// Ledger file
        #[arg(long)]
        ledger: PathBuf,

        /// Also list message ids missing from the remote mailbox
        #[arg(long)]
        missing: bool,
    },
}

fn parse_date(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("Invalid date '{s}': {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Folders => cmd_folders(&args).await?,
        Command::Topology => cmd_topology(&args).await?,
        Command::Sync { ledger } => cmd_sync(&args, ledger).await?,
        Command::RecordLocal {
            message_id,
            ledger,
            date,
        } => cmd_record_local(&args, ledger, message_id, *date)?,
        Command::RecordProblem {
            file,
            ledger,
            date,
            from,
        } => cmd_record_problem(ledger, file, *date, from.as_deref())?,
        Command::Append { folder, file } => cmd_append(&args, folder, file).await?,
        Command::Stats { ledger, missing } => cmd_stats(&args, ledger, *missing)?,
    }

    Ok(())
}

fn synchronizer() -> anyhow::Result<MailboxSynchronizer> {
    Ok(MailboxSynchronizer::new(ImapConfig::from_env()?))
}

async fn cmd_folders(args: &Args) -> anyhow::Result<()> {
    let folders = synchronizer()?.discover_message_folders().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else {
        for folder in &folders {
            println!("{folder}");
        }
    }

    Ok(())
}

async fn cmd_topology(args: &Args) -> anyhow::Result<()> {
    let descriptors: Vec<FolderDescriptor> = synchronizer()?.log_folder_topology().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else {
        for descriptor in &descriptors {
            println!("{descriptor}");
        }
    }

    Ok(())
}

async fn cmd_sync(args: &Args, path: &Path) -> anyhow::Result<()> {
    let sync = synchronizer()?;
    let ledger = JsonLedger::open(path)?;

    let summary = sync.synchronize_all_folders(&ledger, &ledger).await;
    ledger.flush()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn cmd_record_local(
    args: &Args,
    path: &Path,
    message_id: &str,
    date: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let ledger = JsonLedger::open(path)?;
    let sighting = Reconciler::new(&ledger, &ledger).record_local_sighting(message_id, date)?;
    ledger.flush()?;

    let status = ledger.find_by_message_id(message_id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let outcome = match sighting {
            Sighting::Created => "created",
            Sighting::Promoted => "promoted",
            Sighting::Unchanged => "unchanged",
        };
        println!("{message_id}: {outcome}");
    }

    Ok(())
}

fn cmd_record_problem(
    path: &Path,
    file: &str,
    date: Option<DateTime<Utc>>,
    from: Option<&str>,
) -> anyhow::Result<()> {
    let ledger = JsonLedger::open(path)?;
    Reconciler::new(&ledger, &ledger).record_local_problem(file, date, from)?;
    ledger.flush()?;

    println!("Recorded problem for {file}");
    Ok(())
}

async fn cmd_append(args: &Args, folder: &str, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read(file)?;
    let mode = synchronizer()?.append_message(folder, &raw).await?;

    if args.json {
        let value = serde_json::json!({ "folder": folder, "mode": mode });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let how = match mode {
            AppendMode::PreserveInternalDate => "sent date kept",
            AppendMode::Baseline => "server date",
        };
        println!("Appended {} to {folder} ({how})", file.display());
    }

    Ok(())
}

fn cmd_stats(args: &Args, path: &Path, missing: bool) -> anyhow::Result<()> {
    let ledger = JsonLedger::open(path)?;
    let stats = ledger.statistics()?;
    let missing_ids: Vec<String> = if missing {
        ledger
            .missing_in_remote()?
            .into_iter()
            .map(|s| s.message_id)
            .collect()
    } else {
        Vec::new()
    };

    if args.json {
        let value = serde_json::json!({
            "statistics": stats,
            "problems": ledger.problems()?.len(),
            "missing_in_remote_ids": missing_ids,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Total:             {}", stats.total);
        println!("In both:           {}", stats.in_both);
        println!("Missing in remote: {}", stats.missing_in_remote);
        println!("Missing in files:  {}", stats.missing_in_files);
        println!("Problems:          {}", ledger.problems()?.len());
        for id in &missing_ids {
            println!("  {id}");
        }
    }

    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    for report in &summary.folders {
        println!(
            "{:<30} {:>6} messages {:>6} headers",
            report.folder, report.message_count, report.headers
        );
    }
    println!(
        "\n{} folder(s) synced, {} failed, {} header(s)",
        summary.folders_synced, summary.folders_failed, summary.headers_processed
    );
    println!(
        "{} new, {} promoted, {} unchanged, {} problem(s), {} failure(s)",
        summary.stats.created,
        summary.stats.promoted,
        summary.stats.unchanged,
        summary.stats.problems,
        summary.stats.failures
    );
}
