//! chainlog: operator CLI for a JSON Lines audit ledger.
//!
//! Usage:
//!   cargo run -p chainlog-demo -- scenario
//!   cargo run -p chainlog-demo -- stress --writers 8 --per-writer 250
//!   cargo run -p chainlog-demo -- query --actor u1 --limit 20
//!   cargo run -p chainlog-demo -- verify --from 1 --to 500
//!   cargo run -p chainlog-demo -- head
//!
//! Every subcommand accepts `--ledger <path>` (default `chainlog.jsonl`) and
//! `--config <toml>`.  `verify` exits with status 2 when tampering is found.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainlog_contracts::{
    entry::{AuditAction, LogEntry},
    error::{LedgerError, LedgerResult},
    event::AuditEvent,
    query::LedgerQuery,
    verify::VerificationResult,
};
use chainlog_core::{producer, AuditLedger, LedgerConfig};
use chainlog_store::JsonlLedgerStore;

// ── CLI definition ────────────────────────────────────────────────────────────

/// chainlog: tamper-evident, hash-chained audit ledger.
#[derive(Parser)]
#[command(
    name = "chainlog",
    about = "Append to, query, and verify a hash-chained audit ledger",
    long_about = "Operates on a JSON Lines ledger file in which every entry carries\n\
                  the SHA-256 digest of its predecessor."
)]
struct Cli {
    /// Ledger file; created if it does not exist.
    #[arg(long, global = true, default_value = "chainlog.jsonl")]
    ledger: PathBuf,

    /// TOML ledger configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a short user session, query it back, and verify the chain.
    Scenario {
        #[arg(long, default_value = "u1")]
        user: String,
    },
    /// Append from many threads at once, then verify.
    Stress {
        #[arg(long, default_value_t = 8)]
        writers: usize,
        #[arg(long, default_value_t = 100)]
        per_writer: usize,
    },
    /// Print matching entries as JSON, one per line.
    Query(QueryArgs),
    /// Recompute every digest and link in a sequence range.
    Verify {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
    },
    /// Print the committed chain head.
    Head,
}

#[derive(clap::Args)]
struct QueryArgs {
    #[arg(long)]
    actor: Option<String>,
    /// Action tag, e.g. `pii_unmask`.
    #[arg(long)]
    action: Option<AuditAction>,
    #[arg(long)]
    resource_type: Option<String>,
    /// Requires `--resource-type`.
    #[arg(long, requires = "resource_type")]
    resource_id: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    #[arg(long)]
    since: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound, inclusive.
    #[arg(long)]
    until: Option<DateTime<Utc>>,
    #[arg(long)]
    success: Option<bool>,
    /// Only entries below this sequence.
    #[arg(long)]
    before: Option<u64>,
    /// Only entries above this sequence.
    #[arg(long)]
    after: Option<u64>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    skip: usize,
    /// Oldest first.
    #[arg(long)]
    ascending: bool,
}

impl QueryArgs {
    fn into_query(self) -> LedgerQuery {
        let mut query = LedgerQuery::new().with_skip(self.skip);
        query.actor_id = self.actor;
        query.action = self.action;
        query.resource_type = self.resource_type;
        query.resource_id = self.resource_id;
        query.from_time = self.since;
        query.to_time = self.until;
        query.success = self.success;
        query.before_sequence = self.before;
        query.after_sequence = self.after;
        query.limit = self.limit;
        if self.ascending {
            query = query.ascending();
        }
        query
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=info (or debug) to see the write pipeline.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("chainlog error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn open_ledger(cli: &Cli) -> LedgerResult<AuditLedger> {
    let config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    let store = Arc::new(JsonlLedgerStore::open(&cli.ledger)?);
    AuditLedger::with_locking_allocator(store, config)
}

/// Run the selected subcommand and return the process exit status.
fn run(cli: Cli) -> LedgerResult<i32> {
    let ledger = open_ledger(&cli)?;

    match cli.command {
        Command::Scenario { user } => run_scenario(&ledger, &user),
        Command::Stress { writers, per_writer } => run_stress(&ledger, writers, per_writer),
        Command::Query(args) => {
            for entry in ledger.query(&args.into_query())? {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(0)
        }
        Command::Verify { from, to } => {
            let result = match (from, to) {
                (None, None) => ledger.verify_all()?,
                (from, to) => {
                    let to = match to {
                        Some(to) => to,
                        None => ledger.head()?.sequence.max(1),
                    };
                    ledger.verify_chain(from.unwrap_or(1), to)?
                }
            };
            Ok(report(&result))
        }
        Command::Head => {
            let head = ledger.head()?;
            println!("sequence {}", head.sequence);
            println!("hash     {}", head.hash);
            Ok(0)
        }
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn run_scenario(ledger: &AuditLedger, user: &str) -> LedgerResult<i32> {
    let session = format!("sess-{}", ledger.head()?.sequence + 1);

    let events = vec![
        AuditEvent::login(user, session.as_str()).provenance(
            Some("203.0.113.7".to_string()),
            Some("chainlog-cli".to_string()),
            Some(session.clone()),
        ),
        AuditEvent::pii_unmask(user, "patient", "p-1001", &["ssn", "date_of_birth"]),
        AuditEvent::decrypt(user, "patient", "p-1001", "diagnosis"),
        AuditEvent::access_denied(user, AuditAction::Delete, "patient", "p-2002", "not the record owner"),
        AuditEvent::logout(user, session.as_str()),
    ];

    println!("Recording session {} for {}", session, user);
    for event in events {
        if let Some(entry) = producer::record(ledger, event)? {
            print_entry(&entry);
        }
    }

    let unmasks = ledger.query(
        &LedgerQuery::new()
            .with_actor(user)
            .with_action(AuditAction::PiiUnmask)
            .with_limit(5),
    )?;
    println!();
    println!("Latest PII unmask events by {}: {}", user, unmasks.len());
    for entry in &unmasks {
        print_entry(entry);
    }

    println!();
    Ok(report(&ledger.verify_all()?))
}

fn run_stress(ledger: &AuditLedger, writers: usize, per_writer: usize) -> LedgerResult<i32> {
    let before = ledger.head()?.sequence;
    let started = Instant::now();

    let outcomes: Vec<LedgerResult<()>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                s.spawn(move || -> LedgerResult<()> {
                    let actor = format!("writer-{}", w);
                    for i in 0..per_writer {
                        ledger.append(
                            AuditEvent::new(actor.as_str(), AuditAction::Edit)
                                .resource("record", format!("r-{}-{}", w, i)),
                        )?;
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(LedgerError::Storage {
                        reason: "writer thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });
    for outcome in outcomes {
        outcome?;
    }

    let elapsed = started.elapsed();
    let head = ledger.head()?;
    let appended = head.sequence - before;
    info!(writers, per_writer, appended, "stress run complete");

    println!(
        "{} writers appended {} entries in {:.2?} ({:.0} entries/s)",
        writers,
        appended,
        elapsed,
        appended as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("head is now sequence {}", head.sequence);
    Ok(report(&ledger.verify_all()?))
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_entry(entry: &LogEntry) {
    let resource = match (&entry.resource_type, &entry.resource_id) {
        (Some(t), Some(id)) => format!("{}/{}", t, id),
        (Some(t), None) => t.clone(),
        _ => "-".to_string(),
    };
    println!(
        "  #{:<6} {:<16} {:<12} {:<20} {} {}",
        entry.sequence,
        entry.action,
        entry.actor_id,
        resource,
        if entry.success { "ok  " } else { "FAIL" },
        &entry.hash[..entry.hash.len().min(12)],
    );
}

/// Print a verification result; returns 2 if the chain is not intact.
fn report(result: &VerificationResult) -> i32 {
    if result.verified {
        println!("Chain verified: {} entries, no issues.", result.entries_checked);
        return 0;
    }
    println!(
        "Chain verification FAILED: {} issue(s) in {} entries checked.",
        result.issues.len(),
        result.entries_checked
    );
    for issue in &result.issues {
        println!("  {}", issue);
    }
    2
}
