//! Monitor - connect to a profiled application and record what it sends.
//!
//! This example demonstrates:
//! - Building a session with `SessionBuilder`
//! - Loading a negotiation policy from a JSON settings file
//! - Following the session state through its watch channel
//! - Recording into memory or into a MessagePack journal
//!
//! ```text
//! cargo run --example monitor -- --address 127.0.0.1:4026 --auto
//! cargo run --example monitor -- --journal run.journal --settings policy.json
//! ```
//!
//! Press Ctrl-C to disconnect.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use spanwire_client::observe::ErrorQueue;
use spanwire_client::pipeline::{EntityStore, JournalStore, MemoryStore};
use spanwire_client::session::NegotiationPolicy;
use spanwire_client::transport::Endpoint;
use spanwire_client::{SessionBuilder, SessionManager};
use tracing_subscriber::EnvFilter;

/// Record spans, events and datasets from a BP3D debug server.
#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Debug server address (`host` or `host:port`)
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// JSON negotiation settings
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Answer the server config automatically
    #[arg(long)]
    auto: bool,

    /// Append mutations to this journal instead of keeping them in memory
    #[arg(short, long)]
    journal: Option<PathBuf>,

    /// Column delimiter for event and dataset rows
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .with_env_filter(filter)
        .init();
}

fn print_errors(errors: &ErrorQueue) {
    while let Some(notice) = errors.current() {
        match notice.reason {
            Some(reason) => eprintln!("error: {} ({})", notice.description, reason),
            None => eprintln!("error: {}", notice.description),
        }
        errors.dismiss();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut policy = match &cli.settings {
        Some(path) => NegotiationPolicy::from_json_file(path)?,
        None => NegotiationPolicy::default(),
    };
    policy.auto_negotiate |= cli.auto;

    let memory = MemoryStore::new();
    let store: Box<dyn EntityStore> = match &cli.journal {
        Some(path) => Box::new(JournalStore::new(BufWriter::new(File::create(path)?))),
        None => Box::new(memory.clone()),
    };

    let endpoint: Endpoint = cli.address.parse()?;
    let manager = SessionManager::new(policy);
    let mut session = match SessionBuilder::new()
        .endpoint(endpoint)
        .delimiter(cli.delimiter)
        .connect(&manager, store)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            print_errors(manager.errors());
            return Err(e.into());
        }
    };

    let mut state = session.state();
    let watcher = tokio::spawn(async move {
        loop {
            let current = *state.borrow_and_update();
            println!("[{}]", current);
            if current.is_closed() || state.changed().await.is_err() {
                break;
            }
        }
    });

    let interrupted = tokio::select! {
        _ = session.wait_for_close() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        session.disconnect();
        session.wait_for_close().await;
    }
    let _ = watcher.await;

    print_errors(manager.errors());
    if cli.journal.is_none() {
        for project in memory.projects() {
            println!(
                "{} {} ({} spans)",
                project.project.name,
                project.project.version,
                project.spans.len()
            );
            for span in project.spans.values() {
                println!(
                    "  {:<40} events={:<6} datasets={}",
                    span.path,
                    span.events.len(),
                    span.datasets.len()
                );
            }
        }
    }
    Ok(())
}
