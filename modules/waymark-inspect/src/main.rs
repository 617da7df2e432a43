use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waymark_common::Config;
use waymark_engine::{Bundler, Destination, PollingScheduler, TracingDestination};
use waymark_events::{BufferRecord, BufferStore, SqliteBuffer};

#[derive(Parser)]
#[command(name = "waymark-inspect", about = "Inspect or drain a durable waymark buffer")]
struct Cli {
    /// Buffer file (defaults to WAYMARK_BUFFER_PATH)
    #[arg(long)]
    buffer: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the number of buffered records
    Count,

    /// Remove records (oldest first) and print them as JSON lines
    Drain {
        /// Maximum records to drain; everything when omitted
        limit: Option<usize>,
    },

    /// Drain everything and replay it through the log output
    Replay,

    /// Delete every buffered record
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is reserved for drained records.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("waymark=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = cli.buffer {
        config.buffer_path = path;
    }
    config.log_summary();

    let buffer = SqliteBuffer::open(&config.buffer_path).await?;

    match cli.command.unwrap_or(Command::Count) {
        Command::Count => {
            println!("{}", buffer.count().await?);
        }
        Command::Drain { limit } => {
            let drained = drain_to(&buffer, limit, &mut std::io::stdout().lock()).await?;
            info!(records = drained, "Drained buffer");
        }
        Command::Replay => {
            let records = buffer.load(None).await?;
            let ids: BTreeSet<_> = records.iter().map(|r| r.destination.clone()).collect();
            let destinations = ids
                .into_iter()
                .map(|id| Arc::new(TracingDestination::new(id)) as Arc<dyn Destination>)
                .collect();

            let bundler = Bundler::with_destinations(
                destinations,
                buffer.clone(),
                PollingScheduler::from_config(&config),
            );
            let report = bundler.redeliver(records).await?;
            info!(destinations = report.outcomes.len(), "Replayed buffer");
        }
        Command::Clear => {
            buffer.clear().await?;
            info!("Cleared buffer");
        }
    }

    buffer.close().await;
    Ok(())
}

/// Drain up to `limit` records into `out` as JSON lines. Records that could not
/// be written are saved back before the error is returned.
async fn drain_to(
    buffer: &dyn BufferStore,
    limit: Option<usize>,
    out: &mut impl Write,
) -> Result<usize> {
    let mut records = buffer.load(limit).await?;

    let mut written = 0;
    let mut failure = None;
    for record in &records {
        if let Err(e) = write_line(out, record) {
            failure = Some(e);
            break;
        }
        written += 1;
    }

    let Some(e) = failure else {
        return Ok(written);
    };

    let unwritten = records.split_off(written);
    warn!(records = unwritten.len(), error = %e, "Output failed, returning records to the buffer");
    buffer.save(unwritten).await?;
    Err(e)
}

fn write_line(out: &mut impl Write, record: &BufferRecord) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line)?;
    out.flush()?;
    Ok(())
}
