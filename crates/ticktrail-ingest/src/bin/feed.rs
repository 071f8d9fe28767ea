//! Replay a JSONL telemetry capture against a running ingest service.
//!
//! Each non-empty line is sent as one datagram. With `--check`, lines are
//! first run through the decoder and rejected ones are reported and skipped
//! instead of sent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use ticktrail_core::decoder::{Decoder, DecoderOptions, PositionPolicy};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Send a JSONL telemetry file to `ticktrail-ingest` over UDP.
#[derive(Debug, Parser)]
#[command(name = "ticktrail-feed", version)]
struct Args {
    /// File with one telemetry record per line.
    file: PathBuf,

    /// Ingress address to send to.
    #[arg(long, default_value = "127.0.0.1:10666")]
    target: SocketAddr,

    /// Pause between datagrams, in microseconds.
    #[arg(long, default_value_t = 0)]
    delay_us: u64,

    /// Decode each line locally and skip the ones the service would reject.
    #[arg(long)]
    check: bool,
}

/// Lines sent and skipped.
#[derive(Debug, Default, Clone, Copy)]
struct FeedTotals {
    sent: u64,
    skipped: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    match feed(&args).await {
        Ok(totals) => {
            info!(
                sent = totals.sent,
                skipped = totals.skipped,
                target = %args.target,
                "replay complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, file = %args.file.display(), "replay failed");
            ExitCode::FAILURE
        }
    }
}

async fn feed(args: &Args) -> std::io::Result<FeedTotals> {
    let file = tokio::fs::File::open(&args.file).await?;
    let bind: SocketAddr = if args.target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0_u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    let decoder = Decoder::new(DecoderOptions {
        target_position: PositionPolicy::Optional,
    });
    let delay = Duration::from_micros(args.delay_us);

    let mut totals = FeedTotals::default();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0_u64;
    while let Some(line) = lines.next_line().await? {
        line_no = line_no.saturating_add(1);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rejected = if args.check {
            decoder.decode(line.as_bytes()).err()
        } else {
            None
        };
        if let Some(rejection) = rejected {
            warn!(line = line_no, reason = %rejection.reason, "skipping record");
            totals.skipped = totals.skipped.saturating_add(1);
            continue;
        }
        socket.send_to(line.as_bytes(), args.target).await?;
        totals.sent = totals.sent.saturating_add(1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(totals)
}
