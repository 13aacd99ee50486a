//! msgpipe demo - console sender and receiver.
//!
//! Run `msgpipe-demo receiver` in one terminal and `msgpipe-demo sender` in
//! another. Every line typed into the sender is sent as two messages: a
//! timestamp, then the text. The receiver prints the latency of the first and
//! either the text or the length of the second, depending on which callback
//! is active.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msgpipe::{ChannelConfig, Receiver, Sender};
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CHANNEL: &str = "msgpipe_example";

#[derive(Parser, Debug)]
#[command(name = "msgpipe-demo")]
#[command(about = "Send and receive messages over a msgpipe channel")]
struct Args {
    #[command(subcommand)]
    role: Role,

    /// Channel name
    #[arg(short, long, default_value = DEFAULT_CHANNEL, global = true)]
    name: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Receive messages. Type `callback` to switch output, `exit` to quit.
    Receiver {
        /// Initial receive buffer size in bytes
        #[arg(short, long, default_value_t = ChannelConfig::MIN_BUFFER_SIZE)]
        buffer_size: usize,
    },
    /// Send each input line. Type `exit` to quit.
    Sender,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.role {
        Role::Receiver { buffer_size } => run_receiver(&args.name, buffer_size),
        Role::Sender => run_sender(&args.name),
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Messages alternate timestamp, text, timestamp, text, ... so both
/// callbacks share one counter to stay in step across a swap.
fn print_latency(count: &AtomicU64, message: &[u8]) -> bool {
    if count.fetch_add(1, Ordering::Relaxed) % 2 != 0 {
        return false;
    }
    match <[u8; 8]>::try_from(message) {
        Ok(raw) => {
            let sent = u64::from_le_bytes(raw);
            println!("latency: {} ns", now_nanos().saturating_sub(sent));
        }
        Err(_) => warn!("Expected an 8 byte timestamp, got {} bytes", message.len()),
    }
    true
}

fn print_text(count: &Arc<AtomicU64>) -> impl FnMut(&[u8]) + Send + 'static {
    let count = Arc::clone(count);
    move |message: &[u8]| {
        if !print_latency(&count, message) {
            let text = message.strip_suffix(&[0]).unwrap_or(message);
            println!("{}", String::from_utf8_lossy(text));
        }
    }
}

fn print_length(count: &Arc<AtomicU64>) -> impl FnMut(&[u8]) + Send + 'static {
    let count = Arc::clone(count);
    move |message: &[u8]| {
        if !print_latency(&count, message) {
            println!("received a message {} bytes long!", message.len());
        }
    }
}

fn run_receiver(name: &str, buffer_size: usize) -> Result<()> {
    println!("Type callback to change behavior. Type exit to quit.");

    let count = Arc::new(AtomicU64::new(0));
    let receiver = Receiver::new(name, buffer_size, print_text(&count))
        .with_context(|| format!("Failed to start receiver on channel '{}'", name))?;
    info!("Receiving on {}", receiver.endpoint());

    let mut use_text = true;
    for line in std::io::stdin().lock().lines() {
        match line?.trim() {
            "callback" => {
                use_text = !use_text;
                if use_text {
                    receiver.set_callback(print_text(&count));
                } else {
                    receiver.set_callback(print_length(&count));
                }
            }
            "exit" => break,
            _ => {}
        }
    }

    let stats = receiver.stats();
    info!(
        "Dispatched {} message(s) from {} connection(s)",
        stats.messages_dispatched, stats.connections_accepted
    );
    Ok(())
}

fn run_sender(name: &str) -> Result<()> {
    println!("Send messages to the receiver! Type exit to quit.");

    let mut sender = Sender::new(name);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let stamp = now_nanos().to_le_bytes();

        let mut text = line.clone().into_bytes();
        text.push(0);

        if !(sender.send(&stamp) && sender.send(&text)) {
            warn!("Receiver on '{}' is not reachable", name);
        }

        if line == "exit" {
            break;
        }
    }
    Ok(())
}
