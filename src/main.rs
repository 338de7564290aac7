use clap::Parser;
use log_tail::{
    CloseReason, DEFAULT_BLOCK_SIZE, DEFAULT_MAILBOX_CAPACITY, DEFAULT_SNAPSHOT_LINES, FeedEvent,
    TailConfig, TailService, WatchMode,
};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "log-tail", about = "Follow a growing log file")]
struct Cli {
    /// File to follow
    path: PathBuf,

    /// Lines shown before following
    #[arg(short = 'n', long, default_value_t = DEFAULT_SNAPSHOT_LINES)]
    lines: usize,

    /// Poll every MS milliseconds instead of using OS notifications
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// Line separator
    #[arg(long, default_value = "\n")]
    separator: String,

    /// Lines buffered before the oldest are skipped
    #[arg(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    capacity: usize,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> TailConfig {
        let watch = match self.poll {
            Some(ms) => WatchMode::Poll(Duration::from_millis(ms)),
            None => WatchMode::Auto,
        };
        TailConfig::new(&self.path)
            .snapshot_lines(self.lines)
            .block_size(DEFAULT_BLOCK_SIZE)
            .mailbox_capacity(self.capacity)
            .separator(self.separator.clone())
            .watch(watch)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("LOG_TAIL_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let service = match TailService::start(cli.config()).await {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error setting up tail: {}", e);
            process::exit(1);
        }
    };

    let mut feed = match service.open_default_tail() {
        Ok(feed) => feed,
        Err(e) => {
            eprintln!("Error opening feed: {}", e);
            process::exit(1);
        }
    };

    let mut stopping = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                // Drain until the closing event so a flushed last line is printed.
                service.shutdown().await;
            }
            event = feed.next() => match event {
                Some(FeedEvent::Snapshot(lines)) => {
                    for line in lines {
                        println!("{}", line);
                    }
                }
                Some(FeedEvent::Line(line)) => println!("{}", line),
                Some(event @ (FeedEvent::Reset | FeedEvent::Gap { .. })) => eprintln!("{}", event),
                Some(FeedEvent::Closed(CloseReason::SourceLost(message))) => {
                    eprintln!("Error reading file: {}", message);
                    process::exit(1);
                }
                Some(FeedEvent::Closed(_)) | None => break,
            },
        }
    }
}
