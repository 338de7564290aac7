use log_tail::{CloseReason, FeedEvent, Result, Sink, TailConfig, TailService};
use std::time::Duration;
use tokio_stream::StreamExt;

/// Prints every event with a label, standing in for a network client.
struct PrintSink {
    label: &'static str,
}

impl Sink for PrintSink {
    async fn send(&mut self, event: FeedEvent) -> Result<()> {
        println!("[{}] {}", self.label, event);
        Ok(())
    }

    async fn closed(&self) {
        // stdout never hangs up
        std::future::pending::<()>().await
    }

    async fn close(&mut self, reason: CloseReason) {
        println!("[{}] closed: {}", self.label, reason);
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let service = TailService::start(TailConfig::new("fixtures/simple_append.log")).await?;

    // Two subscribers with different snapshot sizes
    let printer = service.attach(PrintSink { label: "printer" }, 2)?;
    let mut feed = service.open_tail(5)?;

    println!("Watching with {} subscribers...", service.subscriber_count());

    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = feed.next() => match event {
                Some(event) => println!("[feed] {}", event),
                None => break,
            },
        }
    }

    service.shutdown().await;
    println!("printer ended with: {}", printer.join().await);

    Ok(())
}
