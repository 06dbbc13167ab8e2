//! Fan-in example — three producers multiplexed over one byte channel.
//!
//! Run with:
//!   cargo run --example fan_in

use serde_json::json;
use wiremux::{demux, mux, source_channel, Item};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .init();

    let (metrics, metrics_src) = source_channel(8);
    let (logs, logs_src) = source_channel(8);
    let (blobs, blobs_src) = source_channel(8);

    tokio::spawn(async move {
        for n in 0..3 {
            let _ = metrics.send(json!({ "seq": n, "cpu": 0.25 * n as f64 })).await;
        }
    });
    tokio::spawn(async move {
        for line in ["starting", "ready", "done"] {
            let _ = logs.send(line).await;
        }
    });
    tokio::spawn(async move {
        let _ = blobs.send(bytes::Bytes::from_static(b"\xDE\xAD\xBE\xEF")).await;
    });

    // One framed byte stream carries all three sources; in a real
    // deployment this is what goes over the wire.
    let combined = mux(vec![metrics_src, logs_src, blobs_src])?;
    let outputs = demux(combined, 3)?;

    for (label, mut output) in ["metrics", "logs", "blobs"].into_iter().zip(outputs) {
        while let Some(item) = output.recv().await {
            match item? {
                Item::Value(value) => eprintln!("[{label}] {value}"),
                Item::Raw(bytes) => eprintln!("[{label}] {} raw bytes", bytes.len()),
            }
        }
    }

    Ok(())
}
