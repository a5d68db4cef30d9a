//! Embedding worker process entry point.
//!
//! Speaks the newline-JSON worker protocol on stdin/stdout. The embedding
//! dimension comes from `CORTEX_EMBED_DIMENSION` (default 384). Logs go to
//! stderr so they never corrupt the protocol stream.

use std::sync::Arc;

use cortex_embed::embedder::{HashEmbedder, DEFAULT_DIMENSION};
use cortex_embed::worker::run_worker;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let dimension = std::env::var("CORTEX_EMBED_DIMENSION")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_DIMENSION);

    let embedder = Arc::new(HashEmbedder::new(dimension));
    if let Err(e) = run_worker(embedder, tokio::io::stdin(), tokio::io::stdout()).await {
        eprintln!("worker exited with error: {}", e);
        std::process::exit(1);
    }
}
