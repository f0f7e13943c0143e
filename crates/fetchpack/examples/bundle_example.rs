//! Example demonstrating how to bundle remote media into one archive
//!
//! Ids are taken from the command line. Settings come from `FETCHPACK_*`
//! environment variables (a `.env` file is honoured), for example
//! `FETCHPACK_BEARER_TOKEN`.
//!
//! Run this example with:
//! ```
//! cargo run --example bundle_example -- gen_01 gen_02
//! ```

use fetchpack::core::{IntoProgressCallback, LogProgressReporter};
use fetchpack::{BundleConfig, Bundler, HttpUrlLookup, InlineFile, ResolvableItem};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> fetchpack::Result<()> {
    tracing_subscriber::fmt::init();

    let ids: Vec<String> = std::env::args().skip(1).collect();
    if ids.is_empty() {
        println!("Usage: bundle_example <id>...");
        return Ok(());
    }

    let config = BundleConfig::from_env()?;
    let lookup = HttpUrlLookup::from_config(&config)?;
    let bundler = Bundler::http(config)?;

    let items: Vec<ResolvableItem> = ids.iter().map(|id| ResolvableItem::new(id.as_str(), "cli")).collect();
    let manifest = InlineFile::new("manifest.txt", format!("{}\n", ids.join("\n")));
    let output = PathBuf::from("videos.zip");

    // Ctrl-C cancels whichever stage is running
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let progress = LogProgressReporter::new(false).into_callback();
    let report = bundler
        .bundle(items, &lookup, &[manifest], &output, &cancel, Some(progress))
        .await?;

    match &report.archive_path {
        Some(path) => println!(
            "Wrote {} ({} entries, {} bytes)",
            path.display(),
            report.entries.len(),
            report.archive_bytes
        ),
        None => println!("Nothing to archive"),
    }
    for failure in &report.failures {
        println!("Could not resolve {}: {}", failure.item.id, failure.reason);
    }

    let metrics = bundler.metrics();
    println!(
        "Lookups: {} ({} retries), staged {} bytes",
        metrics.lookups_attempted, metrics.lookup_retries, metrics.bytes_staged
    );
    Ok(())
}
