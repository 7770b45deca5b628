//! Preview upload entry point.
//!
//! ```text
//! ascflow-preview-upload <bundleId> <platform> <version> <locale> <previewType> <filePath>
//! ```

mod config;
mod flow;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::flow::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        "starting preview upload"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling upload");
                on_signal.cancel();
            }
        });

        let preview_url = flow::run(&config, &args, &cancel).await?;
        tracing::info!(url = %preview_url, "app preview uploaded");
        println!("App Preview successfully uploaded to: {preview_url}");
        anyhow::Ok(())
    })?;

    Ok(())
}
