//! Tracing-subscriber setup for the CLI.
//!
//! The default level comes from the `--verbose` flag; `RUST_LOG` overrides
//! it, e.g. `RUST_LOG=camnet_pipeline=debug camnet ...`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

pub fn init_logger(verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
