pub mod core;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::core::service::{IngestDependencies, IngestService};

/// Installs the fmt subscriber used by the binaries. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={default_level}", env!("CARGO_CRATE_NAME")))
        }))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
