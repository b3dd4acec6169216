pub mod config;
pub mod measure;
pub mod pipeline;

pub use config::{EndpointAuth, ScanConfig};
pub use pipeline::{
    ImageSource, ProductTagData, ProductTagScanResult, ScanError, ScanOutcome, ScanWarning,
    Scanner, ScheduleEntry, ScheduleScanOptions, ScheduleScanResult,
};
pub use tokio_util::sync::CancellationToken;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
