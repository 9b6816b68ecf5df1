use crate::error::{FlowError, Result};

/// Install a `tracing` fmt subscriber. `RUST_LOG` wins over
/// `default_directive` when set. Fails if a global subscriber already exists.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .try_init()
        .map_err(|e| FlowError::Config(format!("tracing already initialised: {e}")))
}
