//! Tokio plumbing shared by the export workers.

use tokio::task::JoinError;

use crate::error::ExportError;

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins over `default_directive`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run `f` on the blocking pool.
pub(crate) async fn blocking<T, F>(task: &str, f: F) -> Result<T, ExportError>
where
    F: FnOnce() -> Result<T, ExportError> + Send + 'static,
    T: Send + 'static,
{
    handle_join(task, tokio::task::spawn_blocking(f).await)
}

pub(crate) fn handle_join<T>(
    task: &str,
    result: Result<Result<T, ExportError>, JoinError>,
) -> Result<T, ExportError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ExportError::Join {
            task: task.to_string(),
            reason: err.to_string(),
        }),
    }
}
