use crate::error::{SessionError, Stage};

/// Run a blocking collaborator call off the async runtime.
pub(crate) async fn blocking<T, F>(stage: Stage, f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| SessionError::Task {
            stage,
            message: err.to_string(),
        })
}
