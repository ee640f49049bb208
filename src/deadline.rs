use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Run a remote call, failing with [`Error::Timeout`] once `limit` passes.
pub(crate) async fn within<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation,
            after: limit,
        }),
    }
}
