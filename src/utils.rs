use crate::error::AppError;

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Await a downstream call for at most `limit`.  Failures and timeouts are logged and collapse to
/// `None`; the caller responds to the provider either way.
pub async fn bounded<T, F>(limit: Duration, what: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(error=%e, "{what} failed");
            None
        }
        Err(_) => {
            warn!(limit_ms = limit.as_millis() as u64, "{}", AppError::Timeout(what));
            None
        }
    }
}

/// Absolute base for callback urls: configured, or derived from the request host
pub fn callback_base(configured: Option<&str>, host: &str) -> String {
    match configured {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("https://{host}"),
    }
}
