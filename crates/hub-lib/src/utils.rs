use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

/// Bound a call to an external collaborator. Elapsing is reported as
/// `ExternalServiceError` naming the service.
pub async fn with_timeout<T, F>(timeout: Duration, service: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::ExternalServiceError(format!(
            "{} did not answer within {:?}",
            service, timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_reports_elapsed_call() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "oracle", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(Error::ExternalServiceError(msg)) => assert!(msg.contains("oracle")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let result = with_timeout(Duration::from_secs(1), "oracle", async { Ok(7u8) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
