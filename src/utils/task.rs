//! Helpers applied at task and network-call boundaries.

use crate::exchange::{ExchangeAdapter, ExchangeError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};

/// Maximum number of bytes of a panic message kept in logs.
const PANIC_MESSAGE_LIMIT: usize = 4096;

/// Bound an adapter call by `timeout`, turning expiry into [`ExchangeError::Timeout`].
pub async fn with_deadline<T, F>(
    exchange: &str,
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, ExchangeError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout {
            exchange: exchange.to_string(),
            operation: operation.to_string(),
        }),
    }
}

/// Aborts the wrapped task when the caller stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run an adapter call in its own task, bounded by `timeout`.
///
/// A panic inside the call surfaces as [`ExchangeError::TaskFailed`] instead
/// of unwinding the caller. The task is aborted on timeout and when the
/// returned future is dropped.
pub async fn guarded_call<T, F, Fut>(
    adapter: &Arc<dyn ExchangeAdapter>,
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, ExchangeError>
where
    F: FnOnce(Arc<dyn ExchangeAdapter>) -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>> + Send + 'static,
    T: Send + 'static,
{
    let exchange = adapter.name().to_string();
    let task = tokio::spawn(call(Arc::clone(adapter)));
    let _abort = AbortOnDrop(task.abort_handle());

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ExchangeError::TaskFailed {
            exchange,
            operation: operation.to_string(),
            reason: describe_join_error(e),
        }),
        Err(_) => Err(ExchangeError::Timeout {
            exchange,
            operation: operation.to_string(),
        }),
    }
}

/// Human-readable description of a failed task, panic payload included.
pub fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }

    let payload = err.into_panic();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    truncate(message, PANIC_MESSAGE_LIMIT)
}

fn truncate(mut message: String, limit: usize) -> String {
    if message.len() > limit {
        let mut cut = limit;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("...");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeAdapter;

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_maps_timeout() {
        let result: Result<(), _> = with_deadline("Kraken", "order book", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Timeout { ref exchange, .. }) if exchange == "Kraken"));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let result = with_deadline("Kraken", "balances", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_describe_panicking_task() {
        let handle = tokio::spawn(async {
            panic!("boom");
        });
        let err = handle.await.unwrap_err();
        assert_eq!(describe_join_error(err), "boom");
    }

    fn adapter(name: &str) -> Arc<dyn ExchangeAdapter> {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_trading_balances()
            .returning(|| panic!("balances payload without a currency column"));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_guarded_call_contains_panics() {
        let adapter = adapter("Hitbtc");
        let result = guarded_call(&adapter, "trading balances", Duration::from_secs(5), |a| async move {
            a.trading_balances().await
        })
        .await;

        match result {
            Err(ExchangeError::TaskFailed { exchange, operation, reason }) => {
                assert_eq!(exchange, "Hitbtc");
                assert_eq!(operation, "trading balances");
                assert!(reason.contains("currency column"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_call_times_out() {
        let adapter = adapter("Kraken");
        let result: Result<(), _> = guarded_call(&adapter, "withdraw", Duration::from_secs(1), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::Timeout { ref operation, .. }) if operation == "withdraw"));
    }

    #[test]
    fn test_truncate_long_message() {
        let message = truncate("é".repeat(10), 5);
        assert!(message.ends_with("..."));
        assert!(message.len() <= 8);
    }
}
