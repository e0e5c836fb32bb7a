//! Cross-chain settlement wait

use crate::services::BalanceStream;
use std::time::Duration;
use warden_core::{Error, Result};

/// Wait until the streamed balance reaches `target` or `ceiling` elapses.
///
/// The stream is consumed, so the balance subscription is released on every
/// exit path. Returns the balance that satisfied the target.
pub async fn wait_for_balance(mut stream: BalanceStream, target: u128, ceiling: Duration) -> Result<u128> {
    if let Some(current) = stream.current.as_ref().map(|b| b.free) {
        if current >= target {
            return Ok(current);
        }
    }

    let waited = tokio::time::timeout(ceiling, async {
        while let Some(update) = stream.recv().await {
            tracing::trace!(free = update.free, target, "Destination balance update");
            if update.free >= target {
                return Some(update.free);
            }
        }
        None
    })
    .await;

    match waited {
        Ok(Some(balance)) => Ok(balance),
        Ok(None) => Err(Error::Timeout(
            "balance stream closed before funds arrived".to_string(),
        )),
        Err(_) => Err(Error::Timeout(format!(
            "funds did not arrive within {}s",
            ceiling.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{BalanceService, InMemoryBalanceService};

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_target_reached() {
        let service = InMemoryBalanceService::new();
        service.set_balance("hydradx", "5Grw", "DOT", 5);
        let stream = service.subscribe_balance("hydradx", "5Grw", "DOT").await.unwrap();

        let feeder = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            feeder.set_balance("hydradx", "5Grw", "DOT", 8);
            tokio::time::sleep(Duration::from_secs(10)).await;
            feeder.set_balance("hydradx", "5Grw", "DOT", 15);
        });

        let balance = wait_for_balance(stream, 12, Duration::from_secs(60)).await.unwrap();
        assert_eq!(balance, 15);
        assert_eq!(service.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_releases_stream() {
        let service = InMemoryBalanceService::new();
        let stream = service.subscribe_balance("hydradx", "5Grw", "DOT").await.unwrap();
        assert_eq!(service.active_subscriptions(), 1);

        let result = wait_for_balance(stream, 1, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(service.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_already_settled() {
        let service = InMemoryBalanceService::new();
        service.set_balance("hydradx", "5Grw", "DOT", 100);
        let stream = service.subscribe_balance("hydradx", "5Grw", "DOT").await.unwrap();
        assert_eq!(
            wait_for_balance(stream, 50, Duration::from_secs(60)).await.unwrap(),
            100
        );
    }
}
