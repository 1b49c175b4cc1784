use crate::agent::AgentError;
use async_lock::Mutex;
use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

/// Lets one caller at a time refresh a piece of shared state, while the others wait for it.
///
/// Callers read [`completed`](Self::completed) before deciding a refresh is needed. A waiter
/// that gets the slot after another caller finished a refresh since then skips its own. If
/// that refresh failed, the waiter runs its own.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    slot: Mutex<()>,
    completed: AtomicU64,
}

impl SingleFlight {
    /// The number of refreshes completed so far.
    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) async fn run<F, Fut>(&self, seen: u64, refresh: F) -> Result<(), AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), AgentError>>,
    {
        let _slot = self.slot.lock().await;
        if self.completed() != seen {
            return Ok(());
        }
        refresh().await?;
        self.completed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Arc};

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let flight = Arc::new(SingleFlight::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = flight.completed();
        let tasks = (0..5).map(|_| {
            let flight = flight.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                flight
                    .run(seen, || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(())
                    })
                    .await
            })
        });
        for task in futures_util::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.completed(), 1);
    }

    #[tokio::test]
    async fn a_failed_refresh_is_retried_by_the_next_caller() {
        let flight = SingleFlight::default();
        let seen = flight.completed();
        let failed = flight
            .run(seen, || async { Err(AgentError::CouldNotReadRootKey) })
            .await;
        assert!(failed.is_err());
        assert_eq!(flight.completed(), 0);

        let mut ran = false;
        flight
            .run(seen, || {
                ran = true;
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(flight.completed(), 1);
    }
}
