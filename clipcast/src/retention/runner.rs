use std::{ops::Sub, time::Duration};

use chrono::{TimeDelta, Utc};
use futures::{stream::FuturesOrdered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

use super::RetentionConfig;

pub(crate) struct RetentionRunner<S: JobStore> {
    config: RetentionConfig,
    store: S,
}

impl<S> RetentionRunner<S>
where
    S: JobStore + Send + Sync + 'static,
{
    pub fn new(store: S, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn spawn(self, cancellation_token: CancellationToken) {
        tokio::spawn({
            async move {
                loop {
                    let next = self
                        .config
                        .schedule
                        .upcoming(Utc)
                        .next()
                        .expect("No future scheduled time for history retention");
                    let delay = next
                        .sub(Utc::now())
                        .sub(TimeDelta::milliseconds(10))
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            self.apply().await;
                            let delay = next - Utc::now();
                            if delay > TimeDelta::zero() {
                                tokio::time::sleep(delay.to_std().unwrap_or(Duration::ZERO)).await;
                            }
                        }
                        _ = cancellation_token.cancelled() => {
                            tracing::debug!("Shutting down the history retention runner");
                            break;
                        },
                    }
                }
            }
        });
    }

    async fn apply(&self) {
        self.config
            .policies
            .iter()
            .map(|policy| self.store.prune_history(policy))
            .collect::<FuturesOrdered<_>>()
            .filter_map(|result| async { result.err() })
            .for_each_concurrent(self.config.max_concurrency, |err| async move {
                tracing::error!(?err, "Failed to prune history with error {err}")
            })
            .await;
    }
}
