//! Watermark writes: baselines and mark-as-read.

use std::time::Duration;

use huddle_core::{GroupId, Timestamp, UpsertOutcome, UserId, WatermarkStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, UnreadError};
use crate::retry::Backoff;

/// Monotonically write `value` as the watermark of `(group, user)`.
///
/// Failed writes are retried with `policy`. The write is conditional in the
/// store, so retrying an older value after a newer one landed is harmless.
pub(crate) async fn write_watermark(
    store: &dyn WatermarkStore,
    group: &GroupId,
    user: &UserId,
    value: Timestamp,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<UpsertOutcome> {
    let mut backoff = Backoff::new(policy.clone());

    loop {
        let attempt = store.upsert_if_absent_or_newer(group, user, value);
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(UnreadError::Cancelled),
                result = attempt => result,
            },
            None => attempt.await,
        };

        match result {
            Ok(outcome) => {
                debug!(group = %group, user = %user, at = %value, ?outcome, "Watermark written");
                return Ok(outcome);
            }
            Err(e) => match backoff.record_failure() {
                Some(delay) => {
                    warn!(
                        group = %group,
                        error = %e,
                        attempt = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Watermark write failed, retrying"
                    );
                    pause(delay, cancel).await?;
                }
                None => {
                    return Err(UnreadError::WriteExhausted {
                        attempts: backoff.failures(),
                        source: e,
                    });
                }
            },
        }
    }
}

async fn pause(delay: Duration, cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(UnreadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}
