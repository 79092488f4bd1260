//! Threshold alerting with per-severity suppression.
//!
//! Each `(device, metric)` pair is in one of three states, derived from the
//! cooldown entries that exist for it: normal (none), soft active, hard
//! active. A value outside the red band targets `hard`, outside the yellow
//! band targets `soft`, anything else targets normal.
//!
//! - Targeting a severity claims its cooldown entry with an atomic
//!   insert-if-absent. Winning the claim sends the alert; losing it means the
//!   alert is already active and nothing is sent.
//! - Targeting normal clears both severities.
//!
//! If the send fails, the claim is released so the next breach retries.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::error::AlertError;
use crate::models::{CooldownKey, DeviceId, Metric, Severity, ThresholdProfile};
use crate::notify::Notifier;
use crate::store::{Activation, CooldownStore};

// ---

/// What one evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// A new breach: notification sent and cooldown entry created.
    Fired(Severity),
    /// The severity was already active; notification suppressed.
    AlreadyActive(Severity),
    /// Value in the normal band; `removed` cooldown entries were cleared.
    Cleared { removed: u64 },
}

impl AlertOutcome {
    pub fn message(&self) -> String {
        match self {
            AlertOutcome::Fired(s) => format!("{s} alert sent"),
            AlertOutcome::AlreadyActive(s) => format!("{s} alert already active"),
            AlertOutcome::Cleared { .. } => "no threshold exceeded".to_string(),
        }
    }
}

/// One candidate value to evaluate.
#[derive(Debug, Clone, Copy)]
pub struct AlertInput {
    pub device_id: DeviceId,
    pub metric: Metric,
    pub value: f64,
    pub profile: ThresholdProfile,
}

pub struct AlertEvaluator {
    cooldowns: Arc<dyn CooldownStore>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEvaluator {
    // ---
    pub fn new(cooldowns: Arc<dyn CooldownStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cooldowns,
            notifier,
        }
    }

    /// Run the state machine for one value.
    ///
    /// `recipient` is only consulted when a notification has to go out; a
    /// breach without a recipient fails with [`AlertError::NoRecipient`].
    pub async fn evaluate(
        &self,
        input: &AlertInput,
        recipient: Option<&str>,
    ) -> Result<AlertOutcome, AlertError> {
        // ---
        let AlertInput {
            device_id,
            metric,
            value,
            profile,
        } = *input;

        let Some(severity) = profile.classify(value) else {
            let removed = self.cooldowns.clear(device_id, metric).await?;
            info!(device_id, %metric, value, removed, "Value in normal range, alerts reset");
            return Ok(AlertOutcome::Cleared { removed });
        };

        let key = CooldownKey {
            device_id,
            metric,
            severity,
        };
        if self.cooldowns.try_activate(&key, Utc::now()).await? == Activation::AlreadyActive {
            info!(device_id, %metric, value, %severity, "Alert already active, suppressed");
            return Ok(AlertOutcome::AlreadyActive(severity));
        }

        let sent = match recipient {
            Some(to) => {
                let (subject, body) = compose(input, severity);
                self.notifier
                    .dispatch(to, &subject, &body)
                    .await
                    .map_err(AlertError::from)
            }
            None => Err(AlertError::NoRecipient),
        };

        if let Err(e) = sent {
            // Leave no suppression behind for an alert nobody received
            if let Err(release_err) = self.cooldowns.release(&key).await {
                error!(
                    device_id,
                    %metric,
                    %severity,
                    error = %release_err,
                    "Failed to release cooldown after dispatch failure"
                );
            }
            error!(device_id, %metric, value, %severity, error = %e, "Alert dispatch failed");
            return Err(e);
        }

        info!(device_id, %metric, value, %severity, "Alert sent");
        Ok(AlertOutcome::Fired(severity))
    }
}

/// Subject and plain-text body for a breach notification.
pub fn compose(input: &AlertInput, severity: Severity) -> (String, String) {
    // ---
    let p = &input.profile;
    let unit = input.metric.unit();
    let label = severity.as_str().to_uppercase();
    let (low, high) = match severity {
        Severity::Hard => (p.red_low, p.red_high),
        Severity::Soft => (p.yellow_low, p.yellow_high),
    };
    let direction = if input.value > high {
        "exceeded"
    } else if input.value < low {
        "fell below"
    } else {
        "crossed"
    };

    let subject = format!(
        "[{label}] Alert: device {} - {}",
        input.device_id, input.metric
    );
    let body = format!(
        "ALERT ({label})\n\
         \n\
         Device: {device}\n\
         Metric: {metric}\n\
         \n\
         Current value: {value} {unit}\n\
         \n\
         Thresholds:\n\
         \x20 red low:     {red_low} {unit}\n\
         \x20 yellow low:  {yellow_low} {unit}\n\
         \x20 yellow high: {yellow_high} {unit}\n\
         \x20 red high:    {red_high} {unit}\n\
         \n\
         The current {metric} value {direction} the {label} threshold.\n\
         Please check the air quality and ventilate or take further action.\n",
        device = input.device_id,
        metric = input.metric,
        value = input.value,
        red_low = p.red_low,
        yellow_low = p.yellow_low,
        yellow_high = p.yellow_high,
        red_high = p.red_high,
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::notify::DispatchError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio_test::assert_err;

    /// Records every dispatch; optionally fails them all.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(
            &self,
            recipient: &str,
            subject: &str,
            _body: &str,
        ) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Build("smtp down".into()));
            }
            self.sent
                .lock()
                .await
                .push((recipient.to_string(), subject.to_string()));
            Ok(())
        }
    }

    const TO: Option<&str> = Some("ops@example.org");

    fn input(value: f64) -> AlertInput {
        AlertInput {
            device_id: 4,
            metric: Metric::Temperature,
            value,
            profile: ThresholdProfile {
                red_low: -10.0,
                yellow_low: 0.0,
                yellow_high: 40.0,
                red_high: 50.0,
            },
        }
    }

    fn key(severity: Severity) -> CooldownKey {
        CooldownKey {
            device_id: 4,
            metric: Metric::Temperature,
            severity,
        }
    }

    fn setup(fail: bool) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, AlertEvaluator) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier {
            fail,
            ..Default::default()
        });
        let evaluator = AlertEvaluator::new(store.clone(), notifier.clone());
        (store, notifier, evaluator)
    }

    #[tokio::test]
    async fn test_hard_breach_fires_once() {
        // ---
        let (store, notifier, evaluator) = setup(false);

        let first = evaluator.evaluate(&input(60.0), TO).await.unwrap();
        assert_eq!(first, AlertOutcome::Fired(Severity::Hard));
        assert!(store.is_active(&key(Severity::Hard)).await);

        let second = evaluator.evaluate(&input(61.0), TO).await.unwrap();
        assert_eq!(second, AlertOutcome::AlreadyActive(Severity::Hard));

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops@example.org");
        assert_eq!(sent[0].1, "[HARD] Alert: device 4 - temperature");
    }

    #[tokio::test]
    async fn test_soft_and_hard_are_tracked_separately() {
        // ---
        let (store, notifier, evaluator) = setup(false);

        assert_eq!(
            evaluator.evaluate(&input(45.0), TO).await.unwrap(),
            AlertOutcome::Fired(Severity::Soft)
        );
        assert_eq!(
            evaluator.evaluate(&input(55.0), TO).await.unwrap(),
            AlertOutcome::Fired(Severity::Hard)
        );
        // Dropping back to the yellow band keeps the soft entry suppressed
        assert_eq!(
            evaluator.evaluate(&input(42.0), TO).await.unwrap(),
            AlertOutcome::AlreadyActive(Severity::Soft)
        );
        assert!(store.is_active(&key(Severity::Hard)).await);
        assert_eq!(notifier.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_normal_reading_clears_and_rearms() {
        // ---
        let (store, notifier, evaluator) = setup(false);

        evaluator.evaluate(&input(45.0), TO).await.unwrap();
        evaluator.evaluate(&input(60.0), TO).await.unwrap();

        let cleared = evaluator.evaluate(&input(25.0), TO).await.unwrap();
        assert_eq!(cleared, AlertOutcome::Cleared { removed: 2 });
        assert!(!store.is_active(&key(Severity::Soft)).await);
        assert!(!store.is_active(&key(Severity::Hard)).await);

        // Clearing again is a no-op
        let again = evaluator.evaluate(&input(25.0), None).await.unwrap();
        assert_eq!(again, AlertOutcome::Cleared { removed: 0 });

        let refired = evaluator.evaluate(&input(60.0), TO).await.unwrap();
        assert_eq!(refired, AlertOutcome::Fired(Severity::Hard));
        assert_eq!(notifier.sent.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_failure_releases_claim() {
        // ---
        let (store, _notifier, evaluator) = setup(true);

        let err = assert_err!(evaluator.evaluate(&input(60.0), TO).await);
        assert!(matches!(err, AlertError::Dispatch(_)));
        assert!(!store.is_active(&key(Severity::Hard)).await);
    }

    #[tokio::test]
    async fn test_missing_recipient_releases_claim() {
        // ---
        let (store, _notifier, evaluator) = setup(false);

        let err = assert_err!(evaluator.evaluate(&input(-20.0), None).await);
        assert!(matches!(err, AlertError::NoRecipient));
        assert!(!store.is_active(&key(Severity::Hard)).await);
    }

    #[test]
    fn test_compose_direction() {
        // ---
        let (subject, body) = compose(&input(60.0), Severity::Hard);
        assert_eq!(subject, "[HARD] Alert: device 4 - temperature");
        assert!(body.contains("Current value: 60 °C"), "{body}");
        assert!(body.contains("exceeded the HARD threshold"), "{body}");

        let (_, body) = compose(&input(-5.0), Severity::Soft);
        assert!(body.contains("fell below the SOFT threshold"), "{body}");
    }
}
