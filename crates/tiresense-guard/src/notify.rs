//! Notification hub and sink implementations
//!
//! Notifications are queued through an unbounded channel to a background
//! sender so that nothing on the hot path ever waits on an external sink.
//! Sink failures are logged and swallowed.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tiresense_common::capabilities::Notifier;
use tiresense_common::{Error, Incident, Notification, RecoveryRecord, Result, Severity};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Severity-filtered, never-blocking notification fan-in
pub struct NotificationHub {
    min_severity: Severity,
    tx: mpsc::UnboundedSender<Notification>,
    _sender_task: tokio::task::JoinHandle<()>,
}

impl NotificationHub {
    pub fn new(sink: Arc<dyn Notifier>, min_severity: Severity) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let sender_task = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = sink.notify(&notification).await {
                    warn!(
                        subject = %notification.subject,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        });
        NotificationHub { min_severity, tx, _sender_task: sender_task }
    }

    /// Push an incident if it clears the severity floor
    pub fn incident(&self, incident: &Incident) {
        if incident.severity < self.min_severity {
            debug!(
                subject = %incident.subject,
                severity = incident.severity.as_str(),
                "incident below notification floor, stored only"
            );
            return;
        }
        self.send(Notification {
            severity: incident.severity,
            subject: incident.subject.clone(),
            summary: format!("{} ({})", incident.kind.as_str(), incident.severity.as_str()),
            details: incident.description.clone(),
        });
    }

    /// Failed recovery actions always notify
    pub fn recovery_failed(&self, record: &RecoveryRecord) {
        self.send(Notification {
            severity: Severity::Error,
            subject: record.target.clone(),
            summary: format!("recovery {} failed", record.action.as_str()),
            details: record.message.clone(),
        });
    }

    /// Unconditional enqueue
    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            error!("notification sender task gone, notification dropped");
        }
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self._sender_task.abort();
    }
}

/// Sink that only writes to the log; the default for development
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            severity = notification.severity.as_str(),
            subject = %notification.subject,
            summary = %notification.summary,
            "notification"
        );
        Ok(())
    }
}

/// Webhook sink posting JSON payloads
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        WebhookNotifier { client: reqwest::Client::new(), url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let payload = json!({
            "severity": notification.severity.as_str(),
            "subject": notification.subject,
            "summary": notification.summary,
            "details": notification.details,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("webhook send failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
