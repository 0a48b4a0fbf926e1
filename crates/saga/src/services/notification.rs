//! Customer notification trait and implementations.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::{read, write};

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotificationError(pub String);

/// Outbound customer email. Fire-and-forget from the orchestrator's side:
/// callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_basic_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError>;

    async fn send_html_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), NotificationError>;
}

/// Notifier that only writes the email to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_basic_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        tracing::info!(to, subject, body_len = body.len(), "email sent");
        Ok(())
    }

    async fn send_html_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), NotificationError> {
        tracing::info!(to, subject, html_len = html.len(), "html email sent");
        Ok(())
    }
}

/// An email captured by [`InMemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<SentEmail>,
    fail_on_send: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        write(&self.state).fail_on_send = fail;
    }

    /// Emails delivered so far, in order.
    pub fn sent(&self) -> Vec<SentEmail> {
        read(&self.state).sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        read(&self.state).sent.len()
    }

    fn deliver(&self, to: &str, subject: &str, body: &str, html: bool) -> Result<(), NotificationError> {
        let mut state = write(&self.state);
        if state.fail_on_send {
            return Err(NotificationError("mail relay down".to_string()));
        }
        state.sent.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            html,
        });
        Ok(())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send_basic_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        self.deliver(to, subject, body, false)
    }

    async fn send_html_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), NotificationError> {
        self.deliver(to, subject, html, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_notifier_records_and_fails() {
        let notifier = InMemoryNotifier::new();
        notifier
            .send_basic_email("a@example.com", "Hi", "body")
            .await
            .unwrap();
        notifier
            .send_html_email("a@example.com", "Hi", "<p>body</p>")
            .await
            .unwrap();

        notifier.set_fail_on_send(true);
        assert!(notifier.send_basic_email("a@example.com", "Hi", "x").await.is_err());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].html);
        assert!(sent[1].html);
    }
}
