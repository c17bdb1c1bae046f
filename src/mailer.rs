//! Outbound notifications.
//!
//! Only the rendering and the delivery seam live here. The shipped
//! `LogNotifier` writes the rendered message to the log instead of talking to
//! a mail provider.

use async_trait::async_trait;

/// Display name used as the sender of every message.
pub const FROM_NAME: &str = "HubGate";

/// Message templates known to the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    UserWelcome,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::UserWelcome => "user_invitation",
        }
    }
}

/// A message ready to be delivered.
#[derive(Debug, Clone)]
pub struct Mail {
    pub template: Template,
    pub recipient_name: String,
    pub recipient_address: String,
    pub subject: String,
    pub body: String,
    /// Provider-side sandbox: accepted but never delivered
    pub sandbox: bool,
}

impl Mail {
    /// Welcome message carrying the activation link.
    pub fn welcome(username: &str, address: &str, activation_url: &str, sandbox: bool) -> Self {
        let subject = format!("Finish registration with {}", FROM_NAME);
        let body = format!(
            "Hi {username},\n\n\
             Thanks for signing up for {FROM_NAME}. To start using your account, \
             please confirm your email address by visiting:\n\n\
             {activation_url}\n\n\
             If you did not sign up, you can safely ignore this message.\n\n\
             The {FROM_NAME} team\n"
        );

        Self {
            template: Template::UserWelcome,
            recipient_name: username.to_string(),
            recipient_address: address.to_string(),
            subject,
            body,
            sandbox,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("notification rejected with status {0}")]
    Rejected(u16),
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Delivery seam. Returns the provider's status code on success.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<u16, MailError>;
}

/// Notifier that logs the rendered message and reports it as accepted.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, mail: &Mail) -> Result<u16, MailError> {
        tracing::info!(
            template = mail.template.name(),
            to = %mail.recipient_address,
            sandbox = mail.sandbox,
            subject = %mail.subject,
            "Notification accepted"
        );
        tracing::debug!(body = %mail.body, "Notification body");
        Ok(202)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_contains_activation_url() {
        let mail = Mail::welcome(
            "alice",
            "alice@example.com",
            "http://localhost:5173/confirm/abc",
            true,
        );
        assert_eq!(mail.template, Template::UserWelcome);
        assert!(mail.body.contains("http://localhost:5173/confirm/abc"));
        assert!(mail.body.starts_with("Hi alice,"));
        assert!(mail.sandbox);
    }

    #[tokio::test]
    async fn test_log_notifier_accepts() {
        let mail = Mail::welcome("bob", "bob@example.com", "http://x/confirm/1", false);
        assert_eq!(LogNotifier.send(&mail).await.unwrap(), 202);
    }
}
