//! Delivery of queued messages.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use tracing::info;

use super::outbox::EmailMessage;
use crate::config::{MailConfig, SmtpConfig};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// Sends one rendered message.
pub trait MailTransport: Send + Sync + 'static {
    fn deliver(&self, message: &EmailMessage) -> impl Future<Output = Result<(), MailError>> + Send;
}

/// Plain-text SMTP delivery through lettre's tokio transport.
#[derive(Clone)]
pub struct SmtpMailTransport {
    host: String,
    port: u16,
    credentials: Credentials,
    from: String,
}

impl SmtpMailTransport {
    pub fn new(smtp: &SmtpConfig, from: impl Into<String>) -> Self {
        Self {
            host: smtp.host.clone(),
            port: smtp.port,
            credentials: Credentials::new(smtp.username.clone(), smtp.password.clone()),
            from: from.into(),
        }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
            .map_err(|e| MailError::Smtp(format!("relay {}: {e}", self.host)))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();
        Ok(transport)
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message, MailError> {
        let to = if message.recipient.name.is_empty() {
            message.recipient.email.clone()
        } else {
            format!("{} <{}>", message.recipient.name, message.recipient.email)
        };
        Message::builder()
            .from(self.from.parse().map_err(|e| MailError::InvalidAddress {
                address: self.from.clone(),
                reason: format!("{e}"),
            })?)
            .to(to.parse().map_err(|e| MailError::InvalidAddress {
                address: to.clone(),
                reason: format!("{e}"),
            })?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<(), MailError> {
        let email = self.build_message(message)?;
        let mailer = self.build_transport()?;
        mailer
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| MailError::Smtp(e.to_string()))
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailTransport;

impl MailTransport for LogMailTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(
            message = %message.id,
            to = %message.recipient.email,
            kind = message.kind.key(),
            subject = %message.subject,
            "mail delivered to log"
        );
        Ok(())
    }
}

/// Keeps delivered messages in memory. Addresses listed in `reject` fail.
#[derive(Debug, Default)]
pub struct MemoryMailTransport {
    delivered: Mutex<Vec<EmailMessage>>,
    reject: Mutex<BTreeSet<String>>,
}

impl MemoryMailTransport {
    pub fn reject(&self, address: impl Into<String>) {
        self.reject.lock().insert(address.into());
    }

    pub fn delivered(&self) -> Vec<EmailMessage> {
        self.delivered.lock().clone()
    }
}

impl MailTransport for MemoryMailTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.reject.lock().contains(&message.recipient.email) {
            return Err(MailError::Rejected(message.recipient.email.clone()));
        }
        self.delivered.lock().push(message.clone());
        Ok(())
    }
}

/// Transport chosen from configuration: SMTP when a host is set, the log otherwise.
pub enum ConfiguredTransport {
    Smtp(SmtpMailTransport),
    Log(LogMailTransport),
}

impl ConfiguredTransport {
    pub fn from_config(mail: &MailConfig) -> Self {
        match &mail.smtp {
            Some(smtp) => ConfiguredTransport::Smtp(SmtpMailTransport::new(smtp, &mail.from_address)),
            None => ConfiguredTransport::Log(LogMailTransport),
        }
    }
}

impl MailTransport for ConfiguredTransport {
    async fn deliver(&self, message: &EmailMessage) -> Result<(), MailError> {
        match self {
            ConfiguredTransport::Smtp(smtp) => smtp.deliver(message).await,
            ConfiguredTransport::Log(log) => log.deliver(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;
    use crate::notifications::autosend::Recipient;
    use crate::notifications::outbox::MessageStatus;
    use crate::notifications::template::{RecipientRole, TemplateKind};
    use crate::store::test_support::at;

    fn message(email: &str) -> EmailMessage {
        EmailMessage {
            id: MessageId(1),
            created_at: at(8),
            kind: TemplateKind::GeneralMessage,
            subject: "Hello".into(),
            body: "Body".into(),
            recipient: Recipient::address("Ada", email, RecipientRole::Guest),
            status: MessageStatus::Pending,
            visit: None,
            booking: None,
            anonymized: false,
        }
    }

    #[tokio::test]
    async fn memory_transport_records_and_rejects() {
        let transport = MemoryMailTransport::default();
        transport.reject("bounce@example.org");
        transport
            .deliver(&message("ada@example.org"))
            .await
            .expect("delivered");
        let err = transport
            .deliver(&message("bounce@example.org"))
            .await
            .expect_err("rejected");
        assert!(matches!(err, MailError::Rejected(_)));
        assert_eq!(transport.delivered().len(), 1);
    }

    #[test]
    fn smtp_transport_targets_the_configured_relay() {
        let smtp = SmtpMailTransport::new(
            &SmtpConfig {
                host: "smtp.example.org".into(),
                port: 2525,
                username: "user".into(),
                password: "secret".into(),
            },
            "noreply@example.org",
        );
        assert!(smtp.build_transport().is_ok());
    }

    #[test]
    fn smtp_message_requires_valid_addresses() {
        let smtp = SmtpMailTransport::new(
            &SmtpConfig {
                host: "smtp.example.org".into(),
                port: 587,
                username: "user".into(),
                password: "secret".into(),
            },
            "Campus Booking <noreply@example.org>",
        );
        assert!(smtp.build_message(&message("ada@example.org")).is_ok());
        let err = smtp
            .build_message(&message("not an address"))
            .expect_err("invalid");
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }
}
