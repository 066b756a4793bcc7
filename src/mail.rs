use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("message: {0}")]
    Message(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// What a visitor submitted through the contact page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

impl ContactMessage {
    pub fn body(&self) -> String {
        format!(
            "Name: {}\nEmail: {}\nPhone: {}\nMessage: {}",
            self.name, self.email, self.phone, self.message
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Relays one contact message to the site operator.
    async fn send_contact(&self, msg: &ContactMessage) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Operator address; used as login, sender and recipient.
    pub address: String,
    pub password: String,
    pub timeout: Duration,
}

// ---------------- SMTP relay (STARTTLS) ----------------
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    operator: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let operator: Mailbox = settings
            .address
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::Address(e.to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(settings.port)
            .credentials(Credentials::new(settings.address.clone(), settings.password.clone()))
            .timeout(Some(settings.timeout))
            .build();
        info!(
            "SMTP relay configured host={} port={} timeout={:?}",
            settings.host, settings.port, settings.timeout
        );
        Ok(Self { transport, operator })
    }

    fn compose(&self, msg: &ContactMessage) -> Result<Message, MailError> {
        Message::builder()
            .from(self.operator.clone())
            .to(self.operator.clone())
            .subject(format!("New message from {}", msg.name))
            .header(ContentType::TEXT_PLAIN)
            .body(msg.body())
            .map_err(|e| MailError::Message(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_contact(&self, msg: &ContactMessage) -> Result<(), MailError> {
        let email = self.compose(msg)?;
        if let Err(e) = self.transport.send(email).await {
            error!("smtp send failed to={} err={e:?}", self.operator);
            return Err(MailError::Transport(e.to_string()));
        }
        info!("contact message relayed to {}", self.operator);
        Ok(())
    }
}
