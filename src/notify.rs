//! Alert notification delivery.
//!
//! The alert evaluator talks to a [`Notifier`]. [`SmtpNotifier`] sends mail
//! through the `lettre` async SMTP transport; [`LogNotifier`] writes the alert
//! to the log and is used when no SMTP host is configured.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

// ---

/// Error type for notification delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

/// Synchronous-from-the-caller's-view notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), DispatchError>;
}

/// Configuration for the SMTP notifier, built by [`crate::config::load_from_env`].
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    /// Login, when the relay requires authentication.
    pub credentials: Option<(String, String)>,
}

/// Sends alerts as plain-text mail.
pub struct SmtpNotifier {
    from_address: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    // ---
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        // ---
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?.port(config.port);

        if let Some((user, pass)) = &config.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from_address: config.from_address.clone(),
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn dispatch(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        // ---
        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(recipient.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DispatchError::Build(e.to_string()))?;

        self.mailer.send(email).await?;

        info!(to = recipient, subject, "Alert email sent");
        Ok(())
    }
}

/// Writes alerts to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        warn!(to = recipient, subject, body, "SMTP not configured, alert logged only");
        Ok(())
    }
}
