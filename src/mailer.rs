use std::{env, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
};

/// A transactional message for the notification collaborator.
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound-email seam. Services call this trait so tests can substitute a
/// recording implementation and development runs can log instead of sending.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Real SMTP delivery via lettre (STARTTLS).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(host) = env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let port = env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(587);
        let from = env::var("SMTP_FROM").unwrap_or_else(|_| "noreply@example.com".to_string());

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)?.port(port);
        if let (Ok(user), Ok(pass)) = (env::var("SMTP_USER"), env::var("SMTP_PASS")) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Some(Self {
            transport: builder.build(),
            from,
        }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("invalid SMTP_FROM address")?)
            .to(email.to.parse().context("invalid recipient address")?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())?;

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        tracing::info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Development fallback when SMTP is not configured: log the message.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.html,
            "SMTP not configured, logging email instead of sending"
        );
        Ok(())
    }
}

/// Pick the mailer for this process from the environment.
pub fn from_env() -> Result<Arc<dyn Mailer>> {
    match SmtpMailer::from_env()? {
        Some(smtp) => Ok(Arc::new(smtp)),
        None => {
            tracing::warn!("SMTP_HOST not set, emails will be logged only");
            Ok(Arc::new(LogMailer))
        }
    }
}
