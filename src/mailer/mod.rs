/// Email delivery for verify codes
use crate::{
    config::EmailConfig,
    error::{LinkError, LinkResult},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Something that can deliver a verify code to a mailbox
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verify_code(&self, to: &str, title: &str, code: &str) -> LinkResult<()>;
}

fn verify_code_body(code: &str) -> String {
    format!(
        r#"
Hello,

Your SAST Link verification code is:

    {}

The code expires in 3 minutes. If you did not request it, ignore this email.

SAST Link
"#,
        code
    )
}

/// SMTP mailer
///
/// Without an `EmailConfig` it logs and drops messages, which keeps local
/// development usable without a relay.
#[derive(Clone)]
pub struct Mailer {
    config: Option<EmailConfig>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl Mailer {
    pub fn new(config: Option<EmailConfig>) -> LinkResult<Self> {
        let transport = match &config {
            Some(email_config) => {
                let creds =
                    Credentials::new(email_config.sender.clone(), email_config.secret.clone());
                let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&email_config.smtp_host)
                    .map_err(|e| LinkError::Mail(format!("SMTP setup failed: {}", e)))?
                    .port(email_config.smtp_port)
                    .credentials(creds)
                    .build();
                Some(transport)
            }
            None => None,
        };

        Ok(Self { config, transport })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn send_email(&self, to: &str, subject: &str, body: String) -> LinkResult<()> {
        let (Some(config), Some(transport)) = (&self.config, &self.transport) else {
            tracing::warn!(to = %to, "Email not configured, dropping message");
            return Ok(());
        };

        let email = Message::builder()
            .from(
                config
                    .sender
                    .parse()
                    .map_err(|e| LinkError::Mail(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| LinkError::InvalidInput(format!("Invalid email address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| LinkError::Mail(format!("Failed to build email: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| LinkError::Mail(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %to, subject = %subject, "Sent email");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for Mailer {
    async fn send_verify_code(&self, to: &str, title: &str, code: &str) -> LinkResult<()> {
        if !self.is_configured() {
            tracing::debug!(to = %to, code = %code, "Email not configured, verify code not sent");
            return Ok(());
        }
        self.send_email(to, title, verify_code_body(code)).await
    }
}

/// Message captured by `RecordingMailer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub to: String,
    pub title: String,
    pub code: String,
}

/// Mailer that keeps every message in memory
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentCode>>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first
    pub async fn sent(&self) -> Vec<SentCode> {
        self.sent.lock().await.clone()
    }

    /// Most recent code sent to `to`
    pub async fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|sent| sent.to == to)
            .map(|sent| sent.code.clone())
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send_verify_code(&self, to: &str, title: &str, code: &str) -> LinkResult<()> {
        self.sent.lock().await.push(SentCode {
            to: to.to_string(),
            title: title.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_contains_code() {
        assert!(verify_code_body("S-aB3xY").contains("S-aB3xY"));
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_logs_instead_of_sending() {
        let mailer = Mailer::new(None).unwrap();
        assert!(!mailer.is_configured());
        mailer
            .send_verify_code("a@x.edu", "Verify", "S-aaaaa")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        for code in ["S-11111", "S-22222"] {
            mailer
                .send_verify_code("a@x.edu", "Verify", code)
                .await
                .unwrap();
        }
        assert_eq!(mailer.sent().await.len(), 2);
        assert_eq!(
            mailer.last_code_for("a@x.edu").await,
            Some("S-22222".to_string())
        );
    }
}
