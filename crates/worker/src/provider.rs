//! Email providers
//!
//! The worker hands fully rendered emails to an [`EmailProvider`]. The SMTP
//! implementation targets the SES SMTP interface in production (deriving the
//! SMTP password from the AWS secret key) and plain relays elsewhere; the
//! mock implementation returns synthetic receipts so non-production
//! environments never touch a real mail server.
//!
//! Delivery is at-least-once end to end: a crash between provider accept and
//! state advancement can repeat a send. Consumers of the receipt must treat
//! message ids as possibly duplicated per step.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use outreach_core::config::AwsConfig;
use outreach_core::error::PipelineError;
use outreach_core::models::{EmailData, SendReceipt};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

/// Destination for rendered emails.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &EmailData) -> Result<SendReceipt, PipelineError>;
}

/// SMTP-backed provider with pooled connections and bounded internal retry.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl SmtpProvider {
    /// Provider speaking to the SES SMTP endpoint for the given region.
    pub fn ses(
        aws: &AwsConfig,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, PipelineError> {
        let host = format!("email-smtp.{}.amazonaws.com", aws.region);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| PipelineError::Provider(format!("failed to create transport: {e}")))?
            .credentials(Credentials::new(
                aws.access_key_id.clone(),
                ses_smtp_password(&aws.secret_access_key, &aws.region),
            ))
            .pool_config(PoolConfig::new().max_size(4))
            .build();

        Ok(Self {
            transport,
            retry_attempts,
            retry_delay,
        })
    }

    /// Unauthenticated plaintext SMTP, for local relays and tests.
    pub fn insecure(host: &str, port: u16, retry_attempts: u32, retry_delay: Duration) -> Self {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self {
            transport,
            retry_attempts,
            retry_delay,
        }
    }

    fn build_message(email: &EmailData) -> Result<Message, PipelineError> {
        let from = email
            .from_email
            .as_deref()
            .ok_or_else(|| PipelineError::Provider("no sender address configured".to_string()))?;
        let from: Mailbox = match &email.from_name {
            Some(name) => format!("{name} <{from}>"),
            None => from.to_string(),
        }
        .parse()
        .map_err(|e| PipelineError::Provider(format!("invalid from address: {e}")))?;

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| PipelineError::Provider(format!("invalid to address: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML);

        if let Some(reply_to) = &email.reply_to {
            let mailbox: Mailbox = reply_to
                .parse()
                .map_err(|e| PipelineError::Provider(format!("invalid reply-to address: {e}")))?;
            builder = builder.reply_to(mailbox);
        }
        for cc in &email.cc {
            let mailbox: Mailbox = cc
                .parse()
                .map_err(|e| PipelineError::Provider(format!("invalid cc address: {e}")))?;
            builder = builder.cc(mailbox);
        }
        for bcc in &email.bcc {
            let mailbox: Mailbox = bcc
                .parse()
                .map_err(|e| PipelineError::Provider(format!("invalid bcc address: {e}")))?;
            builder = builder.bcc(mailbox);
        }

        builder
            .body(email.body.clone())
            .map_err(|e| PipelineError::Provider(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailData) -> Result<SendReceipt, PipelineError> {
        let message = Self::build_message(email)?;

        let mut last_error = String::new();
        for attempt in 1..=self.retry_attempts {
            match self.transport.send(message.clone()).await {
                Ok(response) => {
                    let message_id = response.message().collect::<Vec<_>>().join(" ");
                    return Ok(SendReceipt { message_id });
                }
                Err(e) => {
                    warn!(attempt, to = %email.to, error = %e, "smtp send attempt failed");
                    last_error = e.to_string();
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(PipelineError::Provider(format!(
            "send failed after {} attempts: {last_error}",
            self.retry_attempts
        )))
    }
}

/// Synthetic-success provider for non-production environments.
pub struct MockProvider;

#[async_trait]
impl EmailProvider for MockProvider {
    async fn send(&self, email: &EmailData) -> Result<SendReceipt, PipelineError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            lead_id = %email.lead_id,
            "mock provider accepted email"
        );
        Ok(SendReceipt {
            message_id: format!("mock-{}", Uuid::new_v4()),
        })
    }
}

/// Derive the SES SMTP password from an AWS secret access key.
///
/// SigV4 key chain over the fixed date "11111111" and the SendRawEmail
/// message, version byte 0x04 prepended, base64 encoded.
pub(crate) fn ses_smtp_password(secret_access_key: &str, region: &str) -> String {
    let date = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), b"11111111");
    let region_key = hmac_sha256(&date, region.as_bytes());
    let service = hmac_sha256(&region_key, b"ses");
    let terminal = hmac_sha256(&service, b"aws4_request");
    let signature = hmac_sha256(&terminal, b"SendRawEmail");

    let mut versioned = Vec::with_capacity(signature.len() + 1);
    versioned.push(0x04);
    versioned.extend_from_slice(&signature);
    BASE64.encode(versioned)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn email() -> EmailData {
        EmailData {
            to: "jane@acme.example".to_string(),
            subject: "Quick question".to_string(),
            body: "<p>Hello Jane</p>".to_string(),
            lead_id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            from_email: Some("sender@outreach.example".to_string()),
            from_name: Some("Alex".to_string()),
            reply_to: None,
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }

    #[test]
    fn ses_password_is_deterministic_and_versioned() {
        let a = ses_smtp_password("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", "eu-west-1");
        let b = ses_smtp_password("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", "eu-west-1");
        assert_eq!(a, b);
        // 33 bytes (version + 32-byte signature) base64 encoded.
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn ses_password_depends_on_region_and_secret() {
        let base = ses_smtp_password("secret", "eu-west-1");
        assert_ne!(base, ses_smtp_password("secret", "us-east-1"));
        assert_ne!(base, ses_smtp_password("other-secret", "eu-west-1"));
    }

    #[test]
    fn build_message_requires_a_sender() {
        let mut data = email();
        data.from_email = None;
        assert!(SmtpProvider::build_message(&data).is_err());
    }

    #[test]
    fn build_message_rejects_bad_addresses() {
        let mut data = email();
        data.to = "not an address".to_string();
        assert!(SmtpProvider::build_message(&data).is_err());
    }

    #[tokio::test]
    async fn mock_provider_returns_synthetic_receipt() {
        let receipt = MockProvider.send(&email()).await.expect("send");
        assert!(receipt.message_id.starts_with("mock-"));
    }

    #[tokio::test]
    async fn smtp_provider_fails_after_bounded_attempts() {
        // Nothing listens on this port; every attempt gets connection refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let provider = SmtpProvider::insecure("127.0.0.1", port, 2, Duration::from_millis(10));
        let result = provider.send(&email()).await;
        assert!(matches!(result, Err(PipelineError::Provider(_))));
    }

    #[tokio::test]
    async fn smtp_provider_delivers_subject_and_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();

            reader
                .get_mut()
                .write_all(b"220 localhost ESMTP\r\n")
                .await
                .unwrap();

            loop {
                line.clear();
                let n = reader.read_line(&mut line).await.unwrap();
                if n == 0 {
                    break;
                }

                let cmd = line.split_whitespace().next().unwrap_or("").to_uppercase();
                match cmd.as_str() {
                    "EHLO" | "HELO" => {
                        reader
                            .get_mut()
                            .write_all(b"250-localhost\r\n250 8BITMIME\r\n")
                            .await
                            .unwrap();
                    }
                    "MAIL" => {
                        reader
                            .get_mut()
                            .write_all(b"250 2.1.0 Ok\r\n")
                            .await
                            .unwrap();
                    }
                    "RCPT" => {
                        reader
                            .get_mut()
                            .write_all(b"250 2.1.5 Ok\r\n")
                            .await
                            .unwrap();
                    }
                    "DATA" => {
                        reader
                            .get_mut()
                            .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                            .await
                            .unwrap();
                        let mut email_data = String::new();
                        loop {
                            line.clear();
                            let n = reader.read_line(&mut line).await.unwrap();
                            if n == 0 || line == ".\r\n" || line == ".\n" {
                                break;
                            }
                            email_data.push_str(&line);
                        }
                        assert!(email_data.contains("Subject: Quick question"));
                        assert!(email_data.contains("Hello Jane"));
                        reader
                            .get_mut()
                            .write_all(b"250 2.0.0 Ok: queued as ABC123\r\n")
                            .await
                            .unwrap();
                    }
                    "QUIT" => {
                        reader
                            .get_mut()
                            .write_all(b"221 2.0.0 Bye\r\n")
                            .await
                            .unwrap();
                        break;
                    }
                    _ => {
                        reader
                            .get_mut()
                            .write_all(b"500 Command not recognized\r\n")
                            .await
                            .unwrap();
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let provider = SmtpProvider::insecure("127.0.0.1", port, 1, Duration::from_millis(10));
        let receipt = provider.send(&email()).await.expect("send");
        assert!(receipt.message_id.contains("queued"));

        server.await.unwrap();
    }
}
