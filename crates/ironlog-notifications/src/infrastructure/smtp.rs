//! SMTP sender using lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::domain::error::SendError;
use crate::domain::message::{RenderedMessage, Sender};

/// SMTP connection and sender identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Envelope sender, e.g. `Ironlog <noreply@ironlog.example>`.
    pub from: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Use an implicit/STARTTLS relay instead of a plaintext connection.
    pub use_tls: bool,
}

/// Delivers messages through an SMTP relay.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl SmtpSender {
    /// Builds the transport. No connection is opened until the first send.
    ///
    /// # Errors
    ///
    /// Returns `SendError` if the sender address is invalid or the relay
    /// cannot be configured.
    pub fn new(config: &SmtpConfig) -> Result<Self, SendError> {
        let from: Mailbox = config.from.parse().map_err(|e: lettre::address::AddressError| {
            SendError::Address {
                address: config.from.clone(),
                message: e.to_string(),
            }
        })?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SendError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            host: config.host.clone(),
        })
    }

    fn build_message(&self, recipient: &str, message: &RenderedMessage) -> Result<Message, SendError> {
        let to: Mailbox = recipient.parse().map_err(|e: lettre::address::AddressError| {
            SendError::Address {
                address: recipient.to_owned(),
                message: e.to_string(),
            }
        })?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone());

        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body.clone());

        let built = match &message.html_body {
            Some(html) => builder.multipart(
                MultiPart::alternative().singlepart(text).singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
            ),
            None => builder.singlepart(text),
        };
        built.map_err(|e| SendError::Build(e.to_string()))
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<bool, SendError> {
        let email = self.build_message(recipient, message)?;

        let response = self.transport.send(email).await.map_err(|e| {
            tracing::error!(recipient, host = %self.host, error = %e, "smtp send failed");
            SendError::Transport(e.to_string())
        })?;

        tracing::info!(
            recipient,
            code = %response.code(),
            "email accepted by smtp relay"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".to_owned(),
            port: 1025,
            from: "Ironlog <noreply@ironlog.example>".to_owned(),
            username: None,
            password: None,
            use_tls: false,
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: "Hello".to_owned(),
            text_body: "Body".to_owned(),
            html_body: Some("<p>Body</p>".to_owned()),
        }
    }

    #[test]
    fn test_new_rejects_invalid_from_address() {
        let mut config = config();
        config.from = "not an address".to_owned();

        let err = SmtpSender::new(&config).err().unwrap();

        assert!(matches!(err, SendError::Address { .. }));
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_recipient_before_connecting() {
        let sender = SmtpSender::new(&config()).unwrap();

        let err = sender.send("nobody", &message()).await.unwrap_err();

        assert!(matches!(err, SendError::Address { ref address, .. } if address == "nobody"));
    }

    #[test]
    fn test_build_message_includes_html_alternative() {
        let sender = SmtpSender::new(&config()).unwrap();

        let email = sender.build_message("a@x.com", &message()).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Hello"));
    }
}
