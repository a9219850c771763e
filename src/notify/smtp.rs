use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use super::{Notifier, NotifyError};

/// Mail relay parameters, resolved from config and environment.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e| NotifyError::Address {
        address: address.to_string(),
        source: e,
    })
}

/// Plain-text mail over a STARTTLS relay.
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    /// Validate addresses and prepare the relay. No connection is made until
    /// the first send.
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&settings.from)?;
        let to = settings
            .to
            .iter()
            .map(|a| parse_mailbox(a))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = SmtpTransport::starttls_relay(&settings.host)?.port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for rcpt in &self.to {
            builder = builder.to(rcpt.clone());
        }
        Ok(builder.body(body.to_string())?)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = self.build_message(subject, body)?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("robot@example.com".into()),
            password: Some("hunter2".into()),
            from: "robot@example.com".into(),
            to: vec!["ops@example.com".into(), "Ops Two <ops2@example.com>".into()],
        }
    }

    #[test]
    fn test_new_accepts_valid_addresses() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        assert_eq!(notifier.to.len(), 2);
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mut s = settings();
        s.to = vec!["not an address".into()];
        let err = SmtpNotifier::new(&s).unwrap_err();
        assert!(matches!(err, NotifyError::Address { .. }));
    }

    #[test]
    fn test_message_has_subject_and_recipients() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        let message = notifier
            .build_message("SFTP Downloader", "Report_1 - Updated")
            .unwrap();
        assert_eq!(message.envelope().to().len(), 2);
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: SFTP Downloader"));
        assert!(raw.contains("Report_1 - Updated"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let out = format!("{:?}", settings());
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }
}
