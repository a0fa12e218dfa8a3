use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

use super::ServiceError;
use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), ServiceError>;

    async fn send_magic_link_email(
        &self,
        to_email: &str,
        login_link: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().to_string(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| ServiceError::EmailError(e.to_string()))?
            .credentials(creds)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| ServiceError::EmailError(e.to_string()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(ServiceError::EmailError(e.to_string()))
            }
        }
    }
}

fn action_email(heading: &str, intro: &str, button: &str, link: &str, expiry: &str) -> (String, String) {
    let html = format!(
        r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>{heading}</h2>
    <p>{intro}</p>
    <p><a href="{link}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">{button}</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in {expiry}. If you did not request it, ignore this email.</p>
  </body>
</html>"#
    );
    let plain = format!(
        "{heading}\n\n{intro}\n\n{link}\n\nThis link expires in {expiry}. If you did not request it, ignore this email."
    );
    (plain, html)
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), ServiceError> {
        let (plain, html) = action_email(
            "Password reset request",
            "We received a request to reset your c360 password.",
            "Reset password",
            reset_link,
            "1 hour",
        );
        self.send_email(to_email, "Reset your password", plain, html)
            .await
    }

    async fn send_magic_link_email(
        &self,
        to_email: &str,
        login_link: &str,
    ) -> Result<(), ServiceError> {
        let (plain, html) = action_email(
            "Sign in to c360",
            "Use the link below to sign in.",
            "Sign in",
            login_link,
            "15 minutes",
        );
        self.send_email(to_email, "Your sign-in link", plain, html)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    PasswordReset,
    MagicLink,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub kind: EmailKind,
    pub link: String,
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct MockEmailService {
    outbox: Mutex<Vec<SentEmail>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// The `token` query parameter of the latest link of `kind` sent to `to`.
    pub fn last_token(&self, to: &str, kind: EmailKind) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == to && m.kind == kind)
            .and_then(|m| {
                m.link
                    .split_once("token=")
                    .map(|(_, token)| token.split('&').next().unwrap_or(token).to_string())
            })
    }

    fn record(&self, to: &str, kind: EmailKind, link: &str) -> Result<(), ServiceError> {
        self.outbox
            .lock()
            .map_err(|_| ServiceError::EmailError("mock outbox poisoned".into()))?
            .push(SentEmail {
                to: to.to_string(),
                kind,
                link: link.to_string(),
            });
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), ServiceError> {
        self.record(to_email, EmailKind::PasswordReset, reset_link)
    }

    async fn send_magic_link_email(
        &self,
        to_email: &str,
        login_link: &str,
    ) -> Result<(), ServiceError> {
        self.record(to_email, EmailKind::MagicLink, login_link)
    }
}
