use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

const PRODUCT_NAME: &str = "5D Character Creator";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Writes outgoing mail to the log instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, has_html = email.html.is_some(), "email queued (log only)");
        debug!(body = %email.text, "email body");
        Ok(())
    }
}

/// Keeps every sent message in memory.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    outbox: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.outbox.lock().push(email.clone());
        Ok(())
    }
}

/// Compose the password-reset message pointing at `reset_url`.
pub fn password_reset_email(to: &str, reset_url: &str) -> Email {
    let text = format!(
        "Hello,\n\n\
         You requested a password reset for your {PRODUCT_NAME} account.\n\n\
         Please use the following link to reset your password:\n\
         {reset_url}\n\n\
         If you didn't request this reset, please ignore this email.\n\n\
         The {PRODUCT_NAME} Team\n"
    );
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #d4af37; border-bottom: 1px solid #eee; padding-bottom: 10px;">Password Reset</h2>
  <p>Hello,</p>
  <p>You requested a password reset for your {PRODUCT_NAME} account.</p>
  <p>Please use the following link to reset your password:</p>
  <p><a href="{href}" style="display: inline-block; background-color: #d4af37; color: #000; padding: 10px 20px; text-decoration: none; border-radius: 4px;">Reset Password</a></p>
  <p style="color: #777; margin-top: 20px; font-size: 0.9em;">If you didn't request this reset, please ignore this email.</p>
  <p style="color: #777; font-size: 0.9em;">The {PRODUCT_NAME} Team</p>
</div>"#,
        href = escape_attr(reset_url),
    );
    Email {
        to: to.to_string(),
        subject: format!("{PRODUCT_NAME} - Password Reset"),
        text,
        html: Some(html),
    }
}

fn escape_attr(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}
