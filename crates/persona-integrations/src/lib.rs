pub mod mail;
pub mod notion;

pub use mail::{password_reset_email, Email, LogMailer, MailError, Mailer, RecordingMailer};
pub use notion::{extract_database_id, DatabaseSummary, DocumentExporter, ExportError, NotionConfig, NotionExporter};
