pub mod bundle;
pub mod mailer;

pub use bundle::{write_bundle, BundleError};
pub use mailer::{MailError, Mailer, SmtpConfig};
