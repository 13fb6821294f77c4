use std::path::{Path, PathBuf};
use tripclaim_email::{write_bundle, BundleError, MailError, Mailer, SmtpConfig};

use crate::pipeline::RunSummary;

/// `<run dir>/<YYYY-MM>_expenses.zip` holding every artifact of the run.
pub fn bundle_run(summary: &RunSummary) -> Result<PathBuf, BundleError> {
    let path = summary
        .artifacts
        .directory
        .join(format!("{}_expenses.zip", summary.period));
    write_bundle(&path, &summary.artifacts.files())
}

pub async fn email_bundle(
    smtp: &SmtpConfig,
    summary: &RunSummary,
    bundle: &Path,
) -> Result<(), MailError> {
    let mailer = Mailer::new(smtp)?;
    let content = tokio::fs::read(bundle).await?;
    let file_name = bundle
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "expenses.zip".to_string());

    let message = mailer.compose(
        &format!("Trip expenses {}", summary.period),
        &summary.to_string(),
        &file_name,
        content,
    )?;
    mailer.send(message).await
}
