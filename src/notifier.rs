//! Change notification rendering and dispatch.
//!
//! The notifier turns ledger transitions into `(title, body)` alerts and
//! forwards them to an external sink: a JSON webhook when one is configured,
//! the log otherwise. Delivery is fire-and-forget from the engine's point of
//! view - a sink failure is logged and never propagates back into the
//! watcher or scanner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hasher::Digest;
use crate::resolver::PathResolver;

/// HTTP request timeout for webhook delivery.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while delivering a notification.
///
/// Always non-fatal; the dispatcher logs and drops them.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The webhook request failed outright.
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("webhook returned status {status}")]
    Status { status: u16 },
}

/// Wire form of a delivered notification.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
}

/// A state transition worth alerting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    /// A previously unknown file appeared.
    Created {
        path: PathBuf,
        hash: Digest,
        /// File size at observation time, when it could be read.
        size: Option<u64>,
    },

    /// A tracked file's content changed.
    Modified {
        path: PathBuf,
        old_hash: Digest,
        new_hash: Digest,
        /// Set when the change was caught by a reconciliation scan rather
        /// than a live event.
        during_scan: bool,
    },

    /// A tracked file disappeared.
    Deleted {
        path: PathBuf,
        last_hash: Digest,
    },

    /// A tracked file was moved or renamed.
    Moved {
        from: PathBuf,
        to: PathBuf,
        hash: Digest,
    },
}

/// Renders and delivers change notifications.
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
    resolver: Arc<PathResolver>,
}

impl Notifier {
    /// Creates a notifier. With no webhook URL, notices are logged only.
    #[must_use]
    pub fn new(webhook_url: Option<String>, resolver: Arc<PathResolver>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            webhook_url,
            resolver,
        }
    }

    /// Renders a notice into its `(title, body)` form.
    #[must_use]
    pub fn render(&self, notice: &ChangeNotice) -> (String, String) {
        let now = Utc::now().to_rfc3339();

        match notice {
            ChangeNotice::Created { path, hash, size } => {
                let mut body = format!(
                    "name: {}\nhash: {}\n",
                    self.display(path),
                    hash.short()
                );
                if let Some(size) = size {
                    body.push_str(&format!("size: {size} bytes\n"));
                }
                body.push_str(&format!("date: {now}"));
                ("File created".to_string(), body)
            }

            ChangeNotice::Modified {
                path,
                old_hash,
                new_hash,
                during_scan,
            } => {
                let title = if *during_scan {
                    "File changed during scan"
                } else {
                    "File modified"
                };
                let body = format!(
                    "name: {}\nold hash: {}\nnew hash: {}\ndate: {now}",
                    self.display(path),
                    old_hash.short(),
                    new_hash.short()
                );
                (title.to_string(), body)
            }

            ChangeNotice::Deleted { path, last_hash } => {
                let body = format!(
                    "name: {}\nlast hash: {}\ndate: {now}",
                    self.display(path),
                    last_hash.short()
                );
                ("File deleted".to_string(), body)
            }

            ChangeNotice::Moved { from, to, hash } => {
                let body = format!(
                    "from: {}\nto: {}\nhash: {}\ndate: {now}",
                    self.display(from),
                    self.display(to),
                    hash.short()
                );
                ("File moved".to_string(), body)
            }
        }
    }

    /// Renders and delivers a notice.
    ///
    /// Never fails from the caller's perspective; delivery errors are logged
    /// at `warn` and dropped.
    pub async fn dispatch(&self, notice: &ChangeNotice) {
        let (title, body) = self.render(notice);

        match &self.webhook_url {
            Some(url) => {
                if let Err(e) = self.send_webhook(url, &title, &body).await {
                    warn!(title = %title, error = %e, "Failed to deliver notification");
                } else {
                    debug!(title = %title, "Notification delivered");
                }
            }
            None => {
                info!(title = %title, body = %body, "Change notice");
            }
        }
    }

    async fn send_webhook(&self, url: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&WebhookPayload { title, body })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    fn display(&self, path: &Path) -> String {
        self.resolver.relative_display(path)
    }
}
