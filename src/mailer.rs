//! Outbound email: the `MailSender` seam and its HTTP provider client.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

const RESEND_API_BASE: &str = "https://api.resend.com/";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid mail endpoint: {0}")]
    Endpoint(String),
    #[error("mail provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected mail provider response: {0}")]
    Response(String),
}

/// One message as handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver one message, returning the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError>;
}

#[derive(Clone)]
pub struct ResendMailer {
    http: Client,
    base_url: Url,
    api_key: String,
    from: String,
}

impl fmt::Debug for ResendMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendMailer")
            .field("base_url", &self.base_url)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> Result<Self, MailError> {
        Self::with_base_url(api_key, from, RESEND_API_BASE)
    }

    pub fn with_base_url(api_key: String, from: String, base_url: &str) -> Result<Self, MailError> {
        let base_url = Url::parse(base_url).map_err(|e| MailError::Endpoint(e.to_string()))?;
        let http = Client::builder().user_agent("lead-alerts/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            from,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, MailError> {
        let base = cfg.mail.base_url.as_deref().unwrap_or(RESEND_API_BASE);
        Self::with_base_url(cfg.mail.api_key.clone(), cfg.mail.from.clone(), base)
    }

    pub fn build_request(&self, email: &OutgoingEmail) -> Result<reqwest::Request, MailError> {
        let endpoint = self
            .base_url
            .join("emails")
            .map_err(|e| MailError::Endpoint(e.to_string()))?;
        let body = SendEmailRequest {
            from: &self.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        };
        Ok(self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .build()?)
    }
}

#[async_trait]
impl MailSender for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let request = self.build_request(email)?;
        debug!(url = %request.url(), to = %email.to, "sending email");
        let res = self.http.execute(request).await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "mail provider error");
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        let payload: SendEmailResponse =
            serde_json::from_str(&body).map_err(|e| MailError::Response(e.to_string()))?;
        Ok(payload.id)
    }
}

/// Logs instead of sending. Used for dry runs.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        info!(to = %email.to, subject = %email.subject, "dry run: email not sent");
        Ok(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }
}
