use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::infrastructure::config::MailerConfig;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutboundMail) -> anyhow::Result<()>;
}

pub fn build_mailer(config: &MailerConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match config.provider.as_str() {
        "resend" => Ok(Arc::new(ResendMailer::new(config)?)),
        "log" => Ok(Arc::new(LogMailer)),
        "memory" => Ok(Arc::new(MemoryMailer::default())),
        other => anyhow::bail!("unsupported mailer provider: {other}"),
    }
}

struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
}

impl ResendMailer {
    fn new(config: &MailerConfig) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("resend mailer requires an API key");
        }
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, mail: OutboundMail) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": [mail.to],
            "subject": mail.subject,
            "text": mail.body,
        });
        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("mail delivery failed: {status} {body}");
        }
        Ok(())
    }
}

struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutboundMail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "mail suppressed (log mailer)");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMailer {
    pub sent: RwLock<Vec<OutboundMail>>,
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: OutboundMail) -> anyhow::Result<()> {
        self.sent.write().push(mail);
        Ok(())
    }
}
