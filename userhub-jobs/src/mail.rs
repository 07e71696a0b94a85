//! Outgoing mail.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::MailError;
use crate::templates::Templates;

const USER_AGENT: &str = concat!("userhub/", env!("CARGO_PKG_VERSION"));

/// A templated mail waiting to be rendered and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient in `Name <address>` form.
    pub to: String,
    pub subject: String,
    pub template: String,
    pub context: BTreeMap<String, String>,
}

/// Fully rendered mail as handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Something that can deliver mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

fn render(
    templates: &Templates,
    from: &str,
    message: &MailMessage,
) -> Result<RenderedMail, MailError> {
    Ok(RenderedMail {
        from: from.to_owned(),
        to: message.to.clone(),
        subject: message.subject.clone(),
        text: templates.render(&message.template, &message.context)?,
    })
}

/// Mailer that writes rendered mail to the log instead of sending it.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
    templates: Templates,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self::with_templates(from, Templates::default())
    }

    pub fn with_templates(from: impl Into<String>, templates: Templates) -> Self {
        Self {
            from: from.into(),
            templates,
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let mail = render(&self.templates, &self.from, message)?;
        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.text,
            "mail delivered to log"
        );
        Ok(())
    }
}

/// Mailer posting rendered mail as JSON to an HTTP mail API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
    templates: Templates,
}

impl HttpMailer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
            templates: Templates::default(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let mail = render(&self.templates, &self.from, message)?;

        let mut request = self.client.post(&self.endpoint).json(&mail);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(to = %mail.to, template = %message.template, "mail accepted by provider");
        Ok(())
    }
}
