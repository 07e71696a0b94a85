//! Notification mail sent after a user updated their account.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use userhub_job_queue::{async_trait, HandlerError, JobExecutor, JobInstance};

use crate::error::MailError;
use crate::job_types;
use crate::mail::{MailMessage, Mailer};
use crate::templates::UPDATE_USER_TEMPLATE;

/// Subject line of the update notification.
pub const UPDATE_USER_SUBJECT: &str = "Atualização de dados!";

/// Recipient of the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailUser {
    pub name: String,
    pub email: String,
}

/// Payload for the UpdateUserMail job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserMailPayload {
    pub user: MailUser,
}

impl UpdateUserMailPayload {
    fn into_message(self) -> Result<MailMessage, MailError> {
        let MailUser { name, email } = self.user;
        if !email.contains('@') {
            return Err(MailError::InvalidRecipient(email));
        }

        Ok(MailMessage {
            to: format!("{name} <{email}>"),
            subject: UPDATE_USER_SUBJECT.to_owned(),
            template: UPDATE_USER_TEMPLATE.to_owned(),
            context: BTreeMap::from([("name".to_owned(), name), ("email".to_owned(), email)]),
        })
    }
}

/// Executor for UpdateUserMail jobs.
///
/// Resending the same notification on redelivery is harmless, so the job does not
/// deduplicate.
pub struct UpdateUserMailExecutor {
    mailer: Arc<dyn Mailer>,
}

impl fmt::Debug for UpdateUserMailExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUserMailExecutor")
            .field("mailer", &"<dyn Mailer>")
            .finish()
    }
}

impl UpdateUserMailExecutor {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobExecutor for UpdateUserMailExecutor {
    fn job_type(&self) -> &str {
        job_types::UPDATE_USER_MAIL
    }

    async fn execute(&self, job: &JobInstance) -> Result<(), HandlerError> {
        let payload: UpdateUserMailPayload = serde_json::from_value(job.payload.clone())?;
        let message = payload.into_message()?;

        self.mailer.send(&message).await?;

        info!(job_id = %job.id, attempt = job.attempts, to = %message.to, "update notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<MailMessage>>,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct DownMailer;

    #[async_trait]
    impl Mailer for DownMailer {
        async fn send(&self, _message: &MailMessage) -> Result<(), MailError> {
            Err(MailError::Transport("NetworkError: connection refused".into()))
        }
    }

    fn job(payload: serde_json::Value) -> JobInstance {
        JobInstance::new(job_types::UPDATE_USER_MAIL, payload)
    }

    #[tokio::test]
    async fn test_sends_templated_mail() {
        let mailer = Arc::new(CapturingMailer::default());
        let executor = UpdateUserMailExecutor::new(mailer.clone());
        assert_eq!(executor.job_type(), "UpdateUserMail");

        executor
            .execute(&job(json!({"user": {"name": "Ana", "email": "ana@x.com"}})))
            .await
            .unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "Ana <ana@x.com>");
        assert_eq!(sent[0].subject, UPDATE_USER_SUBJECT);
        assert_eq!(sent[0].template, "updateuser");
        assert_eq!(sent[0].context["name"], "Ana");
        assert_eq!(sent[0].context["email"], "ana@x.com");
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let executor = UpdateUserMailExecutor::new(Arc::new(CapturingMailer::default()));
        let err = executor
            .execute(&job(json!({"name": "Ana"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));

        let err = executor
            .execute(&job(json!({"user": {"name": "Ana", "email": "nope"}})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid recipient: nope");
    }

    #[tokio::test]
    async fn test_mailer_failure_becomes_handler_failure() {
        let executor = UpdateUserMailExecutor::new(Arc::new(DownMailer));
        let err = executor
            .execute(&job(json!({"user": {"name": "Ana", "email": "ana@x.com"}})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "HandlerFailure");
        assert!(err.to_string().contains("NetworkError"));
    }
}
