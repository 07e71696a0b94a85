use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use userhub_backend::build_router;
use userhub_backend::state::AppState;
use userhub_error_tracking::DisabledTracker;
use userhub_job_queue::{
    async_trait, Backoff, FailureReporter, JobRegistry, MemoryBackend, QueueManager, QueuePolicy,
    RetryPolicy, WorkerOptions,
};
use userhub_jobs::{MailError, MailMessage, Mailer};

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl CapturingMailer {
    fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

async fn manager(mailer: Arc<CapturingMailer>) -> Arc<QueueManager> {
    let mut registry = JobRegistry::new();
    userhub_jobs::register_all_executors(&mut registry, mailer).expect("register");
    let backend = MemoryBackend::new(QueuePolicy {
        lease_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Immediate,
        },
    });
    let reporter = FailureReporter::new(Arc::new(DisabledTracker), false);
    Arc::new(
        QueueManager::init(registry, &backend, reporter)
            .await
            .expect("init"),
    )
}

async fn serve(queue: Arc<QueueManager>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let router = build_router(Arc::new(AppState::new(queue)));
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });
    (addr, handle)
}

fn ana() -> Value {
    json!({ "user": { "name": "Ana", "email": "ana@example.com" } })
}

#[tokio::test]
async fn status_routes_report_on_line() {
    let queue = manager(Arc::new(CapturingMailer::default())).await;
    let (addr, handle) = serve(queue).await;

    let body: Value = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body, json!({ "status": "on-line" }));

    let health = reqwest::get(format!("http://{addr}/health")).await.expect("request");
    assert!(health.status().is_success());
    let ready = reqwest::get(format!("http://{addr}/ready")).await.expect("request");
    assert!(ready.status().is_success());

    handle.abort();
}

#[tokio::test]
async fn enqueued_job_waits_until_processing_starts() {
    let queue = manager(Arc::new(CapturingMailer::default())).await;
    let (addr, handle) = serve(queue).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("http://{addr}/jobs/UpdateUserMail"))
        .json(&ana())
        .send()
        .await
        .expect("request");
    assert_eq!(res.status(), reqwest::StatusCode::ACCEPTED);
    let created: Value = res.json().await.expect("json");
    assert_eq!(created["jobName"], "UpdateUserMail");
    let id = created["id"].as_str().expect("id").to_string();

    let job: Value = client
        .get(format!("http://{addr}/jobs/UpdateUserMail/{id}"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(job["state"], "waiting");
    assert_eq!(job["attempts"], 0);
    assert_eq!(job["payload"], ana());

    let counts: Value = client
        .get(format!("http://{addr}/jobs/UpdateUserMail/counts"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(counts["waiting"], 1);
    assert_eq!(counts["active"], 0);

    handle.abort();
}

#[tokio::test]
async fn rejects_unknown_jobs_and_bad_input() {
    let queue = manager(Arc::new(CapturingMailer::default())).await;
    let (addr, handle) = serve(queue).await;
    let client = reqwest::Client::new();

    let unknown = client
        .post(format!("http://{addr}/jobs/DeleteEverything"))
        .json(&ana())
        .send()
        .await
        .expect("request");
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = unknown.json().await.expect("json");
    assert!(body["error"].as_str().is_some());

    let not_object = client
        .post(format!("http://{addr}/jobs/UpdateUserMail"))
        .json(&json!([1, 2, 3]))
        .send()
        .await
        .expect("request");
    assert_eq!(not_object.status(), reqwest::StatusCode::BAD_REQUEST);

    let bad_id = client
        .get(format!("http://{addr}/jobs/UpdateUserMail/not-a-uuid"))
        .send()
        .await
        .expect("request");
    assert_eq!(bad_id.status(), reqwest::StatusCode::BAD_REQUEST);

    let missing = client
        .get(format!(
            "http://{addr}/jobs/UpdateUserMail/{}",
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}

#[tokio::test]
async fn worker_sends_mail_and_acks_job() {
    let mailer = Arc::new(CapturingMailer::default());
    let queue = manager(mailer.clone()).await;
    let processing = queue
        .start_processing(WorkerOptions {
            poll_interval: Duration::from_millis(25),
            error_backoff: Duration::from_millis(25),
        })
        .expect("start");
    let (addr, handle) = serve(queue).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("http://{addr}/jobs/UpdateUserMail"))
        .json(&ana())
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let id = created["id"].as_str().expect("id").to_string();

    let mut gone = false;
    for _ in 0..100 {
        let res = client
            .get(format!("http://{addr}/jobs/UpdateUserMail/{id}"))
            .send()
            .await
            .expect("request");
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "acked job should no longer be visible");

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "Ana <ana@example.com>");
    assert_eq!(sent[0].subject, "Atualização de dados!");

    processing.shutdown().await;
    handle.abort();
}
