//! Delayed, named task queues delivered over HTTP.
//!
//! A scheduled task becomes a POST back into this service after its delay.
//! The dispatch loop presents a redelivery counter header starting at 0 and
//! bumps it after every non-2xx response, so handlers can bound their own
//! retries and fall back to terminal outcomes.

use std::time::Duration;

use actix_web::HttpRequest;
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::settings;

/// Dispatch loops give up after this many deliveries. Handlers cap their
/// own attempts far below it; this only stops a runaway task.
const MAX_DISPATCH_ATTEMPTS: i32 = 16;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue: {0}")]
    Backend(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        queue: &'static str,
        path: &'static str,
        form: Vec<(&'static str, String)>,
        delay: Duration,
    ) -> QueueResult<()>;
}

/// Reads the redelivery counter off an incoming task request.
pub fn task_attempts(req: &HttpRequest) -> Option<i32> {
    req.headers()
        .get(settings().retry_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Production queue: every enqueue spawns a detached dispatch loop that
/// posts the form to `base_url + path`.
pub struct HttpTaskQueue {
    client: reqwest::Client,
    base_url: String,
    retry_header: String,
}

impl HttpTaskQueue {
    pub fn new(base_url: impl Into<String>, retry_header: impl Into<String>) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(HttpTaskQueue {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_header: retry_header.into(),
        })
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(
        &self,
        queue: &'static str,
        path: &'static str,
        form: Vec<(&'static str, String)>,
        delay: Duration,
    ) -> QueueResult<()> {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, path);
        let retry_header = self.retry_header.clone();

        tokio::spawn(async move {
            sleep(delay).await;
            let mut attempts = 0;
            loop {
                let sent = client
                    .post(url.as_str())
                    .header(retry_header.as_str(), attempts)
                    .form(&form)
                    .send()
                    .await;
                match sent {
                    Ok(resp) if resp.status().is_success() => return,
                    Ok(resp) => {
                        log::warn!("tasks: {queue} {url} attempt {attempts}: {}", resp.status())
                    }
                    Err(e) => log::warn!("tasks: {queue} {url} attempt {attempts}: {e}"),
                }
                attempts += 1;
                if attempts >= MAX_DISPATCH_ATTEMPTS {
                    log::error!("tasks: dropping {queue} task for {url} after {attempts} attempts");
                    return;
                }
                sleep(redelivery_backoff(queue, attempts)).await;
            }
        });
        Ok(())
    }
}

/// Queue-specific backoff, doubling per redelivery up to a minute.
fn redelivery_backoff(queue: &str, attempt: i32) -> Duration {
    let base: u64 = match queue {
        "coordinator-allocations" => 10,
        "coordinator-allocate" | "coordinator-deallocate" => 5,
        _ => 2,
    };
    Duration::from_secs((base << attempt.clamp(0, 4)).min(60))
}

/// A task captured by [`RecordingQueue`].
#[derive(Debug, Clone)]
pub struct Task {
    pub queue: &'static str,
    pub path: &'static str,
    pub form: Vec<(&'static str, String)>,
    pub delay: Duration,
}

impl Task {
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Test double: records scheduled tasks instead of dispatching them, so
/// tests can assert on scheduling and drive the handlers themselves.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<Task>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut self.tasks.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(
        &self,
        queue: &'static str,
        path: &'static str,
        form: Vec<(&'static str, String)>,
        delay: Duration,
    ) -> QueueResult<()> {
        self.tasks.lock().unwrap().push(Task {
            queue,
            path,
            form,
            delay,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(redelivery_backoff("default", 1), Duration::from_secs(4));
        assert_eq!(
            redelivery_backoff("coordinator-allocate", 1),
            Duration::from_secs(10)
        );
        assert_eq!(redelivery_backoff("default", 12), Duration::from_secs(32));
        assert_eq!(
            redelivery_backoff("coordinator-allocations", 12),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn recording_queue_captures_tasks() {
        let queue = RecordingQueue::new();
        queue
            .enqueue(
                "default",
                "/joinmatch",
                vec![("mmtok", "t".to_string())],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let tasks = queue.drain();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "/joinmatch");
        assert_eq!(tasks[0].form_value("mmtok"), Some("t"));
        assert!(queue.is_empty());
    }
}
