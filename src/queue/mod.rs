//! In-process job queue with named processors.
//!
//! Providers declare processors with [`Provider::process`](crate::di::Provider::process);
//! the application starts one worker per queue once the module graph is compiled.
//! Jobs added before the worker starts are buffered in the queue's channel.

use crate::di::{ErasedInstance, Injectable, Resolver, TypeKey};
use crate::error::Result;
use crate::module::{Module, ModuleDescriptor};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

pub(crate) type JobFn =
    Arc<dyn Fn(ErasedInstance, Job) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: u64,
    pub queue: String,
    pub name: String,
    pub data: Value,
}

impl Job {
    pub fn data<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone())
    }
}

/// Which jobs a processor accepts and how many may run at once.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    queue: String,
    job: Option<String>,
    concurrency: usize,
}

impl ProcessorOptions {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            queue: name.into(),
            job: None,
            concurrency: 1,
        }
    }

    /// Only accept jobs with this name. Processors without a name handle
    /// every job no named processor claims.
    pub fn job(mut self, name: impl Into<String>) -> Self {
        self.job = Some(name.into());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[derive(Clone)]
pub struct JobProcessor {
    pub method: &'static str,
    pub queue: String,
    pub job_name: Option<String>,
    pub concurrency: usize,
    run: JobFn,
}

impl JobProcessor {
    pub(crate) fn new(method: &'static str, options: ProcessorOptions, run: JobFn) -> Self {
        Self {
            method,
            queue: options.queue,
            job_name: options.job,
            concurrency: options.concurrency,
            run,
        }
    }
}

/// A processor bound to the provider instance it runs against.
#[derive(Clone)]
pub(crate) struct BoundProcessor {
    pub provider: TypeKey,
    pub instance: ErasedInstance,
    pub processor: JobProcessor,
}

#[derive(Clone, Default)]
pub struct QueueService {
    senders: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
    receivers: Arc<DashMap<String, mpsc::UnboundedReceiver<Job>>>,
    next_id: Arc<AtomicU64>,
}

impl Injectable for QueueService {
    fn inject(_: &Resolver<'_>) -> Result<Self> {
        Ok(Self::default())
    }
}

impl QueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job and return its id.
    pub fn add(&self, queue: &str, name: &str, data: Value) -> anyhow::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Job {
            id,
            queue: queue.to_string(),
            name: name.to_string(),
            data,
        };
        self.sender(queue)
            .send(job)
            .map_err(|_| anyhow::anyhow!("queue '{queue}' is closed"))?;
        tracing::debug!(queue, job = name, id, "Job added");
        Ok(id)
    }

    fn sender(&self, queue: &str) -> mpsc::UnboundedSender<Job> {
        self.senders
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                self.receivers.insert(queue.to_string(), rx);
                tx
            })
            .clone()
    }

    /// Start the worker for `queue`. Returns `None` when the queue already has one.
    pub(crate) fn start_worker(
        &self,
        queue: &str,
        processors: Vec<BoundProcessor>,
    ) -> Option<JoinHandle<()>> {
        self.sender(queue);
        let (_, mut rx) = self.receivers.remove(queue)?;

        let concurrency = processors
            .iter()
            .map(|bound| bound.processor.concurrency)
            .max()
            .unwrap_or(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let processors = Arc::new(processors);
        let queue = queue.to_string();

        tracing::info!(queue = %queue, concurrency, "Queue worker started");
        Some(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let processors = processors.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(&processors, job).await;
                });
            }
            tracing::info!(queue = %queue, "Queue worker stopped");
        }))
    }
}

async fn run_job(processors: &[BoundProcessor], job: Job) {
    let selected = processors
        .iter()
        .find(|bound| bound.processor.job_name.as_deref() == Some(job.name.as_str()))
        .or_else(|| {
            processors
                .iter()
                .find(|bound| bound.processor.job_name.is_none())
        });

    let Some(bound) = selected else {
        tracing::warn!(queue = %job.queue, job = %job.name, "No processor for job");
        return;
    };

    let label = format!("{}.{}", bound.provider.short_name(), bound.processor.method);
    let (id, name) = (job.id, job.name.clone());
    if let Err(err) = (bound.processor.run)(bound.instance.clone(), job).await {
        tracing::error!(processor = %label, job = %name, id, error = %err, "Job failed");
    }
}

/// Global module providing [`QueueService`].
pub struct QueueModule;

impl Module for QueueModule {
    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::of::<Self>()
            .provide::<QueueService>()
            .export::<QueueService>()
            .global(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedSender;

    fn recording(method: &'static str, options: ProcessorOptions, tx: UnboundedSender<String>) -> BoundProcessor {
        let run: JobFn = Arc::new(move |_, job: Job| {
            let tx = tx.clone();
            async move {
                tx.send(format!("{method}:{}", job.name))?;
                Ok(())
            }
            .boxed()
        });
        BoundProcessor {
            provider: TypeKey::of::<QueueService>(),
            instance: Arc::new(()),
            processor: JobProcessor::new(method, options, run),
        }
    }

    #[tokio::test]
    async fn test_named_processor_wins_over_default() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = QueueService::new();
        queue.add("emails", "welcome", json!({"to": "a@b.c"})).unwrap();

        let worker = queue
            .start_worker(
                "emails",
                vec![
                    recording("any", ProcessorOptions::queue("emails"), tx.clone()),
                    recording("welcome", ProcessorOptions::queue("emails").job("welcome"), tx),
                ],
            )
            .unwrap();
        queue.add("emails", "digest", json!({})).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "welcome:welcome");
        assert_eq!(rx.recv().await.unwrap(), "any:digest");
        worker.abort();
    }

    #[tokio::test]
    async fn test_worker_starts_once_per_queue() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = QueueService::new();
        let first = queue.start_worker("reports", vec![recording("a", ProcessorOptions::queue("reports"), tx.clone())]);
        let second = queue.start_worker("reports", vec![recording("b", ProcessorOptions::queue("reports"), tx)]);
        assert!(first.is_some());
        assert!(second.is_none());
        if let Some(handle) = first {
            handle.abort();
        }
    }

    #[test]
    fn test_job_ids_increase() {
        let queue = QueueService::new();
        let a = queue.add("q", "x", Value::Null).unwrap();
        let b = queue.add("q", "x", Value::Null).unwrap();
        assert!(b > a);
    }
}
