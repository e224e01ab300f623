//! Timer bridge for provider-level `timeout` and `cron` declarations.

use crate::di::{ErasedInstance, TypeKey};
use crate::error::{BunstoneError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) type TaskFn =
    Arc<dyn Fn(ErasedInstance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct TimeoutTask {
    pub method: &'static str,
    pub delay: Duration,
    run: TaskFn,
}

impl TimeoutTask {
    pub(crate) fn new(method: &'static str, delay: Duration, run: TaskFn) -> Self {
        Self { method, delay, run }
    }

    pub(crate) fn validate(&self, provider: &TypeKey) -> Result<()> {
        if self.delay.is_zero() {
            return Err(BunstoneError::configuration(
                format!(
                    "timeout {}.{} has a zero delay",
                    provider.short_name(),
                    self.method
                ),
                "Use a positive delay, or call the method directly at startup.",
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CronTask {
    pub method: &'static str,
    pub expression: String,
    run: TaskFn,
}

impl CronTask {
    pub(crate) fn new(method: &'static str, expression: &str, run: TaskFn) -> Self {
        Self {
            method,
            expression: expression.trim().to_string(),
            run,
        }
    }

    /// Parse the expression, prefixing a seconds field for the classic
    /// five-field syntax.
    pub fn schedule(&self) -> Result<cron::Schedule> {
        let normalized = if self.expression.split_whitespace().count() == 5 {
            format!("0 {}", self.expression)
        } else {
            self.expression.clone()
        };

        cron::Schedule::from_str(&normalized).map_err(|err| {
            BunstoneError::configuration(
                format!("invalid cron expression '{}' on {}: {err}", self.expression, self.method),
                "Use five fields (min hour day month weekday) or six with a leading seconds field.",
            )
        })
    }
}

/// Provider-level tasks grouped per provider, closing over its resolved instance.
#[derive(Clone)]
pub struct ProviderTasks<T> {
    pub provider: TypeKey,
    pub instance: ErasedInstance,
    pub tasks: Vec<T>,
}

/// Owns the spawned timer tasks of one application.
#[derive(Default)]
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_timeouts(&mut self, group: &ProviderTasks<TimeoutTask>) {
        for task in &group.tasks {
            let run = task.run.clone();
            let instance = group.instance.clone();
            let delay = task.delay;
            let label = format!("{}.{}", group.provider.short_name(), task.method);

            tracing::info!(task = %label, delay_ms = delay.as_millis() as u64, "Scheduled timeout");
            self.handles.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = run(instance).await {
                    tracing::error!(task = %label, error = %err, "Timeout task failed");
                }
            }));
        }
    }

    pub fn schedule_crons(&mut self, group: &ProviderTasks<CronTask>) -> Result<()> {
        for task in &group.tasks {
            let schedule = task.schedule()?;
            let run = task.run.clone();
            let instance = group.instance.clone();
            let label = format!("{}.{}", group.provider.short_name(), task.method);

            tracing::info!(task = %label, cron = %task.expression, "Scheduled cron job");
            self.handles.push(tokio::spawn(async move {
                let mut last_fired = None;
                loop {
                    let Some(next) = next_tick(&schedule, Utc::now(), last_fired) else {
                        tracing::warn!(task = %label, "Cron schedule has no upcoming ticks");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(wait).await;
                    last_fired = Some(next);

                    if let Err(err) = run(instance.clone()).await {
                        tracing::error!(task = %label, error = %err, "Cron job failed");
                    }
                }
            }));
        }
        Ok(())
    }

    pub(crate) fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort every pending timer.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// The first tick after `now` that is also after the last fired tick, so a
/// wake-up slightly ahead of the wall clock never repeats a tick.
fn next_tick(
    schedule: &cron::Schedule,
    now: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let from = match last_fired {
        Some(last) if last > now => last,
        _ => now,
    };
    schedule.after(&from).next()
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
