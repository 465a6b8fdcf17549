//! Periodic ticks
//!
//! One interval task per ingestion scope and one per processing queue.
//! Tick errors are logged and swallowed; only cancellation stops a task.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::sync::{ProcessingQueue, SyncOutcome, WatermarkSync};
use crate::utils::with_catch;

pub struct Scheduler {
    engine: Arc<Engine>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Token that stops every task when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the tick tasks; the first ticks fire immediately
    pub fn start(&mut self) {
        let settings = self.engine.settings();
        let sync_every = settings.sync_interval();
        let process_every = settings.process_interval();

        for driver in self.engine.ingestion() {
            let task = ingestion_task(driver.clone(), sync_every, self.cancel.clone());
            self.tasks.push(tokio::spawn(task));
        }
        for queue in self.engine.processing_queues() {
            let task = processing_task(queue.clone(), process_every, self.cancel.clone());
            self.tasks.push(tokio::spawn(task));
        }

        info!(tasks = self.tasks.len(), "Scheduler started");
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn ingestion_task(driver: Arc<WatermarkSync>, period: Duration, cancel: CancellationToken) {
    let scope = driver.scope();
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let outcome = with_catch(
                    |e| error!(scope = %scope, error = %e, "Ingestion tick failed"),
                    driver.sync(&scope),
                )
                .await;
                if let Some(SyncOutcome::Skipped) = outcome {
                    debug!(scope = %scope, "Ingestion tick skipped");
                }
            }
        }
    }
}

async fn processing_task(queue: Arc<ProcessingQueue>, period: Duration, cancel: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => queue.tick().await,
        }
    }
}
