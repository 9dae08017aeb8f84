use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use outte_store::{OutteResult, WorkersConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::fetch::FetchContext;
use crate::pipeline::Ingestor;

pub const DEMO_WORKER: &str = "demos";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub runs: u64,
    pub failures: u64,
    pub last_run_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
    pub last_error: Option<String>,
}

/// Shared per-loop bookkeeping, readable while the workers run.
#[derive(Clone, Debug, Default)]
pub struct WorkerHealth {
    inner: Arc<Mutex<BTreeMap<String, WorkerStatus>>>,
}

impl WorkerHealth {
    pub fn snapshot(&self) -> BTreeMap<String, WorkerStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self, worker: &str) -> Option<WorkerStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker)
            .cloned()
    }

    fn record(&self, worker: &str, result: Result<(), String>) {
        let now = now_ms();
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let status = guard.entry(worker.to_string()).or_default();
        status.runs += 1;
        status.last_run_ms = Some(now);
        match result {
            Ok(()) => {
                status.last_success_ms = Some(now);
                status.last_error = None;
            }
            Err(message) => {
                status.failures += 1;
                status.last_error = Some(message);
            }
        }
    }
}

/// Long-lived update loops: one per board type plus the demo sweeper.
pub struct WorkerSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    health: WorkerHealth,
}

impl WorkerSet {
    pub fn spawn(ingestor: Ingestor, ctx: FetchContext, config: &WorkersConfig) -> Self {
        let (shutdown, signal) = watch::channel(false);
        let health = WorkerHealth::default();
        let mut handles = Vec::new();

        for &board_type in &config.board_types {
            let ingestor = ingestor.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(run_loop(
                board_type.name().to_string(),
                Duration::from_secs(config.board_interval_secs),
                signal.clone(),
                health.clone(),
                move || {
                    let ingestor = ingestor.clone();
                    let ctx = ctx.clone();
                    async move { ingestor.update_all(&ctx, board_type).await.map(|_| ()) }
                },
            )));
        }

        let batch = config.demo_batch;
        handles.push(tokio::spawn(run_loop(
            DEMO_WORKER.to_string(),
            Duration::from_secs(config.demo_interval_secs),
            signal,
            health.clone(),
            move || {
                let ingestor = ingestor.clone();
                let ctx = ctx.clone();
                async move { ingestor.sweep_demos(&ctx, Some(batch)).await.map(|_| ()) }
            },
        )));

        info!("started {} workers", handles.len());
        Self {
            shutdown,
            handles,
            health,
        }
    }

    pub fn health(&self) -> WorkerHealth {
        self.health.clone()
    }

    /// Signals every loop and waits for the current iterations to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("worker ended abnormally: {err}");
            }
        }
        info!("workers stopped");
    }
}

async fn run_loop<F, Fut>(
    name: String,
    interval: Duration,
    mut signal: watch::Receiver<bool>,
    health: WorkerHealth,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = OutteResult<()>> + Send + 'static,
{
    loop {
        if *signal.borrow() {
            break;
        }
        let result = match tokio::spawn(job()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!("{name} worker iteration failed: {err}");
                Err(err.to_string())
            }
            Err(join) => {
                error!("{name} worker iteration panicked: {join}");
                Err(format!("panicked: {join}"))
            }
        };
        health.record(&name, result);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = signal.changed() => {
                if changed.is_err() || *signal.borrow() {
                    break;
                }
            }
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
