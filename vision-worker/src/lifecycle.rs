use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vision_common::health::ComponentStatus;

use crate::aggregator::AnalyticsReader;
use crate::error::WorkerError;
use crate::registry::StrategyRegistry;
use crate::worker::BatchWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningLoop {
    running: Arc<AtomicBool>,
    handle: JoinHandle<BatchWorker>,
}

struct Inner {
    /// Present while stopped.
    worker: Option<BatchWorker>,
    /// Present while running.
    task: Option<RunningLoop>,
}

/// Starts and stops the consumer loop. There is at most one loop per manager, and the
/// aggregate state it owns is handed back on stop so the next start resumes from it.
pub struct ProcessorManager {
    inner: Mutex<Inner>,
    registry: Arc<StrategyRegistry>,
    analytics: AnalyticsReader,
    state: watch::Sender<ProcessorState>,
}

impl ProcessorManager {
    pub fn new(worker: BatchWorker) -> Self {
        let (state, _) = watch::channel(ProcessorState::Stopped);

        Self {
            registry: worker.registry().clone(),
            analytics: worker.analytics(),
            inner: Mutex::new(Inner {
                worker: Some(worker),
                task: None,
            }),
            state,
        }
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub fn analytics(&self) -> AnalyticsReader {
        self.analytics.clone()
    }

    /// Initialize the strategies and spawn the consumer loop. Does nothing if the loop is
    /// already running. A strategy failing to initialize is returned and leaves the
    /// processor stopped.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        if inner.task.is_some() {
            debug!("processor already running");
            return Ok(());
        }
        if inner.worker.is_none() {
            return Err(WorkerError::LoopLost);
        }

        self.state.send_replace(ProcessorState::Starting);
        if let Err(error) = self.registry.initialize().await {
            self.state.send_replace(ProcessorState::Stopped);
            return Err(WorkerError::FatalInit(error));
        }

        let Some(worker) = inner.worker.take() else {
            self.state.send_replace(ProcessorState::Stopped);
            return Err(WorkerError::LoopLost);
        };
        let running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(worker.run(running.clone()));
        inner.task = Some(RunningLoop { running, handle });

        self.state.send_replace(ProcessorState::Running);
        info!("processor started");

        Ok(())
    }

    /// Stop the consumer loop, waiting for the batch in flight to complete, then shut the
    /// strategies down. Does nothing if the loop is not running.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let Some(RunningLoop { running, handle }) = inner.task.take() else {
            return;
        };

        self.state.send_replace(ProcessorState::Stopping);
        running.store(false, Ordering::SeqCst);

        match handle.await {
            Ok(worker) => {
                worker
                    .liveness()
                    .report_status(ComponentStatus::Stopped)
                    .await;
                inner.worker = Some(worker);
            }
            Err(error) => error!("consumer loop terminated abnormally: {}", error),
        }
        self.registry.shutdown().await;

        self.state.send_replace(ProcessorState::Stopped);
        info!("processor stopped");
    }
}
