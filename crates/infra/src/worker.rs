use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use projector_core::{MessageEnvelope, ProjectionKey};
use projector_engine::{ProjectError, Projector};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("projection worker {worker} stopped: {source}")]
    Project {
        worker: &'static str,
        #[source]
        source: ProjectError,
    },

    #[error("projection worker task failed: {0}")]
    Join(String),
}

/// Handle to control and join a background worker.
///
/// Joining hands the projector back, so a host can inspect its cursors or
/// restart it after fixing a failed projection.
#[derive(Debug)]
pub struct WorkerHandle<K>
where
    K: ProjectionKey,
{
    shutdown: CancellationToken,
    task: JoinHandle<Result<Projector<K>, WorkerError>>,
}

impl<K> WorkerHandle<K>
where
    K: ProjectionKey,
{
    /// Token that stops the worker when cancelled. Also cancels the batch in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) -> Result<Projector<K>, WorkerError> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the worker to stop on its own (closed channel or failure).
    pub async fn join(self) -> Result<Projector<K>, WorkerError> {
        self.task.await.map_err(|e| WorkerError::Join(e.to_string()))?
    }
}

/// Continuous projection loop.
///
/// - Receives envelopes from a channel, in sequence order
/// - Hands up to `batch_size` buffered envelopes to one `project` call
/// - Skips envelopes below the projector's global cursor (redelivery after restart)
/// - Stops on shutdown, when every sender is dropped, or on the first failed batch
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<K>(
        name: &'static str,
        projector: Projector<K>,
        envelopes: mpsc::Receiver<MessageEnvelope>,
        batch_size: usize,
    ) -> WorkerHandle<K>
    where
        K: ProjectionKey,
    {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker_loop(
            name,
            projector,
            envelopes,
            batch_size.max(1),
            shutdown.clone(),
        ));

        WorkerHandle { shutdown, task }
    }
}

async fn worker_loop<K>(
    name: &'static str,
    mut projector: Projector<K>,
    mut envelopes: mpsc::Receiver<MessageEnvelope>,
    batch_size: usize,
    shutdown: CancellationToken,
) -> Result<Projector<K>, WorkerError>
where
    K: ProjectionKey,
{
    let fail = |source: ProjectError| WorkerError::Project { worker: name, source };
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = envelopes.recv() => match received {
                Some(envelope) => envelope,
                None => break,
            },
        };
        batch.push(first);
        while batch.len() < batch_size {
            match envelopes.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }

        let expected = projector.next_sequence_number().await.map_err(fail)?;
        let received = batch.len();
        batch.retain(|envelope: &MessageEnvelope| envelope.sequence_number() >= expected);
        if batch.len() < received {
            debug!(worker = name, skipped = received - batch.len(), expected, "skipped already projected envelopes");
        }
        if batch.is_empty() {
            continue;
        }

        match projector.project(&batch, &shutdown).await {
            Ok(outcome) if outcome.is_cancelled() => {
                info!(worker = name, processed = outcome.processed(), "batch cancelled by shutdown");
                break;
            }
            Ok(outcome) => {
                debug!(worker = name, processed = outcome.processed(), "batch projected");
            }
            Err(source) => {
                error!(worker = name, error = %source, "projection batch failed");
                return Err(fail(source));
            }
        }
        batch.clear();
    }

    info!(worker = name, "projection worker stopped");
    Ok(projector)
}
