//! Click recorder
//!
//! Clicks are queued without waiting and persisted by a single background worker. A full queue
//! or a failing storage drops clicks, the redirect itself is never held up.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::clicks::NewClick;
use crate::storage::SharedStorage;

/// Handle to queue clicks
#[derive(Clone, Debug)]
pub struct ClickRecorder {
    /// Sending side of the queue
    sender: mpsc::Sender<NewClick>,
}

/// Receiving side of the queue, persisting clicks
#[derive(Debug)]
pub struct ClickWorker {
    /// Receiving side of the queue
    receiver: mpsc::Receiver<NewClick>,
}

impl ClickRecorder {
    /// Create a recorder with its worker, holding at most `capacity` queued clicks
    pub fn new(capacity: usize) -> (Self, ClickWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        (Self { sender }, ClickWorker { receiver })
    }

    /// Create a recorder and run its worker on the task tracker until `shutdown`
    pub fn spawn(
        storage: SharedStorage,
        capacity: usize,
        shutdown: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let (recorder, worker) = Self::new(capacity);

        tracker.spawn(worker.run(storage, shutdown));

        recorder
    }

    /// Queue a click, without waiting
    ///
    /// Returns `false` when the click is dropped
    pub fn record(&self, click: NewClick) -> bool {
        match self.sender.try_send(click) {
            Ok(()) => true,
            Err(TrySendError::Full(click)) => {
                tracing::warn!(
                    "Click queue is full, dropping click on link {}",
                    click.link_id
                );
                false
            }
            Err(TrySendError::Closed(click)) => {
                tracing::warn!(
                    "Click recorder stopped, dropping click on link {}",
                    click.link_id
                );
                false
            }
        }
    }
}

impl ClickWorker {
    /// Persist clicks until `shutdown`, then drain what is already queued
    pub async fn run(mut self, storage: SharedStorage, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                click = self.receiver.recv() => match click {
                    Some(click) => persist(&storage, &click).await,
                    None => return,
                },
            }
        }

        self.receiver.close();

        let mut drained = 0;
        while let Some(click) = self.receiver.recv().await {
            persist(&storage, &click).await;
            drained += 1;
        }

        tracing::info!("Click recorder stopped, drained {drained} queued clicks");
    }
}

/// Persist a single click, failures are logged and the click is dropped
async fn persist(storage: &SharedStorage, click: &NewClick) {
    if let Err(err) = storage.insert_click(click).await {
        tracing::error!("Could not record click on link {}: {err}", click.link_id);
    }
}
