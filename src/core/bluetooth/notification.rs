//! Notification handling for explored devices
//! This module sets up characteristic notifications on a shared connection and
//! forwards the values to a single consumer.

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::connection::{ConnectionLease, LinkState};
use crate::core::bluetooth::constants::FORWARD_CHANNEL_CAPACITY;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::platform::{BleConnection, NotificationStream};
use crate::core::bluetooth::types::NotificationSetupMode;

/// A running notification forward. Dropping it stops the forward and
/// releases the connection lease it holds.
pub struct NotificationSubscription {
    characteristic: Uuid,
    values: mpsc::Receiver<Result<Vec<u8>, BleError>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NotificationSubscription {
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Next value. An `Err` is the last item; `None` means the forward ended.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, BleError>> {
        self.values.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Notification handler for characteristic values
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationHandler {
    mode: NotificationSetupMode,
}

impl NotificationHandler {
    pub fn new(mode: NotificationSetupMode) -> Self {
        Self { mode }
    }

    /// Enables notifications on `characteristic` and starts forwarding. The
    /// lease moves into the forward so the link stays up while it runs.
    /// A setup failure is returned to this caller only.
    pub async fn setup_notifications<C: BleConnection>(
        &self,
        lease: ConnectionLease<C>,
        characteristic: Uuid,
    ) -> Result<NotificationSubscription, BleError> {
        info!("Subscribing to notifications of {}...", characteristic);
        let stream = lease
            .subscribe_notifications(characteristic, self.mode)
            .await?;

        let (tx, values) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::process_notifications(
            lease,
            characteristic,
            stream,
            tx,
            cancel.clone(),
        ));

        Ok(NotificationSubscription {
            characteristic,
            values,
            cancel,
            task,
        })
    }

    async fn process_notifications<C: BleConnection>(
        lease: ConnectionLease<C>,
        characteristic: Uuid,
        mut stream: NotificationStream,
        tx: mpsc::Sender<Result<Vec<u8>, BleError>>,
        cancel: CancellationToken,
    ) {
        let mut link = lease.watch();
        let initial = link.borrow_and_update().clone();
        if let LinkState::Failed(e) = initial {
            let _ = tx.send(Err(e)).await;
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Notification from {}: {:?}", characteristic, value);
                        if tx.send(Ok(value)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    None => break,
                },
                changed = link.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = link.borrow_and_update().clone();
                    match state {
                        LinkState::Failed(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                        LinkState::Closed => break,
                        LinkState::Pending | LinkState::Connected(_) => {}
                    }
                }
            }
        }

        info!("Notification stream of {} ended", characteristic);
        drop(lease);
    }
}
