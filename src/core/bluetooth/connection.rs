//! Connection sharing
//! One physical link per device, shared by every consumer that attaches to it
//! and closed when the last consumer detaches.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::platform::{BleConnection, NotificationStream};
use crate::core::bluetooth::types::{ConnectionState, DeviceId, GattService, NotificationSetupMode};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Opens the platform link for one generation.
pub type Connector<C> = Arc<dyn Fn() -> BoxFuture<'static, Result<C, BleError>> + Send + Sync>;

/// Value replayed to every consumer of a shared connection.
pub enum LinkState<C> {
    /// Establishment has not completed yet
    Pending,
    Connected(Arc<C>),
    /// Terminal: establishment failed or the link dropped
    Failed(BleError),
    /// Terminal: the last consumer detached
    Closed,
}

impl<C> Clone for LinkState<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Connected(connection) => Self::Connected(connection.clone()),
            Self::Failed(error) => Self::Failed(error.clone()),
            Self::Closed => Self::Closed,
        }
    }
}

impl<C> fmt::Debug for LinkState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Connected(_) => f.write_str("Connected"),
            Self::Failed(error) => write!(f, "Failed({error})"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// Holds at most one shared connection generation for a device.
///
/// The occupant is only ever changed through [`ConnectionSlot::get_or_publish`]
/// and [`ConnectionSlot::clear_if`]; the lock is held for a pointer swap and
/// nothing else.
pub struct ConnectionSlot<C> {
    current: Mutex<Option<Arc<SharedConnection<C>>>>,
    /// Held by a generation from before it opens its link until the link is
    /// closed, so consecutive generations never overlap on the radio.
    link_gate: Arc<AsyncMutex<()>>,
}

impl<C> Default for ConnectionSlot<C> {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            link_gate: Arc::new(AsyncMutex::new(())),
        }
    }
}

impl<C> ConnectionSlot<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<SharedConnection<C>>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_occupied(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Publishes `candidate` unless a value arrived first; returns whichever
    /// value occupies the slot afterwards.
    pub fn get_or_publish(&self, candidate: Arc<SharedConnection<C>>) -> Arc<SharedConnection<C>> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(winner) => winner.clone(),
            None => {
                *current = Some(candidate.clone());
                candidate
            }
        }
    }

    /// Empties the slot only if it still holds exactly `expected`.
    pub fn clear_if(&self, expected: &Arc<SharedConnection<C>>) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(occupant) if Arc::ptr_eq(occupant, expected) => {
                *current = None;
                true
            }
            _ => false,
        }
    }
}

enum ShareState {
    /// Published or discarded, never subscribed
    Idle,
    Active {
        subscribers: usize,
        cancel: CancellationToken,
    },
    /// Torn down; can not be attached again
    Retired,
}

/// One generation of a lazily established, reference-counted connection.
pub struct SharedConnection<C> {
    device: DeviceId,
    generation: u64,
    connector: Connector<C>,
    slot: Weak<ConnectionSlot<C>>,
    link_gate: Arc<AsyncMutex<()>>,
    state: Mutex<ShareState>,
    link: watch::Sender<LinkState<C>>,
}

impl<C: BleConnection> SharedConnection<C> {
    /// Builds a generation bound to `slot`. Nothing is opened until the first
    /// [`SharedConnection::attach`].
    pub fn new(device: DeviceId, slot: &Arc<ConnectionSlot<C>>, connector: Connector<C>) -> Arc<Self> {
        let (link, _) = watch::channel(LinkState::Pending);
        Arc::new(Self {
            device,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            connector,
            slot: Arc::downgrade(slot),
            link_gate: slot.link_gate.clone(),
            state: Mutex::new(ShareState::Idle),
            link,
        })
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subscriber_count(&self) -> usize {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            ShareState::Active { subscribers, .. } => *subscribers,
            _ => 0,
        }
    }

    pub fn is_retired(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            ShareState::Retired
        )
    }

    /// Subscribes to the shared connection. The first subscriber starts
    /// establishment; returns `None` if this generation is already torn down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(self: &Arc<Self>) -> Option<ConnectionLease<C>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            ShareState::Retired => return None,
            ShareState::Active { subscribers, .. } => *subscribers += 1,
            ShareState::Idle => {
                let cancel = CancellationToken::new();
                *state = ShareState::Active {
                    subscribers: 1,
                    cancel: cancel.clone(),
                };
                debug!(
                    "Starting connection generation {} for {}",
                    self.generation, self.device
                );
                tokio::spawn(self.clone().run_link(cancel));
            }
        }
        drop(state);

        Some(ConnectionLease {
            shared: self.clone(),
            link: self.link.subscribe(),
        })
    }

    fn detach(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ShareState::Active { subscribers, cancel } = &mut *state else {
            return;
        };
        *subscribers -= 1;
        if *subscribers > 0 {
            return;
        }
        cancel.cancel();
        *state = ShareState::Retired;
        drop(state);

        debug!(
            "Last subscriber of generation {} for {} detached",
            self.generation, self.device
        );
        self.release_slot();
    }

    /// Terminal failure: every current subscriber sees `error`, the slot is
    /// freed for a fresh attempt.
    fn fail(self: &Arc<Self>, error: BleError) {
        warn!("Connection generation {} failed: {}", self.generation, error);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let ShareState::Active { cancel, .. } = &*state {
                cancel.cancel();
            }
            *state = ShareState::Retired;
        }
        self.link.send_replace(LinkState::Failed(error));
        self.release_slot();
    }

    fn release_slot(self: &Arc<Self>) {
        if let Some(slot) = self.slot.upgrade() {
            if slot.clear_if(self) {
                debug!("Connection slot for {} cleared", self.device);
            }
        }
    }

    async fn run_link(self: Arc<Self>, cancel: CancellationToken) {
        let _gate = tokio::select! {
            guard = self.link_gate.clone().lock_owned() => guard,
            _ = cancel.cancelled() => return,
        };

        info!("Connecting to {}...", self.device);
        let result = tokio::select! {
            result = (self.connector)() => result,
            _ = cancel.cancelled() => {
                info!("Connection attempt to {} abandoned, no subscribers left", self.device);
                self.link.send_replace(LinkState::Closed);
                return;
            }
        };

        let connection = match result {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        info!("Connected to {} (generation {})", self.device, self.generation);
        self.link.send_replace(LinkState::Connected(connection.clone()));

        let mut states = connection.connection_state();
        let lost = loop {
            if *states.borrow_and_update() == ConnectionState::Disconnected {
                break true;
            }
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break true;
                    }
                }
                _ = cancel.cancelled() => break false,
            }
        };

        if lost {
            self.fail(BleError::ConnectionLost(self.device.clone()));
        }
        if let Err(e) = connection.disconnect().await {
            warn!("Failed to disconnect from {}: {}", self.device, e);
        }
        if !lost {
            self.link.send_replace(LinkState::Closed);
        }
        info!("Connection to {} closed (generation {})", self.device, self.generation);
    }
}

/// A consumer's attachment to a shared connection. Dropping it detaches;
/// dropping the last one closes the link.
pub struct ConnectionLease<C: BleConnection> {
    shared: Arc<SharedConnection<C>>,
    link: watch::Receiver<LinkState<C>>,
}

impl<C: BleConnection> ConnectionLease<C> {
    pub fn device(&self) -> &DeviceId {
        self.shared.device()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    /// Replayed link state; late subscribers see the latest value.
    pub fn watch(&self) -> watch::Receiver<LinkState<C>> {
        self.link.clone()
    }

    /// Waits until the shared connection is established or has failed.
    pub async fn connection(&self) -> Result<Arc<C>, BleError> {
        let mut link = self.link.clone();
        let state = link
            .wait_for(|state| !matches!(state, LinkState::Pending))
            .await
            .map_err(|_| BleError::Released)?;
        match &*state {
            LinkState::Connected(connection) => Ok(connection.clone()),
            LinkState::Failed(error) => Err(error.clone()),
            LinkState::Pending | LinkState::Closed => Err(BleError::Released),
        }
    }

    pub async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        self.connection().await?.discover_services().await
    }

    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError> {
        self.connection().await?.read_characteristic(uuid).await
    }

    pub async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
        mode: NotificationSetupMode,
    ) -> Result<NotificationStream, BleError> {
        self.connection()
            .await?
            .subscribe_notifications(characteristic, mode)
            .await
    }
}

impl<C: BleConnection> Drop for ConnectionLease<C> {
    fn drop(&mut self) {
        self.shared.detach();
    }
}
