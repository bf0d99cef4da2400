use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use bluetooth_platform::advertisement_data::AdvertisementData;
use bluetooth_platform::{
    CentralManagerBackend, ConnectPeripheralOptions, ConnectionEvent, ManagerAuthorization,
    ManagerState, PeripheralBackend, RestoredState, ScanOptions,
};
use btuuid::BluetoothUuid;
use futures_channel::mpsc;
use subscription_queue::{CancelHandle, Cancellable, Subscription, SubscriptionQueue};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::event_stream::EventStream;
use crate::peripheral::Peripheral;
use crate::util::{self, Responder, Timeout, lock, respond_once, wait_for};

#[derive(Debug, Clone)]
pub struct DidDiscover {
    pub peripheral: Peripheral,
    pub advertisement_data: AdvertisementData,
    pub rssi: i16,
}

#[derive(Debug, Clone)]
pub struct DidDisconnect {
    pub peripheral: Peripheral,
    pub timestamp: Option<SystemTime>,
    pub is_reconnecting: bool,
    pub error: Option<Error>,
}

#[derive(Debug, Clone)]
pub struct PeripheralConnectionEvent {
    pub peripheral: Peripheral,
    pub event: ConnectionEvent,
}

/// Everything a central manager reports, plus the façade's own request to end all scans.
#[derive(Debug)]
pub(crate) enum CentralEvent {
    StateUpdated(ManagerState),
    Discovered(DidDiscover),
    Connected(Peripheral),
    Disconnected(DidDisconnect),
    FailedToConnect { peripheral: Peripheral, error: Error },
    ConnectionEvent(PeripheralConnectionEvent),
    RestoreState(Vec<Peripheral>),
    StopScan,
}

/// The central role of the local adapter.
///
/// Clones share all state. Every platform callback is delivered to the operations waiting on it
/// before the [`CentralManagerDelegate`] (if any) is told about it.
#[derive(Clone)]
pub struct CentralManager {
    inner: Arc<CentralInner>,
}

struct CentralInner {
    backend: Arc<dyn CentralManagerBackend>,
    delegate: Mutex<Option<Arc<dyn CentralManagerDelegate>>>,
    events: SubscriptionQueue<CentralEvent>,
    peripherals: Mutex<HashMap<Uuid, Peripheral>>,
    connected: Mutex<HashSet<Uuid>>,
    scans: Mutex<ScanSessions>,
}

#[derive(Default)]
struct ScanSessions {
    next_id: u64,
    active: HashMap<u64, ScanSession>,
}

struct ScanSession {
    services: Option<Vec<BluetoothUuid>>,
    options: ScanOptions,
    _timeout: Option<Timeout>,
}

impl std::fmt::Debug for CentralManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralManager")
            .field("state", &self.state())
            .field("connected", &*lock(&self.inner.connected))
            .finish_non_exhaustive()
    }
}

impl CentralManager {
    /// Wraps a platform central manager and takes over its delegate.
    pub fn new(backend: Arc<dyn CentralManagerBackend>) -> Self {
        Self::build(backend, None)
    }

    /// Like [`new()`][Self::new], but installs `delegate` before the first platform callback can
    /// arrive, so that restored state is not missed.
    pub fn with_delegate(
        backend: Arc<dyn CentralManagerBackend>,
        delegate: Arc<dyn CentralManagerDelegate>,
    ) -> Self {
        Self::build(backend, Some(delegate))
    }

    fn build(
        backend: Arc<dyn CentralManagerBackend>,
        delegate: Option<Arc<dyn CentralManagerDelegate>>,
    ) -> Self {
        let inner = Arc::new(CentralInner {
            backend,
            delegate: Mutex::new(delegate),
            events: SubscriptionQueue::new(),
            peripherals: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashSet::new()),
            scans: Mutex::new(ScanSessions::default()),
        });

        inner
            .backend
            .set_delegate(Arc::new(CentralManagerDelegateWrapper {
                inner: Arc::downgrade(&inner),
            }));

        CentralManager { inner }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn CentralManagerDelegate>>) {
        *lock(&self.inner.delegate) = delegate;
    }

    fn delegate(&self) -> Option<Arc<dyn CentralManagerDelegate>> {
        lock(&self.inner.delegate).clone()
    }

    pub fn state(&self) -> ManagerState {
        self.inner.backend.state()
    }

    pub fn authorization(&self) -> ManagerAuthorization {
        self.inner.backend.authorization()
    }

    /// Whether the platform is currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.inner.backend.is_scanning()
    }

    /// The peripherals this manager has connected to and that have not disconnected since.
    pub fn connected_peripherals(&self) -> Vec<Peripheral> {
        let connected = lock(&self.inner.connected).clone();
        let peripherals = lock(&self.inner.peripherals);
        connected
            .iter()
            .filter_map(|id| peripherals.get(id).cloned())
            .collect()
    }

    pub fn is_connected(&self, peripheral: &Peripheral) -> bool {
        lock(&self.inner.connected).contains(&peripheral.identifier())
    }

    pub fn retrieve_peripherals(&self, identifiers: &[Uuid]) -> Vec<Peripheral> {
        self.inner
            .backend
            .retrieve_peripherals(identifiers)
            .into_iter()
            .map(|backend| self.inner.peripheral(backend))
            .collect()
    }

    /// Returns peripherals connected to the system (possibly by other applications) that
    /// expose any of `services`.
    pub fn retrieve_connected_peripherals(&self, services: &[BluetoothUuid]) -> Vec<Peripheral> {
        self.inner
            .backend
            .retrieve_connected_peripherals(services)
            .into_iter()
            .map(|backend| self.inner.peripheral(backend))
            .collect()
    }

    /// Asks the platform to report system-wide connection events matching the given
    /// peripherals or services through
    /// [`CentralManagerDelegate::on_connection_event()`] and
    /// [`connection_events()`][Self::connection_events].
    pub fn register_for_connection_events(
        &self,
        peripherals: Option<&[Uuid]>,
        services: Option<&[BluetoothUuid]>,
    ) {
        self.inner
            .backend
            .register_for_connection_events(peripherals, services);
    }

    /// Waits until the adapter is powered on.
    ///
    /// Fails with [`ErrorKind::Unauthorized`] or [`ErrorKind::Unavailable`] if the application
    /// may not use Bluetooth or the device does not support it, and with
    /// [`ErrorKind::Timeout`] once `timeout` elapses.
    pub fn wait_until_ready_with(
        &self,
        timeout: Option<Duration>,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        let responder = Responder::new(completion);
        let (handler, on_removed) =
            respond_once(responder.clone(), |event: &CentralEvent| match event {
                CentralEvent::StateUpdated(state) => readiness(*state),
                _ => None,
            });
        let subscription = self.inner.events.queue_with_completion(handler, on_removed);

        if let Some(result) = readiness(self.state()) {
            responder.respond(result);
            subscription.cancel();
            return CancelHandle::noop();
        }

        if let Some(duration) = timeout {
            let expired = responder.clone();
            let waiting = subscription.clone();
            responder.arm(util::timeout(duration, move || {
                if expired.respond(Err(ErrorKind::Timeout.into())) {
                    debug!(?duration, "timed out waiting for the adapter");
                }
                waiting.cancel();
            }));
        }

        CancelHandle::new(subscription)
    }

    pub async fn wait_until_ready(&self, timeout: Option<Duration>) -> Result<()> {
        wait_for(|completion| self.wait_until_ready_with(timeout, completion)).await
    }

    /// Connects to `peripheral`.
    ///
    /// Succeeds immediately if the peripheral is already connected. If `timeout` elapses or the
    /// returned handle is cancelled first, the request fails and the platform connection
    /// attempt is cancelled.
    pub fn connect_with(
        &self,
        peripheral: &Peripheral,
        timeout: Option<Duration>,
        options: &ConnectPeripheralOptions,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        if self.is_connected(peripheral) {
            completion(Ok(()));
            return CancelHandle::noop();
        }

        let id = peripheral.identifier();
        let responder = Responder::new(completion);
        let (handler, on_removed) =
            respond_once(responder.clone(), move |event: &CentralEvent| match event {
                CentralEvent::Connected(peripheral) if peripheral.identifier() == id => {
                    Some(Ok(()))
                }
                CentralEvent::FailedToConnect { peripheral, error }
                    if peripheral.identifier() == id =>
                {
                    Some(Err(error.clone()))
                }
                CentralEvent::Disconnected(disconnect) if disconnect.peripheral.identifier() == id => {
                    Some(Err(disconnect
                        .error
                        .clone()
                        .unwrap_or_else(|| ErrorKind::Unknown.into())))
                }
                _ => None,
            });
        let subscription = self.inner.events.queue_with_completion(handler, on_removed);

        let attempt = ConnectAttempt {
            central: Arc::downgrade(&self.inner),
            peripheral: peripheral.clone(),
            responder: responder.clone(),
            subscription,
        };

        if let Some(duration) = timeout {
            let expired = attempt.clone();
            responder.arm(util::timeout(duration, move || {
                expired.abort(ErrorKind::Timeout)
            }));
        }

        self.inner.backend.connect(peripheral.backend(), options);
        CancelHandle::new(attempt)
    }

    pub async fn connect(
        &self,
        peripheral: &Peripheral,
        timeout: Option<Duration>,
        options: ConnectPeripheralOptions,
    ) -> Result<()> {
        wait_for(|completion| self.connect_with(peripheral, timeout, &options, completion)).await
    }

    /// Disconnects from `peripheral`, or abandons a pending connection to it.
    ///
    /// Completes once the platform reports the disconnect, with the error it carried if any.
    pub fn cancel_peripheral_connection_with(
        &self,
        peripheral: &Peripheral,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        if !self.is_connected(peripheral) {
            self.inner
                .backend
                .cancel_peripheral_connection(peripheral.backend());
            completion(Ok(()));
            return CancelHandle::noop();
        }

        let id = peripheral.identifier();
        let (handler, on_removed) = respond_once(
            Responder::new(completion),
            move |event: &CentralEvent| match event {
                CentralEvent::Disconnected(disconnect) if disconnect.peripheral.identifier() == id => {
                    Some(disconnect.error.clone().map_or(Ok(()), Err))
                }
                _ => None,
            },
        );
        let subscription = self.inner.events.queue_with_completion(handler, on_removed);

        self.inner
            .backend
            .cancel_peripheral_connection(peripheral.backend());
        CancelHandle::new(subscription)
    }

    pub async fn cancel_peripheral_connection(&self, peripheral: &Peripheral) -> Result<()> {
        wait_for(|completion| self.cancel_peripheral_connection_with(peripheral, completion)).await
    }

    /// Scans for peripherals, calling `on_discover` for each advertisement that matches
    /// `services` (or every advertisement if `services` is `None`).
    ///
    /// The scan ends when the returned handle is cancelled, [`stop_scan()`][Self::stop_scan] is
    /// called or `timeout` elapses. `on_end` runs once afterwards. Scans may overlap; the
    /// platform keeps scanning until the last of them ends.
    pub fn scan_for_peripherals_with(
        &self,
        services: Option<&[BluetoothUuid]>,
        timeout: Option<Duration>,
        options: ScanOptions,
        mut on_discover: impl FnMut(DidDiscover) + Send + 'static,
        on_end: impl FnOnce() + Send + 'static,
    ) -> CancelHandle {
        let filter = services.map(<[BluetoothUuid]>::to_vec);
        let id = {
            let mut scans = lock(&self.inner.scans);
            let id = scans.next_id;
            scans.next_id += 1;
            scans.active.insert(
                id,
                ScanSession {
                    services: filter.clone(),
                    options,
                    _timeout: None,
                },
            );
            id
        };
        debug!(session = id, services = ?filter, "scan session started");

        let central = Arc::downgrade(&self.inner);
        let subscription = self.inner.events.queue_with_completion(
            move |event, done| match event {
                CentralEvent::Discovered(discovery) => {
                    let wanted = filter.as_deref().is_none_or(|services| {
                        discovery.advertisement_data.advertises_any(services)
                    });
                    if wanted {
                        on_discover(discovery.clone());
                    }
                }
                CentralEvent::StopScan => done.mark(),
                _ => (),
            },
            move || {
                if let Some(central) = central.upgrade() {
                    central.end_scan(id);
                }
                on_end();
            },
        );

        if let Some(duration) = timeout {
            let expired = subscription.clone();
            let timer = util::timeout(duration, move || {
                debug!(session = id, "scan timed out");
                expired.cancel();
            });
            if let Some(session) = lock(&self.inner.scans).active.get_mut(&id) {
                session._timeout = Some(timer);
            }
        }

        self.inner.apply_scan(lock(&self.inner.scans));
        CancelHandle::new(subscription)
    }

    /// Returns a stream of discoveries. See
    /// [`scan_for_peripherals_with()`][Self::scan_for_peripherals_with] for when it ends.
    pub fn scan_for_peripherals(
        &self,
        services: Option<&[BluetoothUuid]>,
        timeout: Option<Duration>,
        options: ScanOptions,
    ) -> EventStream<DidDiscover> {
        let (sender, receiver) = mpsc::unbounded();
        let closer = sender.clone();
        let handle = self.scan_for_peripherals_with(
            services,
            timeout,
            options,
            move |discovery| {
                let _ = sender.unbounded_send(discovery);
            },
            move || closer.close_channel(),
        );
        EventStream::new(receiver, handle)
    }

    /// Ends every active scan.
    pub fn stop_scan(&self) {
        let scanning = !lock(&self.inner.scans).active.is_empty();
        self.inner.events.receive(&CentralEvent::StopScan);

        // The last session to end has already stopped the platform.
        if !scanning {
            self.inner.backend.stop_scan();
        }
    }

    pub fn state_updates(&self) -> EventStream<ManagerState> {
        self.stream(|event| match event {
            CentralEvent::StateUpdated(state) => Some(*state),
            _ => None,
        })
    }

    pub fn disconnections(&self) -> EventStream<DidDisconnect> {
        self.stream(|event| match event {
            CentralEvent::Disconnected(disconnect) => Some(disconnect.clone()),
            _ => None,
        })
    }

    /// System-wide connection events requested with
    /// [`register_for_connection_events()`][Self::register_for_connection_events].
    pub fn connection_events(&self) -> EventStream<PeripheralConnectionEvent> {
        self.stream(|event| match event {
            CentralEvent::ConnectionEvent(event) => Some(event.clone()),
            _ => None,
        })
    }

    fn stream<T: Send + 'static>(
        &self,
        mut select: impl FnMut(&CentralEvent) -> Option<T> + Send + 'static,
    ) -> EventStream<T> {
        let (sender, receiver) = mpsc::unbounded();
        let subscription = self.inner.events.queue(move |event, done| {
            if let Some(item) = select(event) {
                if sender.unbounded_send(item).is_err() {
                    done.mark();
                }
            }
        });
        EventStream::new(receiver, CancelHandle::new(subscription))
    }
}

fn readiness(state: ManagerState) -> Option<Result<()>> {
    match state {
        ManagerState::PoweredOn => Some(Ok(())),
        ManagerState::Unauthorized => Some(Err(ErrorKind::Unauthorized.into())),
        ManagerState::Unsupported => Some(Err(ErrorKind::Unavailable.into())),
        ManagerState::Unknown | ManagerState::Resetting | ManagerState::PoweredOff => None,
    }
}

impl CentralInner {
    /// Returns the wrapper for a platform peripheral, creating it on first sight.
    fn peripheral(&self, backend: Arc<dyn PeripheralBackend>) -> Peripheral {
        lock(&self.peripherals)
            .entry(backend.identifier())
            .or_insert_with(|| Peripheral::new(backend))
            .clone()
    }

    fn end_scan(&self, id: u64) {
        let mut scans = lock(&self.scans);
        if scans.active.remove(&id).is_some() {
            debug!(session = id, remaining = scans.active.len(), "scan session ended");
            self.apply_scan(scans);
        }
    }

    /// Tells the platform to scan for everything the active sessions want, or to stop.
    ///
    /// The scans lock stays held across the platform call so that concurrent sessions reach the
    /// platform in the order their configurations were computed.
    fn apply_scan(&self, scans: MutexGuard<'_, ScanSessions>) {
        if scans.active.is_empty() {
            self.backend.stop_scan();
            return;
        }

        let mut services = Some(Vec::new());
        let mut options = ScanOptions::default();
        for session in scans.active.values() {
            services = match (services, &session.services) {
                (Some(mut all), Some(wanted)) => {
                    for uuid in wanted {
                        if !all.contains(uuid) {
                            all.push(uuid.clone());
                        }
                    }
                    Some(all)
                }
                _ => None,
            };

            options.allow_duplicates |= session.options.allow_duplicates;
            if let Some(solicited) = &session.options.solicited_services {
                let all = options.solicited_services.get_or_insert_with(Vec::new);
                for uuid in solicited {
                    if !all.contains(uuid) {
                        all.push(uuid.clone());
                    }
                }
            }
        }

        self.backend.scan(services.as_deref(), &options);
    }
}

/// A pending connection that can be abandoned by a timeout or by its caller.
#[derive(Clone)]
struct ConnectAttempt {
    central: Weak<CentralInner>,
    peripheral: Peripheral,
    responder: Responder<()>,
    subscription: Subscription<CentralEvent>,
}

impl ConnectAttempt {
    fn abort(&self, kind: ErrorKind) {
        if let Some(completion) = self.responder.take() {
            debug!(peripheral = %self.peripheral.identifier(), %kind, "connection attempt abandoned");
            if let Some(central) = self.central.upgrade() {
                central
                    .backend
                    .cancel_peripheral_connection(self.peripheral.backend());
            }
            completion(Err(kind.into()));
        }
        self.subscription.cancel();
    }
}

impl Cancellable for ConnectAttempt {
    fn cancel(&self) {
        self.abort(ErrorKind::Canceled);
    }
}

/// Receives a [`CentralManager`]'s platform callbacks after pending operations have seen them.
#[allow(unused_variables)]
pub trait CentralManagerDelegate: Send + Sync + 'static {
    fn did_update_state(&self, central: &CentralManager, state: ManagerState) {}

    fn will_restore_state(&self, central: &CentralManager, peripherals: &[Peripheral]) {}

    fn did_discover(&self, central: &CentralManager, discovery: &DidDiscover) {}

    fn did_connect(&self, central: &CentralManager, peripheral: &Peripheral) {}

    fn did_fail_to_connect(&self, central: &CentralManager, peripheral: &Peripheral, error: &Error) {}

    fn did_disconnect(&self, central: &CentralManager, disconnect: &DidDisconnect) {}

    fn on_connection_event(&self, central: &CentralManager, event: &PeripheralConnectionEvent) {}
}

struct CentralManagerDelegateWrapper {
    inner: Weak<CentralInner>,
}

impl CentralManagerDelegateWrapper {
    fn central(&self) -> Option<CentralManager> {
        let central = self.inner.upgrade().map(|inner| CentralManager { inner });
        if central.is_none() {
            trace!("central manager callback after the manager was dropped");
        }
        central
    }
}

impl bluetooth_platform::CentralManagerDelegate for CentralManagerDelegateWrapper {
    fn did_update_state(&self, state: ManagerState) {
        let Some(central) = self.central() else {
            return;
        };

        debug!(?state, "adapter state updated");
        central.inner.events.receive(&CentralEvent::StateUpdated(state));

        if let Some(delegate) = central.delegate() {
            delegate.did_update_state(&central, state);
        }
    }

    fn will_restore_state(&self, state: RestoredState) {
        let Some(central) = self.central() else {
            return;
        };

        let peripherals: Vec<Peripheral> = state
            .peripherals
            .into_iter()
            .map(|backend| central.inner.peripheral(backend))
            .collect();
        lock(&central.inner.connected).extend(
            peripherals
                .iter()
                .filter(|peripheral| peripheral.is_connected())
                .map(Peripheral::identifier),
        );
        debug!(
            restored = peripherals.len(),
            scan_services = ?state.scan_services,
            "restoring central manager state"
        );

        central
            .inner
            .events
            .receive(&CentralEvent::RestoreState(peripherals.clone()));

        if let Some(delegate) = central.delegate() {
            delegate.will_restore_state(&central, &peripherals);
        }
    }

    fn did_discover(
        &self,
        peripheral: Arc<dyn PeripheralBackend>,
        advertisement_data: AdvertisementData,
        rssi: i16,
    ) {
        let Some(central) = self.central() else {
            return;
        };

        let discovery = DidDiscover {
            peripheral: central.inner.peripheral(peripheral),
            advertisement_data,
            rssi,
        };
        central
            .inner
            .events
            .receive(&CentralEvent::Discovered(discovery.clone()));

        if let Some(delegate) = central.delegate() {
            delegate.did_discover(&central, &discovery);
        }
    }

    fn did_connect(&self, peripheral: Arc<dyn PeripheralBackend>) {
        let Some(central) = self.central() else {
            return;
        };

        let peripheral = central.inner.peripheral(peripheral);
        lock(&central.inner.connected).insert(peripheral.identifier());
        debug!(peripheral = %peripheral.identifier(), "connected");

        central
            .inner
            .events
            .receive(&CentralEvent::Connected(peripheral.clone()));

        if let Some(delegate) = central.delegate() {
            delegate.did_connect(&central, &peripheral);
        }
    }

    fn did_fail_to_connect(
        &self,
        peripheral: Arc<dyn PeripheralBackend>,
        error: bluetooth_platform::Error,
    ) {
        let Some(central) = self.central() else {
            return;
        };

        let peripheral = central.inner.peripheral(peripheral);
        let error = Error::from(error);
        debug!(peripheral = %peripheral.identifier(), %error, "failed to connect");

        central.inner.events.receive(&CentralEvent::FailedToConnect {
            peripheral: peripheral.clone(),
            error: error.clone(),
        });

        if let Some(delegate) = central.delegate() {
            delegate.did_fail_to_connect(&central, &peripheral, &error);
        }
    }

    fn did_disconnect(
        &self,
        peripheral: Arc<dyn PeripheralBackend>,
        timestamp: Option<SystemTime>,
        is_reconnecting: bool,
        error: Option<bluetooth_platform::Error>,
    ) {
        let Some(central) = self.central() else {
            return;
        };

        let peripheral = central.inner.peripheral(peripheral);
        lock(&central.inner.connected).remove(&peripheral.identifier());
        debug!(peripheral = %peripheral.identifier(), is_reconnecting, "disconnected");

        peripheral.handle_disconnect();

        let disconnect = DidDisconnect {
            peripheral,
            timestamp,
            is_reconnecting,
            error: error.map(Error::from),
        };
        central
            .inner
            .events
            .receive(&CentralEvent::Disconnected(disconnect.clone()));

        if let Some(delegate) = central.delegate() {
            delegate.did_disconnect(&central, &disconnect);
        }
    }

    fn on_connection_event(&self, event: ConnectionEvent, peripheral: Arc<dyn PeripheralBackend>) {
        let Some(central) = self.central() else {
            return;
        };

        let event = PeripheralConnectionEvent {
            peripheral: central.inner.peripheral(peripheral),
            event,
        };
        central
            .inner
            .events
            .receive(&CentralEvent::ConnectionEvent(event.clone()));

        if let Some(delegate) = central.delegate() {
            delegate.on_connection_event(&central, &event);
        }
    }
}
