use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bluetooth_platform::{
    Characteristic, CharacteristicWriteType, Descriptor, L2capChannel, PeripheralBackend,
    PeripheralState, Service,
};
use btuuid::BluetoothUuid;
use futures_channel::mpsc;
use subscription_queue::{CancelHandle, SubscriptionQueue, SubscriptionQueueMap};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::event_stream::EventStream;
use crate::notifying_tracker::NotifyingTracker;
use crate::util::{Responder, lock, respond_once, wait_for};

/// A descriptor is identified by its own UUID together with its characteristic's, since
/// descriptor types such as the Client Characteristic Configuration repeat across
/// characteristics.
type DescriptorKey = (BluetoothUuid, BluetoothUuid);

fn descriptor_key(descriptor: &Descriptor) -> DescriptorKey {
    (
        descriptor.characteristic_uuid.clone(),
        descriptor.uuid.clone(),
    )
}

/// Everything a peripheral reports that is not keyed by a characteristic or descriptor.
#[derive(Debug)]
pub(crate) enum PeripheralEvent {
    DiscoveredServices(Result<Vec<Service>>),
    DiscoveredIncludedServices {
        service: Service,
        result: Result<Vec<Service>>,
    },
    DiscoveredCharacteristics {
        service: Service,
        result: Result<Vec<Characteristic>>,
    },
    DiscoveredDescriptors {
        characteristic: Characteristic,
        result: Result<Vec<Descriptor>>,
    },
    /// `requested` is the state asked for by the request this answers, if any.
    UpdatedNotificationState {
        characteristic: Characteristic,
        result: Result<()>,
        requested: Option<bool>,
    },
    ReadRssi(Result<i16>),
    OpenedL2capChannel(Result<L2capChannel>),
    ReadyToSendWriteWithoutResponse,
    Disconnected,
}

/// A characteristic argument: either a discovered [`Characteristic`] or the UUID of one.
///
/// UUIDs are resolved against the characteristics discovered on the peripheral so far. Using
/// a UUID that has not been discovered fails with [`ErrorKind::NotDiscovered`].
#[derive(Debug, Clone, Copy)]
pub enum CharacteristicRef<'a> {
    Discovered(&'a Characteristic),
    Uuid(&'a BluetoothUuid),
}

impl<'a> From<&'a Characteristic> for CharacteristicRef<'a> {
    fn from(characteristic: &'a Characteristic) -> Self {
        CharacteristicRef::Discovered(characteristic)
    }
}

impl<'a> From<&'a BluetoothUuid> for CharacteristicRef<'a> {
    fn from(uuid: &'a BluetoothUuid) -> Self {
        CharacteristicRef::Uuid(uuid)
    }
}

/// A remote peripheral.
///
/// Peripherals are obtained from a [`CentralManager`][crate::CentralManager], which hands out
/// the same `Peripheral` for the same device every time. Clones share all state.
#[derive(Clone)]
pub struct Peripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    backend: Arc<dyn PeripheralBackend>,
    identifier: Uuid,
    delegate: Mutex<Option<Arc<dyn PeripheralDelegate>>>,
    events: SubscriptionQueue<PeripheralEvent>,
    responses: SubscriptionQueueMap<BluetoothUuid, Result<Vec<u8>>>,
    writes: SubscriptionQueueMap<BluetoothUuid, Result<()>>,
    descriptor_values: SubscriptionQueueMap<DescriptorKey, Result<Vec<u8>>>,
    descriptor_writes: SubscriptionQueueMap<DescriptorKey, Result<()>>,
    notifying: NotifyingTracker<BluetoothUuid>,
    /// Notify states sent to the platform and not yet answered, oldest first.
    notify_requests: Mutex<HashMap<BluetoothUuid, VecDeque<bool>>>,
    characteristics: Mutex<HashMap<BluetoothUuid, Characteristic>>,
}

impl PeripheralInner {
    /// Runs `update` against the tracker and sends the state it returns to the platform.
    ///
    /// Requests for one peripheral reach the platform in the order their states were derived.
    fn send_notify(
        &self,
        characteristic: &Characteristic,
        update: impl FnOnce(&NotifyingTracker<BluetoothUuid>) -> bool,
    ) -> bool {
        let mut requests = lock(&self.notify_requests);
        let notify = update(&self.notifying);
        requests
            .entry(characteristic.uuid.clone())
            .or_default()
            .push_back(notify);
        self.backend.set_notify(characteristic, notify);
        notify
    }

    fn notify_pending(&self, uuid: &BluetoothUuid) -> bool {
        lock(&self.notify_requests).contains_key(uuid)
    }

    /// Pops the oldest unanswered notify request for `uuid`.
    fn answer_notify(&self, uuid: &BluetoothUuid) -> Option<bool> {
        let mut requests = lock(&self.notify_requests);
        let pending = requests.get_mut(uuid)?;
        let requested = pending.pop_front();
        if pending.is_empty() {
            requests.remove(uuid);
        }
        requested
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripheral")
            .field("identifier", &self.inner.identifier)
            .field("name", &self.name())
            .finish()
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.inner.identifier == other.inner.identifier
    }
}

impl Eq for Peripheral {}

impl std::hash::Hash for Peripheral {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.identifier.hash(state);
    }
}

impl Peripheral {
    pub(crate) fn new(backend: Arc<dyn PeripheralBackend>) -> Self {
        let inner = Arc::new(PeripheralInner {
            identifier: backend.identifier(),
            backend,
            delegate: Mutex::new(None),
            events: SubscriptionQueue::new(),
            responses: SubscriptionQueueMap::new(),
            writes: SubscriptionQueueMap::new(),
            descriptor_values: SubscriptionQueueMap::new(),
            descriptor_writes: SubscriptionQueueMap::new(),
            notifying: NotifyingTracker::new(),
            notify_requests: Mutex::new(HashMap::new()),
            characteristics: Mutex::new(HashMap::new()),
        });

        inner
            .backend
            .set_delegate(Arc::new(PeripheralDelegateWrapper {
                inner: Arc::downgrade(&inner),
            }));

        Peripheral { inner }
    }

    /// Installs a delegate that is told about every callback after pending requests have been
    /// resolved.
    pub fn set_delegate(&self, delegate: Option<Arc<dyn PeripheralDelegate>>) {
        *lock(&self.inner.delegate) = delegate;
    }

    fn delegate(&self) -> Option<Arc<dyn PeripheralDelegate>> {
        lock(&self.inner.delegate).clone()
    }

    pub fn identifier(&self) -> Uuid {
        self.inner.identifier
    }

    pub fn name(&self) -> Option<String> {
        self.inner.backend.name()
    }

    pub fn state(&self) -> PeripheralState {
        self.inner.backend.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeripheralState::Connected
    }

    /// The services discovered so far, or `None` if service discovery has not run.
    pub fn services(&self) -> Option<Vec<Service>> {
        self.inner.backend.services()
    }

    /// Looks up a discovered characteristic by UUID.
    pub fn known_characteristic(&self, uuid: &BluetoothUuid) -> Option<Characteristic> {
        lock(&self.inner.characteristics).get(uuid).cloned()
    }

    pub fn max_write_value_len(&self, write_type: CharacteristicWriteType) -> usize {
        self.inner.backend.max_write_value_len(write_type)
    }

    pub fn can_send_write_without_response(&self) -> bool {
        self.inner.backend.can_send_write_without_response()
    }

    pub(crate) fn backend(&self) -> &dyn PeripheralBackend {
        &*self.inner.backend
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ErrorKind::Disconnected.into())
        }
    }

    fn resolve(&self, characteristic: CharacteristicRef<'_>) -> Result<Characteristic> {
        let known = lock(&self.inner.characteristics);
        match characteristic {
            CharacteristicRef::Discovered(characteristic) => Ok(known
                .get(&characteristic.uuid)
                .cloned()
                .unwrap_or_else(|| characteristic.clone())),
            CharacteristicRef::Uuid(uuid) => known.get(uuid).cloned().ok_or_else(|| {
                debug!(peripheral = %self.inner.identifier, ?uuid, "characteristic not discovered");
                ErrorKind::NotDiscovered.into()
            }),
        }
    }

    fn remember(&self, characteristics: &[Characteristic]) {
        let mut known = lock(&self.inner.characteristics);
        for characteristic in characteristics {
            known.insert(characteristic.uuid.clone(), characteristic.clone());
        }
    }

    /// Registers interest in a [`PeripheralEvent`], then issues the platform request.
    fn request<T: 'static>(
        &self,
        completion: impl FnOnce(Result<T>) + Send + 'static,
        mut matcher: impl FnMut(&PeripheralEvent) -> Option<Result<T>> + Send + 'static,
        issue: impl FnOnce(&dyn PeripheralBackend),
    ) -> CancelHandle {
        let responder = Responder::new(completion);
        let (handler, on_removed) =
            respond_once(responder.clone(), move |event: &PeripheralEvent| match event {
                PeripheralEvent::Disconnected => Some(Err(ErrorKind::Disconnected.into())),
                event => matcher(event),
            });
        let subscription = self.inner.events.queue_with_completion(handler, on_removed);

        if let Err(error) = self.ensure_connected() {
            responder.respond(Err(error));
            subscription.cancel();
            return CancelHandle::noop();
        }

        issue(self.backend());
        CancelHandle::new(subscription)
    }

    /// Registers interest in the next response for `key`, then issues the platform request.
    fn keyed_request<K, T>(
        &self,
        map: &SubscriptionQueueMap<K, Result<T>>,
        key: &K,
        completion: impl FnOnce(Result<T>) + Send + 'static,
        issue: impl FnOnce(&dyn PeripheralBackend),
    ) -> CancelHandle
    where
        K: Eq + std::hash::Hash + Clone,
        T: Clone + 'static,
    {
        let responder = Responder::new(completion);
        let (handler, on_removed) =
            respond_once(responder.clone(), |response: &Result<T>| Some(response.clone()));
        let subscription = map.queue_with_completion(key, handler, on_removed);

        if let Err(error) = self.ensure_connected() {
            responder.respond(Err(error));
            subscription.cancel();
            return CancelHandle::noop();
        }

        issue(self.backend());
        CancelHandle::new(subscription)
    }

    /// Discovers the peripheral's services, or only those in `services`.
    pub fn discover_services_with(
        &self,
        services: Option<&[BluetoothUuid]>,
        completion: impl FnOnce(Result<Vec<Service>>) + Send + 'static,
    ) -> CancelHandle {
        self.request(
            completion,
            |event| match event {
                PeripheralEvent::DiscoveredServices(result) => Some(result.clone()),
                _ => None,
            },
            |backend| backend.discover_services(services),
        )
    }

    pub async fn discover_services(
        &self,
        services: Option<&[BluetoothUuid]>,
    ) -> Result<Vec<Service>> {
        wait_for(|completion| self.discover_services_with(services, completion)).await
    }

    pub fn discover_included_services_with(
        &self,
        services: Option<&[BluetoothUuid]>,
        service: &Service,
        completion: impl FnOnce(Result<Vec<Service>>) + Send + 'static,
    ) -> CancelHandle {
        let uuid = service.uuid.clone();
        self.request(
            completion,
            move |event| match event {
                PeripheralEvent::DiscoveredIncludedServices { service, result }
                    if service.uuid == uuid =>
                {
                    Some(result.clone())
                }
                _ => None,
            },
            |backend| backend.discover_included_services(service, services),
        )
    }

    pub async fn discover_included_services(
        &self,
        services: Option<&[BluetoothUuid]>,
        service: &Service,
    ) -> Result<Vec<Service>> {
        wait_for(|completion| self.discover_included_services_with(services, service, completion))
            .await
    }

    /// Discovers the characteristics of `service`, or only those in `characteristics`.
    ///
    /// Discovered characteristics can afterwards be referred to by UUID.
    pub fn discover_characteristics_with(
        &self,
        characteristics: Option<&[BluetoothUuid]>,
        service: &Service,
        completion: impl FnOnce(Result<Vec<Characteristic>>) + Send + 'static,
    ) -> CancelHandle {
        let uuid = service.uuid.clone();
        self.request(
            completion,
            move |event| match event {
                PeripheralEvent::DiscoveredCharacteristics { service, result }
                    if service.uuid == uuid =>
                {
                    Some(result.clone())
                }
                _ => None,
            },
            |backend| backend.discover_characteristics(service, characteristics),
        )
    }

    pub async fn discover_characteristics(
        &self,
        characteristics: Option<&[BluetoothUuid]>,
        service: &Service,
    ) -> Result<Vec<Characteristic>> {
        wait_for(|completion| {
            self.discover_characteristics_with(characteristics, service, completion)
        })
        .await
    }

    pub fn discover_descriptors_with<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
        completion: impl FnOnce(Result<Vec<Descriptor>>) + Send + 'static,
    ) -> CancelHandle {
        let characteristic = match self.resolve(characteristic.into()) {
            Ok(characteristic) => characteristic,
            Err(error) => {
                completion(Err(error));
                return CancelHandle::noop();
            }
        };

        let uuid = characteristic.uuid.clone();
        self.request(
            completion,
            move |event| match event {
                PeripheralEvent::DiscoveredDescriptors {
                    characteristic,
                    result,
                } if characteristic.uuid == uuid => Some(result.clone()),
                _ => None,
            },
            |backend| backend.discover_descriptors(&characteristic),
        )
    }

    pub async fn discover_descriptors<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
    ) -> Result<Vec<Descriptor>> {
        let characteristic = characteristic.into();
        wait_for(|completion| self.discover_descriptors_with(characteristic, completion)).await
    }

    /// Reads the value of a characteristic.
    ///
    /// The request is answered by the next value reported for the characteristic, which may be
    /// a notification that crosses the read on the wire.
    pub fn read_value_with<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
        completion: impl FnOnce(Result<Vec<u8>>) + Send + 'static,
    ) -> CancelHandle {
        let characteristic = match self.resolve(characteristic.into()) {
            Ok(characteristic) => characteristic,
            Err(error) => {
                completion(Err(error));
                return CancelHandle::noop();
            }
        };

        self.keyed_request(
            &self.inner.responses,
            &characteristic.uuid,
            completion,
            |backend| backend.read_characteristic_value(&characteristic),
        )
    }

    pub async fn read_value<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
    ) -> Result<Vec<u8>> {
        let characteristic = characteristic.into();
        wait_for(|completion| self.read_value_with(characteristic, completion)).await
    }

    pub fn read_descriptor_value_with(
        &self,
        descriptor: &Descriptor,
        completion: impl FnOnce(Result<Vec<u8>>) + Send + 'static,
    ) -> CancelHandle {
        self.keyed_request(
            &self.inner.descriptor_values,
            &descriptor_key(descriptor),
            completion,
            |backend| backend.read_descriptor_value(descriptor),
        )
    }

    pub async fn read_descriptor_value(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        wait_for(|completion| self.read_descriptor_value_with(descriptor, completion)).await
    }

    /// Writes the value of a characteristic.
    ///
    /// Writes with response complete when the peripheral acknowledges them. Writes without
    /// response complete as soon as they have been handed to the platform.
    pub fn write_value_with<'a>(
        &self,
        data: Vec<u8>,
        characteristic: impl Into<CharacteristicRef<'a>>,
        write_type: CharacteristicWriteType,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        let characteristic = match self.resolve(characteristic.into()) {
            Ok(characteristic) => characteristic,
            Err(error) => {
                completion(Err(error));
                return CancelHandle::noop();
            }
        };

        match write_type {
            CharacteristicWriteType::WithResponse => self.keyed_request(
                &self.inner.writes,
                &characteristic.uuid,
                completion,
                |backend| backend.write_characteristic_value(&characteristic, data, write_type),
            ),
            CharacteristicWriteType::WithoutResponse => {
                let result = self.ensure_connected().map(|()| {
                    self.backend()
                        .write_characteristic_value(&characteristic, data, write_type)
                });
                completion(result);
                CancelHandle::noop()
            }
        }
    }

    pub async fn write_value<'a>(
        &self,
        data: Vec<u8>,
        characteristic: impl Into<CharacteristicRef<'a>>,
        write_type: CharacteristicWriteType,
    ) -> Result<()> {
        let characteristic = characteristic.into();
        wait_for(|completion| self.write_value_with(data, characteristic, write_type, completion))
            .await
    }

    pub fn write_descriptor_value_with(
        &self,
        data: Vec<u8>,
        descriptor: &Descriptor,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        self.keyed_request(
            &self.inner.descriptor_writes,
            &descriptor_key(descriptor),
            completion,
            |backend| backend.write_descriptor_value(descriptor, data),
        )
    }

    pub async fn write_descriptor_value(&self, data: Vec<u8>, descriptor: &Descriptor) -> Result<()> {
        wait_for(|completion| self.write_descriptor_value_with(data, descriptor, completion)).await
    }

    /// Enables or disables notifications for a characteristic and reports whether the
    /// characteristic is notifying afterwards.
    ///
    /// Notifications stay enabled while any [`read_values()`][Self::read_values] stream for
    /// the characteristic is alive, even if `enabled` is `false`.
    pub fn set_notify_value_with<'a>(
        &self,
        enabled: bool,
        characteristic: impl Into<CharacteristicRef<'a>>,
        completion: impl FnOnce(Result<bool>) + Send + 'static,
    ) -> CancelHandle {
        let characteristic = match self
            .resolve(characteristic.into())
            .and_then(|characteristic| self.ensure_connected().map(|()| characteristic))
        {
            Ok(characteristic) => characteristic,
            Err(error) => {
                completion(Err(error));
                return CancelHandle::noop();
            }
        };

        let uuid = characteristic.uuid.clone();
        let previous = self.inner.notifying.is_external(&uuid);
        let notify = self.inner.notifying.set_external(enabled, uuid.clone());
        if characteristic.is_notifying == notify && !self.inner.notify_pending(&uuid) {
            completion(Ok(notify));
            return CancelHandle::noop();
        }

        let inner = Arc::downgrade(&self.inner);
        let restored = uuid.clone();
        let completion = move |result: Result<bool>| {
            if result.is_err() {
                if let Some(inner) = inner.upgrade() {
                    trace!(characteristic = ?restored, previous, "notify request failed");
                    inner.notifying.set_external(previous, restored);
                }
            }
            completion(result);
        };

        let sent = Arc::new(AtomicBool::new(notify));
        let asked = sent.clone();
        let matched = uuid.clone();
        self.request(
            completion,
            move |event| match event {
                PeripheralEvent::UpdatedNotificationState {
                    characteristic,
                    result,
                    requested,
                } if characteristic.uuid == matched
                    && requested.is_none_or(|requested| {
                        requested == asked.load(Ordering::SeqCst)
                    }) =>
                {
                    Some(result.clone().map(|()| characteristic.is_notifying))
                }
                _ => None,
            },
            |_| {
                self.inner.send_notify(&characteristic, |tracker| {
                    let notify = tracker.is_notifying(&uuid);
                    sent.store(notify, Ordering::SeqCst);
                    notify
                });
            },
        )
    }

    pub async fn set_notify_value<'a>(
        &self,
        enabled: bool,
        characteristic: impl Into<CharacteristicRef<'a>>,
    ) -> Result<bool> {
        let characteristic = characteristic.into();
        wait_for(|completion| self.set_notify_value_with(enabled, characteristic, completion))
            .await
    }

    /// Calls `on_value` with every value reported for a characteristic until the returned
    /// handle is cancelled, notifications are turned off, or the peripheral disconnects.
    /// `on_end` runs once afterwards.
    ///
    /// Notifications are enabled for as long as any such subscription is active.
    pub fn read_values_with<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
        mut on_value: impl FnMut(Vec<u8>) + Send + 'static,
        on_end: impl FnOnce() + Send + 'static,
    ) -> Result<CancelHandle> {
        let characteristic = self.resolve(characteristic.into())?;
        self.ensure_connected()?;

        let uuid = characteristic.uuid.clone();
        self.inner.notifying.add_internal(uuid.clone());

        let inner = Arc::downgrade(&self.inner);
        let released = characteristic.clone();
        let values = self.inner.responses.queue_with_completion(
            &uuid,
            move |value, _| {
                if let Ok(value) = value {
                    on_value(value.clone());
                }
            },
            move || {
                if let Some(inner) = inner.upgrade() {
                    if inner.backend.state() == PeripheralState::Connected {
                        inner.send_notify(&released, |tracker| {
                            tracker.remove_internal(released.uuid.clone())
                        });
                    } else {
                        inner.notifying.remove_internal(released.uuid.clone());
                    }
                }
                on_end();
            },
        );

        let watched = uuid.clone();
        let lifetime = self.inner.events.queue_with_completion(
            move |event, done| match event {
                // An answer to an earlier request to stop is not about this stream.
                PeripheralEvent::UpdatedNotificationState {
                    characteristic,
                    requested,
                    ..
                } if characteristic.uuid == watched
                    && !characteristic.is_notifying
                    && *requested != Some(false) =>
                {
                    done.mark()
                }
                PeripheralEvent::Disconnected => done.mark(),
                _ => (),
            },
            move || values.cancel(),
        );

        if let Err(error) = self.ensure_connected() {
            lifetime.cancel();
            return Err(error);
        }

        self.inner
            .send_notify(&characteristic, |tracker| tracker.is_notifying(&uuid));
        Ok(CancelHandle::new(lifetime))
    }

    /// Returns a stream of every value reported for a characteristic.
    ///
    /// The stream ends when notifications are turned off or the peripheral disconnects.
    /// Dropping it releases its claim on notifications.
    pub fn read_values<'a>(
        &self,
        characteristic: impl Into<CharacteristicRef<'a>>,
    ) -> Result<ValueStream> {
        let (sender, receiver) = mpsc::unbounded();
        let closer = sender.clone();
        let handle = self.read_values_with(
            characteristic,
            move |value| {
                let _ = sender.unbounded_send(value);
            },
            move || closer.close_channel(),
        )?;

        Ok(EventStream::new(receiver, handle))
    }

    pub fn read_rssi_with(
        &self,
        completion: impl FnOnce(Result<i16>) + Send + 'static,
    ) -> CancelHandle {
        self.request(
            completion,
            |event| match event {
                PeripheralEvent::ReadRssi(result) => Some(result.clone()),
                _ => None,
            },
            |backend| backend.read_rssi(),
        )
    }

    pub async fn read_rssi(&self) -> Result<i16> {
        wait_for(|completion| self.read_rssi_with(completion)).await
    }

    pub fn open_l2cap_channel_with(
        &self,
        psm: u16,
        completion: impl FnOnce(Result<L2capChannel>) + Send + 'static,
    ) -> CancelHandle {
        self.request(
            completion,
            |event| match event {
                PeripheralEvent::OpenedL2capChannel(result) => Some(result.clone()),
                _ => None,
            },
            |backend| backend.open_l2cap_channel(psm),
        )
    }

    pub async fn open_l2cap_channel(&self, psm: u16) -> Result<L2capChannel> {
        wait_for(|completion| self.open_l2cap_channel_with(psm, completion)).await
    }

    /// Waits until the peripheral can accept another write without response.
    pub async fn ready_to_send_write_without_response(&self) -> Result<()> {
        wait_for(|completion| {
            if self.can_send_write_without_response() {
                completion(Ok(()));
                return CancelHandle::noop();
            }

            self.request(
                completion,
                |event| match event {
                    PeripheralEvent::ReadyToSendWriteWithoutResponse => Some(Ok(())),
                    _ => None,
                },
                |_| (),
            )
        })
        .await
    }

    /// Fails everything waiting on this peripheral with [`ErrorKind::Disconnected`].
    pub(crate) fn handle_disconnect(&self) {
        for characteristic in lock(&self.inner.characteristics).values_mut() {
            characteristic.is_notifying = false;
        }
        lock(&self.inner.notify_requests).clear();

        self.inner.events.receive(&PeripheralEvent::Disconnected);

        let error = Error::from(ErrorKind::Disconnected);
        self.inner.responses.receive_all(&Err(error.clone()));
        self.inner.writes.receive_all(&Err(error.clone()));
        self.inner.descriptor_values.receive_all(&Err(error.clone()));
        self.inner.descriptor_writes.receive_all(&Err(error));

        debug!(peripheral = %self.inner.identifier, "pending requests failed after disconnect");
    }
}

/// A stream of characteristic values returned by [`Peripheral::read_values()`].
pub type ValueStream = EventStream<Vec<u8>>;

/// Receives a [`Peripheral`]'s platform callbacks after its pending requests have seen them.
#[allow(unused_variables)]
pub trait PeripheralDelegate: Send + Sync + 'static {
    fn did_update_name(&self, peripheral: &Peripheral, name: Option<&str>) {}

    fn did_modify_services(&self, peripheral: &Peripheral, invalidated_services: &[Service]) {}

    fn did_read_rssi(&self, peripheral: &Peripheral, rssi: &Result<i16>) {}

    fn did_discover_services(&self, peripheral: &Peripheral, result: &Result<Vec<Service>>) {}

    fn did_discover_included_services(
        &self,
        peripheral: &Peripheral,
        service: &Service,
        result: &Result<Vec<Service>>,
    ) {
    }

    fn did_discover_characteristics(
        &self,
        peripheral: &Peripheral,
        service: &Service,
        result: &Result<Vec<Characteristic>>,
    ) {
    }

    fn did_discover_descriptors(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        result: &Result<Vec<Descriptor>>,
    ) {
    }

    fn did_update_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        result: &Result<Vec<u8>>,
    ) {
    }

    fn did_write_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        result: &Result<()>,
    ) {
    }

    fn did_update_notification_state(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        result: &Result<()>,
    ) {
    }

    fn did_update_descriptor_value(
        &self,
        peripheral: &Peripheral,
        descriptor: &Descriptor,
        result: &Result<Vec<u8>>,
    ) {
    }

    fn did_write_descriptor_value(
        &self,
        peripheral: &Peripheral,
        descriptor: &Descriptor,
        result: &Result<()>,
    ) {
    }

    fn is_ready_to_send_write_without_response(&self, peripheral: &Peripheral) {}

    fn did_open_l2cap_channel(&self, peripheral: &Peripheral, result: &Result<L2capChannel>) {}
}

struct PeripheralDelegateWrapper {
    inner: Weak<PeripheralInner>,
}

impl PeripheralDelegateWrapper {
    fn peripheral(&self) -> Option<Peripheral> {
        let peripheral = self.inner.upgrade().map(|inner| Peripheral { inner });
        if peripheral.is_none() {
            trace!("peripheral callback after the peripheral was dropped");
        }
        peripheral
    }

    fn notify(&self, f: impl FnOnce(&Peripheral, &dyn PeripheralDelegate)) {
        if let Some(peripheral) = self.peripheral() {
            if let Some(delegate) = peripheral.delegate() {
                f(&peripheral, &*delegate);
            }
        }
    }
}

impl bluetooth_platform::PeripheralDelegate for PeripheralDelegateWrapper {
    fn did_update_name(&self, name: Option<String>) {
        self.notify(|peripheral, delegate| delegate.did_update_name(peripheral, name.as_deref()));
    }

    fn did_modify_services(&self, invalidated_services: Vec<Service>) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        lock(&peripheral.inner.characteristics).retain(|_, characteristic| {
            !invalidated_services
                .iter()
                .any(|service| service.uuid == characteristic.service_uuid)
        });

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_modify_services(&peripheral, &invalidated_services);
        }
    }

    fn did_read_rssi(&self, rssi: bluetooth_platform::Result<i16>) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let rssi = rssi.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::ReadRssi(rssi.clone()));

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_read_rssi(&peripheral, &rssi);
        }
    }

    fn did_discover_services(&self, result: bluetooth_platform::Result<Vec<Service>>) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::DiscoveredServices(result.clone()));

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_discover_services(&peripheral, &result);
        }
    }

    fn did_discover_included_services(
        &self,
        service: Service,
        result: bluetooth_platform::Result<Vec<Service>>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::DiscoveredIncludedServices {
                service: service.clone(),
                result: result.clone(),
            });

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_discover_included_services(&peripheral, &service, &result);
        }
    }

    fn did_discover_characteristics(
        &self,
        service: Service,
        result: bluetooth_platform::Result<Vec<Characteristic>>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        if let Ok(characteristics) = &result {
            peripheral.remember(characteristics);
        }

        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::DiscoveredCharacteristics {
                service: service.clone(),
                result: result.clone(),
            });

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_discover_characteristics(&peripheral, &service, &result);
        }
    }

    fn did_update_value_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: bluetooth_platform::Result<()>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        peripheral.remember(std::slice::from_ref(&characteristic));

        let value = result
            .map(|()| characteristic.value.clone().unwrap_or_default())
            .map_err(Error::from);
        peripheral
            .inner
            .responses
            .receive(&characteristic.uuid, &value);

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_update_value(&peripheral, &characteristic, &value);
        }
    }

    fn did_write_value_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: bluetooth_platform::Result<()>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .writes
            .receive(&characteristic.uuid, &result);

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_write_value(&peripheral, &characteristic, &result);
        }
    }

    fn did_update_notification_state_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: bluetooth_platform::Result<()>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        peripheral.remember(std::slice::from_ref(&characteristic));
        let requested = peripheral.inner.answer_notify(&characteristic.uuid);

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::UpdatedNotificationState {
                characteristic: characteristic.clone(),
                result: result.clone(),
                requested,
            });

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_update_notification_state(&peripheral, &characteristic, &result);
        }
    }

    fn did_discover_descriptors_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: bluetooth_platform::Result<Vec<Descriptor>>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::DiscoveredDescriptors {
                characteristic: characteristic.clone(),
                result: result.clone(),
            });

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_discover_descriptors(&peripheral, &characteristic, &result);
        }
    }

    fn did_update_value_for_descriptor(
        &self,
        descriptor: Descriptor,
        result: bluetooth_platform::Result<()>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let value = result
            .map(|()| descriptor.value.clone().unwrap_or_default())
            .map_err(Error::from);
        peripheral
            .inner
            .descriptor_values
            .receive(&descriptor_key(&descriptor), &value);

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_update_descriptor_value(&peripheral, &descriptor, &value);
        }
    }

    fn did_write_value_for_descriptor(
        &self,
        descriptor: Descriptor,
        result: bluetooth_platform::Result<()>,
    ) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .descriptor_writes
            .receive(&descriptor_key(&descriptor), &result);

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_write_descriptor_value(&peripheral, &descriptor, &result);
        }
    }

    fn is_ready_to_send_write_without_response(&self) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::ReadyToSendWriteWithoutResponse);

        if let Some(delegate) = peripheral.delegate() {
            delegate.is_ready_to_send_write_without_response(&peripheral);
        }
    }

    fn did_open_l2cap_channel(&self, result: bluetooth_platform::Result<L2capChannel>) {
        let Some(peripheral) = self.peripheral() else {
            return;
        };

        let result = result.map_err(Error::from);
        peripheral
            .inner
            .events
            .receive(&PeripheralEvent::OpenedL2capChannel(result.clone()));

        if let Some(delegate) = peripheral.delegate() {
            delegate.did_open_l2cap_channel(&peripheral, &result);
        }
    }
}
