//! An in-memory platform stack for the integration tests.
//!
//! Requests are recorded synchronously. Callbacks are delivered from a dedicated thread, one at
//! a time and in order, like a platform's callback queue.

#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::SystemTime;

use async_io::Async;
use bluetooth_async::advertisement_data::AdvertisementData;
use bluetooth_async::{
    BluetoothUuid, CentralManager, CentralManagerOptions, Characteristic,
    CharacteristicProperties, CharacteristicWriteType, ConnectPeripheralOptions, ConnectionEvent,
    Descriptor, L2capChannel, ManagerAuthorization, ManagerState, Peripheral, PeripheralState,
    ScanOptions, Service,
};
use bluetooth_platform::error::{BluetoothError, ErrorKind};
use bluetooth_platform::{
    CentralManagerBackend, CentralManagerDelegate, PeripheralBackend, PeripheralDelegate,
    RestoredState,
};
use futures_channel::{mpsc, oneshot};
use futures_lite::StreamExt;
use tracing::metadata::LevelFilter;
use uuid::Uuid;

pub const BATTERY_SERVICE: BluetoothUuid = BluetoothUuid::from_u16(0x180f);
pub const BATTERY_LEVEL: BluetoothUuid = BluetoothUuid::from_u16(0x2a19);
pub const HEART_RATE_SERVICE: BluetoothUuid = BluetoothUuid::from_u16(0x180d);
pub const HEART_RATE_MEASUREMENT: BluetoothUuid = BluetoothUuid::from_u16(0x2a37);
pub const CLIENT_CONFIGURATION: BluetoothUuid = BluetoothUuid::from_u16(0x2902);
pub const USER_DESCRIPTION: BluetoothUuid = BluetoothUuid::from_u16(0x2901);

pub fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

fn next_identifier() -> Uuid {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Uuid::from_u128(0x6e40_0000_b5a3_f393_e0a9_e50e_0000_0000 | u128::from(NEXT.fetch_add(1, Ordering::Relaxed)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

type Job = Box<dyn FnOnce() + Send>;

/// The callback thread shared by a central and its peripherals.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    fn new() -> Self {
        let (jobs, mut receiver) = mpsc::unbounded::<Job>();
        thread::Builder::new()
            .name("mock-bluetooth".into())
            .spawn(move || {
                async_io::block_on(async move {
                    while let Some(job) = receiver.next().await {
                        job();
                    }
                })
            })
            .unwrap();
        Self { jobs }
    }

    fn run(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.jobs.unbounded_send(Box::new(job));
    }

    /// Waits until every callback dispatched so far has been delivered.
    pub async fn settle(&self) {
        let (sender, receiver) = oneshot::channel();
        self.run(move || {
            let _ = sender.send(());
        });
        let _ = receiver.await;
    }
}

pub struct MockCentral {
    me: Weak<MockCentral>,
    dispatcher: Dispatcher,
    options: CentralManagerOptions,
    delegate: Mutex<Option<Arc<dyn CentralManagerDelegate>>>,
    sim: Mutex<CentralSim>,
}

#[derive(Default)]
struct CentralSim {
    state: ManagerState,
    scan: Option<(Option<Vec<BluetoothUuid>>, ScanOptions)>,
    scan_stops: usize,
    peripherals: Vec<Arc<MockPeripheral>>,
    cancelled: Vec<Uuid>,
    connect_options: Vec<ConnectPeripheralOptions>,
    connection_event_registrations: usize,
}

impl MockCentral {
    pub fn new(state: ManagerState) -> Arc<Self> {
        Self::with_options(state, CentralManagerOptions::default())
    }

    pub fn with_options(state: ManagerState, options: CentralManagerOptions) -> Arc<Self> {
        Arc::new_cyclic(|me| MockCentral {
            me: me.clone(),
            dispatcher: Dispatcher::new(),
            options,
            delegate: Mutex::new(None),
            sim: Mutex::new(CentralSim {
                state,
                ..CentralSim::default()
            }),
        })
    }

    /// A powered-on central wrapped in a façade.
    pub fn start() -> (Arc<Self>, CentralManager) {
        init_tracing();
        let mock = Self::new(ManagerState::PoweredOn);
        let central = CentralManager::new(mock.clone());
        (mock, central)
    }

    pub async fn settle(&self) {
        self.dispatcher.settle().await;
    }

    fn dispatch(&self, f: impl FnOnce(&dyn CentralManagerDelegate) + Send + 'static) {
        let me = self.me.clone();
        self.dispatcher.run(move || {
            let Some(me) = me.upgrade() else {
                return;
            };
            let delegate = lock(&me.delegate).clone();
            if let Some(delegate) = delegate {
                f(&*delegate);
            }
        });
    }

    pub fn set_state(&self, state: ManagerState) {
        lock(&self.sim).state = state;
        self.dispatch(move |delegate| delegate.did_update_state(state));
    }

    pub fn add_peripheral(&self, name: &str) -> Arc<MockPeripheral> {
        let peripheral = Arc::new_cyclic(|me| MockPeripheral {
            me: me.clone(),
            central: self.me.clone(),
            dispatcher: self.dispatcher.clone(),
            identifier: next_identifier(),
            delegate: Mutex::new(None),
            sim: Mutex::new(PeripheralSim {
                name: Some(name.to_owned()),
                reachable: true,
                responsive: true,
                ..PeripheralSim::default()
            }),
        });
        lock(&self.sim).peripherals.push(peripheral.clone());
        peripheral
    }

    fn find(&self, identifier: Uuid) -> Option<Arc<MockPeripheral>> {
        lock(&self.sim)
            .peripherals
            .iter()
            .find(|peripheral| peripheral.identifier == identifier)
            .cloned()
    }

    /// Reports an advertisement if a scan that would see it is running.
    pub fn advertise(&self, peripheral: &Arc<MockPeripheral>, advertisement_data: AdvertisementData) {
        let visible = match &lock(&self.sim).scan {
            Some((None, _)) => true,
            Some((Some(services), _)) => advertisement_data.advertises_any(services),
            None => false,
        };

        if visible {
            let peripheral: Arc<dyn PeripheralBackend> = peripheral.clone();
            self.dispatch(move |delegate| delegate.did_discover(peripheral, advertisement_data, -60));
        }
    }

    pub fn connection_event(&self, peripheral: &Arc<MockPeripheral>, event: ConnectionEvent) {
        let peripheral: Arc<dyn PeripheralBackend> = peripheral.clone();
        self.dispatch(move |delegate| delegate.on_connection_event(event, peripheral));
    }

    pub fn scan_configuration(&self) -> Option<(Option<Vec<BluetoothUuid>>, ScanOptions)> {
        lock(&self.sim).scan.clone()
    }

    /// How many times the platform was asked to stop scanning.
    pub fn scan_stops(&self) -> usize {
        lock(&self.sim).scan_stops
    }

    pub fn cancelled_connections(&self) -> Vec<Uuid> {
        lock(&self.sim).cancelled.clone()
    }

    pub fn connection_event_registrations(&self) -> usize {
        lock(&self.sim).connection_event_registrations
    }

    pub fn connect_options(&self) -> Vec<ConnectPeripheralOptions> {
        lock(&self.sim).connect_options.clone()
    }

    fn disconnected(
        &self,
        peripheral: Arc<MockPeripheral>,
        error: Option<bluetooth_platform::Error>,
    ) {
        self.dispatch(move |delegate| {
            delegate.did_disconnect(peripheral, Some(SystemTime::now()), false, error)
        });
    }
}

impl CentralManagerBackend for MockCentral {
    fn set_delegate(&self, delegate: Arc<dyn CentralManagerDelegate>) {
        *lock(&self.delegate) = Some(delegate);

        if self.options.restore_identifier.is_some() {
            let connected: Vec<Arc<dyn PeripheralBackend>> = lock(&self.sim)
                .peripherals
                .iter()
                .filter(|peripheral| peripheral.state() == PeripheralState::Connected)
                .map(|peripheral| -> Arc<dyn PeripheralBackend> { peripheral.clone() })
                .collect();
            self.dispatch(move |delegate| {
                delegate.will_restore_state(RestoredState {
                    peripherals: connected,
                    scan_services: None,
                    scan_options: None,
                })
            });
        }

        let state = lock(&self.sim).state;
        self.dispatch(move |delegate| delegate.did_update_state(state));
    }

    fn state(&self) -> ManagerState {
        lock(&self.sim).state
    }

    fn authorization(&self) -> ManagerAuthorization {
        match lock(&self.sim).state {
            ManagerState::Unauthorized => ManagerAuthorization::Denied,
            _ => ManagerAuthorization::AllowedAlways,
        }
    }

    fn is_scanning(&self) -> bool {
        lock(&self.sim).scan.is_some()
    }

    fn scan(&self, services: Option<&[BluetoothUuid]>, options: &ScanOptions) {
        lock(&self.sim).scan = Some((services.map(<[BluetoothUuid]>::to_vec), options.clone()));
    }

    fn stop_scan(&self) {
        let mut sim = lock(&self.sim);
        sim.scan = None;
        sim.scan_stops += 1;
    }

    fn connect(&self, peripheral: &dyn PeripheralBackend, options: &ConnectPeripheralOptions) {
        lock(&self.sim).connect_options.push(*options);
        let Some(peripheral) = self.find(peripheral.identifier()) else {
            return;
        };

        let reachable = {
            let mut sim = lock(&peripheral.sim);
            sim.connection = PeripheralState::Connecting;
            sim.reachable
        };

        if reachable {
            self.dispatch(move |delegate| {
                lock(&peripheral.sim).connection = PeripheralState::Connected;
                delegate.did_connect(peripheral);
            });
        }
    }

    fn cancel_peripheral_connection(&self, peripheral: &dyn PeripheralBackend) {
        lock(&self.sim).cancelled.push(peripheral.identifier());
        let Some(peripheral) = self.find(peripheral.identifier()) else {
            return;
        };

        let was = std::mem::replace(
            &mut lock(&peripheral.sim).connection,
            PeripheralState::Disconnected,
        );
        if was == PeripheralState::Connected {
            peripheral.reset_notifications();
            self.disconnected(peripheral, None);
        }
    }

    fn retrieve_peripherals(&self, identifiers: &[Uuid]) -> Vec<Arc<dyn PeripheralBackend>> {
        lock(&self.sim)
            .peripherals
            .iter()
            .filter(|peripheral| identifiers.contains(&peripheral.identifier))
            .map(|peripheral| -> Arc<dyn PeripheralBackend> { peripheral.clone() })
            .collect()
    }

    fn retrieve_connected_peripherals(
        &self,
        services: &[BluetoothUuid],
    ) -> Vec<Arc<dyn PeripheralBackend>> {
        lock(&self.sim)
            .peripherals
            .iter()
            .filter(|peripheral| {
                let sim = lock(&peripheral.sim);
                sim.connection == PeripheralState::Connected
                    && sim
                        .services
                        .iter()
                        .any(|service| services.contains(&service.uuid))
            })
            .map(|peripheral| -> Arc<dyn PeripheralBackend> { peripheral.clone() })
            .collect()
    }

    fn register_for_connection_events(
        &self,
        _peripherals: Option<&[Uuid]>,
        _services: Option<&[BluetoothUuid]>,
    ) {
        lock(&self.sim).connection_event_registrations += 1;
    }
}

pub struct MockPeripheral {
    me: Weak<MockPeripheral>,
    central: Weak<MockCentral>,
    dispatcher: Dispatcher,
    identifier: Uuid,
    delegate: Mutex<Option<Arc<dyn PeripheralDelegate>>>,
    sim: Mutex<PeripheralSim>,
}

#[derive(Default)]
struct PeripheralSim {
    name: Option<String>,
    reachable: bool,
    responsive: bool,
    connection: PeripheralState,
    services: Vec<Service>,
    characteristics: Vec<Characteristic>,
    descriptors: Vec<Descriptor>,
    notify_requests: Vec<(BluetoothUuid, bool)>,
    l2cap_peers: Vec<UnixStream>,
}

impl PeripheralSim {
    fn characteristic(&mut self, uuid: &BluetoothUuid) -> Option<&mut Characteristic> {
        self.characteristics
            .iter_mut()
            .find(|characteristic| &characteristic.uuid == uuid)
    }

    fn descriptor(&mut self, descriptor: &Descriptor) -> Option<&mut Descriptor> {
        self.descriptors.iter_mut().find(|known| {
            known.uuid == descriptor.uuid
                && known.characteristic_uuid == descriptor.characteristic_uuid
        })
    }
}

impl MockPeripheral {
    pub fn id(&self) -> Uuid {
        self.identifier
    }

    pub fn add_service(
        &self,
        service: BluetoothUuid,
        characteristics: &[(BluetoothUuid, CharacteristicProperties)],
    ) {
        let mut sim = lock(&self.sim);
        sim.services.push(Service::new(service.clone(), true));
        for (uuid, properties) in characteristics {
            sim.characteristics.push(Characteristic::new(
                uuid.clone(),
                service.clone(),
                *properties,
            ));
        }
    }

    pub fn add_descriptor(&self, characteristic: BluetoothUuid, uuid: BluetoothUuid, value: &[u8]) {
        let mut descriptor = Descriptor::new(uuid, characteristic);
        descriptor.value = Some(value.to_vec());
        lock(&self.sim).descriptors.push(descriptor);
    }

    pub fn set_value(&self, characteristic: &BluetoothUuid, value: &[u8]) {
        if let Some(characteristic) = lock(&self.sim).characteristic(characteristic) {
            characteristic.value = Some(value.to_vec());
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.sim).reachable = reachable;
    }

    /// An unresponsive peripheral accepts requests but never answers them.
    pub fn set_responsive(&self, responsive: bool) {
        lock(&self.sim).responsive = responsive;
    }

    /// Marks the peripheral connected without going through a central, as after a relaunch.
    pub fn force_connected(&self) {
        lock(&self.sim).connection = PeripheralState::Connected;
    }

    pub fn value(&self, characteristic: &BluetoothUuid) -> Option<Vec<u8>> {
        lock(&self.sim)
            .characteristic(characteristic)
            .and_then(|characteristic| characteristic.value.clone())
    }

    pub fn descriptor_value(&self, characteristic: &BluetoothUuid, uuid: &BluetoothUuid) -> Option<Vec<u8>> {
        lock(&self.sim)
            .descriptor(&Descriptor::new(uuid.clone(), characteristic.clone()))
            .and_then(|descriptor| descriptor.value.clone())
    }

    /// Whether the platform currently has notifications enabled for `characteristic`.
    pub fn is_notifying(&self, characteristic: &BluetoothUuid) -> bool {
        lock(&self.sim)
            .characteristic(characteristic)
            .is_some_and(|characteristic| characteristic.is_notifying)
    }

    pub fn notify_requests(&self, characteristic: &BluetoothUuid) -> Vec<bool> {
        lock(&self.sim)
            .notify_requests
            .iter()
            .filter(|(uuid, _)| uuid == characteristic)
            .map(|(_, notify)| *notify)
            .collect()
    }

    pub fn take_l2cap_peer(&self) -> Option<UnixStream> {
        lock(&self.sim).l2cap_peers.pop()
    }

    /// Pushes a new value for a notifying characteristic.
    pub fn notify(&self, characteristic: &BluetoothUuid, value: &[u8]) {
        let snapshot = {
            let mut sim = lock(&self.sim);
            let Some(characteristic) = sim.characteristic(characteristic) else {
                return;
            };
            characteristic.value = Some(value.to_vec());
            characteristic.clone()
        };
        self.dispatch(move |_, delegate| {
            delegate.did_update_value_for_characteristic(snapshot, Ok(()))
        });
    }

    /// Turns notifications off from the peripheral's side.
    pub fn drop_notifications(&self, characteristic: &BluetoothUuid) {
        let snapshot = {
            let mut sim = lock(&self.sim);
            let Some(characteristic) = sim.characteristic(characteristic) else {
                return;
            };
            characteristic.is_notifying = false;
            characteristic.clone()
        };
        self.dispatch(move |_, delegate| {
            delegate.did_update_notification_state_for_characteristic(snapshot, Ok(()))
        });
    }

    pub fn rename(&self, name: &str) {
        let name = name.to_owned();
        lock(&self.sim).name = Some(name.clone());
        self.dispatch(move |_, delegate| delegate.did_update_name(Some(name)));
    }

    pub fn invalidate_service(&self, service: &BluetoothUuid) {
        let invalidated = {
            let mut sim = lock(&self.sim);
            sim.services.retain(|known| &known.uuid != service);
            sim.characteristics
                .retain(|characteristic| &characteristic.service_uuid != service);
            vec![Service::new(service.clone(), true)]
        };
        self.dispatch(move |_, delegate| delegate.did_modify_services(invalidated));
    }

    /// Drops the link as if the peripheral went out of range.
    pub fn simulate_disconnection(&self) {
        lock(&self.sim).connection = PeripheralState::Disconnected;
        self.reset_notifications();

        if let (Some(central), Some(me)) = (self.central.upgrade(), self.me.upgrade()) {
            central.disconnected(
                me,
                Some(bluetooth_platform::Error::new(
                    ErrorKind::Bluetooth(BluetoothError::PERIPHERAL_DISCONNECTED),
                    "the peripheral disconnected",
                )),
            );
        }
    }

    fn reset_notifications(&self) {
        for characteristic in &mut lock(&self.sim).characteristics {
            characteristic.is_notifying = false;
        }
    }

    fn dispatch(&self, f: impl FnOnce(&MockPeripheral, &dyn PeripheralDelegate) + Send + 'static) {
        let me = self.me.clone();
        self.dispatcher.run(move || {
            let Some(me) = me.upgrade() else {
                return;
            };
            let delegate = lock(&me.delegate).clone();
            if let Some(delegate) = delegate {
                f(&me, &*delegate);
            }
        });
    }

    /// Dispatches `f` only if the peripheral answers requests.
    fn respond(&self, f: impl FnOnce(&MockPeripheral, &dyn PeripheralDelegate) + Send + 'static) {
        if lock(&self.sim).responsive {
            self.dispatch(f);
        }
    }
}

fn not_found() -> bluetooth_platform::Error {
    bluetooth_platform::Error::from(bluetooth_platform::error::AttError::ATTRIBUTE_NOT_FOUND)
}

impl PeripheralBackend for MockPeripheral {
    fn set_delegate(&self, delegate: Arc<dyn PeripheralDelegate>) {
        *lock(&self.delegate) = Some(delegate);
    }

    fn identifier(&self) -> Uuid {
        self.identifier
    }

    fn name(&self) -> Option<String> {
        lock(&self.sim).name.clone()
    }

    fn state(&self) -> PeripheralState {
        lock(&self.sim).connection
    }

    fn services(&self) -> Option<Vec<Service>> {
        let sim = lock(&self.sim);
        (!sim.services.is_empty()).then(|| sim.services.clone())
    }

    fn discover_services(&self, services: Option<&[BluetoothUuid]>) {
        let services = services.map(<[BluetoothUuid]>::to_vec);
        self.respond(move |me, delegate| {
            let found = lock(&me.sim)
                .services
                .iter()
                .filter(|service| {
                    services
                        .as_ref()
                        .is_none_or(|wanted| wanted.contains(&service.uuid))
                })
                .cloned()
                .collect();
            delegate.did_discover_services(Ok(found));
        });
    }

    fn discover_included_services(&self, service: &Service, _services: Option<&[BluetoothUuid]>) {
        let service = service.clone();
        self.respond(move |_, delegate| delegate.did_discover_included_services(service, Ok(Vec::new())));
    }

    fn discover_characteristics(
        &self,
        service: &Service,
        characteristics: Option<&[BluetoothUuid]>,
    ) {
        let service = service.clone();
        let characteristics = characteristics.map(<[BluetoothUuid]>::to_vec);
        self.respond(move |me, delegate| {
            let found = lock(&me.sim)
                .characteristics
                .iter()
                .filter(|characteristic| {
                    characteristic.service_uuid == service.uuid
                        && characteristics
                            .as_ref()
                            .is_none_or(|wanted| wanted.contains(&characteristic.uuid))
                })
                .cloned()
                .collect();
            delegate.did_discover_characteristics(service, Ok(found));
        });
    }

    fn discover_descriptors(&self, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        self.respond(move |me, delegate| {
            let found = lock(&me.sim)
                .descriptors
                .iter()
                .filter(|descriptor| descriptor.characteristic_uuid == characteristic.uuid)
                .cloned()
                .collect();
            delegate.did_discover_descriptors_for_characteristic(characteristic, Ok(found));
        });
    }

    fn read_characteristic_value(&self, characteristic: &Characteristic) {
        let requested = characteristic.clone();
        self.respond(move |me, delegate| {
            let snapshot = lock(&me.sim).characteristic(&requested.uuid).cloned();
            match snapshot {
                Some(snapshot) => delegate.did_update_value_for_characteristic(snapshot, Ok(())),
                None => delegate.did_update_value_for_characteristic(requested, Err(not_found())),
            }
        });
    }

    fn read_descriptor_value(&self, descriptor: &Descriptor) {
        let requested = descriptor.clone();
        self.respond(move |me, delegate| {
            let snapshot = lock(&me.sim).descriptor(&requested).cloned();
            match snapshot {
                Some(snapshot) => delegate.did_update_value_for_descriptor(snapshot, Ok(())),
                None => delegate.did_update_value_for_descriptor(requested, Err(not_found())),
            }
        });
    }

    fn write_characteristic_value(
        &self,
        characteristic: &Characteristic,
        data: Vec<u8>,
        write_type: CharacteristicWriteType,
    ) {
        let snapshot = {
            let mut sim = lock(&self.sim);
            let Some(stored) = sim.characteristic(&characteristic.uuid) else {
                return;
            };
            stored.value = Some(data);
            stored.clone()
        };

        if write_type == CharacteristicWriteType::WithResponse {
            self.respond(move |_, delegate| {
                delegate.did_write_value_for_characteristic(snapshot, Ok(()))
            });
        }
    }

    fn write_descriptor_value(&self, descriptor: &Descriptor, data: Vec<u8>) {
        let snapshot = {
            let mut sim = lock(&self.sim);
            let Some(stored) = sim.descriptor(descriptor) else {
                return;
            };
            stored.value = Some(data);
            stored.clone()
        };
        self.respond(move |_, delegate| delegate.did_write_value_for_descriptor(snapshot, Ok(())));
    }

    fn set_notify(&self, characteristic: &Characteristic, notify: bool) {
        let snapshot = {
            let mut sim = lock(&self.sim);
            sim.notify_requests.push((characteristic.uuid.clone(), notify));
            let Some(stored) = sim.characteristic(&characteristic.uuid) else {
                return;
            };
            stored.is_notifying = notify;
            stored.clone()
        };
        self.respond(move |_, delegate| {
            delegate.did_update_notification_state_for_characteristic(snapshot, Ok(()))
        });
    }

    fn max_write_value_len(&self, write_type: CharacteristicWriteType) -> usize {
        match write_type {
            CharacteristicWriteType::WithResponse => 512,
            CharacteristicWriteType::WithoutResponse => 182,
        }
    }

    fn can_send_write_without_response(&self) -> bool {
        true
    }

    fn read_rssi(&self) {
        self.respond(|_, delegate| delegate.did_read_rssi(Ok(-42)));
    }

    fn open_l2cap_channel(&self, psm: u16) {
        let result = match UnixStream::pair().and_then(|(local, remote)| {
            Ok((Async::new(local)?, remote))
        }) {
            Ok((local, remote)) => {
                lock(&self.sim).l2cap_peers.push(remote);
                Ok(L2capChannel::new(psm, self.identifier, local))
            }
            Err(error) => Err(bluetooth_platform::Error::new(
                ErrorKind::Other,
                error.to_string(),
            )),
        };
        self.respond(move |_, delegate| delegate.did_open_l2cap_channel(result));
    }
}

/// Connects to a peripheral exposing the battery and heart rate services and discovers
/// everything on it.
pub async fn connected_peripheral() -> (Arc<MockCentral>, CentralManager, Arc<MockPeripheral>, Peripheral) {
    let (mock, central) = MockCentral::start();
    let device = mock.add_peripheral("sensor");
    device.add_service(
        BATTERY_SERVICE,
        &[(
            BATTERY_LEVEL,
            CharacteristicProperties::READ | CharacteristicProperties::WRITE,
        )],
    );
    device.add_service(
        HEART_RATE_SERVICE,
        &[(
            HEART_RATE_MEASUREMENT,
            CharacteristicProperties::NOTIFY,
        )],
    );
    device.add_descriptor(HEART_RATE_MEASUREMENT, CLIENT_CONFIGURATION, &[0x00, 0x00]);
    device.add_descriptor(HEART_RATE_MEASUREMENT, USER_DESCRIPTION, b"Heart Rate");
    device.set_value(&BATTERY_LEVEL, &[87]);

    let peripheral = central
        .retrieve_peripherals(&[device.id()])
        .pop()
        .unwrap();
    central
        .connect(&peripheral, None, ConnectPeripheralOptions::default())
        .await
        .unwrap();

    for service in peripheral.discover_services(None).await.unwrap() {
        peripheral
            .discover_characteristics(None, &service)
            .await
            .unwrap();
    }

    (mock, central, device, peripheral)
}
