//! The central role: the platform manager that scans for, connects to and tracks peripherals.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use btuuid::BluetoothUuid;
use uuid::Uuid;

use crate::advertisement_data::AdvertisementData;
use crate::error::Error;
use crate::peripheral::PeripheralBackend;

/// The power and availability state of the local adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ManagerState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Whether the application is allowed to use Bluetooth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ManagerAuthorization {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AllowedAlways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    PeerDisconnected,
    PeerConnected,
}

/// Options for creating a platform central manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralManagerOptions {
    /// Whether the platform should warn the user if Bluetooth is powered off.
    pub show_power_alert: bool,
    /// Identifies the manager across application launches so that its state can be restored.
    pub restore_identifier: Option<String>,
}

impl CentralManagerOptions {
    pub fn show_power_alert(mut self, show_power_alert: bool) -> Self {
        self.show_power_alert = show_power_alert;
        self
    }

    pub fn restore_identifier(mut self, restore_identifier: impl Into<String>) -> Self {
        self.restore_identifier = Some(restore_identifier.into());
        self
    }
}

/// Options for scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Report every advertisement instead of coalescing repeated discoveries of a peripheral.
    pub allow_duplicates: bool,
    /// Also discover peripherals soliciting any of these services.
    pub solicited_services: Option<Vec<BluetoothUuid>>,
}

impl ScanOptions {
    pub fn allow_duplicates(mut self, allow_duplicates: bool) -> Self {
        self.allow_duplicates = allow_duplicates;
        self
    }

    pub fn solicited_services(mut self, services: impl Into<Vec<BluetoothUuid>>) -> Self {
        self.solicited_services = Some(services.into());
        self
    }
}

/// Options for connecting to a peripheral.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct ConnectPeripheralOptions {
    /// Whether to automatically reconnect to the peripheral when it is available.
    pub enable_auto_reconnect: bool,
    /// Whether to enable transport bridging.
    pub enable_transport_bridging: bool,
    /// Whether to notify on connection.
    pub notify_on_connection: bool,
    /// Whether to notify on disconnection.
    pub notify_on_disconnection: bool,
    /// Whether to notify on notification.
    pub notify_on_notification: bool,
    /// Whether ANCS is required.
    pub requires_ancs: bool,
    /// The delay before starting the connection.
    pub start_delay: Option<Duration>,
}

/// State handed back by the platform when it relaunches an application that had an active
/// central manager.
#[derive(Clone, Default)]
pub struct RestoredState {
    /// Peripherals that were connected or pending connection.
    pub peripherals: Vec<Arc<dyn PeripheralBackend>>,
    /// The services being scanned for, if a scan was active.
    pub scan_services: Option<Vec<BluetoothUuid>>,
    pub scan_options: Option<ScanOptions>,
}

impl std::fmt::Debug for RestoredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoredState")
            .field(
                "peripherals",
                &self
                    .peripherals
                    .iter()
                    .map(|peripheral| peripheral.identifier())
                    .collect::<Vec<_>>(),
            )
            .field("scan_services", &self.scan_services)
            .field("scan_options", &self.scan_options)
            .finish()
    }
}

/// Requests that can be issued to a platform central manager.
///
/// Requests return immediately. Their outcomes are reported through the
/// [`CentralManagerDelegate`] installed with [`set_delegate()`][Self::set_delegate], on a
/// context owned by the platform.
pub trait CentralManagerBackend: Send + Sync + 'static {
    /// Installs the delegate that receives this manager's callbacks.
    fn set_delegate(&self, delegate: Arc<dyn CentralManagerDelegate>);

    fn state(&self) -> ManagerState;

    fn authorization(&self) -> ManagerAuthorization;

    fn is_scanning(&self) -> bool;

    /// Starts scanning, replacing any scan in progress.
    ///
    /// `services` of `None` discovers every advertising peripheral.
    fn scan(&self, services: Option<&[BluetoothUuid]>, options: &ScanOptions);

    fn stop_scan(&self);

    fn connect(&self, peripheral: &dyn PeripheralBackend, options: &ConnectPeripheralOptions);

    /// Cancels an active or pending connection.
    fn cancel_peripheral_connection(&self, peripheral: &dyn PeripheralBackend);

    /// Returns the known peripherals with the given identifiers.
    fn retrieve_peripherals(&self, identifiers: &[Uuid]) -> Vec<Arc<dyn PeripheralBackend>>;

    /// Returns the peripherals connected to the system that expose any of `services`.
    fn retrieve_connected_peripherals(
        &self,
        services: &[BluetoothUuid],
    ) -> Vec<Arc<dyn PeripheralBackend>>;

    fn register_for_connection_events(
        &self,
        peripherals: Option<&[Uuid]>,
        services: Option<&[BluetoothUuid]>,
    );
}

/// Callbacks from a platform central manager.
#[allow(unused_variables)]
pub trait CentralManagerDelegate: Send + Sync + 'static {
    fn did_update_state(&self, state: ManagerState);

    fn will_restore_state(&self, state: RestoredState) {}

    fn did_discover(
        &self,
        peripheral: Arc<dyn PeripheralBackend>,
        advertisement_data: AdvertisementData,
        rssi: i16,
    ) {
    }

    fn did_connect(&self, peripheral: Arc<dyn PeripheralBackend>) {}

    fn did_fail_to_connect(&self, peripheral: Arc<dyn PeripheralBackend>, error: Error) {}

    fn did_disconnect(
        &self,
        peripheral: Arc<dyn PeripheralBackend>,
        timestamp: Option<SystemTime>,
        is_reconnecting: bool,
        error: Option<Error>,
    ) {
    }

    fn on_connection_event(&self, event: ConnectionEvent, peripheral: Arc<dyn PeripheralBackend>) {}
}
