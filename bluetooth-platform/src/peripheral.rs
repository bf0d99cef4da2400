use std::sync::Arc;

use btuuid::BluetoothUuid;
use uuid::Uuid;

use crate::characteristic::{Characteristic, CharacteristicWriteType};
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::l2cap_channel::L2capChannel;
use crate::service::Service;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PeripheralState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Requests that can be issued to a remote peripheral through the platform stack.
///
/// Like [`CentralManagerBackend`][crate::CentralManagerBackend], requests return immediately and
/// report their outcome through the installed [`PeripheralDelegate`].
pub trait PeripheralBackend: Send + Sync + 'static {
    fn set_delegate(&self, delegate: Arc<dyn PeripheralDelegate>);

    /// The platform-assigned identifier of this peripheral. Stable for the lifetime of the
    /// central manager.
    fn identifier(&self) -> Uuid;

    fn name(&self) -> Option<String>;

    fn state(&self) -> PeripheralState;

    /// The services discovered so far, or `None` if discovery has not run.
    fn services(&self) -> Option<Vec<Service>>;

    fn discover_services(&self, services: Option<&[BluetoothUuid]>);

    fn discover_included_services(&self, service: &Service, services: Option<&[BluetoothUuid]>);

    fn discover_characteristics(
        &self,
        service: &Service,
        characteristics: Option<&[BluetoothUuid]>,
    );

    fn discover_descriptors(&self, characteristic: &Characteristic);

    fn read_characteristic_value(&self, characteristic: &Characteristic);

    fn read_descriptor_value(&self, descriptor: &Descriptor);

    fn write_characteristic_value(
        &self,
        characteristic: &Characteristic,
        data: Vec<u8>,
        write_type: CharacteristicWriteType,
    );

    fn write_descriptor_value(&self, descriptor: &Descriptor, data: Vec<u8>);

    fn set_notify(&self, characteristic: &Characteristic, notify: bool);

    fn max_write_value_len(&self, write_type: CharacteristicWriteType) -> usize;

    fn can_send_write_without_response(&self) -> bool;

    fn read_rssi(&self);

    fn open_l2cap_channel(&self, psm: u16);
}

/// Callbacks from a platform peripheral.
///
/// Value and notification-state callbacks carry a fresh snapshot of the characteristic or
/// descriptor they refer to.
#[allow(unused_variables)]
pub trait PeripheralDelegate: Send + Sync + 'static {
    fn did_update_name(&self, name: Option<String>) {}

    fn did_modify_services(&self, invalidated_services: Vec<Service>) {}

    fn did_read_rssi(&self, rssi: Result<i16>) {}

    fn did_discover_services(&self, result: Result<Vec<Service>>) {}

    fn did_discover_included_services(&self, service: Service, result: Result<Vec<Service>>) {}

    fn did_discover_characteristics(&self, service: Service, result: Result<Vec<Characteristic>>) {
    }

    fn did_update_value_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: Result<()>,
    ) {
    }

    fn did_write_value_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: Result<()>,
    ) {
    }

    fn did_update_notification_state_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: Result<()>,
    ) {
    }

    fn did_discover_descriptors_for_characteristic(
        &self,
        characteristic: Characteristic,
        result: Result<Vec<Descriptor>>,
    ) {
    }

    fn did_update_value_for_descriptor(&self, descriptor: Descriptor, result: Result<()>) {}

    fn did_write_value_for_descriptor(&self, descriptor: Descriptor, result: Result<()>) {}

    fn is_ready_to_send_write_without_response(&self) {}

    fn did_open_l2cap_channel(&self, result: Result<L2capChannel>) {}
}
