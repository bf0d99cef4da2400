use btuuid::BluetoothUuid;

/// A snapshot of a GATT service as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    pub uuid: BluetoothUuid,
    pub is_primary: bool,
}

impl Service {
    pub fn new(uuid: BluetoothUuid, is_primary: bool) -> Self {
        Self { uuid, is_primary }
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid.clone()
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }
}
