use btuuid::BluetoothUuid;

/// A snapshot of a GATT descriptor as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: BluetoothUuid,
    pub characteristic_uuid: BluetoothUuid,
    /// The raw descriptor value. Numeric descriptors such as the Client Characteristic
    /// Configuration are little-endian; the Characteristic User Description is UTF-8.
    pub value: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn new(uuid: BluetoothUuid, characteristic_uuid: BluetoothUuid) -> Self {
        Self {
            uuid,
            characteristic_uuid,
            value: None,
        }
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid.clone()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}
