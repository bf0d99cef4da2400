use btuuid::BluetoothUuid;

/// The operations a characteristic supports (Bluetooth Core Specification Vol 3, Part G, §3.3.1.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties(pub u16);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A snapshot of a GATT characteristic as reported by the platform.
///
/// `value` holds the most recently read or notified value and `is_notifying` the notification
/// state at the time of the callback that produced this snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: BluetoothUuid,
    pub service_uuid: BluetoothUuid,
    pub properties: CharacteristicProperties,
    pub value: Option<Vec<u8>>,
    pub is_notifying: bool,
}

impl Characteristic {
    pub fn new(
        uuid: BluetoothUuid,
        service_uuid: BluetoothUuid,
        properties: CharacteristicProperties,
    ) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
            value: None,
            is_notifying: false,
        }
    }

    pub fn uuid(&self) -> BluetoothUuid {
        self.uuid.clone()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn is_notifying(&self) -> bool {
        self.is_notifying
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CharacteristicWriteType {
    WithResponse,
    WithoutResponse,
}
