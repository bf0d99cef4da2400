use std::collections::HashMap;

use btuuid::BluetoothUuid;
use tracing::debug;

/// Data included in a Bluetooth advertisement or scan reponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    /// The (possibly shortened) local name of the device (CSS §A.1.2)
    pub local_name: Option<String>,
    /// Manufacturer specific data (CSS §A.1.4)
    pub manufacturer_data: Option<ManufacturerData>,
    /// Service associated data (CSS §A.1.11)
    pub service_data: HashMap<BluetoothUuid, Vec<u8>>,
    /// Advertised GATT service UUIDs (CSS §A.1.1)
    pub service_uuids: Vec<BluetoothUuid>,
    pub overflow_service_uuids: Vec<BluetoothUuid>,
    /// Transmitted power level (CSS §A.1.5)
    pub tx_power_level: Option<i16>,
    /// Set to true for connectable advertising packets
    pub is_connectable: bool,
    /// Solicited GATT service UUIDs (CSS §A.1.10)
    pub solicited_service_uuids: Vec<BluetoothUuid>,
}

/// Manufacturer specific data included in Bluetooth advertisements. See the Bluetooth Core Specification Supplement
/// §A.1.4 for details.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManufacturerData {
    /// Company identifier (defined [here](https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers/))
    pub company_id: u16,
    /// Manufacturer specific data
    pub data: Vec<u8>,
}

mod ad_type {
    pub const INCOMPLETE_UUID16: u8 = 0x02;
    pub const COMPLETE_UUID16: u8 = 0x03;
    pub const INCOMPLETE_UUID32: u8 = 0x04;
    pub const COMPLETE_UUID32: u8 = 0x05;
    pub const INCOMPLETE_UUID128: u8 = 0x06;
    pub const COMPLETE_UUID128: u8 = 0x07;
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    pub const TX_POWER_LEVEL: u8 = 0x0a;
    pub const SOLICITED_UUID16: u8 = 0x14;
    pub const SOLICITED_UUID128: u8 = 0x15;
    pub const SERVICE_DATA_UUID16: u8 = 0x16;
    pub const SOLICITED_UUID32: u8 = 0x1f;
    pub const SERVICE_DATA_UUID32: u8 = 0x20;
    pub const SERVICE_DATA_UUID128: u8 = 0x21;
    pub const MANUFACTURER_DATA: u8 = 0xff;
}

impl AdvertisementData {
    /// Parses the AD structures of a raw advertising or scan response payload (CSS Part A).
    ///
    /// Unknown AD types are ignored. Parsing stops at the first truncated structure; anything
    /// decoded before it is kept.
    pub fn from_raw(payload: &[u8], is_connectable: bool) -> Self {
        let mut data = AdvertisementData {
            is_connectable,
            ..Default::default()
        };

        let mut rest = payload;
        while let Some((&len, tail)) = rest.split_first() {
            let len = usize::from(len);
            if len == 0 {
                // Early termination padding
                break;
            }
            if tail.len() < len {
                debug!(len, remaining = tail.len(), "truncated advertising data structure");
                break;
            }

            let (structure, tail) = tail.split_at(len);
            rest = tail;
            if let Some((&ty, value)) = structure.split_first() {
                data.apply(ty, value);
            }
        }

        data
    }

    fn apply(&mut self, ty: u8, value: &[u8]) {
        match ty {
            ad_type::INCOMPLETE_UUID16 | ad_type::COMPLETE_UUID16 => {
                self.service_uuids.extend(uuids(value, 2))
            }
            ad_type::INCOMPLETE_UUID32 | ad_type::COMPLETE_UUID32 => {
                self.service_uuids.extend(uuids(value, 4))
            }
            ad_type::INCOMPLETE_UUID128 | ad_type::COMPLETE_UUID128 => {
                self.service_uuids.extend(uuids(value, 16))
            }
            ad_type::SOLICITED_UUID16 => self.solicited_service_uuids.extend(uuids(value, 2)),
            ad_type::SOLICITED_UUID32 => self.solicited_service_uuids.extend(uuids(value, 4)),
            ad_type::SOLICITED_UUID128 => self.solicited_service_uuids.extend(uuids(value, 16)),
            ad_type::SHORTENED_LOCAL_NAME | ad_type::COMPLETE_LOCAL_NAME => {
                // A complete name wins over a shortened one.
                if ty == ad_type::COMPLETE_LOCAL_NAME || self.local_name.is_none() {
                    self.local_name = Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            ad_type::TX_POWER_LEVEL => {
                if let Some(&level) = value.first() {
                    self.tx_power_level = Some(i16::from(level as i8));
                }
            }
            ad_type::SERVICE_DATA_UUID16 => self.insert_service_data(value, 2),
            ad_type::SERVICE_DATA_UUID32 => self.insert_service_data(value, 4),
            ad_type::SERVICE_DATA_UUID128 => self.insert_service_data(value, 16),
            ad_type::MANUFACTURER_DATA => {
                if let [lo, hi, data @ ..] = value {
                    self.manufacturer_data = Some(ManufacturerData {
                        company_id: u16::from_le_bytes([*lo, *hi]),
                        data: data.to_vec(),
                    });
                }
            }
            _ => (),
        }
    }

    fn insert_service_data(&mut self, value: &[u8], uuid_len: usize) {
        if value.len() >= uuid_len {
            let (uuid, data) = value.split_at(uuid_len);
            if let Ok(uuid) = BluetoothUuid::from_le_slice(uuid) {
                self.service_data.insert(uuid, data.to_vec());
            }
        }
    }

    /// Returns `true` if any of `services` is advertised, either in the service UUID lists or as
    /// the key of a service data entry.
    pub fn advertises_any(&self, services: &[BluetoothUuid]) -> bool {
        services.iter().any(|service| {
            self.service_uuids.contains(service)
                || self.overflow_service_uuids.contains(service)
                || self.service_data.contains_key(service)
        })
    }
}

fn uuids(value: &[u8], uuid_len: usize) -> impl Iterator<Item = BluetoothUuid> + '_ {
    value
        .chunks_exact(uuid_len)
        .filter_map(|bytes| BluetoothUuid::from_le_slice(bytes).ok())
}
