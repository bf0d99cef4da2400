//! The boundary between `bluetooth-async` and a platform Bluetooth LE stack.
//!
//! A platform integration implements [`CentralManagerBackend`] and [`PeripheralBackend`] to
//! accept requests, and reports their outcomes by calling the [`CentralManagerDelegate`] and
//! [`PeripheralDelegate`] it was given. Requests never block and callbacks may arrive on any
//! thread.
//!
//! GATT attributes cross the boundary as value snapshots ([`Service`], [`Characteristic`],
//! [`Descriptor`]) identified by their [`BluetoothUuid`].

pub mod advertisement_data;
mod central_manager;
mod characteristic;
mod descriptor;
pub mod error;
mod l2cap_channel;
mod peripheral;
mod service;

pub use btuuid::BluetoothUuid;
pub use central_manager::*;
pub use characteristic::*;
pub use descriptor::*;
pub use error::{Error, Result};
pub use l2cap_channel::*;
pub use peripheral::*;
pub use service::*;
