//! Completion-handler and `async` access to a callback-based Bluetooth LE central stack.
//!
//! A platform integration implements the backend traits of `bluetooth-platform`. This crate
//! wraps them in a [`CentralManager`] and [`Peripheral`]s whose operations can be awaited or
//! given a completion callback, and turns repeated events (discoveries, notifications,
//! disconnects) into streams. Any number of callers may wait on the same event at once.
//!
//! ```no_run
//! # async fn run(central: bluetooth_async::CentralManager) -> bluetooth_async::error::Result<()> {
//! use std::time::Duration;
//!
//! use bluetooth_async::ScanOptions;
//! use futures_lite::StreamExt;
//!
//! central.wait_until_ready(Some(Duration::from_secs(5))).await?;
//!
//! let mut scan = central.scan_for_peripherals(None, Some(Duration::from_secs(10)), ScanOptions::default());
//! while let Some(discovery) = scan.next().await {
//!     println!("{:?} {:?}", discovery.peripheral, discovery.advertisement_data.local_name);
//! }
//! # Ok(())
//! # }
//! ```

mod central_manager;
pub mod error;
mod event_stream;
mod notifying_tracker;
mod peripheral;
mod util;

pub use bluetooth_platform::{
    BluetoothUuid, CentralManagerOptions, Characteristic, CharacteristicProperties,
    CharacteristicWriteType, ConnectPeripheralOptions, ConnectionEvent, Descriptor, L2capChannel,
    ManagerAuthorization, ManagerState, PeripheralState, ScanOptions, Service, advertisement_data,
};
pub use central_manager::*;
pub use event_stream::EventStream;
pub use notifying_tracker::NotifyingTracker;
pub use peripheral::*;
pub use subscription_queue::CancelHandle;
