//! Asynchronous command/event bridge for a Bluetooth LE GATT client.
//!
//! Client operations submitted from arbitrary threads are executed serially
//! against an opaque protocol [`Engine`] on one dedicated dispatch thread.
//! The engine's asynchronous completion and notification events are decoded
//! into typed outcomes and delivered to a registered [`ClientCallbacks`]
//! table on a separate callback thread, so client code never runs on the
//! caller's or the engine's execution context.

pub use client::{ClientCallbacks, Error, EventSink, GattClient, NotifyRecord, ReadRecord, Result};
pub use engine::{DeviceCache, Engine, EngineEvent, Status};

pub mod client;
pub mod engine;
pub mod le;

pub(crate) type SyncMutex<T> = parking_lot::Mutex<T>;
pub(crate) type SyncRwLock<T> = parking_lot::RwLock<T>;
