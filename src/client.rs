//! GATT client command/event bridge.
//!
//! [`GattClient`] is the public entry point. Every operation performs a
//! synchronous readiness check, then enqueues a task that owns copies of its
//! buffers and addresses onto the single dispatch thread. The return value
//! describes only whether the task was accepted, never whether it has run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{
    AppId, AuthReq, ConnId, ConnParams, ControllerFeatures, DeviceCache, DeviceKind, Engine,
    EngineEvent, Status, Transport, Uuid, WriteType, MAX_ATTR_LEN,
};
use crate::le::{AddrType, RawAddr};
use crate::{SyncMutex, SyncRwLock};

pub use bridge::{ClientCallbacks, NotifyRecord, ReadRecord};
use bridge::{Bridge, Outcome};
use dispatch::Dispatcher;

mod bridge;
mod dispatch;
mod event;


/// Error type returned by the client bridge.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The client callback table is not registered. Nothing was queued and
    /// no engine call was made.
    #[error("client callbacks not registered")]
    NotReady,
    /// The dispatch thread is shut down.
    #[error("command dispatcher is closed")]
    Closed,
}

/// Common result type for enqueue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Command/event bridge for a single GATT client engine.
pub struct GattClient<E: Engine> {
    dispatch: Dispatcher,
    shared: Arc<Shared<E>>,
}

/// State reachable from queued tasks, completion closures, and the event
/// decoder.
struct Shared<E> {
    engine: E,
    devices: Arc<dyn DeviceCache>,
    registry: Registry,
    callbacks: Arc<SyncRwLock<Option<Arc<dyn ClientCallbacks>>>>,
    bridge: Bridge,
}

impl<E: Engine> GattClient<E> {
    /// Creates a bridge around `engine`, using `devices` for transport and
    /// privacy decisions. Spawns the dispatch and callback threads.
    #[must_use]
    pub fn new(engine: E, devices: Arc<dyn DeviceCache>) -> Self {
        let callbacks: Arc<SyncRwLock<Option<Arc<dyn ClientCallbacks>>>> =
            Arc::new(SyncRwLock::new(None));
        Self {
            dispatch: Dispatcher::new(),
            shared: Arc::new(Shared {
                engine,
                devices,
                registry: Registry::default(),
                callbacks: Arc::clone(&callbacks),
                bridge: Bridge::new(callbacks),
            }),
        }
    }

    /// Registers the client callback table, making the bridge ready to
    /// accept operations.
    pub fn initialize(&self, callbacks: Arc<dyn ClientCallbacks>) {
        *self.shared.callbacks.write() = Some(callbacks);
    }

    /// Deregisters the callback table. Subsequent operations fail with
    /// [`Error::NotReady`]; outcomes already in flight are dropped at
    /// delivery time.
    pub fn cleanup(&self) {
        *self.shared.callbacks.write() = None;
    }

    /// Returns a handle for the engine to raise events through.
    #[must_use]
    pub fn event_sink(&self) -> EventSink<E> {
        EventSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Registers a client application. Completion is reported via the
    /// register callback.
    pub fn register_app(&self, uuid: Uuid) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || shared.engine.register_app(uuid)))
    }

    /// Deregisters a client application and releases any correlation state
    /// it still owns.
    pub fn unregister_app(&self, app: AppId) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            shared.engine.deregister_app(app);
            shared.registry.forget_app(app);
        }))
    }

    /// Initiates a direct or background connection to `addr`.
    ///
    /// The transport is resolved on the dispatch thread: an explicit
    /// `transport` hint wins; otherwise the stored device classification
    /// decides, with dual-mode peers defaulting to BR/EDR and unknown peers
    /// to LE. Background requests to resolvable private addresses fail with
    /// an unsupported-status open callback when the controller can follow
    /// neither privacy path.
    pub fn open(
        &self,
        app: AppId,
        addr: RawAddr,
        is_direct: bool,
        transport: Transport,
    ) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || open_task(&shared, app, addr, is_direct, transport)))
    }

    /// Closes the active connection (if `conn` is non-zero) and
    /// unconditionally cancels any standing background connection intent for
    /// `addr`.
    pub fn close(&self, app: AppId, addr: RawAddr, conn: ConnId) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            if conn.is_none() {
                shared.engine.cancel_open(app, addr, true);
            } else {
                shared.engine.close(conn);
            }
            // Closing an active link does not remove a standing auto-connect
            // intent, so the background entry is dropped in both paths.
            shared.engine.cancel_open(app, addr, false);
        }))
    }

    /// Invalidates the engine's cached attribute database for `addr`.
    pub fn refresh(&self, addr: RawAddr) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || shared.engine.refresh(addr)))
    }

    /// Starts a service search, optionally filtered by UUID. Completion is
    /// reported via the search-complete callback.
    pub fn search_service(&self, conn: ConnId, filter: Option<Uuid>) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || shared.engine.search_services(conn, filter)))
    }

    /// Reads a characteristic value.
    pub fn read_characteristic(&self, conn: ConnId, handle: u16, auth: AuthReq) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let done = event::read_completion(Arc::clone(&shared), event::AttrKind::Characteristic);
            shared.engine.read_characteristic(conn, handle, auth, done);
        }))
    }

    /// Writes a characteristic value. Values longer than [`MAX_ATTR_LEN`]
    /// are truncated, not rejected.
    pub fn write_characteristic(
        &self,
        conn: ConnId,
        handle: u16,
        write_type: WriteType,
        auth: AuthReq,
        mut value: Vec<u8>,
    ) -> Result<()> {
        let shared = self.ready()?;
        value.truncate(MAX_ATTR_LEN);
        self.dispatch.submit(Box::new(move || {
            let done = event::write_completion(Arc::clone(&shared), event::AttrKind::Characteristic);
            (shared.engine).write_characteristic(conn, handle, write_type, auth, value, done);
        }))
    }

    /// Reads a descriptor value.
    pub fn read_descriptor(&self, conn: ConnId, handle: u16, auth: AuthReq) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let done = event::read_completion(Arc::clone(&shared), event::AttrKind::Descriptor);
            shared.engine.read_descriptor(conn, handle, auth, done);
        }))
    }

    /// Writes a descriptor value with the same truncation policy as
    /// [`Self::write_characteristic`].
    pub fn write_descriptor(
        &self,
        conn: ConnId,
        handle: u16,
        auth: AuthReq,
        mut value: Vec<u8>,
    ) -> Result<()> {
        let shared = self.ready()?;
        value.truncate(MAX_ATTR_LEN);
        self.dispatch.submit(Box::new(move || {
            let done = event::write_completion(Arc::clone(&shared), event::AttrKind::Descriptor);
            shared.engine.write_descriptor(conn, handle, auth, value, done);
        }))
    }

    /// Executes (`true`) or aborts (`false`) queued prepared writes.
    pub fn execute_write(&self, conn: ConnId, execute: bool) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || shared.engine.execute_write(conn, execute)))
    }

    /// Registers for server-initiated updates of `handle`. The engine
    /// answers synchronously on the dispatch thread; the status is forwarded
    /// through the register-for-notification callback.
    pub fn register_for_notification(
        &self,
        app: AppId,
        addr: RawAddr,
        handle: u16,
    ) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let status = shared.engine.register_notification(app, addr, handle);
            shared.bridge.forward(Outcome::RegisterNotification {
                conn: ConnId::NONE,
                registered: true,
                status,
                handle,
            });
        }))
    }

    /// Removes a notification registration for `handle`.
    pub fn deregister_for_notification(
        &self,
        app: AppId,
        addr: RawAddr,
        handle: u16,
    ) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let status = shared.engine.deregister_notification(app, addr, handle);
            shared.bridge.forward(Outcome::RegisterNotification {
                conn: ConnId::NONE,
                registered: false,
                status,
                handle,
            });
        }))
    }

    /// Reads the RSSI of a connected peer. Each request carries its own
    /// correlation token, so concurrent requests from different apps cannot
    /// misattribute results.
    pub fn read_remote_rssi(&self, app: AppId, addr: RawAddr) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            // Allocated here rather than at enqueue time, so a task that
            // never runs cannot strand an entry in the registry.
            let token = shared.registry.begin_rssi(app);
            let done = event::rssi_completion(Arc::clone(&shared), token);
            let status = shared.engine.read_rssi(addr, done);
            if status != Status::Success {
                // The completion will never fire; report the failure now and
                // drop the correlation.
                if let Some(app) = shared.registry.finish_rssi(token) {
                    shared.bridge.forward(Outcome::Rssi {
                        app,
                        addr,
                        rssi: 0,
                        status,
                    });
                }
            }
        }))
    }

    /// Requests an MTU exchange on an open connection.
    pub fn configure_mtu(&self, conn: ConnId, mtu: u16) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch
            .submit(Box::new(move || shared.engine.configure_mtu(conn, mtu)))
    }

    /// Updates connection parameters for a live link, or stores them as
    /// preferred parameters when no connection exists.
    pub fn conn_parameter_update(&self, addr: RawAddr, params: ConnParams) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            if shared.engine.is_connected(addr) {
                shared.engine.update_conn_params(addr, params);
            } else {
                shared.engine.set_pref_conn_params(addr, params);
            }
        }))
    }

    /// Starts or stops advertising visibility for incoming connections.
    pub fn listen(&self, app: AppId, start: bool) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let done = event::listen_completion(Arc::clone(&shared), app);
            shared.engine.listen(start, done);
        }))
    }

    /// Fetches the cached attribute database for a connection and delivers
    /// it through the gatt-db callback.
    pub fn get_gatt_db(&self, conn: ConnId) -> Result<()> {
        let shared = self.ready()?;
        self.dispatch.submit(Box::new(move || {
            let db = shared.engine.cached_db(conn);
            shared.bridge.forward(Outcome::GattDb { conn, db });
        }))
    }

    /// Returns the stored device classification for `addr`, if any. Answered
    /// synchronously from the device cache; no task is queued.
    #[must_use]
    pub fn device_type(&self, addr: RawAddr) -> Option<DeviceKind> {
        self.shared.devices.classify(addr).map(|c| c.kind)
    }

    /// Checks that the callback table is registered and returns a clone of
    /// the shared state for the task to capture. Performed synchronously
    /// before enqueueing, so a not-ready bridge queues nothing.
    fn ready(&self) -> Result<Arc<Shared<E>>> {
        if self.shared.callbacks.read().is_none() {
            warn!("operation rejected: callbacks not registered");
            return Err(Error::NotReady);
        }
        Ok(Arc::clone(&self.shared))
    }
}

/// Handle given to the engine for raising events. Cheap to clone and safe to
/// call from the engine's execution context.
pub struct EventSink<E: Engine> {
    shared: Arc<Shared<E>>,
}

impl<E: Engine> EventSink<E> {
    /// Decodes one engine event on the calling (engine) context and forwards
    /// the resulting outcomes to the callback thread.
    pub fn raise(&self, evt: EngineEvent) {
        event::decode(&self.shared, evt);
    }
}

impl<E: Engine> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Correlation token for one in-flight RSSI request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
struct RssiToken(u64);

/// Per-request RSSI correlation state. Tokens are allocated at submission
/// time and round-tripped through the engine completion, so results are
/// attributed to the app that requested them even when several requests are
/// outstanding.
#[derive(Debug, Default)]
struct Registry {
    next: AtomicU64,
    rssi: SyncMutex<HashMap<RssiToken, AppId>>,
}

impl Registry {
    /// Records an outstanding RSSI request for `app` and returns its token.
    fn begin_rssi(&self, app: AppId) -> RssiToken {
        let token = RssiToken(self.next.fetch_add(1, Ordering::Relaxed));
        self.rssi.lock().insert(token, app);
        token
    }

    /// Resolves and removes an outstanding request. Returns [`None`] when
    /// the token is unknown, e.g. after the requesting app deregistered.
    fn finish_rssi(&self, token: RssiToken) -> Option<AppId> {
        self.rssi.lock().remove(&token)
    }

    /// Clears all correlation state owned by a deregistering app.
    fn forget_app(&self, app: AppId) {
        self.rssi.lock().retain(|_, owner| *owner != app);
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.rssi.lock().is_empty()
    }
}

/// Runs on the dispatch thread: primes the engine's device registry, applies
/// the background-connect privacy gate, resolves the transport, and issues
/// the open request.
fn open_task<E: Engine>(
    shared: &Shared<E>,
    app: AppId,
    addr: RawAddr,
    is_direct: bool,
    hint: Transport,
) {
    let class = shared.devices.classify(addr);
    if let Some(c) = class {
        if c.kind != DeviceKind::BrEdr {
            shared.engine.add_device(addr, c.addr_type, c.kind);
        }
    }

    if !is_direct {
        // A controller with neither link-layer privacy nor RPA offload loses
        // a resolvable peer as soon as its address rotates, so a background
        // connection would never complete.
        let resolvable = matches!(class, Some(c) if c.addr_type == AddrType::Random)
            && addr.is_resolvable();
        let privacy = ControllerFeatures::BLE_PRIVACY | ControllerFeatures::RPA_OFFLOAD;
        if resolvable && !shared.engine.features().intersects(privacy) {
            warn!("rejecting background connection to {addr}: no RPA support");
            shared.bridge.forward(Outcome::Open {
                conn: ConnId::NONE,
                status: Status::Unsupported,
                app,
                addr,
            });
            return;
        }
        shared.engine.enable_auto_connect();
    }

    let transport = match hint {
        Transport::Auto => match class.map(|c| c.kind) {
            Some(DeviceKind::BrEdr | DeviceKind::Dual) => Transport::BrEdr,
            Some(DeviceKind::Le) | None => Transport::Le,
        },
        t => t,
    };
    debug!("open {addr} direct={is_direct} transport={transport}");
    shared.engine.open(app, addr, is_direct, transport);
}
