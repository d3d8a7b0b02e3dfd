//! External collaborator interfaces: the GATT protocol engine and the
//! persistent device classification cache.
//!
//! The engine performs the actual attribute procedures over a link. This
//! crate only issues value-typed requests to it from the dispatch thread and
//! receives correlated events back on the engine's own execution context. No
//! identifier defined here is allocated or freed by this crate; application
//! and connection ids are owned by the engine and passed through.

use std::fmt::{Debug, Formatter};

use bitflags::bitflags;

use crate::le::{AddrType, RawAddr};

/// Maximum attribute value length ([Vol 3] Part F, Section 3.2.9). Oversized
/// values crossing this boundary are truncated, never rejected.
pub const MAX_ATTR_LEN: usize = 512;

/// Default ATT MTU before negotiation ([Vol 3] Part F, Section 3.2.8).
pub const DEFAULT_MTU: u16 = 23;

/// Registered client application identifier, assigned by the engine.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct AppId(pub i32);

/// Open connection identifier, assigned by the engine. Non-zero only while a
/// connection is open.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct ConnId(pub u16);

impl ConnId {
    /// Reserved value meaning "no connection" in close/cancel paths.
    pub const NONE: Self = Self(0);

    /// Returns whether this is the reserved "no connection" value.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// 128-bit application UUID ([Vol 3] Part B, Section 2.5.1).
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Uuid(pub u128);

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Operation status reported by the engine. Statuses are passed through to
/// client callbacks verbatim; this crate performs no retry and no
/// reinterpretation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    #[default]
    Success = 0x00,
    Fail = 0x01,
    NotReady = 0x02,
    NoMemory = 0x03,
    Busy = 0x04,
    Done = 0x05,
    Unsupported = 0x06,
    InvalidParam = 0x07,
    Unhandled = 0x08,
    AuthFailure = 0x09,
    RemoteDeviceDown = 0x0A,
    AuthRejected = 0x0B,
}

/// Transport used for a GATT connection.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[repr(u8)]
pub enum Transport {
    /// Let the bridge pick a transport from the stored device classification.
    #[default]
    Auto = 0x00,
    BrEdr = 0x01,
    Le = 0x02,
}

/// Persistent device classification from inquiry and bonding records.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum DeviceKind {
    BrEdr = 0x01,
    Le = 0x02,
    Dual = 0x03,
}

/// Attribute write mode ([Vol 3] Part G, Section 4.9).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum WriteType {
    NoResponse = 0x01,
    Default = 0x02,
    Prepare = 0x03,
}

/// Link authentication requirement for an attribute operation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum AuthReq {
    #[default]
    None = 0x00,
    NoMitm = 0x01,
    Mitm = 0x02,
    SignedNoMitm = 0x03,
    SignedMitm = 0x04,
}

bitflags! {
    /// Controller privacy capabilities relevant to background connections.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ControllerFeatures: u8 {
        /// Link-layer privacy (address resolving list) support.
        const BLE_PRIVACY = 1 << 0;
        /// Vendor-specific resolvable-private-address offloading.
        const RPA_OFFLOAD = 1 << 1;
    }
}

/// Preferred or updated connection parameters, in controller units.
#[derive(Clone, Copy, Debug)]
pub struct ConnParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// One entry of a cached attribute database.
#[derive(Clone, Debug)]
pub struct DbAttribute {
    pub handle: u16,
    pub uuid: Uuid,
    pub kind: DbAttributeKind,
    pub properties: u8,
}

/// Attribute role within a cached database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DbAttributeKind {
    PrimaryService,
    SecondaryService,
    IncludedService,
    Characteristic,
    Descriptor,
}

/// Completion callback for an attribute read primitive. Receives the
/// connection id, status, attribute handle, and the raw value.
pub type ReadComplete = Box<dyn FnOnce(ConnId, Status, u16, &[u8]) + Send>;

/// Completion callback for an attribute write primitive.
pub type WriteComplete = Box<dyn FnOnce(ConnId, Status, u16) + Send>;

/// Completion callback for an RSSI read. Receives the peer address, the
/// signal strength in dBm, and the status.
pub type RssiComplete = Box<dyn FnOnce(RawAddr, i8, Status) + Send>;

/// Completion callback for a listen request.
pub type ListenComplete = Box<dyn FnOnce(Status) + Send>;

/// Synchronous request surface of the GATT protocol engine.
///
/// Every method is invoked from the bridge's dispatch thread, one call at a
/// time. Requests that complete asynchronously report back either through
/// the completion closure passed with the request or through the tagged
/// event channel ([`EngineEvent`]), which the engine raises on its own
/// execution context.
pub trait Engine: Send + Sync + 'static {
    fn register_app(&self, uuid: Uuid);
    fn deregister_app(&self, app: AppId);

    /// Initiates a direct or background connection. Completion is reported
    /// via [`EngineEvent::Opened`].
    fn open(&self, app: AppId, addr: RawAddr, is_direct: bool, transport: Transport);

    /// Closes an active connection. Completion is reported via
    /// [`EngineEvent::Closed`].
    fn close(&self, conn: ConnId);

    /// Cancels a pending direct (`is_direct`) or background connection
    /// attempt for `addr`.
    fn cancel_open(&self, app: AppId, addr: RawAddr, is_direct: bool);

    /// Invalidates any cached attribute database for the peer.
    fn refresh(&self, addr: RawAddr);

    /// Starts a service search. Completion is reported via
    /// [`EngineEvent::SearchComplete`].
    fn search_services(&self, conn: ConnId, filter: Option<Uuid>);

    fn read_characteristic(&self, conn: ConnId, handle: u16, auth: AuthReq, done: ReadComplete);
    #[allow(clippy::too_many_arguments)]
    fn write_characteristic(
        &self,
        conn: ConnId,
        handle: u16,
        write_type: WriteType,
        auth: AuthReq,
        value: Vec<u8>,
        done: WriteComplete,
    );
    fn read_descriptor(&self, conn: ConnId, handle: u16, auth: AuthReq, done: ReadComplete);
    fn write_descriptor(
        &self,
        conn: ConnId,
        handle: u16,
        auth: AuthReq,
        value: Vec<u8>,
        done: WriteComplete,
    );

    /// Executes or aborts a queued prepared write. Completion is reported
    /// via [`EngineEvent::ExecuteWriteComplete`].
    fn execute_write(&self, conn: ConnId, execute: bool);

    fn register_notification(&self, app: AppId, addr: RawAddr, handle: u16) -> Status;
    fn deregister_notification(&self, app: AppId, addr: RawAddr, handle: u16) -> Status;

    /// Confirms receipt of an indication, releasing the peer's indication
    /// queue for `handle`.
    fn send_indication_confirm(&self, conn: ConnId, handle: u16);

    /// Reads the current RSSI for a connected peer. Returns a non-success
    /// status if the request could not be issued, in which case `done` is
    /// never invoked.
    fn read_rssi(&self, addr: RawAddr, done: RssiComplete) -> Status;

    /// Requests an MTU exchange. Completion is reported via
    /// [`EngineEvent::MtuConfigured`].
    fn configure_mtu(&self, conn: ConnId, mtu: u16);

    fn is_connected(&self, addr: RawAddr) -> bool;
    fn update_conn_params(&self, addr: RawAddr, params: ConnParams);
    fn set_pref_conn_params(&self, addr: RawAddr, params: ConnParams);

    fn listen(&self, start: bool, done: ListenComplete);

    /// Returns the cached attribute database for a connection.
    fn cached_db(&self, conn: ConnId) -> Vec<DbAttribute>;

    /// Ensures the peer is present in the engine's device registry with the
    /// stored classification.
    fn add_device(&self, addr: RawAddr, addr_type: AddrType, kind: DeviceKind);

    /// Arms opportunistic background connections for peers previously
    /// requested with `is_direct == false`.
    fn enable_auto_connect(&self);

    /// Kicks off a link-encryption check for a freshly opened connection.
    /// Fire-and-forget; the outcome is not observed by this crate.
    fn check_encrypted_link(&self, addr: RawAddr, transport: Transport);

    /// Reports the controller's privacy capabilities.
    fn features(&self) -> ControllerFeatures;
}

/// Persistent device-type/address-type lookup, keyed by address. A missing
/// entry is a normal, non-error outcome; callers fall back to defaults.
pub trait DeviceCache: Send + Sync + 'static {
    fn classify(&self, addr: RawAddr) -> Option<DeviceClass>;
}

/// Stored classification for a previously seen peer.
#[derive(Clone, Copy, Debug)]
pub struct DeviceClass {
    pub addr_type: AddrType,
    pub kind: DeviceKind,
}

/// Asynchronous event raised by the engine on its own execution context.
/// Each variant carries only the fields relevant to that event kind.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum EngineEvent {
    Registered {
        status: Status,
        app: AppId,
        uuid: Uuid,
    },
    Deregistered {
        app: AppId,
    },
    ExecuteWriteComplete {
        conn: ConnId,
        status: Status,
    },
    SearchComplete {
        conn: ConnId,
        status: Status,
    },
    /// Server-initiated value push. `is_notify == false` marks an
    /// indication, which requires an explicit confirmation.
    Notification {
        conn: ConnId,
        addr: RawAddr,
        handle: u16,
        value: Vec<u8>,
        is_notify: bool,
    },
    Opened {
        conn: ConnId,
        status: Status,
        app: AppId,
        addr: RawAddr,
        mtu: u16,
        transport: Transport,
    },
    Closed {
        conn: ConnId,
        status: Status,
        app: AppId,
        addr: RawAddr,
    },
    AclEvent {
        status: Status,
    },
    CancelOpen {
        status: Status,
    },
    MtuConfigured {
        conn: ConnId,
        status: Status,
        mtu: u16,
    },
    CongestionChanged {
        conn: ConnId,
        congested: bool,
    },
}
