//! Engine event decoding.
//!
//! Events arrive on the engine's execution context and are translated, one
//! at a time and in arrival order, into [`Outcome`]s for the callback
//! bridge. The decoder never buffers or reorders events.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::engine::{
    ConnId, Engine, EngineEvent, ListenComplete, ReadComplete, RssiComplete, Status,
    WriteComplete, DEFAULT_MTU, MAX_ATTR_LEN,
};

use super::bridge::{NotifyRecord, Outcome, ReadRecord};
use super::{AppId, RssiToken, Shared};

/// Attribute flavor a read/write completion reports for.
#[derive(Clone, Copy, Debug)]
pub(super) enum AttrKind {
    Characteristic,
    Descriptor,
}

/// Decodes one tagged engine event into zero or more outcomes.
pub(super) fn decode<E: Engine>(shared: &Shared<E>, evt: EngineEvent) {
    trace!("engine event: {evt:?}");
    match evt {
        EngineEvent::Registered { status, app, uuid } => {
            shared.bridge.forward(Outcome::Register { status, app, uuid });
        }
        EngineEvent::Deregistered { app } => debug!("client {app:?} deregistered"),
        EngineEvent::ExecuteWriteComplete { conn, status } => {
            shared.bridge.forward(Outcome::ExecuteWrite { conn, status });
        }
        EngineEvent::SearchComplete { conn, status } => {
            shared.bridge.forward(Outcome::SearchComplete { conn, status });
        }
        EngineEvent::Notification {
            conn,
            addr,
            handle,
            mut value,
            is_notify,
        } => {
            value.truncate(MAX_ATTR_LEN);
            shared.bridge.forward(Outcome::Notify {
                conn,
                rec: NotifyRecord {
                    addr,
                    handle,
                    value,
                    is_notify,
                },
            });
            if !is_notify {
                // An unconfirmed indication stalls the peer's indication
                // queue for this handle.
                shared.engine.send_indication_confirm(conn, handle);
            }
        }
        EngineEvent::Opened {
            conn,
            status,
            app,
            addr,
            mtu,
            transport,
        } => {
            shared.bridge.forward(Outcome::Open {
                conn,
                status,
                app,
                addr,
            });
            if mtu != 0 && mtu != DEFAULT_MTU {
                shared.bridge.forward(Outcome::ConfigureMtu { conn, status, mtu });
            }
            if status == Status::Success {
                shared.engine.check_encrypted_link(addr, transport);
            }
        }
        EngineEvent::Closed {
            conn,
            status,
            app,
            addr,
        } => {
            shared.bridge.forward(Outcome::Close {
                conn,
                status,
                app,
                addr,
            });
        }
        EngineEvent::AclEvent { status } => debug!("ACL event: {status}"),
        EngineEvent::CancelOpen { status } => debug!("cancel open: {status}"),
        EngineEvent::MtuConfigured { conn, status, mtu } => {
            shared.bridge.forward(Outcome::ConfigureMtu { conn, status, mtu });
        }
        EngineEvent::CongestionChanged { conn, congested } => {
            shared.bridge.forward(Outcome::Congestion { conn, congested });
        }
        #[allow(unreachable_patterns)]
        evt => warn!("unhandled engine event: {evt:?}"),
    }
}

/// Builds a read completion that copies the bounded value and forwards a
/// read outcome.
pub(super) fn read_completion<E: Engine>(shared: Arc<Shared<E>>, kind: AttrKind) -> ReadComplete {
    Box::new(move |conn: ConnId, status: Status, handle: u16, value: &[u8]| {
        let value = value[..value.len().min(MAX_ATTR_LEN)].to_vec();
        let rec = ReadRecord { handle, value };
        shared.bridge.forward(match kind {
            AttrKind::Characteristic => Outcome::ReadCharacteristic { conn, status, rec },
            AttrKind::Descriptor => Outcome::ReadDescriptor { conn, status, rec },
        });
    })
}

/// Builds a write completion forwarding a write outcome.
pub(super) fn write_completion<E: Engine>(shared: Arc<Shared<E>>, kind: AttrKind) -> WriteComplete {
    Box::new(move |conn: ConnId, status: Status, handle: u16| {
        shared.bridge.forward(match kind {
            AttrKind::Characteristic => Outcome::WriteCharacteristic {
                conn,
                status,
                handle,
            },
            AttrKind::Descriptor => Outcome::WriteDescriptor {
                conn,
                status,
                handle,
            },
        });
    })
}

/// Builds an RSSI completion that resolves the correlation token recorded at
/// submission time.
pub(super) fn rssi_completion<E: Engine>(shared: Arc<Shared<E>>, token: RssiToken) -> RssiComplete {
    Box::new(move |addr, rssi, status| {
        let Some(app) = shared.registry.finish_rssi(token) else {
            warn!("RSSI result for unknown request {token:?}, dropped");
            return;
        };
        shared.bridge.forward(Outcome::Rssi {
            app,
            addr,
            rssi,
            status,
        });
    })
}

/// Builds a listen completion bound to the requesting app.
pub(super) fn listen_completion<E: Engine>(shared: Arc<Shared<E>>, app: AppId) -> ListenComplete {
    Box::new(move |status| {
        shared.bridge.forward(Outcome::Listen { status, app });
    })
}
