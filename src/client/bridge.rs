//! Callback bridge: marshals decoded outcomes onto the callback thread.
//!
//! The bridge performs no business logic. Field values produced by the
//! decoder are delivered to the client callback table exactly as received.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::engine::{AppId, ConnId, DbAttribute, Status, Uuid};
use crate::le::RawAddr;
use crate::SyncRwLock;

/// Client-visible callback table. One method per outcome kind; every method
/// is invoked on the bridge's dedicated callback thread, never on the
/// caller's or the engine's context.
pub trait ClientCallbacks: Send + Sync + 'static {
    fn register(&self, status: Status, app: AppId, uuid: Uuid);
    fn open(&self, conn: ConnId, status: Status, app: AppId, addr: RawAddr);
    fn close(&self, conn: ConnId, status: Status, app: AppId, addr: RawAddr);
    fn search_complete(&self, conn: ConnId, status: Status);
    fn execute_write(&self, conn: ConnId, status: Status);
    fn notify(&self, conn: ConnId, rec: &NotifyRecord);
    fn read_characteristic(&self, conn: ConnId, status: Status, rec: &ReadRecord);
    fn write_characteristic(&self, conn: ConnId, status: Status, handle: u16);
    fn read_descriptor(&self, conn: ConnId, status: Status, rec: &ReadRecord);
    fn write_descriptor(&self, conn: ConnId, status: Status, handle: u16);
    fn register_for_notification(&self, conn: ConnId, registered: bool, status: Status, handle: u16);
    fn read_remote_rssi(&self, app: AppId, addr: RawAddr, rssi: i8, status: Status);
    fn configure_mtu(&self, conn: ConnId, status: Status, mtu: u16);
    fn congestion(&self, conn: ConnId, congested: bool);
    fn listen(&self, status: Status, app: AppId);
    fn gatt_db(&self, conn: ConnId, db: &[DbAttribute]);
}

/// Owned copy of a server-initiated value push.
#[derive(Clone, Debug)]
pub struct NotifyRecord {
    pub addr: RawAddr,
    pub handle: u16,
    pub value: Vec<u8>,
    pub is_notify: bool,
}

/// Owned copy of a completed attribute read.
#[derive(Clone, Debug)]
pub struct ReadRecord {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Decoded outcome awaiting delivery.
#[derive(Debug)]
pub(super) enum Outcome {
    Register {
        status: Status,
        app: AppId,
        uuid: Uuid,
    },
    Open {
        conn: ConnId,
        status: Status,
        app: AppId,
        addr: RawAddr,
    },
    Close {
        conn: ConnId,
        status: Status,
        app: AppId,
        addr: RawAddr,
    },
    SearchComplete {
        conn: ConnId,
        status: Status,
    },
    ExecuteWrite {
        conn: ConnId,
        status: Status,
    },
    Notify {
        conn: ConnId,
        rec: NotifyRecord,
    },
    ReadCharacteristic {
        conn: ConnId,
        status: Status,
        rec: ReadRecord,
    },
    WriteCharacteristic {
        conn: ConnId,
        status: Status,
        handle: u16,
    },
    ReadDescriptor {
        conn: ConnId,
        status: Status,
        rec: ReadRecord,
    },
    WriteDescriptor {
        conn: ConnId,
        status: Status,
        handle: u16,
    },
    RegisterNotification {
        conn: ConnId,
        registered: bool,
        status: Status,
        handle: u16,
    },
    Rssi {
        app: AppId,
        addr: RawAddr,
        rssi: i8,
        status: Status,
    },
    ConfigureMtu {
        conn: ConnId,
        status: Status,
        mtu: u16,
    },
    Congestion {
        conn: ConnId,
        congested: bool,
    },
    Listen {
        status: Status,
        app: AppId,
    },
    GattDb {
        conn: ConnId,
        db: Vec<DbAttribute>,
    },
}

/// Re-posts outcomes to a dedicated callback thread and invokes the matching
/// entry of the registered callback table.
#[derive(Debug)]
pub(super) struct Bridge {
    tx: Option<mpsc::UnboundedSender<Outcome>>,
    thr: Option<thread::JoinHandle<()>>,
}

impl Bridge {
    pub fn new(table: Arc<SyncRwLock<Option<Arc<dyn ClientCallbacks>>>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let thr = thread::spawn(move || Self::run(rx, table));
        Self {
            tx: Some(tx),
            thr: Some(thr),
        }
    }

    /// Queues an outcome for delivery. Never blocks.
    pub fn forward(&self, outcome: Outcome) {
        if let Some(tx) = self.tx.as_ref() {
            if tx.send(outcome).is_err() {
                warn!("callback thread gone, outcome dropped");
            }
        }
    }

    fn run(
        mut rx: mpsc::UnboundedReceiver<Outcome>,
        table: Arc<SyncRwLock<Option<Arc<dyn ClientCallbacks>>>>,
    ) {
        debug!("callback thread started");
        while let Some(outcome) = rx.blocking_recv() {
            // Readiness is checked at every entry point, so an unset table
            // here is a defect in the caller's initialization order.
            let cb = table.read().clone();
            let Some(cb) = cb else {
                error!("callback table unset, dropping {outcome:?}");
                continue;
            };
            // A panicking callback forfeits only its own outcome.
            if panic::catch_unwind(AssertUnwindSafe(|| Self::deliver(&*cb, outcome))).is_err() {
                error!("client callback panicked");
            }
        }
        debug!("callback thread terminating");
    }

    fn deliver(cb: &dyn ClientCallbacks, outcome: Outcome) {
        match outcome {
            Outcome::Register { status, app, uuid } => cb.register(status, app, uuid),
            Outcome::Open {
                conn,
                status,
                app,
                addr,
            } => cb.open(conn, status, app, addr),
            Outcome::Close {
                conn,
                status,
                app,
                addr,
            } => cb.close(conn, status, app, addr),
            Outcome::SearchComplete { conn, status } => cb.search_complete(conn, status),
            Outcome::ExecuteWrite { conn, status } => cb.execute_write(conn, status),
            Outcome::Notify { conn, rec } => cb.notify(conn, &rec),
            Outcome::ReadCharacteristic { conn, status, rec } => {
                cb.read_characteristic(conn, status, &rec);
            }
            Outcome::WriteCharacteristic {
                conn,
                status,
                handle,
            } => cb.write_characteristic(conn, status, handle),
            Outcome::ReadDescriptor { conn, status, rec } => {
                cb.read_descriptor(conn, status, &rec);
            }
            Outcome::WriteDescriptor {
                conn,
                status,
                handle,
            } => cb.write_descriptor(conn, status, handle),
            Outcome::RegisterNotification {
                conn,
                registered,
                status,
                handle,
            } => cb.register_for_notification(conn, registered, status, handle),
            Outcome::Rssi {
                app,
                addr,
                rssi,
                status,
            } => cb.read_remote_rssi(app, addr, rssi, status),
            Outcome::ConfigureMtu { conn, status, mtu } => cb.configure_mtu(conn, status, mtu),
            Outcome::Congestion { conn, congested } => cb.congestion(conn, congested),
            Outcome::Listen { status, app } => cb.listen(status, app),
            Outcome::GattDb { conn, db } => cb.gatt_db(conn, &db),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(h) = self.thr.take() {
            let _ = h.join();
        }
    }
}
