mod availability;
mod error;
mod mutations;
mod permissions;
mod pricing;
mod queries;
mod services;
#[cfg(test)]
mod tests;
mod validate;

pub use availability::{find_conflict, is_free};
pub use error::EngineError;
pub use permissions::LifecycleAction;
pub use pricing::compute_total;
pub use validate::{BookingDraft, BookingPatch, RoomStayDraft, ServiceUseDraft};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBooking = Arc<RwLock<Booking>>;
pub type SharedRoomSlate = Arc<RwLock<RoomSlate>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Group commit: the first append blocks,
/// then everything already queued rides along in the same batch, so one
/// fsync covers all of them and each sender hears back only after its event
/// is durable.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Sweep up whatever else is already queued
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // A non-append command closes the batch window
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush unconditionally: a failed batch must not leave half-staged
    // bytes in the buffer for the next one to inherit.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── The engine ───────────────────────────────────────────

/// One property's Booking Engine: catalog reference data, booking
/// aggregates, and per-room occupancy, all rebuilt from the WAL on start.
///
/// Lock-order invariant: the commit lock (shared for mutations, exclusive
/// for compaction) comes first, then room slate locks in sorted room-id
/// order, always BEFORE the booking lock. Service attachment takes only
/// the booking lock. Nothing acquires a slate lock while holding a booking
/// lock, so the orders cannot form a cycle.
pub struct Engine {
    pub catalog: Catalog,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) slates: DashMap<Ulid, SharedRoomSlate>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    // Held shared across every append+apply, exclusively by compaction, so
    // a compaction snapshot never misses an event already acked to a caller.
    pub(super) commit_lock: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            catalog: Catalog::new(),
            bookings: DashMap::new(),
            slates: DashMap::new(),
            wal_tx,
            commit_lock: RwLock::new(()),
            notify,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context (lazy property
        // creation).
        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    /// Apply a replayed event. Every event in the WAL was fully validated
    /// before it was appended, so application is unconditional.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::RoomTypeAdded { room_type } => {
                self.catalog.insert_room_type(room_type.clone());
            }
            Event::RoomAdded { room } => {
                self.slates
                    .insert(room.id, Arc::new(RwLock::new(RoomSlate::new(room.id))));
                self.catalog.insert_room(room.clone());
            }
            Event::ServiceAdded { service } => {
                self.catalog.insert_service(service.clone());
            }
            Event::BookingCreated {
                id,
                customer_id,
                rooms,
                services,
                total_amount,
                created_at,
            } => {
                for stay in rooms {
                    if let Some(entry) = self.slates.get(&stay.room_id) {
                        let slate = entry.value().clone();
                        let mut guard = slate.try_write().expect("replay: uncontended write");
                        guard.insert_stay(*id, stay.span);
                    }
                }
                let booking = Booking {
                    id: *id,
                    customer_id: *customer_id,
                    staff_id: None,
                    rooms: rooms.clone(),
                    services: services.clone(),
                    status: BookingStatus::Pending,
                    total_amount: *total_amount,
                    created_at: *created_at,
                    updated_at: *created_at,
                };
                self.bookings.insert(*id, Arc::new(RwLock::new(booking)));
            }
            Event::BookingUpdated {
                id,
                rooms,
                services,
                total_amount,
                updated_at,
            } => {
                if let Some(entry) = self.bookings.get(id) {
                    let shared = entry.value().clone();
                    let mut booking = shared.try_write().expect("replay: uncontended write");
                    self.replay_remove_stays(*id, &booking.room_ids());
                    for stay in rooms {
                        if let Some(entry) = self.slates.get(&stay.room_id) {
                            let slate = entry.value().clone();
                            let mut guard =
                                slate.try_write().expect("replay: uncontended write");
                            guard.insert_stay(*id, stay.span);
                        }
                    }
                    booking.apply_update(rooms.clone(), services.clone(), *total_amount, *updated_at);
                }
            }
            Event::BookingDeleted { id } => {
                if let Some((_, shared)) = self.bookings.remove(id) {
                    let booking = shared.try_read().expect("replay: uncontended read");
                    self.replay_remove_stays(*id, &booking.room_ids());
                }
            }
            Event::StatusChanged {
                id,
                status,
                staff_id,
                at,
            } => {
                if let Some(entry) = self.bookings.get(id) {
                    let shared = entry.value().clone();
                    let mut booking = shared.try_write().expect("replay: uncontended write");
                    booking.apply_status(*status, *staff_id, *at);
                    if !status.is_active() {
                        self.replay_remove_stays(*id, &booking.room_ids());
                    }
                }
            }
            Event::ServiceAttached {
                booking_id,
                service_use,
                charge,
                at,
            } => {
                if let Some(entry) = self.bookings.get(booking_id) {
                    let shared = entry.value().clone();
                    let mut booking = shared.try_write().expect("replay: uncontended write");
                    booking.apply_attach(service_use, *charge, *at);
                }
            }
            Event::ServiceDetached {
                booking_id,
                room_index,
                service_id,
                use_date,
                quantity,
                refund,
                at,
            } => {
                if let Some(entry) = self.bookings.get(booking_id) {
                    let shared = entry.value().clone();
                    let mut booking = shared.try_write().expect("replay: uncontended write");
                    booking.apply_detach(*room_index, *service_id, *use_date, *quantity, *refund, *at);
                }
            }
        }
    }

    fn replay_remove_stays(&self, booking_id: Ulid, room_ids: &[Ulid]) {
        for rid in room_ids {
            if let Some(entry) = self.slates.get(rid) {
                let slate = entry.value().clone();
                let mut guard = slate.try_write().expect("replay: uncontended write");
                guard.remove_stays(booking_id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn booking_shared(&self, id: &Ulid) -> Result<SharedBooking, EngineError> {
        self.bookings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn slate_shared(&self, room_id: &Ulid) -> Result<SharedRoomSlate, EngineError> {
        self.slates
            .get(room_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*room_id))
    }

    /// Acquire write locks on the given room slates. `room_ids` must be
    /// sorted and deduplicated — sorted acquisition is what prevents
    /// deadlock between concurrent multi-room commits.
    pub(super) async fn lock_slates(
        &self,
        room_ids: &[Ulid],
    ) -> Result<Vec<(Ulid, OwnedRwLockWriteGuard<RoomSlate>)>, EngineError> {
        debug_assert!(room_ids.windows(2).all(|w| w[0] < w[1]));
        let mut guards = Vec::with_capacity(room_ids.len());
        for rid in room_ids {
            let slate = self.slate_shared(rid)?;
            guards.push((*rid, slate.write_owned().await));
        }
        Ok(guards)
    }

    /// Publish an event on the booking topic and every involved room topic.
    pub(super) fn notify_booking(&self, booking_id: Ulid, room_ids: &[Ulid], event: &Event) {
        self.notify.send(booking_id, event);
        for rid in room_ids {
            self.notify.send(*rid, event);
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: the catalog, then one create (plus one
    /// status change, when not pending) per surviving booking.
    ///
    /// Mutations are quiesced for the duration: an event acked to a caller
    /// is either applied before the snapshot below or appended to the
    /// rewritten file after the swap, never dropped between the two.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _commit = self.commit_lock.write().await;
        let mut events = Vec::new();

        for room_type in self.catalog.list_room_types() {
            events.push(Event::RoomTypeAdded { room_type });
        }
        for room in self.catalog.list_rooms() {
            events.push(Event::RoomAdded { room });
        }
        for service in self.catalog.list_services() {
            events.push(Event::ServiceAdded { service });
        }

        let shareds: Vec<SharedBooking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for shared in shareds {
            let booking = shared.read().await;
            events.push(Event::BookingCreated {
                id: booking.id,
                customer_id: booking.customer_id,
                rooms: booking.rooms.clone(),
                services: booking.services.clone(),
                total_amount: booking.total_amount,
                created_at: booking.created_at,
            });
            if booking.status != BookingStatus::Pending {
                events.push(Event::StatusChanged {
                    id: booking.id,
                    status: booking.status,
                    staff_id: booking.staff_id,
                    at: booking.updated_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Sorted, deduplicated room ids for a set of stays — the canonical lock
/// acquisition order.
pub(super) fn sorted_room_ids(rooms: &[RoomStay]) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = rooms.iter().map(|r| r.room_id).collect();
    ids.sort();
    ids.dedup();
    ids
}
