use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_APPOINTMENTS_PER_DOCTOR;
use crate::model::*;
use crate::wal::Wal;

use super::EngineError;
use super::conflict::check_no_overlap;

/// Guard evaluated against the stored appointment before removal.
pub type RemoveGuard<'a> = &'a (dyn Fn(&Appointment) -> Result<(), EngineError> + Sync);

/// Persisted bookings, as seen by the engine.
///
/// `insert_if_free` is the only write that can create a booking and must run
/// its overlap check and its insert as one unit per doctor.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Every appointment whose start lies in `range`, ordered by start time.
    async fn appointments_between(&self, range: TimeRange) -> Result<Vec<Appointment>, EngineError>;

    /// The doctor's appointments starting on `date`.
    async fn appointments_on(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError>;

    /// Insert unless it overlaps a booking of the same doctor on the same date.
    async fn insert_if_free(&self, appointment: Appointment) -> Result<(), EngineError>;

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, EngineError>;

    /// Remove `id` if `guard` accepts it; returns the removed record.
    async fn remove_if(&self, id: Ulid, guard: RemoveGuard<'_>) -> Result<Appointment, EngineError>;

    /// Matching appointments ordered by start time.
    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError>;
}

// ── Per-doctor book ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DoctorBook {
    pub doctor_id: DoctorId,
    /// Sorted by `start_time`.
    pub appointments: Vec<Appointment>,
}

impl DoctorBook {
    pub fn new(doctor_id: DoctorId) -> Self {
        Self {
            doctor_id,
            appointments: Vec::new(),
        }
    }

    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start_time <= appointment.start_time);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose start lies in `range`.
    pub fn starting_within(&self, range: &TimeRange) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.start_time < range.start);
        let hi = self.appointments.partition_point(|a| a.start_time < range.end);
        &self.appointments[lo..hi]
    }

    pub fn on_date(&self, date: NaiveDate) -> &[Appointment] {
        self.starting_within(&TimeRange::day(date))
    }
}

pub type SharedDoctorBook = Arc<RwLock<DoctorBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes don't leak into the
    // next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// In-memory [`BookingStore`] with one `RwLock` per doctor, optionally
/// journaled to a write-ahead log.
pub struct BookingLedger {
    books: DashMap<DoctorId, SharedDoctorBook>,
    /// Reverse lookup: appointment id → doctor id.
    appointment_to_doctor: DashMap<Ulid, DoctorId>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Held shared by every journaled write, exclusively by `compact`.
    compaction_gate: RwLock<()>,
}

impl Default for BookingLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply an event to a book (caller holds the lock).
fn apply_to_book(book: &mut DoctorBook, event: &Event, index: &DashMap<Ulid, DoctorId>) {
    match event {
        Event::AppointmentBooked(appointment) => {
            index.insert(appointment.id, appointment.doctor_id);
            book.insert(appointment.clone());
        }
        Event::AppointmentCancelled { id, .. } => {
            book.remove(*id);
            index.remove(id);
        }
    }
}

impl BookingLedger {
    /// Volatile ledger; nothing survives a restart.
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
            appointment_to_doctor: DashMap::new(),
            wal_tx: None,
            compaction_gate: RwLock::new(()),
        }
    }

    /// Durable ledger backed by the WAL at `path`. Replays existing events
    /// and spawns the writer task, so it must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.discarded_tail {
            warn!("discarded damaged WAL tail in {}", path.display());
        }
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = DashMap::new();
        let mut books: HashMap<DoctorId, DoctorBook> = HashMap::new();
        for event in &replay.events {
            let book = books
                .entry(event.doctor_id())
                .or_insert_with(|| DoctorBook::new(event.doctor_id()));
            apply_to_book(book, event, &index);
        }
        info!(
            "replayed {} events from {} ({} appointments)",
            replay.events.len(),
            path.display(),
            index.len()
        );

        Ok(Self {
            books: books
                .into_iter()
                .map(|(id, book)| (id, Arc::new(RwLock::new(book))))
                .collect(),
            appointment_to_doctor: index,
            wal_tx: Some(wal_tx),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    pub fn len(&self) -> usize {
        self.appointment_to_doctor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointment_to_doctor.is_empty()
    }

    fn get_book(&self, doctor_id: DoctorId) -> Option<SharedDoctorBook> {
        self.books.get(&doctor_id).map(|e| e.value().clone())
    }

    fn book_for(&self, doctor_id: DoctorId) -> SharedDoctorBook {
        self.books
            .entry(doctor_id)
            .or_insert_with(|| Arc::new(RwLock::new(DoctorBook::new(doctor_id))))
            .value()
            .clone()
    }

    fn all_books(&self) -> Vec<SharedDoctorBook> {
        self.books.iter().map(|e| e.value().clone()).collect()
    }

    async fn wal_request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<Option<T>, EngineError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(None);
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(make(resp_tx))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        resp_rx
            .await
            .map(Some)
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Journal, then apply. The caller holds the book's write lock.
    async fn persist_and_apply(&self, book: &mut DoctorBook, event: Event) -> Result<(), EngineError> {
        let journaled = event.clone();
        if let Some(Err(e)) = self
            .wal_request(|response| WalCommand::Append {
                event: journaled,
                response,
            })
            .await?
        {
            return Err(EngineError::WalError(e.to_string()));
        }
        apply_to_book(book, &event, &self.appointment_to_doctor);
        Ok(())
    }

    /// Rewrite the WAL as one booking event per live appointment.
    pub async fn compact(&self) -> Result<(), EngineError> {
        if self.wal_tx.is_none() {
            return Ok(());
        }
        // No write can be between its book lookup and its journal append
        // while the gate is held, including one that creates a new book.
        let _gate = self.compaction_gate.write().await;
        let books = self.all_books();
        let mut guards = Vec::with_capacity(books.len());
        for book in &books {
            guards.push(book.read().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .flat_map(|g| g.appointments.iter().cloned().map(Event::AppointmentBooked))
            .collect();
        let count = events.len();
        let outcome = self
            .wal_request(|response| WalCommand::Compact { events, response })
            .await?;
        drop(guards);
        match outcome {
            Some(Err(e)) => Err(EngineError::WalError(e.to_string())),
            _ => {
                info!("compacted WAL to {count} events");
                Ok(())
            }
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match self
            .wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
        {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                warn!("WAL append counter unavailable: {e}");
                0
            }
        }
    }
}

#[async_trait]
impl BookingStore for BookingLedger {
    async fn appointments_between(&self, range: TimeRange) -> Result<Vec<Appointment>, EngineError> {
        let mut out = Vec::new();
        for book in self.all_books() {
            let guard = book.read().await;
            out.extend_from_slice(guard.starting_within(&range));
        }
        out.sort_by_key(|a| (a.start_time, a.doctor_id));
        Ok(out)
    }

    async fn appointments_on(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let Some(book) = self.get_book(doctor_id) else {
            return Ok(Vec::new());
        };
        let guard = book.read().await;
        Ok(guard.on_date(date).to_vec())
    }

    async fn insert_if_free(&self, appointment: Appointment) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let book = self.book_for(appointment.doctor_id);
        let mut guard = book.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_DOCTOR {
            return Err(EngineError::InvalidRequest("too many appointments for doctor"));
        }
        check_no_overlap(guard.on_date(appointment.date()), &appointment.range())?;
        self.persist_and_apply(&mut guard, Event::AppointmentBooked(appointment))
            .await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, EngineError> {
        let Some(doctor_id) = self.appointment_to_doctor.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(book) = self.get_book(doctor_id) else {
            return Ok(None);
        };
        let guard = book.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn remove_if(&self, id: Ulid, check: RemoveGuard<'_>) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let doctor_id = self
            .appointment_to_doctor
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let book = self
            .get_book(doctor_id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let mut guard = book.write().await;
        let existing = guard
            .get(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))?;
        check(&existing)?;
        self.persist_and_apply(&mut guard, Event::AppointmentCancelled { id, doctor_id })
            .await?;
        Ok(existing)
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError> {
        let books = match filter.doctor_id {
            Some(doctor_id) => self.get_book(doctor_id).into_iter().collect(),
            None => self.all_books(),
        };
        let mut out = Vec::new();
        for book in books {
            let guard = book.read().await;
            out.extend(guard.appointments.iter().filter(|a| filter.matches(a)).cloned());
        }
        out.sort_by_key(|a| (a.start_time, a.doctor_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeDelta};
    use std::path::PathBuf;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn appt(doctor_id: DoctorId, start: NaiveDateTime, minutes: i64) -> Appointment {
        Appointment {
            id: Ulid::new(),
            patient_id: 1,
            doctor_id,
            appointment_type: "new_patient".into(),
            start_time: start,
            end_time: start + TimeDelta::minutes(minutes),
        }
    }

    fn allow(_: &Appointment) -> Result<(), EngineError> {
        Ok(())
    }

    fn refuse(a: &Appointment) -> Result<(), EngineError> {
        Err(EngineError::AlreadyPast(a.id))
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("appointd_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    // ── DoctorBook ───────────────────────────────────────

    #[test]
    fn book_keeps_start_order() {
        let mut book = DoctorBook::new(1);
        book.insert(appt(1, at(6, 11, 0), 30));
        book.insert(appt(1, at(6, 9, 0), 30));
        book.insert(appt(1, at(6, 10, 0), 30));
        let starts: Vec<_> = book.appointments.iter().map(|a| a.start_time).collect();
        assert_eq!(starts, vec![at(6, 9, 0), at(6, 10, 0), at(6, 11, 0)]);
    }

    #[test]
    fn book_on_date_excludes_neighbouring_days() {
        let mut book = DoctorBook::new(1);
        book.insert(appt(1, at(5, 23, 30), 20));
        book.insert(appt(1, at(6, 0, 0), 20));
        book.insert(appt(1, at(6, 23, 59), 20));
        book.insert(appt(1, at(7, 0, 0), 20));
        let day = book.on_date(NaiveDate::from_ymd_opt(2025, 4, 6).unwrap());
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].start_time, at(6, 0, 0));
        assert_eq!(day[1].start_time, at(6, 23, 59));
    }

    #[test]
    fn book_remove_missing_is_none() {
        let mut book = DoctorBook::new(1);
        book.insert(appt(1, at(6, 9, 0), 30));
        assert!(book.remove(Ulid::new()).is_none());
        assert_eq!(book.appointments.len(), 1);
    }

    // ── BookingLedger ────────────────────────────────────

    #[tokio::test]
    async fn insert_then_query() {
        let ledger = BookingLedger::new();
        let a = appt(1, at(6, 9, 0), 30);
        ledger.insert_if_free(a.clone()).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 4, 6).unwrap();
        assert_eq!(ledger.appointments_on(1, date).await.unwrap(), vec![a.clone()]);
        assert!(ledger.appointments_on(2, date).await.unwrap().is_empty());
        assert_eq!(ledger.get(a.id).await.unwrap(), Some(a));
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.is_durable());
    }

    #[tokio::test]
    async fn overlapping_insert_rejected() {
        let ledger = BookingLedger::new();
        let first = appt(1, at(6, 9, 0), 30);
        ledger.insert_if_free(first.clone()).await.unwrap();

        let clash = appt(1, at(6, 9, 15), 30);
        let err = ledger.insert_if_free(clash).await.unwrap_err();
        assert_eq!(err, EngineError::SlotOverlap(first.id));

        // Another doctor at the same time is fine.
        ledger.insert_if_free(appt(2, at(6, 9, 15), 30)).await.unwrap();
        // Back-to-back is fine.
        ledger.insert_if_free(appt(1, at(6, 9, 30), 30)).await.unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test]
    async fn between_spans_doctors_in_start_order() {
        let ledger = BookingLedger::new();
        ledger.insert_if_free(appt(2, at(6, 10, 0), 30)).await.unwrap();
        ledger.insert_if_free(appt(1, at(6, 9, 0), 30)).await.unwrap();
        ledger.insert_if_free(appt(1, at(8, 9, 0), 30)).await.unwrap();

        let found = ledger
            .appointments_between(TimeRange::new(at(6, 0, 0), at(7, 0, 0)))
            .await
            .unwrap();
        let doctors: Vec<_> = found.iter().map(|a| a.doctor_id).collect();
        assert_eq!(doctors, vec![1, 2]);
    }

    #[tokio::test]
    async fn remove_if_respects_guard() {
        let ledger = BookingLedger::new();
        let a = appt(1, at(6, 9, 0), 30);
        ledger.insert_if_free(a.clone()).await.unwrap();

        let err = ledger.remove_if(a.id, &refuse).await.unwrap_err();
        assert_eq!(err, EngineError::AlreadyPast(a.id));
        assert_eq!(ledger.len(), 1);

        let removed = ledger.remove_if(a.id, &allow).await.unwrap();
        assert_eq!(removed, a);
        assert!(ledger.get(a.id).await.unwrap().is_none());

        let err = ledger.remove_if(a.id, &allow).await.unwrap_err();
        assert_eq!(err, EngineError::AppointmentNotFound(a.id));
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let ledger = BookingLedger::new();
        let mut follow_up = appt(1, at(6, 13, 0), 20);
        follow_up.appointment_type = "follow_up".into();
        ledger.insert_if_free(follow_up.clone()).await.unwrap();
        ledger.insert_if_free(appt(1, at(6, 9, 0), 30)).await.unwrap();
        ledger.insert_if_free(appt(2, at(6, 9, 0), 30)).await.unwrap();

        let all = ledger.list(&AppointmentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let doctor_one = AppointmentFilter {
            doctor_id: Some(1),
            ..Default::default()
        };
        assert_eq!(ledger.list(&doctor_one).await.unwrap().len(), 2);

        let by_type = AppointmentFilter {
            appointment_type: Some("follow_up".into()),
            ..Default::default()
        };
        assert_eq!(ledger.list(&by_type).await.unwrap(), vec![follow_up]);

        let unknown_doctor = AppointmentFilter {
            doctor_id: Some(99),
            ..Default::default()
        };
        assert!(ledger.list(&unknown_doctor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn durable_ledger_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let kept = appt(1, at(6, 9, 0), 30);
        let cancelled = appt(1, at(6, 10, 0), 30);
        {
            let ledger = BookingLedger::open(&path).unwrap();
            assert!(ledger.is_durable());
            ledger.insert_if_free(kept.clone()).await.unwrap();
            ledger.insert_if_free(cancelled.clone()).await.unwrap();
            ledger.remove_if(cancelled.id, &allow).await.unwrap();
        }

        let reopened = BookingLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(kept.id).await.unwrap(), Some(kept.clone()));
        assert!(reopened.get(cancelled.id).await.unwrap().is_none());

        // Overlap protection is rebuilt from the journal.
        let clash = appt(1, at(6, 9, 10), 30);
        assert!(matches!(
            reopened.insert_if_free(clash).await,
            Err(EngineError::SlotOverlap(id)) if id == kept.id
        ));
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact_state.wal");
        let ledger = BookingLedger::open(&path).unwrap();
        let mut keep = Vec::new();
        for h in 9..12 {
            let a = appt(1, at(6, h, 0), 30);
            ledger.insert_if_free(a.clone()).await.unwrap();
            keep.push(a);
        }
        for h in 13..16 {
            let a = appt(1, at(6, h, 0), 30);
            ledger.insert_if_free(a.clone()).await.unwrap();
            ledger.remove_if(a.id, &allow).await.unwrap();
        }
        assert_eq!(ledger.wal_appends_since_compact().await, 9);
        let before = std::fs::metadata(&path).unwrap().len();

        ledger.compact().await.unwrap();
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        drop(ledger);

        let reopened = BookingLedger::open(&path).unwrap();
        let all = reopened.list(&AppointmentFilter::default()).await.unwrap();
        assert_eq!(all, keep);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn compaction_keeps_first_booking_of_new_doctor() {
        for round in 0..50 {
            let path = test_wal_path(&format!("compact_new_book_{round}.wal"));
            let ledger = Arc::new(BookingLedger::open(&path).unwrap());
            ledger.insert_if_free(appt(1, at(6, 9, 0), 30)).await.unwrap();

            let busy = {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.insert_if_free(appt(1, at(6, 10, 0), 30)).await })
            };
            let compaction = {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.compact().await })
            };
            let newcomer = appt(2, at(6, 9, 0), 30);
            let first = {
                let ledger = ledger.clone();
                let newcomer = newcomer.clone();
                tokio::spawn(async move { ledger.insert_if_free(newcomer).await })
            };
            busy.await.unwrap().unwrap();
            compaction.await.unwrap().unwrap();
            first.await.unwrap().unwrap();
            assert_eq!(ledger.get(newcomer.id).await.unwrap(), Some(newcomer.clone()));
            assert_eq!(ledger.len(), 3);
            drop(ledger);

            let reopened = BookingLedger::open(&path).unwrap();
            assert_eq!(reopened.len(), 3, "round {round}");
            assert_eq!(reopened.get(newcomer.id).await.unwrap(), Some(newcomer));
        }
    }

    #[tokio::test]
    async fn volatile_compact_is_noop() {
        let ledger = BookingLedger::new();
        ledger.compact().await.unwrap();
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn stopped_writer_reports_zero_appends() {
        let (wal_tx, wal_rx) = mpsc::channel(1);
        drop(wal_rx);
        let ledger = BookingLedger {
            books: DashMap::new(),
            appointment_to_doctor: DashMap::new(),
            wal_tx: Some(wal_tx),
            compaction_gate: RwLock::new(()),
        };
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
        assert!(matches!(ledger.compact().await, Err(EngineError::WalError(_))));
        assert!(matches!(
            ledger.insert_if_free(appt(1, at(6, 9, 0), 30)).await,
            Err(EngineError::WalError(_))
        ));
        assert!(ledger.is_empty());
    }
}
