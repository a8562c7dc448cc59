//! # sb-db-memory
//!
//! In-process implementation of the storage ports.
//!
//! Every collection is an ordered map of versioned documents behind one lock,
//! so a commit lands atomically. Transactions opened with
//! `ReadConcern::Snapshot` read from a copy taken at start; their deletes are
//! buffered and validated against document versions at commit time.
//!
//! The store also carries test hooks: injected faults per operation and an
//! artificial latency applied before every backend call.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sb_core::{
    document_id, AppError, Collection, Connection, Connector, Document, Filter, FindOptions, ReadConcern,
    Result, Session, SortOrder, TransactionOptions,
};
use serde_json::Value;

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Connect,
    Read(Collection),
    Write(Collection),
    Commit,
}

#[derive(Debug, Clone)]
struct Versioned {
    doc: Document,
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct Database {
    collections: HashMap<Collection, BTreeMap<String, Versioned>>,
    clock: u64,
}

impl Database {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn matching<'a>(
        &'a self,
        collection: Collection,
        filter: &'a Filter,
    ) -> impl Iterator<Item = (&'a String, &'a Versioned)> + 'a {
        self.collections
            .get(&collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(move |(_, entry)| filter.matches(&entry.doc))
    }

    fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &FindOptions,
        hidden: Option<&HashMap<String, u64>>,
    ) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .matching(collection, filter)
            .filter(|(id, _)| hidden.map_or(true, |hidden| !hidden.contains_key(*id)))
            .map(|(_, entry)| entry.doc.clone())
            .collect();

        if let Some((field, order)) = &options.sort {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        docs.into_iter().skip(skip).take(limit).collect()
    }

    fn remove_matching(&mut self, collection: Collection, filter: &Filter, limit: usize) -> u64 {
        let ids: Vec<String> = self
            .matching(collection, filter)
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(docs) = self.collections.get_mut(&collection) {
            for id in &ids {
                docs.remove(id);
            }
        }
        ids.len() as u64
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreInner {
    data: RwLock<Database>,
    faults: DashMap<FaultPoint, u32>,
    latency_micros: AtomicU64,
    open_connections: AtomicUsize,
    open_sessions: AtomicUsize,
}

/// Shared in-memory database. Clones point at the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { store: self.clone() }
    }

    /// Makes the next `times` operations at `point` fail.
    pub fn inject_fault(&self, point: FaultPoint, times: u32) {
        *self.inner.faults.entry(point).or_insert(0) += times;
    }

    /// Delay applied before every backend call, to widen interleavings.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.inner.latency_micros.store(micros, Ordering::Relaxed);
    }

    /// Connections dialed and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    /// Sessions started and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    /// Committed document count of a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.read().collections.get(&collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read().collections.values().all(BTreeMap::is_empty)
    }

    /// Whether a committed document with this `_id` exists.
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.read()
            .collections
            .get(&collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    fn take_fault(&self, point: FaultPoint) -> bool {
        if let Some(mut remaining) = self.inner.faults.get_mut(&point) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn check(&self, point: FaultPoint) -> Result<()> {
        if self.take_fault(point) {
            tracing::debug!(?point, "injected fault");
            return Err(match point {
                FaultPoint::Connect => AppError::Connection("memory backend refused connection".into()),
                other => AppError::StorageUnavailable(format!("injected fault at {other:?}")),
            });
        }
        Ok(())
    }

    async fn pause(&self) {
        let micros = self.inner.latency_micros.load(Ordering::Relaxed);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.inner.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Database> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        self.store.pause().await;
        self.store.check(FaultPoint::Connect)?;
        self.store.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.store.clone(),
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.inner.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Session = MemorySession;

    async fn find_one(&self, collection: Collection, filter: &Filter) -> Result<Option<Document>> {
        let options = FindOptions::default().page(0, 1);
        Ok(self.find(collection, filter, &options).await?.into_iter().next())
    }

    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        self.store.pause().await;
        self.store.check(FaultPoint::Read(collection))?;
        Ok(self.store.read().select(collection, filter, options, None))
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.store.pause().await;
        self.store.check(FaultPoint::Read(collection))?;
        Ok(self.store.read().matching(collection, filter).count() as u64)
    }

    async fn insert_one(&self, collection: Collection, document: Document) -> Result<()> {
        self.store.pause().await;
        self.store.check(FaultPoint::Write(collection))?;
        let id = document_id(&document)?.to_string();
        let mut db = self.store.write();
        let version = db.tick();
        let docs = db.collections.entry(collection).or_default();
        if docs.contains_key(&id) {
            return Err(AppError::Validation(format!("duplicate _id {id} in {collection}")));
        }
        docs.insert(id, Versioned { doc: document, version });
        Ok(())
    }

    async fn update_one(&self, collection: Collection, filter: &Filter, set: Document) -> Result<u64> {
        self.store.pause().await;
        self.store.check(FaultPoint::Write(collection))?;
        let mut db = self.store.write();
        let Some(id) = db.matching(collection, filter).map(|(id, _)| id.clone()).next() else {
            return Ok(0);
        };
        let version = db.tick();
        if let Some(entry) = db.collections.get_mut(&collection).and_then(|docs| docs.get_mut(&id)) {
            entry.doc.extend(set);
            entry.version = version;
        }
        Ok(1)
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.store.pause().await;
        self.store.check(FaultPoint::Write(collection))?;
        Ok(self.store.write().remove_matching(collection, filter, 1))
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.store.pause().await;
        self.store.check(FaultPoint::Write(collection))?;
        Ok(self.store.write().remove_matching(collection, filter, usize::MAX))
    }

    async fn start_transaction(&self, options: TransactionOptions) -> Result<MemorySession> {
        self.store.pause().await;
        let snapshot = match options.read_concern {
            ReadConcern::Snapshot => Some(self.store.read().clone()),
            ReadConcern::Local => None,
        };
        self.store.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            state: Arc::new(SessionState {
                store: self.store.clone(),
                options,
                snapshot,
                pending: Mutex::new(Pending::default()),
            }),
        })
    }
}

#[derive(Default)]
struct Pending {
    /// Documents deleted inside the transaction, with the version seen.
    deletes: HashMap<Collection, HashMap<String, u64>>,
    finished: bool,
}

struct SessionState {
    store: MemoryStore,
    options: TransactionOptions,
    snapshot: Option<Database>,
    pending: Mutex<Pending>,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.store.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transaction handle. Clones share buffered writes and the snapshot.
#[derive(Clone)]
pub struct MemorySession {
    state: Arc<SessionState>,
}

impl MemorySession {
    fn with_view<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        match &self.state.snapshot {
            Some(snapshot) => f(snapshot),
            None => f(&self.state.store.read()),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if lock(&self.state.pending).finished {
            return Err(AppError::TransactionAborted("session already finished".into()));
        }
        Ok(())
    }

    async fn delete_up_to(&self, collection: Collection, filter: &Filter, limit: usize) -> Result<u64> {
        self.ensure_active()?;
        self.state.store.pause().await;
        self.state.store.check(FaultPoint::Write(collection))?;

        let mut pending = lock(&self.state.pending);
        if pending.finished {
            return Err(AppError::TransactionAborted("session already finished".into()));
        }
        let already = pending.deletes.get(&collection).cloned().unwrap_or_default();
        let victims: Vec<(String, u64)> = self.with_view(|db| {
            db.matching(collection, filter)
                .filter(|(id, _)| !already.contains_key(*id))
                .take(limit)
                .map(|(id, entry)| (id.clone(), entry.version))
                .collect()
        });
        let deleted = victims.len() as u64;
        pending.deletes.entry(collection).or_default().extend(victims);
        Ok(deleted)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        self.ensure_active()?;
        self.state.store.pause().await;
        self.state.store.check(FaultPoint::Read(collection))?;
        let hidden = lock(&self.state.pending)
            .deletes
            .get(&collection)
            .cloned()
            .unwrap_or_default();
        Ok(self.with_view(|db| db.select(collection, filter, options, Some(&hidden))))
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.delete_up_to(collection, filter, 1).await
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.delete_up_to(collection, filter, usize::MAX).await
    }

    async fn commit(&self) -> Result<()> {
        self.state.store.pause().await;
        let deletes = {
            let mut pending = lock(&self.state.pending);
            if pending.finished {
                return Err(AppError::TransactionAborted("session already finished".into()));
            }
            pending.finished = true;
            std::mem::take(&mut pending.deletes)
        };
        self.state.store.check(FaultPoint::Commit)?;

        let mut db = self.state.store.write();
        for (collection, victims) in &deletes {
            let live = db.collections.get(collection);
            for (id, seen) in victims {
                let current = live.and_then(|docs| docs.get(id)).map(|entry| entry.version);
                if current != Some(*seen) {
                    return Err(AppError::TransactionAborted(format!(
                        "write conflict on {collection}/{id}"
                    )));
                }
            }
        }
        for (collection, victims) in deletes {
            if let Some(docs) = db.collections.get_mut(&collection) {
                for id in victims.keys() {
                    docs.remove(id);
                }
            }
        }
        db.tick();
        tracing::trace!(write_concern = ?self.state.options.write_concern, "memory transaction committed");
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        let mut pending = lock(&self.state.pending);
        if pending.finished {
            return Err(AppError::TransactionAborted("session already finished".into()));
        }
        pending.finished = true;
        pending.deletes.clear();
        Ok(())
    }
}
