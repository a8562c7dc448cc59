//! # sb-db-sqlite Implementation
//!
//! Document storage on SQLite through `sqlx`. Each collection is one table of
//! JSON documents (see [`sql`]). The database runs in WAL mode so readers on
//! other connections keep seeing the last committed state while a cascade
//! holds its write transaction.
//!
//! Read concern `Snapshot` opens the transaction with `BEGIN IMMEDIATE`, which
//! pins one consistent view for every read in it. Write concern `Majority`
//! switches the connection to `synchronous = FULL` so a commit is on disk
//! before it is acknowledged.

mod sql;

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sb_core::{
    document_id, AppError, Collection, Connection, Connector, Document, Filter, FindOptions, ReadConcern, Result,
    Session, TransactionOptions, WriteConcern,
};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Executor, Row};
use tokio::sync::Mutex;

use sql::{Param, Statement};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage_error(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation(format!("duplicate _id: {db}"))
        }
        other => AppError::StorageUnavailable(other.to_string()),
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<Param>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Param::Text(text) => query.bind(text),
            Param::Integer(int) => query.bind(int),
            Param::Real(real) => query.bind(real),
            Param::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

fn parse_document(raw: &str) -> Result<Document> {
    match serde_json::from_str(raw)? {
        Value::Object(doc) => Ok(doc),
        other => Err(AppError::StorageUnavailable(format!("stored document is not an object: {other}"))),
    }
}

async fn fetch_documents(conn: &mut SqliteConnection, stmt: Statement) -> Result<Vec<Document>> {
    let rows = bind_all(sqlx::query(&stmt.sql), stmt.params)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage_error)?;
    rows.iter()
        .map(|row| {
            let raw: String = row.try_get("doc").map_err(storage_error)?;
            parse_document(&raw)
        })
        .collect()
}

async fn execute(conn: &mut SqliteConnection, stmt: Statement) -> Result<u64> {
    let done = bind_all(sqlx::query(&stmt.sql), stmt.params)
        .execute(&mut *conn)
        .await
        .map_err(storage_error)?;
    Ok(done.rows_affected())
}

/// Unprepared statement: pragmas and transaction control.
async fn raw(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await.map_err(storage_error)?;
    Ok(())
}

/// Opens connections to one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self {
            options: options
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT),
        }
    }

    /// Accepts `sqlite://path/to.db` style URLs.
    pub fn from_url(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|err| AppError::Connection(format!("invalid sqlite url: {err}")))?;
        Ok(Self::new(options))
    }

    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(SqliteConnectOptions::new().filename(path))
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Connection = SqliteDocConnection;

    async fn connect(&self) -> Result<SqliteDocConnection> {
        let mut conn = self
            .options
            .connect()
            .await
            .map_err(|err| AppError::Connection(err.to_string()))?;
        for collection in Collection::ALL {
            raw(&mut conn, &sql::create_table(collection)).await?;
        }
        Ok(SqliteDocConnection {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                in_transaction: AtomicBool::new(false),
            }),
        })
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[derive(Debug)]
struct Shared {
    conn: Mutex<SqliteConnection>,
    /// Set between BEGIN and a successful COMMIT/ROLLBACK.
    in_transaction: AtomicBool,
}

pub struct SqliteDocConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for SqliteDocConnection {
    type Session = SqliteSession;

    async fn find_one(&self, collection: Collection, filter: &Filter) -> Result<Option<Document>> {
        let options = FindOptions::default().page(0, 1);
        Ok(self.find(collection, filter, &options).await?.into_iter().next())
    }

    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        let stmt = sql::select(collection, filter, options)?;
        fetch_documents(&mut *self.shared.conn.lock().await, stmt).await
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        let stmt = sql::count(collection, filter)?;
        let mut conn = self.shared.conn.lock().await;
        let count: i64 = bind_all(sqlx::query(&stmt.sql), stmt.params)
            .fetch_one(&mut *conn)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(storage_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert_one(&self, collection: Collection, document: Document) -> Result<()> {
        let stmt = sql::insert(collection, document_id(&document)?, &document)?;
        execute(&mut *self.shared.conn.lock().await, stmt).await?;
        Ok(())
    }

    async fn update_one(&self, collection: Collection, filter: &Filter, set: Document) -> Result<u64> {
        let stmt = sql::update_one(collection, filter, &set)?;
        execute(&mut *self.shared.conn.lock().await, stmt).await
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        let stmt = sql::delete(collection, filter, true)?;
        execute(&mut *self.shared.conn.lock().await, stmt).await
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        let stmt = sql::delete(collection, filter, false)?;
        execute(&mut *self.shared.conn.lock().await, stmt).await
    }

    async fn start_transaction(&self, options: TransactionOptions) -> Result<SqliteSession> {
        let mut conn = self.shared.conn.lock().await;
        if self.shared.in_transaction.load(Ordering::SeqCst) {
            return Err(AppError::TransactionAborted("connection already has an open transaction".into()));
        }

        let synchronous = match options.write_concern {
            WriteConcern::Majority => "PRAGMA synchronous = FULL",
            WriteConcern::Acknowledged => "PRAGMA synchronous = NORMAL",
        };
        raw(&mut conn, synchronous).await?;
        let begin = match options.read_concern {
            ReadConcern::Snapshot => "BEGIN IMMEDIATE",
            ReadConcern::Local => "BEGIN DEFERRED",
        };
        raw(&mut conn, begin).await?;
        self.shared.in_transaction.store(true, Ordering::SeqCst);

        Ok(SqliteSession {
            state: Arc::new(SessionState {
                shared: Arc::clone(&self.shared),
                finished: AtomicBool::new(false),
            }),
        })
    }

    /// A transaction left open by a dropped session is only rolled back by
    /// closing the connection.
    fn is_reusable(&self) -> bool {
        !self.shared.in_transaction.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SessionState {
    shared: Arc<Shared>,
    finished: AtomicBool,
}

/// Transaction on one SQLite connection. Clones queue on the same
/// connection, so concurrent tasks write into the same transaction.
#[derive(Debug, Clone)]
pub struct SqliteSession {
    state: Arc<SessionState>,
}

impl SqliteSession {
    fn ensure_active(&self) -> Result<()> {
        if self.state.finished.load(Ordering::SeqCst) {
            return Err(AppError::TransactionAborted("session already finished".into()));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.state.finished.swap(true, Ordering::SeqCst) {
            return Err(AppError::TransactionAborted("session already finished".into()));
        }
        Ok(())
    }

    async fn end(&self, statement: &str) -> Result<()> {
        self.finish()?;
        let mut conn = self.state.shared.conn.lock().await;
        raw(&mut conn, statement).await?;
        self.state.shared.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        self.ensure_active()?;
        let stmt = sql::select(collection, filter, options)?;
        fetch_documents(&mut *self.state.shared.conn.lock().await, stmt).await
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.ensure_active()?;
        let stmt = sql::delete(collection, filter, true)?;
        execute(&mut *self.state.shared.conn.lock().await, stmt).await
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.ensure_active()?;
        let stmt = sql::delete(collection, filter, false)?;
        execute(&mut *self.state.shared.conn.lock().await, stmt).await
    }

    async fn commit(&self) -> Result<()> {
        self.end("COMMIT").await?;
        tracing::trace!("sqlite transaction committed");
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.end("ROLLBACK").await
    }
}
