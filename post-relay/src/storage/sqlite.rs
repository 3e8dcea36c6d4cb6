//! SQLite storage backend for the relay.

use super::PeerRecord;
use crate::error::StoreError;
use chrono::NaiveDate;
use post_types::UserId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Date format used for the `servers.refetch_date` column and the
/// federation info endpoint.
pub const REFETCH_DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store for users, peers, and the server keypair.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("relay.db"))
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                public_key BLOB NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                url TEXT PRIMARY KEY,
                public_key BLOB NOT NULL UNIQUE,
                refetch_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS our_keys (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                public_key BLOB NOT NULL UNIQUE,
                private_key BLOB NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    /// Insert a freshly registered user.
    ///
    /// Uniqueness violations (id or public key already taken) surface as
    /// [`StoreError::UniqueViolation`].
    pub async fn create_user(&self, id: &UserId, public_key: &[u8]) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, public_key, created_at) VALUES (?1, ?2, ?3)")
            .bind(id.as_str())
            .bind(public_key)
            .bind(Self::current_timestamp())
            .execute(&self.pool)
            .await
            .map_err(map_unique)?;
        Ok(())
    }

    /// Whether a user id is registered.
    pub async fn user_exists(&self, id: &UserId) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?1")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(count > 0)
    }

    /// The public key bound to a user id.
    pub async fn user_public_key(&self, id: &UserId) -> Result<Option<Vec<u8>>, StoreError> {
        sqlx::query_scalar("SELECT public_key FROM users WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)
    }

    /// The user id a public key is bound to, if any.
    pub async fn user_id_for_key(&self, public_key: &[u8]) -> Result<Option<UserId>, StoreError> {
        let row: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE public_key = ?1")
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        row.map(|s| {
            s.parse::<UserId>()
                .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
        })
        .transpose()
    }

    /// Number of registered users.
    pub async fn user_count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)
    }

    /// Insert or refresh a federation peer's trust material.
    pub async fn upsert_peer(&self, peer: &PeerRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO servers (url, public_key, refetch_date)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(url) DO UPDATE SET
                public_key = excluded.public_key,
                refetch_date = excluded.refetch_date
            "#,
        )
        .bind(&peer.url)
        .bind(&peer.public_key)
        .bind(peer.refetch_date.format(REFETCH_DATE_FORMAT).to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    /// Fetch a peer's pinned trust material.
    pub async fn peer(&self, url: &str) -> Result<Option<PeerRecord>, StoreError> {
        let row = sqlx::query_as::<_, PeerRow>(
            "SELECT url, public_key, refetch_date FROM servers WHERE url = ?1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        row.map(PeerRecord::try_from).transpose()
    }

    /// Number of known federation peers.
    pub async fn peer_count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM servers")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)
    }

    /// Load the relay's own signing keypair as `(public, private)` bytes.
    pub async fn server_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(
            "SELECT public_key, private_key FROM our_keys WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)
    }

    /// Persist the relay's signing keypair. Called once, at first startup.
    pub async fn store_server_keys(
        &self,
        public_key: &[u8],
        private_key: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO our_keys (id, public_key, private_key, created_at) VALUES (1, ?1, ?2, ?3)",
        )
        .bind(public_key)
        .bind(private_key)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;
        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation {
            constraint: db.message().to_string(),
        },
        _ => StoreError::Database(e),
    }
}

/// Internal row type for peer queries.
#[derive(sqlx::FromRow)]
struct PeerRow {
    url: String,
    public_key: Vec<u8>,
    refetch_date: String,
}

impl TryFrom<PeerRow> for PeerRecord {
    type Error = StoreError;

    fn try_from(row: PeerRow) -> Result<Self, Self::Error> {
        let refetch_date = NaiveDate::parse_from_str(&row.refetch_date, REFETCH_DATE_FORMAT)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
        Ok(PeerRecord {
            url: row.url,
            public_key: row.public_key,
            refetch_date,
        })
    }
}
