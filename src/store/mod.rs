use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::db;
use crate::error::AppResult;
use crate::model::{Category, ColumnReport, PaymentMethod, Receipt, ReportColumn, Trip};
use crate::schema::{self, StandardDefaults, TableDefaults};
use crate::storage::{
    AttachmentStore, FsAttachmentStore, LogSink, NullLogSink, Preferences, StaticPreferences,
};

mod autocomplete;
mod lookups;
mod parallel;
mod receipts;
mod trips;

pub use autocomplete::{AutoCompleteField, ReceiptHint};
pub use lookups::CURRENCY_CODES;
pub use receipts::CategoryCost;

/// Everything `ReceiptStore::open` needs: the store file location plus the
/// external collaborators. The defaults are filesystem attachments next to
/// the store file, fixed preferences, and no merge log.
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub attachments: Arc<dyn AttachmentStore>,
    pub preferences: Arc<dyn Preferences>,
    pub log_sink: Arc<dyn LogSink>,
    pub defaults: Arc<dyn TableDefaults>,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        let base = db_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        StoreConfig {
            db_path,
            attachments: Arc::new(FsAttachmentStore::new(base)),
            preferences: Arc::new(StaticPreferences::default()),
            log_sink: Arc::new(NullLogSink),
            defaults: Arc::new(StandardDefaults),
        }
    }

    pub fn with_attachments(mut self, attachments: Arc<dyn AttachmentStore>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn Preferences>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    pub fn with_defaults(mut self, defaults: Arc<dyn TableDefaults>) -> Self {
        self.defaults = defaults;
        self
    }
}

pub(crate) struct TripListCache {
    pub(crate) valid: bool,
    pub(crate) snapshot: Arc<Vec<Trip>>,
}

pub(crate) struct StoreInner {
    pub(crate) pool: SqlitePool,
    pub(crate) db_path: PathBuf,
    /// Outermost lock: every engine access holds it. Cache mutexes are only
    /// ever taken while holding this one or for a pure cache read; never the
    /// reverse order.
    pub(crate) db_lock: AsyncMutex<()>,
    pub(crate) trips_cache: StdMutex<TripListCache>,
    pub(crate) receipts_cache: StdMutex<HashMap<String, Arc<Vec<Receipt>>>>,
    pub(crate) categories_cache: StdMutex<Option<Arc<Vec<Category>>>>,
    pub(crate) payment_methods_cache: StdMutex<Option<Arc<Vec<PaymentMethod>>>>,
    pub(crate) columns_cache: StdMutex<HashMap<ColumnReport, Arc<Vec<ReportColumn>>>>,
    pub(crate) next_receipt_id: StdMutex<Option<i64>>,
    pub(crate) attachments: Arc<dyn AttachmentStore>,
    pub(crate) preferences: Arc<dyn Preferences>,
    pub(crate) log_sink: Arc<dyn LogSink>,
}

/// The synchronized access facade over the store file.
///
/// Cheap to clone; all clones share the pool, the locks, and the caches.
/// Serial operations are plain `async fn`s; every mutating or querying call
/// serializes on the internal engine lock, so callers may share a store
/// across tasks freely.
#[derive(Clone)]
pub struct ReceiptStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl ReceiptStore {
    /// Opens the store file, bringing its schema to the current version
    /// first (creating and seeding a fresh file when needed).
    pub async fn open(config: StoreConfig) -> AppResult<Self> {
        let pool = db::open_sqlite_pool(&config.db_path).await?;
        schema::ensure_schema(
            &pool,
            &config.db_path,
            config.defaults.as_ref(),
            &config.preferences.default_currency_code(),
        )
        .await?;
        info!(target = "tripledger", event = "store_open", path = %config.db_path.display());
        Ok(ReceiptStore {
            inner: Arc::new(StoreInner {
                pool,
                db_path: config.db_path,
                db_lock: AsyncMutex::new(()),
                trips_cache: StdMutex::new(TripListCache {
                    valid: false,
                    snapshot: Arc::new(Vec::new()),
                }),
                receipts_cache: StdMutex::new(HashMap::new()),
                categories_cache: StdMutex::new(None),
                payment_methods_cache: StdMutex::new(None),
                columns_cache: StdMutex::new(HashMap::new()),
                next_receipt_id: StdMutex::new(None),
                attachments: config.attachments,
                preferences: config.preferences,
                log_sink: config.log_sink,
            }),
        })
    }

    /// Closes the connection pool. Outstanding clones keep working until
    /// their next engine access, which will fail with a pool-closed error.
    pub async fn close(&self) {
        info!(target = "tripledger", event = "store_close", path = %self.inner.db_path.display());
        self.inner.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub(crate) fn lock_cache<'a, T>(&self, cache: &'a StdMutex<T>) -> StdMutexGuard<'a, T> {
        cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn invalidate_trips(&self) {
        self.lock_cache(&self.inner.trips_cache).valid = false;
    }

    pub(crate) fn invalidate_receipts(&self, trip_name: &str) {
        self.lock_cache(&self.inner.receipts_cache).remove(trip_name);
    }

    /// Drops every cache; the next read of each rebuilds from the engine.
    pub(crate) fn invalidate_all(&self) {
        self.invalidate_trips();
        self.lock_cache(&self.inner.receipts_cache).clear();
        *self.lock_cache(&self.inner.categories_cache) = None;
        *self.lock_cache(&self.inner.payment_methods_cache) = None;
        self.lock_cache(&self.inner.columns_cache).clear();
        *self.lock_cache(&self.inner.next_receipt_id) = None;
    }
}
