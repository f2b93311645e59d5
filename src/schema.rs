use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use tracing::{error, info, warn};

use crate::backup;
use crate::error::{AppError, AppResult};
use crate::model::Category;

/// Version written to `PRAGMA user_version` once the schema is current.
pub const SCHEMA_VERSION: i64 = 12;

const CREATE_TRIPS: &str = "CREATE TABLE IF NOT EXISTS trips (\
     name TEXT PRIMARY KEY, from_date DATE, to_date DATE, \
     from_timezone TEXT, to_timezone TEXT, \
     miles_new DECIMAL(10, 2) DEFAULT 0.00, \
     trips_comment TEXT, trips_default_currency TEXT, trips_filters TEXT)";

const CREATE_RECEIPTS: &str = "CREATE TABLE IF NOT EXISTS receipts (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, path TEXT, \
     parent TEXT REFERENCES trips ON DELETE CASCADE, \
     name TEXT DEFAULT \"New Receipt\", category TEXT, \
     rcpt_date DATE DEFAULT (DATE('now', 'localtime')), timezone TEXT, \
     comment TEXT, isocode TEXT NOT NULL, \
     price DECIMAL(10, 2) DEFAULT 0.00, tax DECIMAL(10, 2) DEFAULT 0.00, \
     paymentMethodKey INTEGER REFERENCES paymentmethods ON DELETE NO ACTION, \
     expenseable BOOLEAN DEFAULT 1, fullpageimage BOOLEAN DEFAULT 1, \
     extra_edittext_1 TEXT, extra_edittext_2 TEXT, extra_edittext_3 TEXT)";

const CREATE_CATEGORIES: &str = "CREATE TABLE IF NOT EXISTS categories (\
     name TEXT PRIMARY KEY, code TEXT, breakdown BOOLEAN DEFAULT 1)";

const CREATE_CSV_COLUMNS: &str =
    "CREATE TABLE IF NOT EXISTS csvcolumns (id INTEGER PRIMARY KEY AUTOINCREMENT, type TEXT)";

const CREATE_PDF_COLUMNS: &str =
    "CREATE TABLE IF NOT EXISTS pdfcolumns (id INTEGER PRIMARY KEY AUTOINCREMENT, type TEXT)";

const CREATE_PAYMENT_METHODS: &str =
    "CREATE TABLE IF NOT EXISTS paymentmethods (id INTEGER PRIMARY KEY AUTOINCREMENT, method TEXT)";

/// Stock rows inserted into freshly created lookup tables.
pub trait TableDefaults: Send + Sync {
    fn categories(&self) -> Vec<Category>;
    fn csv_columns(&self) -> Vec<String>;
    fn pdf_columns(&self) -> Vec<String>;
    fn payment_methods(&self) -> Vec<String>;
}

/// The stock category, export-column, and payment-method sets.
pub struct StandardDefaults;

impl TableDefaults for StandardDefaults {
    fn categories(&self) -> Vec<Category> {
        [
            ("Airfare", "AIRP"),
            ("Breakfast", "BRFT"),
            ("Car Rental", "RCAR"),
            ("Dinner", "DINN"),
            ("Entertainment", "ENT"),
            ("Gasoline", "GAS"),
            ("Gift", "GIFT"),
            ("Hotel", "HTL"),
            ("Laundry", "LAUN"),
            ("Lunch", "LNCH"),
            ("Other", "MISC"),
            ("Parking/Tolls", "PARK"),
            ("Postage/Shipping", "POST"),
            ("Taxi/Bus", "TAXS"),
            ("Telephone/Fax", "TELE"),
            ("Tip", "TIP"),
            ("Train", "TRN"),
        ]
        .into_iter()
        .map(|(name, code)| Category::new(name, code))
        .collect()
    }

    fn csv_columns(&self) -> Vec<String> {
        ["Category Code", "Name", "Price", "Currency", "Date"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn pdf_columns(&self) -> Vec<String> {
        ["Name", "Price", "Date", "Category Name", "Comment"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn payment_methods(&self) -> Vec<String> {
        ["Cash", "Check", "Corporate Card", "Personal Card"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.len() > 160 {
        format!("{}…", &trimmed[..160])
    } else {
        trimmed.to_string()
    }
}

static ADD_COL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+(\w+)").unwrap_or_else(|e| {
        // The pattern is a literal; this cannot fail at runtime.
        panic!("invalid add-column pattern: {e}")
    })
});

/// Executes one schema statement. `ALTER TABLE ... ADD` statements are
/// skipped when `pragma_table_info` shows the column already exists, so a
/// partially upgraded file can re-run the ladder safely.
async fn execute_stmt(pool: &SqlitePool, sql: &str) -> AppResult<()> {
    if let Some(caps) = ADD_COL_RE.captures(sql) {
        let table = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let col = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let exists: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT 1 FROM pragma_table_info('{table}') WHERE name='{col}'"
        ))
        .fetch_optional(pool)
        .await?;
        if exists.is_some() {
            info!(target = "tripledger", event = "migration_stmt_skip", sql = %preview(sql));
            return Ok(());
        }
    }
    info!(target = "tripledger", event = "migration_stmt", sql = %preview(sql));
    if let Err(e) = sqlx::query(sql).execute(pool).await {
        error!(target = "tripledger", event = "migration_stmt_error", sql = %preview(sql), error = %e);
        return Err(e.into());
    }
    Ok(())
}

async fn user_version(pool: &SqlitePool) -> AppResult<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

async fn set_user_version(pool: &SqlitePool, version: i64) -> AppResult<()> {
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(pool)
        .await?;
    Ok(())
}

async fn table_is_empty(pool: &SqlitePool, table: &str) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count == 0)
}

async fn seed_categories(pool: &SqlitePool, defaults: &dyn TableDefaults) -> AppResult<()> {
    if !table_is_empty(pool, "categories").await? {
        return Ok(());
    }
    for category in defaults.categories() {
        sqlx::query("INSERT INTO categories (name, code, breakdown) VALUES (?, ?, ?)")
            .bind(&category.name)
            .bind(&category.code)
            .bind(i64::from(category.breakdown))
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn seed_columns(pool: &SqlitePool, table: &str, columns: Vec<String>) -> AppResult<()> {
    if !table_is_empty(pool, table).await? {
        return Ok(());
    }
    for column in columns {
        sqlx::query(&format!("INSERT INTO {table} (type) VALUES (?)"))
            .bind(column)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn seed_payment_methods(pool: &SqlitePool, defaults: &dyn TableDefaults) -> AppResult<()> {
    if !table_is_empty(pool, "paymentmethods").await? {
        return Ok(());
    }
    for method in defaults.payment_methods() {
        sqlx::query("INSERT INTO paymentmethods (method) VALUES (?)")
            .bind(method)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub(crate) fn last_path_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// The v6 data migration: legacy files stored absolute directory paths in
/// `trips.name` / `receipts.parent` / `receipts.path`; reduce each to its
/// final segment. Per-row best effort: a failed row is logged and skipped.
async fn rewrite_legacy_paths(pool: &SqlitePool) -> AppResult<()> {
    // The parent column references trips.name, so the rewrite must commit
    // both sides together with FK checks deferred to the commit.
    let mut tx = pool.begin().await?;
    sqlx::query("PRAGMA defer_foreign_keys = ON")
        .execute(&mut *tx)
        .await?;

    let trip_rows = sqlx::query("SELECT name FROM trips").fetch_all(&mut *tx).await?;
    for row in &trip_rows {
        let abs: String = match row.try_get("name") {
            Ok(name) => name,
            Err(e) => {
                warn!(target = "tripledger", event = "path_rewrite_row_skipped", error = %e);
                continue;
            }
        };
        let rel = last_path_segment(&abs);
        if rel == abs {
            continue;
        }
        if let Err(e) = sqlx::query("UPDATE trips SET name = ? WHERE name = ?")
            .bind(rel)
            .bind(&abs)
            .execute(&mut *tx)
            .await
        {
            warn!(target = "tripledger", event = "path_rewrite_row_skipped", trip = %abs, error = %e);
        }
    }

    let receipt_rows = sqlx::query("SELECT id, parent, path FROM receipts")
        .fetch_all(&mut *tx)
        .await?;
    for row in &receipt_rows {
        let decoded: Result<(i64, String, Option<String>), sqlx::Error> = (|| {
            Ok((row.try_get("id")?, row.try_get("parent")?, row.try_get("path")?))
        })();
        let (id, parent, path) = match decoded {
            Ok(values) => values,
            Err(e) => {
                warn!(target = "tripledger", event = "path_rewrite_row_skipped", error = %e);
                continue;
            }
        };
        let rel_parent = last_path_segment(&parent).to_string();
        let rel_path = path.as_deref().and_then(|p| {
            if p.eq_ignore_ascii_case(crate::model::NO_DATA) {
                None
            } else {
                Some(last_path_segment(p).to_string())
            }
        });
        let result = match rel_path {
            Some(rel_path) => {
                sqlx::query("UPDATE receipts SET parent = ?, path = ? WHERE id = ?")
                    .bind(&rel_parent)
                    .bind(&rel_path)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
            }
            None => {
                sqlx::query("UPDATE receipts SET parent = ? WHERE id = ?")
                    .bind(&rel_parent)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(target = "tripledger", event = "path_rewrite_row_skipped", receipt = id, error = %e);
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Brings the store file to the current schema version.
///
/// A fresh file (user_version 0) is created whole and seeded through the
/// `TableDefaults` hooks. An older file walks the cumulative upgrade ladder;
/// before any DDL a best-effort copy of the file is parked next to it as
/// `<name>.<oldVersion>.bak`.
pub(crate) async fn ensure_schema(
    pool: &SqlitePool,
    db_path: &Path,
    defaults: &dyn TableDefaults,
    default_currency: &str,
) -> AppResult<()> {
    let old_version = user_version(pool).await?;
    if old_version >= SCHEMA_VERSION {
        info!(target = "tripledger", event = "schema_current", version = old_version);
        return Ok(());
    }

    if old_version == 0 {
        info!(target = "tripledger", event = "schema_create", version = SCHEMA_VERSION);
        for sql in [
            CREATE_TRIPS,
            CREATE_PAYMENT_METHODS,
            CREATE_RECEIPTS,
            CREATE_CATEGORIES,
            CREATE_CSV_COLUMNS,
            CREATE_PDF_COLUMNS,
        ] {
            execute_stmt(pool, sql).await?;
        }
        seed_categories(pool, defaults).await?;
        seed_columns(pool, "csvcolumns", defaults.csv_columns()).await?;
        seed_columns(pool, "pdfcolumns", defaults.pdf_columns()).await?;
        seed_payment_methods(pool, defaults).await?;
        set_user_version(pool, SCHEMA_VERSION).await?;
        return Ok(());
    }

    info!(
        target = "tripledger",
        event = "schema_upgrade",
        from = old_version,
        to = SCHEMA_VERSION
    );
    backup::upgrade_backup(db_path, old_version);

    if old_version <= 1 {
        // NOT NULL needs a default for the existing rows.
        execute_stmt(
            pool,
            &format!(
                "ALTER TABLE receipts ADD isocode TEXT NOT NULL DEFAULT '{default_currency}'"
            ),
        )
        .await?;
    }
    if old_version <= 2 {
        execute_stmt(pool, "ALTER TABLE categories ADD breakdown BOOLEAN DEFAULT 1").await?;
        execute_stmt(pool, CREATE_CSV_COLUMNS).await?;
        seed_columns(pool, "csvcolumns", defaults.csv_columns()).await?;
    }
    if old_version <= 3 {
        execute_stmt(pool, "ALTER TABLE receipts ADD extra_edittext_1 TEXT").await?;
        execute_stmt(pool, "ALTER TABLE receipts ADD extra_edittext_2 TEXT").await?;
        execute_stmt(pool, "ALTER TABLE receipts ADD extra_edittext_3 TEXT").await?;
    }
    if old_version <= 4 {
        execute_stmt(pool, "ALTER TABLE trips ADD miles_new DECIMAL(10, 2) DEFAULT 0.00").await?;
        execute_stmt(pool, "ALTER TABLE receipts ADD tax DECIMAL(10, 2) DEFAULT 0.00").await?;
    }
    // Version 5 shipped without schema changes.
    if old_version <= 6 {
        rewrite_legacy_paths(pool).await?;
    }
    if old_version <= 7 {
        execute_stmt(pool, "ALTER TABLE receipts ADD timezone TEXT").await?;
    }
    if old_version <= 8 {
        execute_stmt(pool, "ALTER TABLE trips ADD from_timezone TEXT").await?;
        execute_stmt(pool, "ALTER TABLE trips ADD to_timezone TEXT").await?;
    }
    if old_version <= 9 {
        execute_stmt(pool, CREATE_PDF_COLUMNS).await?;
        seed_columns(pool, "pdfcolumns", defaults.pdf_columns()).await?;
    }
    if old_version <= 10 {
        execute_stmt(pool, "ALTER TABLE trips ADD trips_comment TEXT").await?;
        execute_stmt(pool, "ALTER TABLE trips ADD trips_default_currency TEXT").await?;
    }
    if old_version <= 11 {
        execute_stmt(pool, CREATE_PAYMENT_METHODS).await?;
        seed_payment_methods(pool, defaults).await?;
        execute_stmt(pool, "ALTER TABLE trips ADD trips_filters TEXT").await?;
        execute_stmt(
            pool,
            "ALTER TABLE receipts ADD paymentMethodKey INTEGER REFERENCES paymentmethods ON DELETE NO ACTION",
        )
        .await?;
    }

    set_user_version(pool, SCHEMA_VERSION).await?;
    info!(target = "tripledger", event = "schema_upgraded", version = SCHEMA_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_strips_directories_and_trailing_slash() {
        assert_eq!(last_path_segment("/mnt/sdcard/receipts/Paris/"), "Paris");
        assert_eq!(last_path_segment("/mnt/sdcard/receipts/Paris"), "Paris");
        assert_eq!(last_path_segment("Paris"), "Paris");
    }

    #[test]
    fn add_column_pattern_matches_the_ladder_statements() {
        let caps = ADD_COL_RE
            .captures("ALTER TABLE receipts ADD timezone TEXT")
            .expect("match");
        assert_eq!(&caps[1], "receipts");
        assert_eq!(&caps[2], "timezone");
        assert!(ADD_COL_RE.captures(CREATE_TRIPS).is_none());
    }

    #[test]
    fn preview_truncates_long_statements() {
        let long = "SELECT ".repeat(60);
        assert!(preview(&long).chars().count() <= 161);
        assert_eq!(preview("SELECT\t1\n"), "SELECT 1");
    }
}
