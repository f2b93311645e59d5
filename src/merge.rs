use std::path::Path;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, Sqlite, SqliteConnection};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::schema::last_path_segment;
use crate::store::ReceiptStore;

/// Logical id of the user-visible merge report handed to the `LogSink`.
pub const IMPORT_LOG: &str = "import.log";

/// Package ids of the two legacy app flavors whose absolute paths may still
/// appear in old store files.
const LEGACY_PACKAGE_FREE: &str = "wb.receipts";
const LEGACY_PACKAGE_PRO: &str = "wb.receiptspro";

/// Rewrites a legacy absolute path toward `package_name`'s flavor, then
/// reduces it to its final segment. Values without a legacy package id pass
/// through untouched.
fn rewrite_legacy_value(value: &str, package_name: &str) -> String {
    if !value.contains(LEGACY_PACKAGE_FREE) {
        return value.to_string();
    }
    let swapped = if package_name.eq_ignore_ascii_case(LEGACY_PACKAGE_FREE) {
        value.replace("wb.receiptspro/", "wb.receipts/")
    } else if package_name.eq_ignore_ascii_case(LEGACY_PACKAGE_PRO) {
        value.replace("wb.receipts/", "wb.receiptspro/")
    } else {
        value.to_string()
    };
    last_path_segment(&swapped).to_string()
}

/// Lenient column reads for the source file, whose schema may predate any
/// number of upgrades. A missing column yields the default instead of
/// failing the row.
fn source_text(row: &SqliteRow, col: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(col).ok().flatten()
}

fn source_i64(row: &SqliteRow, col: &str, default: i64) -> i64 {
    row.try_get::<Option<i64>, _>(col).ok().flatten().unwrap_or(default)
}

impl ReceiptStore {
    /// Merges another store file into this one.
    ///
    /// Table order is fixed: trips, receipts, categories, csvcolumns,
    /// pdfcolumns, paymentmethods. Trips and receipts reconcile on their
    /// natural keys with `overwrite` picking replace-vs-keep; the lookup
    /// tables are cleared and repopulated from the source. A failed table is
    /// reported to the log sink and the merge moves on; only an unopenable
    /// source or a source without payment methods fails the merge outright.
    pub async fn merge(
        &self,
        source_path: &Path,
        package_name: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        let _guard = self.inner.db_lock.lock().await;
        self.invalidate_all();
        info!(
            target = "tripledger",
            event = "merge_start",
            source = %source_path.display(),
            overwrite
        );
        self.report(&format!("Merging database from {}", source_path.display()));

        let mut source = SqliteConnectOptions::new()
            .filename(source_path)
            .create_if_missing(false)
            .read_only(true)
            .connect()
            .await
            .map_err(|e| {
                let err = AppError::from(e)
                    .with_context("operation", "merge")
                    .with_context("source", source_path.display().to_string());
                self.report(&format!("Failed to open source database: {err}"));
                err
            })?;

        let mut dest = self.pool().acquire().await?;
        // Legacy files reference rows across tables in source-id order; the
        // fixed table order re-creates lookups after the rows that point at
        // them, so constraints are checked only once the merge settles.
        sqlx::query("PRAGMA foreign_keys=OFF")
            .execute(&mut *dest)
            .await?;
        let result = self
            .merge_tables(&mut source, &mut dest, package_name, overwrite)
            .await;
        let _ = sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&mut *dest)
            .await;
        let _ = source.close().await;

        match &result {
            Ok(()) => {
                self.report("Success");
                info!(target = "tripledger", event = "merge_done");
            }
            Err(e) => {
                self.report(&format!("Merge failed: {e}"));
                warn!(target = "tripledger", event = "merge_failed", error = %e);
            }
        }
        result
    }

    async fn merge_tables(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
        package_name: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        if let Err(e) = self.merge_trips(source, dest, package_name, overwrite).await {
            self.report(&format!("Failed to merge trips: {e}"));
        }
        if let Err(e) = self
            .merge_receipts(source, dest, package_name, overwrite)
            .await
        {
            self.report(&format!("Failed to merge receipts: {e}"));
        }
        if let Err(e) = self.merge_categories(source, dest).await {
            self.report(&format!("Failed to merge categories: {e}"));
        }
        if let Err(e) = self.merge_columns(source, dest, "csvcolumns").await {
            self.report(&format!("Failed to merge csv columns: {e}"));
        }
        if let Err(e) = self.merge_columns(source, dest, "pdfcolumns").await {
            self.report(&format!("Failed to merge pdf columns: {e}"));
        }
        // Payment methods are load-bearing: receipts point at their ids, so
        // a source without them is not a usable import.
        self.merge_payment_methods(source, dest).await
    }

    async fn merge_trips(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
        package_name: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        self.report("Merging trips");
        let rows = sqlx::query("SELECT * FROM trips ORDER BY to_date DESC")
            .fetch_all(&mut *source)
            .await?;
        let verb = if overwrite { "REPLACE" } else { "IGNORE" };
        for row in &rows {
            let name = rewrite_legacy_value(
                &source_text(row, "name").unwrap_or_default(),
                package_name,
            );
            let sql = format!(
                "INSERT OR {verb} INTO trips \
                 (name, from_date, to_date, miles_new, from_timezone, to_timezone) \
                 VALUES (?, ?, ?, ?, ?, ?)"
            );
            sqlx::query(&sql)
                .bind(&name)
                .bind(source_i64(row, "from_date", 0))
                .bind(source_i64(row, "to_date", 0))
                .bind(source_i64(row, "miles_new", 0))
                .bind(source_text(row, "from_timezone"))
                .bind(source_text(row, "to_timezone"))
                .execute(&mut **dest)
                .await?;
        }
        Ok(())
    }

    async fn merge_receipts(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
        package_name: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        self.report("Merging receipts");
        let rows = sqlx::query("SELECT * FROM receipts")
            .fetch_all(&mut *source)
            .await?;
        for row in &rows {
            let path = rewrite_legacy_value(
                &source_text(row, "path").unwrap_or_default(),
                package_name,
            );
            let parent = rewrite_legacy_value(
                &source_text(row, "parent").unwrap_or_default(),
                package_name,
            );
            let name = source_text(row, "name").unwrap_or_default();
            let date = source_i64(row, "rcpt_date", 0);
            let category = source_text(row, "category").unwrap_or_default();
            let price = source_text(row, "price").unwrap_or_default();
            let tax = source_text(row, "tax").unwrap_or_else(|| "0".to_string());
            let comment = source_text(row, "comment").unwrap_or_default();
            let expensable = source_i64(row, "expenseable", 1);
            let currency = source_text(row, "isocode")
                .unwrap_or_else(|| self.inner.preferences.default_currency_code());
            let not_full_page = source_i64(row, "fullpageimage", 0);
            let extra_1 = source_text(row, "extra_edittext_1");
            let extra_2 = source_text(row, "extra_edittext_2");
            let extra_3 = source_text(row, "extra_edittext_3");
            let timezone = source_text(row, "timezone");
            let payment_method = match source_i64(row, "paymentMethodKey", 0) {
                0 => None,
                id => Some(id),
            };

            // Natural key for cross-copy reconciliation.
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM receipts WHERE path = ? AND name = ? AND rcpt_date = ?",
            )
            .bind(&path)
            .bind(&name)
            .bind(date)
            .fetch_optional(&mut **dest)
            .await?;

            match existing {
                Some((id,)) if overwrite => {
                    sqlx::query(
                        "UPDATE receipts SET path = ?, name = ?, parent = ?, category = ?, \
                         price = ?, rcpt_date = ?, comment = ?, expenseable = ?, isocode = ?, \
                         fullpageimage = ?, extra_edittext_1 = ?, extra_edittext_2 = ?, \
                         extra_edittext_3 = ?, tax = ?, timezone = ?, paymentMethodKey = ? \
                         WHERE id = ?",
                    )
                    .bind(&path)
                    .bind(&name)
                    .bind(&parent)
                    .bind(&category)
                    .bind(&price)
                    .bind(date)
                    .bind(&comment)
                    .bind(expensable)
                    .bind(&currency)
                    .bind(not_full_page)
                    .bind(&extra_1)
                    .bind(&extra_2)
                    .bind(&extra_3)
                    .bind(&tax)
                    .bind(&timezone)
                    .bind(payment_method)
                    .bind(id)
                    .execute(&mut **dest)
                    .await?;
                }
                Some(_) => {} // Keep the existing copy.
                None => {
                    sqlx::query(
                        "INSERT INTO receipts (path, name, parent, category, price, rcpt_date, \
                         comment, expenseable, isocode, fullpageimage, extra_edittext_1, \
                         extra_edittext_2, extra_edittext_3, tax, timezone, paymentMethodKey) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&path)
                    .bind(&name)
                    .bind(&parent)
                    .bind(&category)
                    .bind(&price)
                    .bind(date)
                    .bind(&comment)
                    .bind(expensable)
                    .bind(&currency)
                    .bind(not_full_page)
                    .bind(&extra_1)
                    .bind(&extra_2)
                    .bind(&extra_3)
                    .bind(&tax)
                    .bind(&timezone)
                    .bind(payment_method)
                    .execute(&mut **dest)
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Lookup rows have no stable identity across copies, so the source set
    /// wins wholesale once it is known to exist.
    async fn merge_categories(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
    ) -> AppResult<()> {
        self.report("Merging categories");
        let rows = sqlx::query("SELECT * FROM categories")
            .fetch_all(&mut *source)
            .await?;
        if rows.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM categories").execute(&mut **dest).await?;
        for row in &rows {
            sqlx::query("INSERT INTO categories (name, code, breakdown) VALUES (?, ?, ?)")
                .bind(source_text(row, "name").unwrap_or_default())
                .bind(source_text(row, "code").unwrap_or_default())
                .bind(source_i64(row, "breakdown", 1))
                .execute(&mut **dest)
                .await?;
        }
        Ok(())
    }

    async fn merge_columns(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
        table: &str,
    ) -> AppResult<()> {
        self.report(&format!("Merging {table}"));
        let rows = sqlx::query(&format!("SELECT * FROM {table}"))
            .fetch_all(&mut *source)
            .await?;
        if rows.is_empty() {
            return Ok(());
        }
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut **dest)
            .await?;
        for row in &rows {
            sqlx::query(&format!("INSERT INTO {table} (id, type) VALUES (?, ?)"))
                .bind(source_i64(row, "id", 0))
                .bind(source_text(row, "type").unwrap_or_default())
                .execute(&mut **dest)
                .await?;
        }
        Ok(())
    }

    async fn merge_payment_methods(
        &self,
        source: &mut SqliteConnection,
        dest: &mut PoolConnection<Sqlite>,
    ) -> AppResult<()> {
        self.report("Merging payment methods");
        let rows = sqlx::query("SELECT * FROM paymentmethods")
            .fetch_all(&mut *source)
            .await
            .map_err(|e| {
                AppError::from(e).with_context("operation", "merge_payment_methods")
            })?;
        if rows.is_empty() {
            return Err(AppError::new(
                "MERGE/NO_PAYMENT_METHODS",
                "Source database has no payment methods",
            ));
        }
        sqlx::query("DELETE FROM paymentmethods")
            .execute(&mut **dest)
            .await?;
        for row in &rows {
            sqlx::query("INSERT INTO paymentmethods (id, method) VALUES (?, ?)")
                .bind(source_i64(row, "id", 0))
                .bind(source_text(row, "method").unwrap_or_default())
                .execute(&mut **dest)
                .await?;
        }
        Ok(())
    }

    fn report(&self, line: &str) {
        self.inner.log_sink.append(IMPORT_LOG, line);
    }
}
