use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::{Receipt, ReceiptBuilder, NO_DATA};
use crate::store::ReceiptStore;
use crate::time;

const MILLIS_PER_HOUR: i64 = 3_600_000;

const RECEIPT_SELECT: &str = "SELECT id, path, parent, name, category, rcpt_date, timezone, \
     comment, isocode, paymentMethodKey, expenseable, fullpageimage, \
     extra_edittext_1, extra_edittext_2, extra_edittext_3, \
     CAST(price AS TEXT) AS price_text, CAST(tax AS TEXT) AS tax_text FROM receipts";

/// One row of the per-category cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCost {
    pub category: String,
    pub total: Decimal,
}

impl ReceiptStore {
    /// Receipts of a trip, newest first. This default ordering is cached;
    /// every receipt mutation drops the trip's entry.
    pub async fn get_receipts(&self, trip_name: &str) -> AppResult<Arc<Vec<Receipt>>> {
        let _guard = self.inner.db_lock.lock().await;
        self.get_receipts_locked(trip_name).await
    }

    /// Receipts in either direction. Only the descending ordering is served
    /// from (and written to) the cache.
    pub async fn get_receipts_ordered(
        &self,
        trip_name: &str,
        ascending: bool,
    ) -> AppResult<Arc<Vec<Receipt>>> {
        if !ascending {
            return self.get_receipts(trip_name).await;
        }
        let _guard = self.inner.db_lock.lock().await;
        Ok(Arc::new(self.query_receipts_ordered(trip_name, true).await?))
    }

    pub async fn get_receipt_by_id(&self, id: i64) -> AppResult<Option<Receipt>> {
        let _guard = self.inner.db_lock.lock().await;
        let row = sqlx::query(&format!("{RECEIPT_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(Receipt::try_from).transpose().map_err(AppError::from)
    }

    /// Inserts a receipt. An explicitly dated receipt is stored with its
    /// date shifted by its 1-based position in the trip, keeping same-day
    /// receipts in insertion order under the date sort; an undated one is
    /// stamped with now.
    pub async fn insert_receipt(&self, builder: ReceiptBuilder) -> AppResult<Receipt> {
        let _guard = self.inner.db_lock.lock().await;
        self.insert_receipt_locked(builder).await
    }

    /// Updates a receipt. A changed date refreshes the stored timezone to
    /// the device zone; a date landing exactly on the hour is shifted by the
    /// receipt id so it keeps a stable slot in the ordering.
    pub async fn update_receipt(
        &self,
        old: &Receipt,
        builder: ReceiptBuilder,
    ) -> AppResult<Receipt> {
        let _guard = self.inner.db_lock.lock().await;
        let mut receipt = builder.id(old.id).build()?;
        if receipt.currency_code.is_empty() {
            receipt.currency_code = self.inner.preferences.default_currency_code();
        }
        if receipt.date_ms != old.date_ms {
            receipt.timezone = Some(time::device_timezone_id());
        } else {
            receipt.timezone = old.timezone.clone();
        }
        if receipt.date_ms % MILLIS_PER_HOUR == 0 {
            receipt.date_ms += old.id;
        }

        let result = sqlx::query(
            "UPDATE receipts SET path = ?, parent = ?, name = ?, category = ?, rcpt_date = ?, \
             timezone = ?, comment = ?, isocode = ?, price = ?, tax = ?, paymentMethodKey = ?, \
             expenseable = ?, fullpageimage = ?, extra_edittext_1 = ?, extra_edittext_2 = ?, \
             extra_edittext_3 = ? WHERE id = ?",
        )
        .bind(receipt.path.as_deref().unwrap_or(NO_DATA))
        .bind(&receipt.trip_name)
        .bind(receipt.name.trim())
        .bind(&receipt.category)
        .bind(receipt.date_ms)
        .bind(&receipt.timezone)
        .bind(&receipt.comment)
        .bind(&receipt.currency_code)
        .bind(receipt.price.to_string())
        .bind(receipt.tax.to_string())
        .bind(receipt.payment_method_id)
        .bind(i64::from(receipt.expensable))
        .bind(i64::from(!receipt.full_page_image))
        .bind(receipt.extra_edit_text[0].as_deref().unwrap_or(NO_DATA))
        .bind(receipt.extra_edit_text[1].as_deref().unwrap_or(NO_DATA))
        .bind(receipt.extra_edit_text[2].as_deref().unwrap_or(NO_DATA))
        .bind(old.id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "update_receipt"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("RECEIPTS/NOT_FOUND", "Receipt not found")
                .with_context("id", old.id.to_string()));
        }

        receipt.name = receipt.name.trim().to_string();
        self.invalidate_receipts(&old.trip_name);
        self.invalidate_receipts(&receipt.trip_name);
        self.invalidate_trips();
        Ok(receipt)
    }

    /// Points a receipt at a different attachment file.
    pub async fn update_receipt_file(
        &self,
        receipt: &Receipt,
        file_name: &str,
    ) -> AppResult<Receipt> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("UPDATE receipts SET path = ? WHERE id = ?")
            .bind(file_name)
            .bind(receipt.id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("RECEIPTS/NOT_FOUND", "Receipt not found")
                .with_context("id", receipt.id.to_string()));
        }
        self.invalidate_receipts(&receipt.trip_name);
        let mut updated = receipt.clone();
        updated.path = crate::model::optional_text(Some(file_name.to_string()));
        Ok(updated)
    }

    /// Removes a receipt and its attachment file. Returns whether a row was
    /// actually deleted.
    pub async fn delete_receipt(&self, receipt: &Receipt) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        self.delete_receipt_locked(receipt).await
    }

    /// Copies a receipt (and its attachment) into another trip. A failed
    /// attachment copy aborts before anything is written to the engine.
    pub async fn copy_receipt(&self, receipt: &Receipt, dest_trip: &str) -> AppResult<Receipt> {
        let _guard = self.inner.db_lock.lock().await;
        self.copy_receipt_locked(receipt, dest_trip).await
    }

    /// Moves a receipt into another trip: a copy that, once it lands,
    /// deletes the original. A failed copy leaves the original untouched.
    pub async fn move_receipt(&self, receipt: &Receipt, dest_trip: &str) -> AppResult<Receipt> {
        let _guard = self.inner.db_lock.lock().await;
        let copied = self.copy_receipt_locked(receipt, dest_trip).await?;
        if !self.delete_receipt_locked(receipt).await? {
            return Err(AppError::new(
                "RECEIPTS/MOVE_INCOMPLETE",
                "Receipt was copied but the original could not be deleted",
            )
            .with_context("id", receipt.id.to_string()));
        }
        Ok(copied)
    }

    /// Swaps the receipt one slot toward the top of the (newest-first) list
    /// by exchanging dates with its neighbor; equal dates are broken by a
    /// millisecond. Returns false when it is already first.
    pub async fn move_receipt_up(&self, trip_name: &str, receipt_id: i64) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let receipts = self.get_receipts_locked(trip_name).await?;
        let Some(index) = receipts.iter().position(|r| r.id == receipt_id) else {
            return Ok(false);
        };
        if index == 0 {
            return Ok(false);
        }
        let receipt = &receipts[index];
        let neighbor = &receipts[index - 1];
        let new_receipt_date = if receipt.date_ms != neighbor.date_ms {
            neighbor.date_ms
        } else {
            neighbor.date_ms + 1
        };
        self.swap_dates(trip_name, receipt.id, new_receipt_date, neighbor.id, receipt.date_ms)
            .await
    }

    /// Mirror image of `move_receipt_up`. Returns false when the receipt is
    /// already last.
    pub async fn move_receipt_down(&self, trip_name: &str, receipt_id: i64) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let receipts = self.get_receipts_locked(trip_name).await?;
        let Some(index) = receipts.iter().position(|r| r.id == receipt_id) else {
            return Ok(false);
        };
        if index + 1 >= receipts.len() {
            return Ok(false);
        }
        let receipt = &receipts[index];
        let neighbor = &receipts[index + 1];
        let new_receipt_date = if receipt.date_ms != neighbor.date_ms {
            neighbor.date_ms
        } else {
            neighbor.date_ms - 1
        };
        self.swap_dates(trip_name, receipt.id, new_receipt_date, neighbor.id, receipt.date_ms)
            .await
    }

    /// Per-category price sums for one trip, ordered by category name.
    pub async fn cost_per_category(&self, trip_name: &str) -> AppResult<Vec<CategoryCost>> {
        let _guard = self.inner.db_lock.lock().await;
        let receipts = self.get_receipts_locked(trip_name).await?;
        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for receipt in receipts.iter() {
            let key = receipt.category.clone().unwrap_or_default();
            *totals.entry(key).or_insert(Decimal::ZERO) += receipt.price;
        }
        Ok(totals
            .into_iter()
            .map(|(category, total)| CategoryCost { category, total })
            .collect())
    }

    /// Id the next inserted receipt will get. Answered from a cached copy of
    /// the AUTOINCREMENT sequence; inserts keep the cache in step.
    pub async fn next_receipt_id(&self) -> AppResult<i64> {
        let _guard = self.inner.db_lock.lock().await;
        if let Some(id) = *self.lock_cache(&self.inner.next_receipt_id) {
            return Ok(id);
        }
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM sqlite_sequence WHERE name = 'receipts'")
                .fetch_optional(self.pool())
                .await?;
        let next = seq.unwrap_or(0) + 1;
        *self.lock_cache(&self.inner.next_receipt_id) = Some(next);
        Ok(next)
    }

    pub(crate) async fn get_receipts_locked(&self, trip_name: &str) -> AppResult<Arc<Vec<Receipt>>> {
        if let Some(cached) = self.lock_cache(&self.inner.receipts_cache).get(trip_name) {
            return Ok(cached.clone());
        }
        let receipts = Arc::new(self.query_receipts_ordered(trip_name, false).await?);
        self.lock_cache(&self.inner.receipts_cache)
            .insert(trip_name.to_string(), receipts.clone());
        Ok(receipts)
    }

    /// Raw receipt query; engine lock must be held by the caller.
    pub(crate) async fn query_receipts(&self, trip_name: &str, ascending: bool) -> AppResult<Vec<Receipt>> {
        self.query_receipts_ordered(trip_name, ascending).await
    }

    async fn query_receipts_ordered(
        &self,
        trip_name: &str,
        ascending: bool,
    ) -> AppResult<Vec<Receipt>> {
        let direction = if ascending { "ASC" } else { "DESC" };
        let rows = sqlx::query(&format!(
            "{RECEIPT_SELECT} WHERE parent = ? ORDER BY rcpt_date {direction}, id {direction}"
        ))
        .bind(trip_name)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "get_receipts"))?;
        rows.iter()
            .map(|row| Receipt::try_from(row).map_err(AppError::from))
            .collect()
    }

    async fn insert_receipt_locked(&self, builder: ReceiptBuilder) -> AppResult<Receipt> {
        let explicit_date = builder.explicit_date_ms();
        let mut receipt = builder.build()?;
        if receipt.currency_code.is_empty() {
            receipt.currency_code = self.inner.preferences.default_currency_code();
        }
        if receipt.timezone.is_none() {
            receipt.timezone = Some(time::device_timezone_id());
        }
        if let Some(date) = explicit_date {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE parent = ?")
                .bind(&receipt.trip_name)
                .fetch_one(self.pool())
                .await?;
            receipt.date_ms = date + count + 1;
        }
        receipt.name = receipt.name.trim().to_string();

        let result = sqlx::query(
            "INSERT INTO receipts (path, parent, name, category, rcpt_date, timezone, comment, \
             isocode, price, tax, paymentMethodKey, expenseable, fullpageimage, \
             extra_edittext_1, extra_edittext_2, extra_edittext_3) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(receipt.path.as_deref().unwrap_or(NO_DATA))
        .bind(&receipt.trip_name)
        .bind(&receipt.name)
        .bind(&receipt.category)
        .bind(receipt.date_ms)
        .bind(&receipt.timezone)
        .bind(&receipt.comment)
        .bind(&receipt.currency_code)
        .bind(receipt.price.to_string())
        .bind(receipt.tax.to_string())
        .bind(receipt.payment_method_id)
        .bind(i64::from(receipt.expensable))
        .bind(i64::from(!receipt.full_page_image))
        .bind(receipt.extra_edit_text[0].as_deref().unwrap_or(NO_DATA))
        .bind(receipt.extra_edit_text[1].as_deref().unwrap_or(NO_DATA))
        .bind(receipt.extra_edit_text[2].as_deref().unwrap_or(NO_DATA))
        .execute(self.pool())
        .await
        .map_err(|e| {
            AppError::from(e)
                .with_context("operation", "insert_receipt")
                .with_context("trip", receipt.trip_name.clone())
        })?;
        receipt.id = result.last_insert_rowid();
        *self.lock_cache(&self.inner.next_receipt_id) = Some(receipt.id + 1);

        self.invalidate_receipts(&receipt.trip_name);
        self.invalidate_trips();
        Ok(receipt)
    }

    async fn delete_receipt_locked(&self, receipt: &Receipt) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM receipts WHERE id = ?")
            .bind(receipt.id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "delete_receipt"))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        if let Some(path) = &receipt.path {
            let file = self.inner.attachments.resolve(&receipt.trip_name, path);
            self.inner.attachments.delete(&file);
        }
        self.invalidate_receipts(&receipt.trip_name);
        self.invalidate_trips();
        Ok(true)
    }

    async fn copy_receipt_locked(&self, receipt: &Receipt, dest_trip: &str) -> AppResult<Receipt> {
        if let Some(path) = &receipt.path {
            let src = self.inner.attachments.resolve(&receipt.trip_name, path);
            let dst = self.inner.attachments.resolve(dest_trip, path);
            self.inner
                .attachments
                .copy(&src, &dst, true)
                .map_err(|e| e.with_context("operation", "copy_receipt"))?;
        }
        let builder = ReceiptBuilder::from_receipt(receipt)
            .id(0)
            .trip_name(dest_trip)
            .date_ms(receipt.date_ms);
        self.insert_receipt_locked(builder).await
    }

    async fn swap_dates(
        &self,
        trip_name: &str,
        receipt_id: i64,
        receipt_date: i64,
        neighbor_id: i64,
        neighbor_date: i64,
    ) -> AppResult<bool> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE receipts SET rcpt_date = ? WHERE id = ?")
            .bind(receipt_date)
            .bind(receipt_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE receipts SET rcpt_date = ? WHERE id = ?")
            .bind(neighbor_date)
            .bind(neighbor_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.invalidate_receipts(trip_name);
        self.invalidate_trips();
        Ok(true)
    }
}
