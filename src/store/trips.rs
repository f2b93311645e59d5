use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::Row;

use crate::backup;
use crate::error::{AppError, AppResult};
use crate::model::{Trip, TripBuilder, MULTI_CURRENCY};
use crate::store::ReceiptStore;
use crate::time;

const TRIP_SELECT: &str = "SELECT name, from_date, to_date, from_timezone, to_timezone, \
     trips_comment, trips_default_currency, trips_filters, \
     CAST(miles_new AS TEXT) AS miles_new_text FROM trips";

impl ReceiptStore {
    /// All trips, newest end date first, totals derived. Served from the
    /// list cache when no mutation has invalidated it.
    pub async fn get_trips(&self) -> AppResult<Arc<Vec<Trip>>> {
        let _guard = self.inner.db_lock.lock().await;
        if let Some(snapshot) = self.cached_trips() {
            return Ok(snapshot);
        }
        let snapshot = self.load_trips().await?;
        let mut cache = self.lock_cache(&self.inner.trips_cache);
        cache.snapshot = snapshot.clone();
        cache.valid = true;
        Ok(snapshot)
    }

    pub async fn trip_names(&self) -> AppResult<Vec<String>> {
        let trips = self.get_trips().await?;
        Ok(trips.iter().map(|t| t.name.clone()).collect())
    }

    pub async fn get_trip_by_name(&self, name: &str) -> AppResult<Option<Trip>> {
        let trips = self.get_trips().await?;
        Ok(trips.iter().find(|t| t.name == name).cloned())
    }

    /// Inserts a new trip. On success the list cache is dropped and a dated
    /// backup of the store file is parked on a worker. The error for a
    /// failed insert carries the trip's directory so the caller can undo any
    /// directory it created beforehand.
    pub async fn insert_trip(&self, builder: TripBuilder) -> AppResult<Trip> {
        let _guard = self.inner.db_lock.lock().await;
        let trip = self.finish_trip(builder)?;
        sqlx::query(
            "INSERT INTO trips (name, from_date, to_date, from_timezone, to_timezone, \
             miles_new, trips_comment, trips_default_currency, trips_filters) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trip.name)
        .bind(trip.from_date_ms)
        .bind(trip.to_date_ms)
        .bind(&trip.from_timezone)
        .bind(&trip.to_timezone)
        .bind(trip.miles.to_string())
        .bind(&trip.comment)
        .bind(&trip.default_currency)
        .bind(&trip.filters)
        .execute(self.pool())
        .await
        .map_err(|e| {
            let dir = self.inner.attachments.resolve(&trip.name, "");
            AppError::from(e)
                .with_context("operation", "insert_trip")
                .with_context("directory", dir.display().to_string())
        })?;
        self.invalidate_trips();
        backup::spawn_periodic_backup(self.inner.db_path.clone());
        let currency = self.effective_currency(&trip);
        Ok(trip.with_totals(Decimal::ZERO, Decimal::ZERO, currency))
    }

    /// Updates a trip in place. A rename cascades to the receipts' parent
    /// column in the same transaction and drops the stale per-trip cache.
    pub async fn update_trip(&self, old_name: &str, builder: TripBuilder) -> AppResult<Trip> {
        let _guard = self.inner.db_lock.lock().await;
        let mut trip = self.finish_trip(builder)?;
        let renamed = trip.name != old_name;

        let mut tx = self.pool().begin().await?;
        if renamed {
            sqlx::query("PRAGMA defer_foreign_keys = ON")
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query(
            "UPDATE trips SET name = ?, from_date = ?, to_date = ?, from_timezone = ?, \
             to_timezone = ?, trips_comment = ?, trips_default_currency = ?, trips_filters = ? \
             WHERE name = ?",
        )
        .bind(&trip.name)
        .bind(trip.from_date_ms)
        .bind(trip.to_date_ms)
        .bind(&trip.from_timezone)
        .bind(&trip.to_timezone)
        .bind(&trip.comment)
        .bind(&trip.default_currency)
        .bind(&trip.filters)
        .bind(old_name)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("TRIPS/NOT_FOUND", "Trip not found")
                .with_context("trip", old_name.to_string()));
        }
        if renamed {
            sqlx::query("UPDATE receipts SET parent = ? WHERE parent = ?")
                .bind(&trip.name)
                .bind(old_name)
                .execute(&mut *tx)
                .await?;
        }
        // Mileage is not part of the update; report the stored value.
        let row = sqlx::query("SELECT CAST(miles_new AS TEXT) AS miles_new_text FROM trips WHERE name = ?")
            .bind(&trip.name)
            .fetch_one(&mut *tx)
            .await?;
        trip.miles = crate::model::decimal_column(&row, "miles_new")?;
        tx.commit().await?;

        self.invalidate_trips();
        if renamed {
            self.invalidate_receipts(old_name);
        }
        self.invalidate_receipts(&trip.name);
        self.derive_totals(trip).await
    }

    /// Deletes a trip; its receipts go with it via the cascading foreign
    /// key. Returns whether a row was actually removed.
    pub async fn delete_trip(&self, name: &str) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("DELETE FROM trips WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "delete_trip"))?;
        self.invalidate_trips();
        self.invalidate_receipts(name);
        Ok(result.rows_affected() > 0)
    }

    /// Adds (or, with a negative delta, subtracts) mileage on a trip.
    pub async fn add_miles(&self, name: &str, delta: Decimal) -> AppResult<Trip> {
        let _guard = self.inner.db_lock.lock().await;
        let row = sqlx::query(&format!("{TRIP_SELECT} WHERE name = ?"))
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| {
                AppError::new("TRIPS/NOT_FOUND", "Trip not found")
                    .with_context("trip", name.to_string())
            })?;
        let trip = Trip::try_from(&row)?;
        let miles = trip.miles + delta;
        sqlx::query("UPDATE trips SET miles_new = ? WHERE name = ?")
            .bind(miles.to_string())
            .bind(name)
            .execute(self.pool())
            .await?;
        self.invalidate_trips();
        let mut updated = trip;
        updated.miles = miles;
        self.derive_totals(updated).await
    }

    fn cached_trips(&self) -> Option<Arc<Vec<Trip>>> {
        let cache = self.lock_cache(&self.inner.trips_cache);
        cache.valid.then(|| cache.snapshot.clone())
    }

    /// Builds the trip, defaulting both timezones to the device zone the way
    /// legacy writers did.
    fn finish_trip(&self, builder: TripBuilder) -> AppResult<Trip> {
        let mut trip = builder.build()?;
        if trip.from_timezone.is_none() || trip.to_timezone.is_none() {
            let tz = time::device_timezone_id();
            trip.from_timezone.get_or_insert_with(|| tz.clone());
            trip.to_timezone.get_or_insert(tz);
        }
        Ok(trip)
    }

    pub(crate) fn effective_currency(&self, trip: &Trip) -> String {
        trip.default_currency
            .clone()
            .unwrap_or_else(|| self.inner.preferences.default_currency_code())
    }

    /// Engine lock must be held. Reads all trips and derives their totals.
    async fn load_trips(&self) -> AppResult<Arc<Vec<Trip>>> {
        let rows = sqlx::query(&format!("{TRIP_SELECT} ORDER BY to_date DESC"))
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "get_trips"))?;
        let mut trips = Vec::with_capacity(rows.len());
        for row in &rows {
            let trip = Trip::try_from(row)?;
            trips.push(self.derive_totals(trip).await?);
        }
        Ok(Arc::new(trips))
    }

    /// Engine lock must be held. Computes the total, today's subtotal, and
    /// the display currency for one trip.
    pub(crate) async fn derive_totals(&self, trip: Trip) -> AppResult<Trip> {
        let only_expensable = self.inner.preferences.only_include_expensable();
        let receipts = self.query_receipts(&trip.name, false).await?;
        let tz = time::device_timezone_id();
        let (day_start, day_end) = time::local_day_bounds_ms(time::now_ms(), &tz);

        let mut price = Decimal::ZERO;
        let mut daily = Decimal::ZERO;
        for receipt in &receipts {
            if only_expensable && !receipt.expensable {
                continue;
            }
            price += receipt.price;
            if (day_start..=day_end).contains(&receipt.date_ms) {
                daily += receipt.price;
            }
        }

        // The display currency considers every receipt of the trip, even
        // ones the expensable filter keeps out of the sums.
        let distinct: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT isocode) FROM receipts WHERE parent = ?")
                .bind(&trip.name)
                .fetch_one(self.pool())
                .await?;
        let currency = match distinct {
            0 => self.effective_currency(&trip),
            1 => {
                let row = sqlx::query("SELECT DISTINCT isocode FROM receipts WHERE parent = ?")
                    .bind(&trip.name)
                    .fetch_one(self.pool())
                    .await?;
                row.try_get("isocode")?
            }
            _ => MULTI_CURRENCY.to_string(),
        };

        Ok(trip.with_totals(price, daily, currency))
    }
}
