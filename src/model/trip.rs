use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::AppError;
use crate::model::{decimal_column, optional_text};

/// A trip (report). Identified by its directory name; immutable once built —
/// edits go through the store, which replaces the cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub name: String,
    pub from_date_ms: i64,
    pub to_date_ms: i64,
    pub from_timezone: Option<String>,
    pub to_timezone: Option<String>,
    pub miles: Decimal,
    pub comment: Option<String>,
    pub default_currency: Option<String>,
    pub filters: Option<String>,
    /// Sum of this trip's receipt prices, derived on read.
    pub price: Decimal,
    /// Sum of today's receipt prices (device-local day), derived on read.
    pub daily_sub_total: Decimal,
    /// Currency the totals are denominated in; `MULTI_CURRENCY` when mixed.
    pub price_currency: String,
}

impl Trip {
    pub fn builder(name: impl Into<String>) -> TripBuilder {
        TripBuilder::new(name)
    }

    /// Returns a copy with the derived totals filled in.
    pub(crate) fn with_totals(
        mut self,
        price: Decimal,
        daily_sub_total: Decimal,
        price_currency: String,
    ) -> Self {
        self.price = price;
        self.daily_sub_total = daily_sub_total;
        self.price_currency = price_currency;
        self
    }
}

impl TryFrom<&SqliteRow> for Trip {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            name: row.try_get("name")?,
            from_date_ms: row.try_get::<Option<i64>, _>("from_date")?.unwrap_or(0),
            to_date_ms: row.try_get::<Option<i64>, _>("to_date")?.unwrap_or(0),
            from_timezone: optional_text(row.try_get("from_timezone")?),
            to_timezone: optional_text(row.try_get("to_timezone")?),
            miles: decimal_column(row, "miles_new")?,
            comment: optional_text(row.try_get("trips_comment")?),
            default_currency: optional_text(row.try_get("trips_default_currency")?),
            filters: optional_text(row.try_get("trips_filters")?),
            price: Decimal::ZERO,
            daily_sub_total: Decimal::ZERO,
            price_currency: String::new(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TripBuilder {
    name: String,
    from_date_ms: Option<i64>,
    to_date_ms: Option<i64>,
    from_timezone: Option<String>,
    to_timezone: Option<String>,
    miles: Option<Decimal>,
    comment: Option<String>,
    default_currency: Option<String>,
    filters: Option<String>,
}

impl TripBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        TripBuilder {
            name: name.into(),
            ..TripBuilder::default()
        }
    }

    pub fn from_date_ms(mut self, ms: i64) -> Self {
        self.from_date_ms = Some(ms);
        self
    }

    pub fn to_date_ms(mut self, ms: i64) -> Self {
        self.to_date_ms = Some(ms);
        self
    }

    pub fn from_timezone(mut self, tz: impl Into<String>) -> Self {
        self.from_timezone = Some(tz.into());
        self
    }

    pub fn to_timezone(mut self, tz: impl Into<String>) -> Self {
        self.to_timezone = Some(tz.into());
        self
    }

    pub fn miles(mut self, miles: Decimal) -> Self {
        self.miles = Some(miles);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn default_currency(mut self, code: impl Into<String>) -> Self {
        self.default_currency = Some(code.into());
        self
    }

    pub fn filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    pub fn build(self) -> Result<Trip, AppError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::new("TRIPS/EMPTY_NAME", "Trip name must not be empty"));
        }
        let now = crate::time::now_ms();
        Ok(Trip {
            name,
            from_date_ms: self.from_date_ms.unwrap_or(now),
            to_date_ms: self.to_date_ms.unwrap_or(now),
            from_timezone: self.from_timezone,
            to_timezone: self.to_timezone,
            miles: self.miles.unwrap_or(Decimal::ZERO),
            comment: self.comment,
            default_currency: self.default_currency,
            filters: self.filters,
            price: Decimal::ZERO,
            daily_sub_total: Decimal::ZERO,
            price_currency: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_a_name() {
        assert!(Trip::builder("  ").build().is_err());
        let trip = Trip::builder("Paris")
            .from_date_ms(1)
            .to_date_ms(2)
            .default_currency("EUR")
            .build()
            .unwrap();
        assert_eq!(trip.name, "Paris");
        assert_eq!(trip.default_currency.as_deref(), Some("EUR"));
        assert_eq!(trip.price, Decimal::ZERO);
    }

    #[test]
    fn with_totals_replaces_derived_fields() {
        let trip = Trip::builder("Paris").from_date_ms(1).to_date_ms(2).build().unwrap();
        let priced = trip.with_totals(Decimal::new(995, 2), Decimal::new(100, 2), "EUR".into());
        assert_eq!(priced.price, Decimal::new(995, 2));
        assert_eq!(priced.daily_sub_total, Decimal::new(100, 2));
        assert_eq!(priced.price_currency, "EUR");
    }
}
