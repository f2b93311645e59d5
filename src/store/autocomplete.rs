use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::{AppError, AppResult};
use crate::model::lenient_decimal;
use crate::store::ReceiptStore;

/// Which free-text field to complete against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoCompleteField {
    ReceiptName,
    ReceiptComment,
    TripName,
}

impl AutoCompleteField {
    fn table_and_column(self) -> (&'static str, &'static str) {
        match self {
            AutoCompleteField::ReceiptName => ("receipts", "name"),
            AutoCompleteField::ReceiptComment => ("receipts", "comment"),
            AutoCompleteField::TripName => ("trips", "name"),
        }
    }
}

/// Prefill suggestion for a receipt being entered, taken from the most
/// recent receipts with the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptHint {
    pub category: Option<String>,
    pub price: Option<Decimal>,
}

impl ReceiptStore {
    /// Distinct trimmed values of the field containing `text`, ordered
    /// alphabetically.
    pub async fn autocomplete(
        &self,
        text: &str,
        field: AutoCompleteField,
    ) -> AppResult<Vec<String>> {
        let _guard = self.inner.db_lock.lock().await;
        let (table, column) = field.table_and_column();
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT TRIM({column}) AS value FROM {table} \
             WHERE {column} LIKE ? ORDER BY {column}"
        ))
        .bind(format!("%{text}%"))
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "autocomplete"))?;
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let value: Option<String> = row.try_get("value")?;
            if let Some(value) = value {
                if !value.is_empty() {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    /// Category and price shared by the two most recent receipts named
    /// `name`; either side is `None` when they disagree. Returns `None`
    /// entirely when no receipt matches or prediction is turned off.
    pub async fn receipt_hint(&self, name: &str) -> AppResult<Option<ReceiptHint>> {
        if !self.inner.preferences.predict_categories() {
            return Ok(None);
        }
        let _guard = self.inner.db_lock.lock().await;
        let rows = sqlx::query(
            "SELECT category, CAST(price AS TEXT) AS price_text FROM receipts \
             WHERE name = ? ORDER BY rcpt_date DESC LIMIT 2",
        )
        .bind(name)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "receipt_hint"))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut categories = Vec::with_capacity(rows.len());
        let mut prices = Vec::with_capacity(rows.len());
        for row in &rows {
            let category: Option<String> = row.try_get("category")?;
            let price_text: Option<String> = row.try_get("price_text")?;
            categories.push(category.unwrap_or_default());
            prices.push(lenient_decimal(price_text.as_deref().unwrap_or_default()));
        }
        let category = (categories.iter().all(|c| c == &categories[0])
            && !categories[0].is_empty())
        .then(|| categories[0].clone());
        let price = prices.iter().all(|p| p == &prices[0]).then(|| prices[0]);
        Ok(Some(ReceiptHint { category, price }))
    }
}
