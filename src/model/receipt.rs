use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::AppError;
use crate::model::{decimal_column, lenient_decimal, optional_text};

/// A single expense line inside a trip.
///
/// `full_page_image` inverts the stored `fullpageimage` flag: the column keeps
/// the legacy "not full page" boolean so old files read correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    /// Attachment file name relative to the trip directory, if any.
    pub path: Option<String>,
    /// Name of the owning trip (`receipts.parent`).
    pub trip_name: String,
    pub name: String,
    pub category: Option<String>,
    pub date_ms: i64,
    pub timezone: Option<String>,
    pub comment: Option<String>,
    pub currency_code: String,
    pub price: Decimal,
    pub tax: Decimal,
    pub payment_method_id: Option<i64>,
    pub expensable: bool,
    pub full_page_image: bool,
    pub extra_edit_text: [Option<String>; 3],
}

impl Receipt {
    pub fn builder(trip_name: impl Into<String>, name: impl Into<String>) -> ReceiptBuilder {
        ReceiptBuilder::new(trip_name, name)
    }

    /// Lowercased extension of the attachment, when one is present.
    pub fn attachment_extension(&self) -> Option<String> {
        let path = self.path.as_deref()?;
        let ext = std::path::Path::new(path).extension()?;
        Some(ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn has_attachment(&self) -> bool {
        self.path.is_some()
    }
}

impl TryFrom<&SqliteRow> for Receipt {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let not_full_page: i64 = row.try_get::<Option<i64>, _>("fullpageimage")?.unwrap_or(1);
        Ok(Receipt {
            id: row.try_get("id")?,
            path: optional_text(row.try_get("path")?),
            trip_name: row.try_get("parent")?,
            name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
            category: optional_text(row.try_get("category")?),
            date_ms: row.try_get::<Option<i64>, _>("rcpt_date")?.unwrap_or(0),
            timezone: optional_text(row.try_get("timezone")?),
            comment: optional_text(row.try_get("comment")?),
            currency_code: row.try_get("isocode")?,
            price: decimal_column(row, "price")?,
            tax: decimal_column(row, "tax")?,
            payment_method_id: row.try_get("paymentMethodKey")?,
            expensable: row.try_get::<Option<i64>, _>("expenseable")?.unwrap_or(0) > 0,
            full_page_image: not_full_page == 0,
            extra_edit_text: [
                optional_text(row.try_get("extra_edittext_1")?),
                optional_text(row.try_get("extra_edittext_2")?),
                optional_text(row.try_get("extra_edittext_3")?),
            ],
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReceiptBuilder {
    id: i64,
    path: Option<String>,
    trip_name: String,
    name: String,
    category: Option<String>,
    date_ms: Option<i64>,
    timezone: Option<String>,
    comment: Option<String>,
    currency_code: Option<String>,
    price: Option<Decimal>,
    price_text: Option<String>,
    tax: Option<Decimal>,
    tax_text: Option<String>,
    payment_method_id: Option<i64>,
    expensable: bool,
    full_page_image: bool,
    extra_edit_text: [Option<String>; 3],
}

impl ReceiptBuilder {
    pub fn new(trip_name: impl Into<String>, name: impl Into<String>) -> Self {
        ReceiptBuilder {
            trip_name: trip_name.into(),
            name: name.into(),
            ..ReceiptBuilder::default()
        }
    }

    pub fn from_receipt(receipt: &Receipt) -> Self {
        ReceiptBuilder {
            id: receipt.id,
            path: receipt.path.clone(),
            trip_name: receipt.trip_name.clone(),
            name: receipt.name.clone(),
            category: receipt.category.clone(),
            date_ms: Some(receipt.date_ms),
            timezone: receipt.timezone.clone(),
            comment: receipt.comment.clone(),
            currency_code: Some(receipt.currency_code.clone()),
            price: Some(receipt.price),
            price_text: None,
            tax: Some(receipt.tax),
            tax_text: None,
            payment_method_id: receipt.payment_method_id,
            expensable: receipt.expensable,
            full_page_image: receipt.full_page_image,
            extra_edit_text: receipt.extra_edit_text.clone(),
        }
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = optional_text(Some(path.into()));
        self
    }

    pub fn clear_path(mut self) -> Self {
        self.path = None;
        self
    }

    pub fn trip_name(mut self, trip_name: impl Into<String>) -> Self {
        self.trip_name = trip_name.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn date_ms(mut self, ms: i64) -> Self {
        self.date_ms = Some(ms);
        self
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn currency_code(mut self, code: impl Into<String>) -> Self {
        self.currency_code = Some(code.into());
        self
    }

    pub fn price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// String form of the price; when non-empty it wins over `price`.
    pub fn price_text(mut self, text: impl Into<String>) -> Self {
        self.price_text = Some(text.into());
        self
    }

    pub fn tax(mut self, tax: Decimal) -> Self {
        self.tax = Some(tax);
        self
    }

    pub fn tax_text(mut self, text: impl Into<String>) -> Self {
        self.tax_text = Some(text.into());
        self
    }

    pub fn payment_method_id(mut self, id: i64) -> Self {
        self.payment_method_id = Some(id);
        self
    }

    pub fn expensable(mut self, expensable: bool) -> Self {
        self.expensable = expensable;
        self
    }

    pub fn full_page_image(mut self, full_page: bool) -> Self {
        self.full_page_image = full_page;
        self
    }

    pub fn extra_edit_text(mut self, index: usize, value: impl Into<String>) -> Self {
        if index < 3 {
            self.extra_edit_text[index] = optional_text(Some(value.into()));
        }
        self
    }

    /// Date the caller set explicitly, if any. The store uses this to tell
    /// "keep ordering within the day" inserts apart from "stamp with now".
    pub(crate) fn explicit_date_ms(&self) -> Option<i64> {
        self.date_ms
    }

    pub fn build(self) -> Result<Receipt, AppError> {
        if self.trip_name.is_empty() {
            return Err(AppError::new(
                "RECEIPTS/NO_TRIP",
                "Receipt must belong to a trip",
            ));
        }
        let price = match self.price_text.as_deref() {
            Some(text) if !text.trim().is_empty() => lenient_decimal(text),
            _ => self.price.unwrap_or(Decimal::ZERO),
        };
        let tax = match self.tax_text.as_deref() {
            Some(text) if !text.trim().is_empty() => lenient_decimal(text),
            _ => self.tax.unwrap_or(Decimal::ZERO),
        };
        Ok(Receipt {
            id: self.id,
            path: self.path,
            trip_name: self.trip_name,
            name: self.name,
            category: self.category,
            date_ms: self.date_ms.unwrap_or_else(crate::time::now_ms),
            timezone: self.timezone,
            comment: self.comment,
            currency_code: self.currency_code.unwrap_or_default(),
            price,
            tax,
            payment_method_id: self.payment_method_id,
            expensable: self.expensable,
            full_page_image: self.full_page_image,
            extra_edit_text: self.extra_edit_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_price_wins_over_decimal() {
        let receipt = Receipt::builder("Paris", "Dinner")
            .price(Decimal::new(999, 2))
            .price_text("12,50")
            .currency_code("EUR")
            .build()
            .unwrap();
        assert_eq!(receipt.price, Decimal::new(1250, 2));
    }

    #[test]
    fn blank_price_text_falls_back_to_decimal() {
        let receipt = Receipt::builder("Paris", "Dinner")
            .price(Decimal::new(999, 2))
            .price_text("  ")
            .build()
            .unwrap();
        assert_eq!(receipt.price, Decimal::new(999, 2));
    }

    #[test]
    fn malformed_price_text_is_zero() {
        let receipt = Receipt::builder("Paris", "Dinner")
            .price_text("abc")
            .build()
            .unwrap();
        assert_eq!(receipt.price, Decimal::ZERO);
    }

    #[test]
    fn extension_is_lowercased() {
        let receipt = Receipt::builder("Paris", "Dinner")
            .path("IMG_001.JPG")
            .build()
            .unwrap();
        assert_eq!(receipt.attachment_extension().as_deref(), Some("jpg"));
    }

    #[test]
    fn sentinel_path_means_no_attachment() {
        let receipt = Receipt::builder("Paris", "Dinner")
            .path(crate::model::NO_DATA)
            .build()
            .unwrap();
        assert!(!receipt.has_attachment());
    }
}
