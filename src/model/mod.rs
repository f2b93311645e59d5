use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

pub mod category;
pub mod columns;
pub mod payment_method;
pub mod receipt;
pub mod trip;

pub use category::Category;
pub use columns::{ColumnReport, ReportColumn};
pub use payment_method::{PaymentMethod, PaymentMethodBuilder};
pub use receipt::{Receipt, ReceiptBuilder};
pub use trip::{Trip, TripBuilder};

/// Literal stored in nullable text columns by legacy writers to mean "no value".
pub const NO_DATA: &str = "null";

/// Placeholder currency code reported when a trip's receipts span more than
/// one currency.
pub const MULTI_CURRENCY: &str = "XXXXXX";

/// Parses a user- or file-supplied numeric string. Empty or malformed input
/// yields zero; a comma is accepted as the decimal separator.
pub fn lenient_decimal(s: &str) -> Decimal {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&trimmed.replace(',', ".")).unwrap_or(Decimal::ZERO)
}

/// Reads a money column that legacy files may hold as comma-decimal TEXT.
///
/// Queries select the column twice, once as `CAST(col AS TEXT) AS col_text`;
/// when that text carries a comma it is the authoritative form, otherwise the
/// cast of the native numeric value parses identically.
pub(crate) fn decimal_column(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
    let alias = format!("{col}_text");
    let text: Option<String> = row.try_get(alias.as_str())?;
    match text {
        Some(text) => Ok(lenient_decimal(&text)),
        None => Ok(Decimal::ZERO),
    }
}

/// Maps the `NO_DATA` sentinel (and empty strings) to `None`.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    match value {
        Some(v) if v.is_empty() || v == NO_DATA => None,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_decimal_parses() {
        assert_eq!(lenient_decimal("12,50"), Decimal::new(1250, 2));
    }

    #[test]
    fn plain_decimal_parses() {
        assert_eq!(lenient_decimal("3.75"), Decimal::new(375, 2));
    }

    #[test]
    fn empty_and_garbage_parse_to_zero() {
        assert_eq!(lenient_decimal(""), Decimal::ZERO);
        assert_eq!(lenient_decimal("   "), Decimal::ZERO);
        assert_eq!(lenient_decimal("12x"), Decimal::ZERO);
    }

    #[test]
    fn no_data_sentinel_maps_to_none() {
        assert_eq!(optional_text(Some(NO_DATA.to_string())), None);
        assert_eq!(optional_text(Some(String::new())), None);
        assert_eq!(optional_text(Some("x.jpg".into())), Some("x.jpg".into()));
        assert_eq!(optional_text(None), None);
    }
}
