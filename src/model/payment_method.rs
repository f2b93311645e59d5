use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: i64,
    pub method: String,
}

impl PaymentMethod {
    pub fn builder() -> PaymentMethodBuilder {
        PaymentMethodBuilder::default()
    }
}

impl TryFrom<&SqliteRow> for PaymentMethod {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(PaymentMethod {
            id: row.try_get("id")?,
            method: row
                .try_get::<Option<String>, _>("method")?
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentMethodBuilder {
    id: i64,
    method: Option<String>,
}

impl PaymentMethodBuilder {
    pub fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn build(self) -> Result<PaymentMethod, AppError> {
        let method = self.method.unwrap_or_default();
        if method.trim().is_empty() {
            return Err(AppError::new(
                "PAYMENT_METHODS/EMPTY",
                "Payment method label must not be empty",
            ));
        }
        Ok(PaymentMethod {
            id: self.id,
            method,
        })
    }
}
