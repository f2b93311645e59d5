use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// An expense category. `code` is the short label used in exports;
/// `breakdown` controls whether reports itemize the category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub code: String,
    pub breakdown: bool,
}

impl Category {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Category {
            name: name.into(),
            code: code.into(),
            breakdown: true,
        }
    }
}

impl TryFrom<&SqliteRow> for Category {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Category {
            name: row.try_get("name")?,
            code: row.try_get::<Option<String>, _>("code")?.unwrap_or_default(),
            breakdown: row.try_get::<Option<i64>, _>("breakdown")?.unwrap_or(1) > 0,
        })
    }
}
