use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Which export the column list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnReport {
    Csv,
    Pdf,
}

impl ColumnReport {
    pub(crate) fn table(self) -> &'static str {
        match self {
            ColumnReport::Csv => "csvcolumns",
            ColumnReport::Pdf => "pdfcolumns",
        }
    }
}

/// One configured export column. `column_type` names the rendered field
/// ("Name", "Price", ...); a blank type is a freshly appended placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportColumn {
    pub id: i64,
    pub column_type: String,
}

impl TryFrom<&SqliteRow> for ReportColumn {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(ReportColumn {
            id: row.try_get("id")?,
            column_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
        })
    }
}
