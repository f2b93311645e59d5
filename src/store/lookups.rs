use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::model::{Category, ColumnReport, PaymentMethod, PaymentMethodBuilder, ReportColumn};
use crate::store::ReceiptStore;

/// ISO-4217 codes offered for receipt entry, plus a few non-ISO codes legacy
/// files are known to carry.
pub const CURRENCY_CODES: &[&str] = &[
    "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AUD", "AWG", "AZN", "BAM", "BBD", "BDT",
    "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BRL", "BSD", "BTN", "BWP", "BYN", "BZD", "CAD",
    "CDF", "CHF", "CLP", "CNY", "COP", "CRC", "CUP", "CVE", "CZK", "DJF", "DKK", "DOP", "DZD",
    "EGP", "ERN", "ETB", "EUR", "FJD", "FKP", "GBP", "GEL", "GHS", "GIP", "GMD", "GNF", "GTQ",
    "GYD", "HKD", "HNL", "HRK", "HTG", "HUF", "IDR", "ILS", "INR", "IQD", "IRR", "ISK", "JMD",
    "JOD", "JPY", "KES", "KGS", "KHR", "KMF", "KPW", "KRW", "KWD", "KYD", "KZT", "LAK", "LBP",
    "LKR", "LRD", "LSL", "LYD", "MAD", "MDL", "MGA", "MKD", "MMK", "MNT", "MOP", "MRU", "MUR",
    "MVR", "MWK", "MXN", "MYR", "MZN", "NAD", "NGN", "NIO", "NOK", "NPR", "NZD", "OMR", "PAB",
    "PEN", "PGK", "PHP", "PKR", "PLN", "PYG", "QAR", "RON", "RSD", "RUB", "RWF", "SAR", "SBD",
    "SCR", "SDG", "SEK", "SGD", "SHP", "SLL", "SOS", "SRD", "SSP", "STN", "SYP", "SZL", "THB",
    "TJS", "TMT", "TND", "TOP", "TRY", "TTD", "TWD", "TZS", "UAH", "UGX", "USD", "UYU", "UZS",
    "VES", "VND", "VUV", "WST", "XAF", "XCD", "XOF", "XPF", "YER", "ZAR", "ZMW", "ZWL",
    // Non-ISO codes kept for old files.
    "BTC", "XBT",
];

impl ReceiptStore {
    /// All currency codes offered to the user, in the fixed list order.
    pub fn currency_codes(&self) -> &'static [&'static str] {
        CURRENCY_CODES
    }

    /// Categories sorted case-insensitively by name; cached until a category
    /// mutation patches and resorts the list.
    pub async fn categories(&self) -> AppResult<Arc<Vec<Category>>> {
        let _guard = self.inner.db_lock.lock().await;
        self.categories_locked().await
    }

    /// Export code of a category, if the category exists.
    pub async fn category_code(&self, name: &str) -> AppResult<Option<String>> {
        let _guard = self.inner.db_lock.lock().await;
        let categories = self.categories_locked().await?;
        Ok(categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.code.clone()))
    }

    pub async fn insert_category(&self, category: Category) -> AppResult<Category> {
        let _guard = self.inner.db_lock.lock().await;
        sqlx::query("INSERT INTO categories (name, code, breakdown) VALUES (?, ?, ?)")
            .bind(&category.name)
            .bind(&category.code)
            .bind(i64::from(category.breakdown))
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "insert_category"))?;
        self.patch_categories(|list| {
            list.push(category.clone());
            sort_categories(list);
        });
        Ok(category)
    }

    pub async fn update_category(&self, old_name: &str, category: Category) -> AppResult<Category> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("UPDATE categories SET name = ?, code = ?, breakdown = ? WHERE name = ?")
            .bind(&category.name)
            .bind(&category.code)
            .bind(i64::from(category.breakdown))
            .bind(old_name)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "update_category"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("CATEGORIES/NOT_FOUND", "Category not found")
                .with_context("category", old_name.to_string()));
        }
        self.patch_categories(|list| {
            list.retain(|c| c.name != old_name);
            list.push(category.clone());
            sort_categories(list);
        });
        Ok(category)
    }

    pub async fn delete_category(&self, name: &str) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("DELETE FROM categories WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "delete_category"))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        self.patch_categories(|list| list.retain(|c| c.name != name));
        Ok(true)
    }

    /// Payment methods in id order; cached.
    pub async fn payment_methods(&self) -> AppResult<Arc<Vec<PaymentMethod>>> {
        let _guard = self.inner.db_lock.lock().await;
        self.payment_methods_locked().await
    }

    pub async fn find_payment_method(&self, id: i64) -> AppResult<Option<PaymentMethod>> {
        let _guard = self.inner.db_lock.lock().await;
        let methods = self.payment_methods_locked().await?;
        Ok(methods.iter().find(|m| m.id == id).cloned())
    }

    pub async fn insert_payment_method(&self, method: &str) -> AppResult<PaymentMethod> {
        let _guard = self.inner.db_lock.lock().await;
        let candidate = PaymentMethodBuilder::default().method(method).build()?;
        let result = sqlx::query("INSERT INTO paymentmethods (method) VALUES (?)")
            .bind(&candidate.method)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "insert_payment_method"))?;
        let inserted = PaymentMethod {
            id: result.last_insert_rowid(),
            method: candidate.method,
        };
        *self.lock_cache(&self.inner.payment_methods_cache) = None;
        Ok(inserted)
    }

    pub async fn update_payment_method(&self, method: &PaymentMethod) -> AppResult<()> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("UPDATE paymentmethods SET method = ? WHERE id = ?")
            .bind(&method.method)
            .bind(method.id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "update_payment_method"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("PAYMENT_METHODS/NOT_FOUND", "Payment method not found")
                .with_context("id", method.id.to_string()));
        }
        *self.lock_cache(&self.inner.payment_methods_cache) = None;
        Ok(())
    }

    pub async fn delete_payment_method(&self, id: i64) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query("DELETE FROM paymentmethods WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "delete_payment_method"))?;
        *self.lock_cache(&self.inner.payment_methods_cache) = None;
        Ok(result.rows_affected() > 0)
    }

    pub async fn csv_columns(&self) -> AppResult<Arc<Vec<ReportColumn>>> {
        self.columns(ColumnReport::Csv).await
    }

    pub async fn pdf_columns(&self) -> AppResult<Arc<Vec<ReportColumn>>> {
        self.columns(ColumnReport::Pdf).await
    }

    /// Export columns in id order (the order they render in); cached per
    /// report kind.
    pub async fn columns(&self, report: ColumnReport) -> AppResult<Arc<Vec<ReportColumn>>> {
        let _guard = self.inner.db_lock.lock().await;
        self.columns_locked(report).await
    }

    /// Appends a blank column slot to the end of the list.
    pub async fn insert_column(&self, report: ColumnReport) -> AppResult<ReportColumn> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query(&format!("INSERT INTO {} (type) VALUES ('')", report.table()))
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "insert_column"))?;
        let column = ReportColumn {
            id: result.last_insert_rowid(),
            column_type: String::new(),
        };
        self.lock_cache(&self.inner.columns_cache).remove(&report);
        Ok(column)
    }

    /// Removes the column with the highest id. Only tail removal is
    /// supported; interior columns are edited, not deleted.
    pub async fn delete_last_column(&self, report: ColumnReport) -> AppResult<bool> {
        let _guard = self.inner.db_lock.lock().await;
        let table = report.table();
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE id = (SELECT MAX(id) FROM {table})"
        ))
        .execute(self.pool())
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "delete_last_column"))?;
        self.lock_cache(&self.inner.columns_cache).remove(&report);
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_column(
        &self,
        report: ColumnReport,
        id: i64,
        column_type: &str,
    ) -> AppResult<ReportColumn> {
        let _guard = self.inner.db_lock.lock().await;
        let result = sqlx::query(&format!("UPDATE {} SET type = ? WHERE id = ?", report.table()))
            .bind(column_type)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "update_column"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::new("COLUMNS/NOT_FOUND", "Export column not found")
                .with_context("id", id.to_string()));
        }
        self.lock_cache(&self.inner.columns_cache).remove(&report);
        Ok(ReportColumn {
            id,
            column_type: column_type.to_string(),
        })
    }

    pub(crate) async fn categories_locked(&self) -> AppResult<Arc<Vec<Category>>> {
        if let Some(cached) = self.lock_cache(&self.inner.categories_cache).clone() {
            return Ok(cached);
        }
        let rows = sqlx::query("SELECT name, code, breakdown FROM categories")
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "categories"))?;
        let mut list = rows
            .iter()
            .map(Category::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        sort_categories(&mut list);
        let arc = Arc::new(list);
        *self.lock_cache(&self.inner.categories_cache) = Some(arc.clone());
        Ok(arc)
    }

    async fn payment_methods_locked(&self) -> AppResult<Arc<Vec<PaymentMethod>>> {
        if let Some(cached) = self.lock_cache(&self.inner.payment_methods_cache).clone() {
            return Ok(cached);
        }
        let rows = sqlx::query("SELECT id, method FROM paymentmethods ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "payment_methods"))?;
        let list = rows
            .iter()
            .map(PaymentMethod::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let arc = Arc::new(list);
        *self.lock_cache(&self.inner.payment_methods_cache) = Some(arc.clone());
        Ok(arc)
    }

    async fn columns_locked(&self, report: ColumnReport) -> AppResult<Arc<Vec<ReportColumn>>> {
        if let Some(cached) = self.lock_cache(&self.inner.columns_cache).get(&report) {
            return Ok(cached.clone());
        }
        let rows = sqlx::query(&format!("SELECT id, type FROM {} ORDER BY id", report.table()))
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "columns"))?;
        let list = rows
            .iter()
            .map(ReportColumn::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let arc = Arc::new(list);
        self.lock_cache(&self.inner.columns_cache)
            .insert(report, arc.clone());
        Ok(arc)
    }

    /// Applies `patch` to the cached category list when one exists. Misses
    /// simply rebuild from the engine on the next read.
    fn patch_categories(&self, patch: impl FnOnce(&mut Vec<Category>)) {
        let mut cache = self.lock_cache(&self.inner.categories_cache);
        if let Some(existing) = cache.take() {
            let mut list = (*existing).clone();
            patch(&mut list);
            *cache = Some(Arc::new(list));
        }
    }
}

fn sort_categories(list: &mut [Category]) {
    list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
}
