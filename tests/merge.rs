use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tempfile::TempDir;
use tripledger::model::{ReceiptBuilder, TripBuilder};
use tripledger::storage::LogSink;
use tripledger::{ReceiptStore, StoreConfig};

/// Collects report lines in memory so tests can assert on them.
#[derive(Default)]
struct VecSink {
    lines: Mutex<Vec<String>>,
}

impl VecSink {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock").clone()
    }
}

impl LogSink for VecSink {
    fn append(&self, _logical_file: &str, line: &str) {
        self.lines.lock().expect("sink lock").push(line.to_string());
    }
}

async fn open_store(tmp: &TempDir, file: &str) -> Result<ReceiptStore> {
    Ok(ReceiptStore::open(StoreConfig::new(tmp.path().join(file))).await?)
}

async fn open_store_with_sink(
    tmp: &TempDir,
    file: &str,
    sink: Arc<VecSink>,
) -> Result<ReceiptStore> {
    Ok(ReceiptStore::open(
        StoreConfig::new(tmp.path().join(file)).with_log_sink(sink),
    )
    .await?)
}

#[tokio::test]
async fn merge_without_overwrite_keeps_the_existing_trip() -> Result<()> {
    let tmp = TempDir::new()?;

    let source = open_store(&tmp, "source.db").await?;
    source
        .insert_trip(TripBuilder::new("Paris").from_date_ms(100).to_date_ms(200))
        .await?;
    source
        .insert_trip(TripBuilder::new("Rome").from_date_ms(10).to_date_ms(20))
        .await?;
    source.close().await;

    let sink = Arc::new(VecSink::default());
    let dest = open_store_with_sink(&tmp, "dest.db", sink.clone()).await?;
    dest.insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;

    dest.merge(&tmp.path().join("source.db"), "wb.receipts", false)
        .await?;

    let paris = dest.get_trip_by_name("Paris").await?.expect("paris");
    assert_eq!(paris.to_date_ms, 2, "existing copy wins without overwrite");
    let rome = dest.get_trip_by_name("Rome").await?.expect("rome");
    assert_eq!(rome.to_date_ms, 20);
    assert!(sink.lines().iter().any(|l| l == "Success"));
    Ok(())
}

#[tokio::test]
async fn merge_with_overwrite_replaces_the_matching_receipt() -> Result<()> {
    let tmp = TempDir::new()?;
    let date = 1_000_000;

    let source = open_store(&tmp, "source.db").await?;
    source
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    source
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .date_ms(date)
                .comment("from source"),
        )
        .await?;
    source.close().await;

    let dest = open_store(&tmp, "dest.db").await?;
    dest.insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    // Same name and date into an equally empty trip: the stored dates line
    // up, so the natural key matches across the two files.
    dest.insert_receipt(
        ReceiptBuilder::new("Paris", "Dinner")
            .date_ms(date)
            .comment("from dest"),
    )
    .await?;

    dest.merge(&tmp.path().join("source.db"), "wb.receipts", true)
        .await?;
    let receipts = dest.get_receipts("Paris").await?;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].comment.as_deref(), Some("from source"));
    Ok(())
}

#[tokio::test]
async fn merge_without_overwrite_keeps_the_matching_receipt() -> Result<()> {
    let tmp = TempDir::new()?;
    let date = 1_000_000;

    let source = open_store(&tmp, "source.db").await?;
    source
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    source
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .date_ms(date)
                .comment("from source"),
        )
        .await?;
    source.close().await;

    let dest = open_store(&tmp, "dest.db").await?;
    dest.insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    dest.insert_receipt(
        ReceiptBuilder::new("Paris", "Dinner")
            .date_ms(date)
            .comment("from dest"),
    )
    .await?;

    dest.merge(&tmp.path().join("source.db"), "wb.receipts", false)
        .await?;
    let receipts = dest.get_receipts("Paris").await?;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].comment.as_deref(), Some("from dest"));
    Ok(())
}

#[tokio::test]
async fn merge_fails_when_the_source_has_no_payment_methods() -> Result<()> {
    let tmp = TempDir::new()?;

    let source = open_store(&tmp, "source.db").await?;
    let methods = source.payment_methods().await?;
    for method in methods.iter() {
        assert!(source.delete_payment_method(method.id).await?);
    }
    source.close().await;

    let sink = Arc::new(VecSink::default());
    let dest = open_store_with_sink(&tmp, "dest.db", sink.clone()).await?;
    let err = dest
        .merge(&tmp.path().join("source.db"), "wb.receipts", true)
        .await
        .expect_err("unusable source");
    assert_eq!(err.code(), "MERGE/NO_PAYMENT_METHODS");
    assert!(sink.lines().iter().any(|l| l.starts_with("Merge failed")));

    // The destination keeps its own payment methods.
    assert_eq!(dest.payment_methods().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn merge_fails_when_the_source_file_is_missing() -> Result<()> {
    let tmp = TempDir::new()?;
    let dest = open_store(&tmp, "dest.db").await?;
    assert!(dest
        .merge(Path::new("/nonexistent/source.db"), "wb.receipts", true)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn legacy_source_paths_are_rewritten_and_missing_tables_skipped() -> Result<()> {
    let tmp = TempDir::new()?;

    // A truly ancient source: trips plus payment methods, nothing else.
    let source_path = tmp.path().join("legacy.db");
    let opts = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&source_path)
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(opts).await?;
    sqlx::query("CREATE TABLE trips (name TEXT PRIMARY KEY, from_date DATE, to_date DATE)")
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO trips (name, from_date, to_date) VALUES (?, ?, ?)")
        .bind("/data/data/wb.receipts/files/Paris")
        .bind(1_000)
        .bind(2_000)
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE TABLE paymentmethods (id INTEGER PRIMARY KEY AUTOINCREMENT, method TEXT)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("INSERT INTO paymentmethods (method) VALUES ('Cash')")
        .execute(&pool)
        .await?;
    pool.close().await;

    let sink = Arc::new(VecSink::default());
    let dest = open_store_with_sink(&tmp, "dest.db", sink.clone()).await?;
    dest.merge(&source_path, "wb.receiptspro", true).await?;

    assert!(dest.get_trip_by_name("Paris").await?.is_some());
    let methods = dest.payment_methods().await?;
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].method, "Cash");
    // Tables the source never had are reported and skipped, not fatal.
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.starts_with("Failed to merge receipts")));
    assert!(sink.lines().iter().any(|l| l == "Success"));
    Ok(())
}
