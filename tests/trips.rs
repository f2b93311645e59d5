use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tempfile::TempDir;
use tripledger::model::{ReceiptBuilder, TripBuilder, MULTI_CURRENCY};
use tripledger::storage::StaticPreferences;
use tripledger::{ReceiptStore, StoreConfig};

async fn open_store() -> Result<(TempDir, ReceiptStore)> {
    let tmp = TempDir::new()?;
    let store = ReceiptStore::open(StoreConfig::new(tmp.path().join("receipts.db"))).await?;
    Ok((tmp, store))
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("decimal literal")
}

#[tokio::test]
async fn fresh_trip_has_zero_totals_and_the_default_currency() -> Result<()> {
    let (_tmp, store) = open_store().await?;

    let trip = store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1_000).to_date_ms(2_000))
        .await?;

    assert_eq!(trip.name, "Paris");
    assert_eq!(trip.price, Decimal::ZERO);
    assert_eq!(trip.daily_sub_total, Decimal::ZERO);
    // No receipts and no trip-level default: preference default wins.
    assert_eq!(trip.price_currency, "USD");
    Ok(())
}

#[tokio::test]
async fn totals_track_every_receipt_mutation() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(
            TripBuilder::new("Paris")
                .from_date_ms(1_000)
                .to_date_ms(2_000)
                .default_currency("EUR"),
        )
        .await?;

    let dinner = store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .price(dec("9.95"))
                .currency_code("EUR"),
        )
        .await?;
    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, dec("9.95"));
    assert_eq!(trip.daily_sub_total, dec("9.95"));
    assert_eq!(trip.price_currency, "EUR");

    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Taxi")
                .price(dec("20.05"))
                .currency_code("EUR"),
        )
        .await?;
    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, dec("30.00"));

    assert!(store.delete_receipt(&dinner).await?);
    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, dec("20.05"));
    Ok(())
}

#[tokio::test]
async fn mixed_currencies_report_the_placeholder_code() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(
            TripBuilder::new("Paris")
                .from_date_ms(1_000)
                .to_date_ms(2_000)
                .default_currency("EUR"),
        )
        .await?;

    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .price(dec("9.95"))
                .currency_code("EUR"),
        )
        .await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Hotel")
                .price(dec("100"))
                .currency_code("USD"),
        )
        .await?;

    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price_currency, MULTI_CURRENCY);
    Ok(())
}

#[tokio::test]
async fn trips_are_listed_newest_end_date_first() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Older").from_date_ms(1).to_date_ms(10))
        .await?;
    store
        .insert_trip(TripBuilder::new("Newer").from_date_ms(2).to_date_ms(20))
        .await?;

    let names = store.trip_names().await?;
    assert_eq!(names, vec!["Newer".to_string(), "Older".to_string()]);
    Ok(())
}

#[tokio::test]
async fn renaming_a_trip_carries_its_receipts_along() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    store
        .insert_receipt(ReceiptBuilder::new("Paris", "Dinner").price(dec("5")))
        .await?;

    let renamed = store
        .update_trip(
            "Paris",
            TripBuilder::new("Paris 2024").from_date_ms(1).to_date_ms(2),
        )
        .await?;
    assert_eq!(renamed.name, "Paris 2024");

    assert!(store.get_trip_by_name("Paris").await?.is_none());
    let receipts = store.get_receipts("Paris 2024").await?;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].trip_name, "Paris 2024");
    assert!(store.get_receipts("Paris").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_trip_cascades_to_its_receipts() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    let receipt = store
        .insert_receipt(ReceiptBuilder::new("Paris", "Dinner").price(dec("5")))
        .await?;

    assert!(store.delete_trip("Paris").await?);
    assert!(!store.delete_trip("Paris").await?, "second delete finds nothing");
    assert!(store.get_receipt_by_id(receipt.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn add_miles_accumulates() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;

    store.add_miles("Paris", dec("12.5")).await?;
    let trip = store.add_miles("Paris", dec("7.5")).await?;
    assert_eq!(trip.miles, dec("20.0"));

    let listed = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(listed.miles, dec("20.0"));
    Ok(())
}

#[tokio::test]
async fn duplicate_trip_insert_fails_with_the_directory_in_context() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;

    let err = store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(3).to_date_ms(4))
        .await
        .expect_err("primary key violation");
    let dir = err.context().get("directory").expect("directory context");
    assert!(dir.contains("Paris"), "got {dir}");
    Ok(())
}

#[tokio::test]
async fn update_reports_the_stored_mileage() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    store.add_miles("Paris", dec("12.5")).await?;

    // The builder carries no mileage; the update must not zero the snapshot.
    let updated = store
        .update_trip(
            "Paris",
            TripBuilder::new("Paris")
                .from_date_ms(1)
                .to_date_ms(2)
                .comment("revised"),
        )
        .await?;
    assert_eq!(updated.miles, dec("12.5"));
    let listed = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(listed.miles, dec("12.5"));
    Ok(())
}

#[tokio::test]
async fn expensable_filter_excludes_marked_receipts_from_totals() -> Result<()> {
    let tmp = TempDir::new()?;
    let prefs = StaticPreferences {
        only_include_expensable: true,
        ..StaticPreferences::default()
    };
    let store = ReceiptStore::open(
        StoreConfig::new(tmp.path().join("receipts.db")).with_preferences(Arc::new(prefs)),
    )
    .await?;

    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .price(dec("10"))
                .expensable(true),
        )
        .await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Souvenir")
                .price(dec("99"))
                .expensable(false),
        )
        .await?;

    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, dec("10"));
    Ok(())
}

#[tokio::test]
async fn currency_derivation_sees_receipts_the_expensable_filter_hides() -> Result<()> {
    let tmp = TempDir::new()?;
    let prefs = StaticPreferences {
        only_include_expensable: true,
        ..StaticPreferences::default()
    };
    let store = ReceiptStore::open(
        StoreConfig::new(tmp.path().join("receipts.db")).with_preferences(Arc::new(prefs)),
    )
    .await?;
    store
        .insert_trip(
            TripBuilder::new("Paris")
                .from_date_ms(1)
                .to_date_ms(2)
                .default_currency("EUR"),
        )
        .await?;

    // A lone non-expensable receipt stays out of the sums but still decides
    // the display currency.
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Souvenir")
                .price(dec("99"))
                .currency_code("USD")
                .expensable(false),
        )
        .await?;
    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, Decimal::ZERO);
    assert_eq!(trip.price_currency, "USD");

    // Mixing in an expensable receipt of another currency flips to the
    // multi-currency placeholder even though only one currency is summed.
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .price(dec("10"))
                .currency_code("EUR")
                .expensable(true),
        )
        .await?;
    let trip = store.get_trip_by_name("Paris").await?.expect("trip");
    assert_eq!(trip.price, dec("10"));
    assert_eq!(trip.price_currency, MULTI_CURRENCY);
    Ok(())
}
