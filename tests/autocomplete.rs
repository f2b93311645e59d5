use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tempfile::TempDir;
use tripledger::model::{ReceiptBuilder, TripBuilder};
use tripledger::storage::StaticPreferences;
use tripledger::{AutoCompleteField, ReceiptStore, StoreConfig};

async fn open_store() -> Result<(TempDir, ReceiptStore)> {
    let tmp = TempDir::new()?;
    let store = ReceiptStore::open(StoreConfig::new(tmp.path().join("receipts.db"))).await?;
    store
        .insert_trip(TripBuilder::new("Paris").from_date_ms(1).to_date_ms(2))
        .await?;
    Ok((tmp, store))
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("decimal literal")
}

#[tokio::test]
async fn autocomplete_lists_distinct_matches_alphabetically() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    for name in ["Dinner at Mario's", "Dinner", "Dinner", "Taxi"] {
        store
            .insert_receipt(ReceiptBuilder::new("Paris", name).date_ms(1_000))
            .await?;
    }

    let values = store
        .autocomplete("Din", AutoCompleteField::ReceiptName)
        .await?;
    assert_eq!(values, vec!["Dinner".to_string(), "Dinner at Mario's".to_string()]);

    assert!(store
        .autocomplete("Nothing", AutoCompleteField::ReceiptName)
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn autocomplete_also_covers_trip_names_and_comments() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_trip(TripBuilder::new("Paris 2024").from_date_ms(3).to_date_ms(4))
        .await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Dinner")
                .date_ms(1_000)
                .comment("client meeting"),
        )
        .await?;

    let trips = store.autocomplete("Par", AutoCompleteField::TripName).await?;
    assert_eq!(trips, vec!["Paris".to_string(), "Paris 2024".to_string()]);

    let comments = store
        .autocomplete("client", AutoCompleteField::ReceiptComment)
        .await?;
    assert_eq!(comments, vec!["client meeting".to_string()]);
    Ok(())
}

#[tokio::test]
async fn hint_fills_in_when_the_recent_receipts_agree() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    for _ in 0..2 {
        store
            .insert_receipt(
                ReceiptBuilder::new("Paris", "Coffee")
                    .date_ms(1_000)
                    .category("Breakfast")
                    .price(dec("3.00")),
            )
            .await?;
    }

    let hint = store.receipt_hint("Coffee").await?.expect("hint");
    assert_eq!(hint.category.as_deref(), Some("Breakfast"));
    assert_eq!(hint.price, Some(dec("3.00")));
    Ok(())
}

#[tokio::test]
async fn hint_blanks_the_sides_that_disagree() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Lunch")
                .date_ms(1_000)
                .category("Meals")
                .price(dec("11.00")),
        )
        .await?;
    store
        .insert_receipt(
            ReceiptBuilder::new("Paris", "Lunch")
                .date_ms(1_000)
                .category("Entertainment")
                .price(dec("18.00")),
        )
        .await?;

    let hint = store.receipt_hint("Lunch").await?.expect("hint");
    assert_eq!(hint.category, None);
    assert_eq!(hint.price, None);
    Ok(())
}

#[tokio::test]
async fn hint_is_absent_for_unknown_names() -> Result<()> {
    let (_tmp, store) = open_store().await?;
    assert!(store.receipt_hint("Nothing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn hint_is_gated_by_the_prediction_preference() -> Result<()> {
    let tmp = TempDir::new()?;
    let prefs = StaticPreferences {
        predict_categories: false,
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
            ReceiptBuilder::new("Paris", "Coffee")
                .date_ms(1_000)
                .category("Breakfast"),
        )
        .await?;

    assert!(store.receipt_hint("Coffee").await?.is_none());
    Ok(())
}
