use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::AppResult;
use crate::model::{Receipt, ReceiptBuilder, Trip, TripBuilder};
use crate::store::ReceiptStore;

/// The parallel calling convention: each `*_parallel` method spawns the
/// serial operation on the runtime and hands back a `oneshot::Receiver`
/// carrying the typed result. Dropping the receiver turns the call into
/// fire-and-forget; the operation itself still runs to completion.
impl ReceiptStore {
    fn spawn_op<T, Fut>(&self, fut: Fut) -> oneshot::Receiver<AppResult<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            // A dropped receiver is fine; the work already happened.
            let _ = tx.send(fut.await);
        });
        rx
    }

    pub fn get_trips_parallel(&self) -> oneshot::Receiver<AppResult<Arc<Vec<Trip>>>> {
        let store = self.clone();
        self.spawn_op(async move { store.get_trips().await })
    }

    pub fn insert_trip_parallel(&self, builder: TripBuilder) -> oneshot::Receiver<AppResult<Trip>> {
        let store = self.clone();
        self.spawn_op(async move { store.insert_trip(builder).await })
    }

    pub fn update_trip_parallel(
        &self,
        old_name: String,
        builder: TripBuilder,
    ) -> oneshot::Receiver<AppResult<Trip>> {
        let store = self.clone();
        self.spawn_op(async move { store.update_trip(&old_name, builder).await })
    }

    pub fn delete_trip_parallel(&self, name: String) -> oneshot::Receiver<AppResult<bool>> {
        let store = self.clone();
        self.spawn_op(async move { store.delete_trip(&name).await })
    }

    pub fn get_receipts_parallel(
        &self,
        trip_name: String,
    ) -> oneshot::Receiver<AppResult<Arc<Vec<Receipt>>>> {
        let store = self.clone();
        self.spawn_op(async move { store.get_receipts(&trip_name).await })
    }

    pub fn insert_receipt_parallel(
        &self,
        builder: ReceiptBuilder,
    ) -> oneshot::Receiver<AppResult<Receipt>> {
        let store = self.clone();
        self.spawn_op(async move { store.insert_receipt(builder).await })
    }

    pub fn update_receipt_parallel(
        &self,
        old: Receipt,
        builder: ReceiptBuilder,
    ) -> oneshot::Receiver<AppResult<Receipt>> {
        let store = self.clone();
        self.spawn_op(async move { store.update_receipt(&old, builder).await })
    }

    pub fn delete_receipt_parallel(&self, receipt: Receipt) -> oneshot::Receiver<AppResult<bool>> {
        let store = self.clone();
        self.spawn_op(async move { store.delete_receipt(&receipt).await })
    }

    pub fn copy_receipt_parallel(
        &self,
        receipt: Receipt,
        dest_trip: String,
    ) -> oneshot::Receiver<AppResult<Receipt>> {
        let store = self.clone();
        self.spawn_op(async move { store.copy_receipt(&receipt, &dest_trip).await })
    }

    pub fn move_receipt_parallel(
        &self,
        receipt: Receipt,
        dest_trip: String,
    ) -> oneshot::Receiver<AppResult<Receipt>> {
        let store = self.clone();
        self.spawn_op(async move { store.move_receipt(&receipt, &dest_trip).await })
    }
}
