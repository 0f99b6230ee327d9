//! In-memory implementations of the persistence boundaries, mirroring the
//! sea-orm ones. Used by the test harness and local demos; no database
//! required.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use uuid::Uuid;

use crate::entities::order::{Model as OrderModel, OrderState};

use super::catalog_store::{CatalogStore, ListedProject};
use super::order_store::{NewOrder, OrderPatch, OrderStore};
use super::payout_directory::PayoutDirectory;

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, OrderModel>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All orders, unordered. Test support.
    pub fn snapshot(&self) -> Vec<OrderModel> {
        self.orders.lock().unwrap().values().cloned().collect()
    }

    /// Rewinds the staleness clock of an order. Test support for TTL expiry.
    pub fn backdate_updated_at(&self, id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&id) {
            order.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<OrderModel, DbErr> {
        let now = Utc::now();
        let model = OrderModel {
            id: Uuid::new_v4(),
            gateway_order_id: None,
            project_id: order.project_id,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            currency: order.currency,
            amount_total: order.amount_total,
            platform_fee: order.platform_fee,
            seller_amount: order.seller_amount,
            state: OrderState::Created,
            gateway_capture_id: None,
            payout_batch_id: None,
            payout_item_id: None,
            cancel_reason: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        };

        self.orders.lock().unwrap().insert(model.id, model.clone());
        Ok(model)
    }

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<OrderModel, DbErr> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| DbErr::RecordNotFound(format!("order {id} not found")))?;

        if let Some(state) = patch.state {
            order.state = state;
        }
        if let Some(gateway_order_id) = patch.gateway_order_id {
            order.gateway_order_id = Some(gateway_order_id);
        }
        if let Some(capture_id) = patch.gateway_capture_id {
            order.gateway_capture_id = Some(capture_id);
        }
        if let Some(batch_id) = patch.payout_batch_id {
            order.payout_batch_id = Some(batch_id);
        }
        if let Some(item_id) = patch.payout_item_id {
            order.payout_item_id = Some(item_id);
        }
        if let Some(reason) = patch.cancel_reason {
            order.cancel_reason = Some(reason);
        }
        if let Some(at) = patch.canceled_at {
            order.canceled_at = Some(at);
        }
        order.updated_at = Utc::now();

        Ok(order.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_gateway_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<OrderModel>, DbErr> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn find_open_for_buyer_project(
        &self,
        buyer_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<OrderModel>, DbErr> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.buyer_id == buyer_id && o.project_id == project_id && o.state.is_open())
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    projects: Mutex<HashMap<Uuid, ListedProject>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: ListedProject) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    pub fn get(&self, project_id: Uuid) -> Option<ListedProject> {
        self.projects.lock().unwrap().get(&project_id).cloned()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn listed_project(&self, project_id: Uuid) -> Result<Option<ListedProject>, DbErr> {
        Ok(self.get(project_id))
    }

    async fn mark_sold(&self, project_id: Uuid) -> Result<(), DbErr> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(&project_id)
            .ok_or_else(|| DbErr::RecordNotFound(format!("project {project_id} not found")))?;
        project.is_sold = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPayoutDirectory {
    destinations: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryPayoutDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, seller_id: Uuid, destination: impl Into<String>) {
        self.destinations
            .lock()
            .unwrap()
            .insert(seller_id, destination.into());
    }

    pub fn remove(&self, seller_id: Uuid) {
        self.destinations.lock().unwrap().remove(&seller_id);
    }
}

#[async_trait]
impl PayoutDirectory for InMemoryPayoutDirectory {
    async fn payout_destination(&self, seller_id: Uuid) -> Result<Option<String>, DbErr> {
        Ok(self.destinations.lock().unwrap().get(&seller_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_order(buyer_id: Uuid, project_id: Uuid) -> NewOrder {
        NewOrder {
            project_id,
            buyer_id,
            seller_id: Uuid::new_v4(),
            currency: "USD".into(),
            amount_total: dec!(50.00),
            platform_fee: dec!(5.00),
            seller_amount: dec!(45.00),
        }
    }

    #[tokio::test]
    async fn open_order_lookup_ignores_closed_states() {
        let store = InMemoryOrderStore::new();
        let buyer = Uuid::new_v4();
        let project = Uuid::new_v4();

        let order = store.insert(new_order(buyer, project)).await.unwrap();
        assert!(store
            .find_open_for_buyer_project(buyer, project)
            .await
            .unwrap()
            .is_some());

        store
            .update(
                order.id,
                OrderPatch::closed(OrderState::Canceled, "user-cancel", Utc::now()),
            )
            .await
            .unwrap();

        assert!(store
            .find_open_for_buyer_project(buyer, project)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_bumps_staleness_clock() {
        let store = InMemoryOrderStore::new();
        let order = store
            .insert(new_order(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        store.backdate_updated_at(order.id, Utc::now() - chrono::Duration::minutes(40));
        let stale = store.find_by_id(order.id).await.unwrap().unwrap();
        assert!(stale.is_stale(chrono::Duration::minutes(30), Utc::now()));

        let touched = store
            .update(order.id, OrderPatch::state(OrderState::Approved))
            .await
            .unwrap();
        assert!(!touched.is_stale(chrono::Duration::minutes(30), Utc::now()));
    }

    #[tokio::test]
    async fn mark_sold_is_idempotent() {
        let catalog = InMemoryCatalog::new();
        let project_id = Uuid::new_v4();
        catalog.insert(ListedProject {
            id: project_id,
            owner_id: Uuid::new_v4(),
            title: "Brand kit".into(),
            price: dec!(100),
            is_published: true,
            is_sold: false,
        });

        catalog.mark_sold(project_id).await.unwrap();
        catalog.mark_sold(project_id).await.unwrap();
        assert!(catalog.get(project_id).unwrap().is_sold);
    }
}
