use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderState};

/// Fields fixed at order creation. The store assigns identity, timestamps,
/// and the initial `Created` state.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub project_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub currency: String,
    pub amount_total: Decimal,
    pub platform_fee: Decimal,
    pub seller_amount: Decimal,
}

/// A single atomic mutation of an order row. Only the populated fields are
/// written; `updated_at` is always bumped, which doubles as the staleness
/// clock reset.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub state: Option<OrderState>,
    pub gateway_order_id: Option<String>,
    pub gateway_capture_id: Option<String>,
    pub payout_batch_id: Option<String>,
    pub payout_item_id: Option<String>,
    pub cancel_reason: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn state(state: OrderState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Records the id the gateway assigned after create-intent succeeded.
    pub fn gateway_assigned(gateway_order_id: String) -> Self {
        Self {
            gateway_order_id: Some(gateway_order_id),
            ..Self::default()
        }
    }

    /// Buyer funds captured: the order becomes `Paid`.
    pub fn captured(gateway_capture_id: Option<String>) -> Self {
        Self {
            state: Some(OrderState::Paid),
            gateway_capture_id,
            ..Self::default()
        }
    }

    pub fn payout_sent(batch_id: String, payout_item_id: Option<String>) -> Self {
        Self {
            state: Some(OrderState::PayoutSent),
            payout_batch_id: Some(batch_id),
            payout_item_id,
            ..Self::default()
        }
    }

    /// Closes the order into `Canceled` or `Expired` with an audit reason.
    pub fn closed(state: OrderState, reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            cancel_reason: Some(reason.to_string()),
            canceled_at: Some(at),
            ..Self::default()
        }
    }
}

/// Persistence boundary for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: NewOrder) -> Result<OrderModel, DbErr>;

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<OrderModel, DbErr>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr>;

    async fn find_by_gateway_id(&self, gateway_order_id: &str)
        -> Result<Option<OrderModel>, DbErr>;

    /// Deduplication lookup: the open (`Created`/`Approved`) order for a
    /// (buyer, project) pair, if any.
    async fn find_open_for_buyer_project(
        &self,
        buyer_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<OrderModel>, DbErr>;
}

#[derive(Clone)]
pub struct SeaOrmOrderStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<OrderModel, DbErr> {
        let now = Utc::now();
        let active = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            gateway_order_id: Set(None),
            project_id: Set(order.project_id),
            buyer_id: Set(order.buyer_id),
            seller_id: Set(order.seller_id),
            currency: Set(order.currency),
            amount_total: Set(order.amount_total),
            platform_fee: Set(order.platform_fee),
            seller_amount: Set(order.seller_amount),
            state: Set(OrderState::Created),
            gateway_capture_id: Set(None),
            payout_batch_id: Set(None),
            payout_item_id: Set(None),
            cancel_reason: Set(None),
            canceled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        active.insert(&*self.db).await
    }

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<OrderModel, DbErr> {
        let existing = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("order {id} not found")))?;

        let mut active: order::ActiveModel = existing.into();
        if let Some(state) = patch.state {
            active.state = Set(state);
        }
        if let Some(gateway_order_id) = patch.gateway_order_id {
            active.gateway_order_id = Set(Some(gateway_order_id));
        }
        if let Some(capture_id) = patch.gateway_capture_id {
            active.gateway_capture_id = Set(Some(capture_id));
        }
        if let Some(batch_id) = patch.payout_batch_id {
            active.payout_batch_id = Set(Some(batch_id));
        }
        if let Some(item_id) = patch.payout_item_id {
            active.payout_item_id = Set(Some(item_id));
        }
        if let Some(reason) = patch.cancel_reason {
            active.cancel_reason = Set(Some(reason));
        }
        if let Some(at) = patch.canceled_at {
            active.canceled_at = Set(Some(at));
        }
        active.updated_at = Set(Utc::now());

        active.update(&*self.db).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr> {
        OrderEntity::find_by_id(id).one(&*self.db).await
    }

    async fn find_by_gateway_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<OrderModel>, DbErr> {
        OrderEntity::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await
    }

    async fn find_open_for_buyer_project(
        &self,
        buyer_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<OrderModel>, DbErr> {
        OrderEntity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .filter(order::Column::ProjectId.eq(project_id))
            .filter(order::Column::State.is_in([OrderState::Created, OrderState::Approved]))
            .one(&*self.db)
            .await
    }
}
