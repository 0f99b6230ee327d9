use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Settlement state of an order.
///
/// `PayoutSent`, `PayoutFailed`, `Canceled` and `Expired` are terminal; no
/// transition leaves them. The full transition table lives in
/// [`OrderState::can_transition_to`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderState {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "payout_sent")]
    PayoutSent,
    #[sea_orm(string_value = "payout_failed")]
    PayoutFailed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl OrderState {
    /// An open order blocks a second purchase intent for the same
    /// (buyer, project) pair until it settles, cancels, or expires.
    pub fn is_open(self) -> bool {
        matches!(self, OrderState::Created | OrderState::Approved)
    }

    /// Buyer funds have been captured; the order must never revert to an
    /// open or canceled state from here.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            OrderState::Paid | OrderState::PayoutSent | OrderState::PayoutFailed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::PayoutSent
                | OrderState::PayoutFailed
                | OrderState::Canceled
                | OrderState::Expired
        )
    }

    /// Transition table for the settlement state machine.
    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, Approved | Paid | Canceled | Expired)
                | (Approved, Paid | Canceled | Expired)
                | (Paid, PayoutSent | PayoutFailed)
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Identifier assigned by the payment gateway; `None` until the
    /// create-intent call has succeeded.
    pub gateway_order_id: Option<String>,

    pub project_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,

    /// Money fields are fixed at creation time and never recomputed.
    /// `seller_amount = amount_total - platform_fee` always holds.
    pub currency: String,
    pub amount_total: Decimal,
    pub platform_fee: Decimal,
    pub seller_amount: Decimal,

    pub state: OrderState,

    pub gateway_capture_id: Option<String>,
    pub payout_batch_id: Option<String>,
    pub payout_item_id: Option<String>,

    pub cancel_reason: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    /// Staleness clock for lazy pending-order expiry.
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::OrderState::*;
    use super::*;

    #[test]
    fn transition_table_allows_documented_edges() {
        assert!(Created.can_transition_to(Approved));
        assert!(Created.can_transition_to(Paid));
        assert!(Created.can_transition_to(Canceled));
        assert!(Created.can_transition_to(Expired));
        assert!(Approved.can_transition_to(Paid));
        assert!(Approved.can_transition_to(Canceled));
        assert!(Approved.can_transition_to(Expired));
        assert!(Paid.can_transition_to(PayoutSent));
        assert!(Paid.can_transition_to(PayoutFailed));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [PayoutSent, PayoutFailed, Canceled, Expired] {
            for next in [
                Created,
                Approved,
                Paid,
                PayoutSent,
                PayoutFailed,
                Canceled,
                Expired,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be forbidden"
                );
            }
        }
    }

    #[test]
    fn settled_order_never_reopens() {
        assert!(!Paid.can_transition_to(Created));
        assert!(!Paid.can_transition_to(Approved));
        assert!(!Paid.can_transition_to(Canceled));
        assert!(!Approved.can_transition_to(Created));
    }

    #[test]
    fn staleness_uses_updated_at() {
        let now = Utc::now();
        let order = Model {
            id: Uuid::new_v4(),
            gateway_order_id: None,
            project_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            currency: "USD".into(),
            amount_total: Decimal::new(10000, 2),
            platform_fee: Decimal::ZERO,
            seller_amount: Decimal::new(10000, 2),
            state: Created,
            gateway_capture_id: None,
            payout_batch_id: None,
            payout_item_id: None,
            cancel_reason: None,
            canceled_at: None,
            created_at: now - Duration::minutes(45),
            updated_at: now - Duration::minutes(31),
        };

        assert!(order.is_stale(Duration::minutes(30), now));
        assert!(!order.is_stale(Duration::minutes(45), now));
    }
}
