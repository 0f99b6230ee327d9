//! The order settlement engine: purchase-intent creation, capture + payout
//! orchestration, gateway browser callbacks, self-service cancellation, and
//! lazy stale-order expiry.
//!
//! The payment gateway is the source of truth for money movement; this
//! service owns the order state machine around it. Every persisted write is
//! a single atomic update, and gateway failures always leave the order in
//! its last consistent state. The one deliberate exception is the
//! compensating `Paid -> PayoutFailed` transition after a successful capture,
//! which records that money moved but the payout did not.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{Model as OrderModel, OrderState};
use crate::errors::OrderError;
use crate::events::{Event, EventSender};
use crate::gateway::{CreateIntentRequest, GatewayError, PaymentGateway, PayoutRequest};
use crate::repositories::{CatalogStore, NewOrder, OrderPatch, OrderStore, PayoutDirectory};

/// Cancellation reason recorded when a stale pending order is lazily expired.
pub const STALE_EXPIRY_REASON: &str = "auto-expired, retry allowed";
/// Reason recorded when the gateway's cancel redirect closes an open order.
pub const GATEWAY_CANCEL_REASON: &str = "gateway-cancel";
/// Reason recorded when the buyer cancels their own open order.
pub const USER_CANCEL_REASON: &str = "user-cancel";

/// Immutable settlement knobs, resolved once at startup. Transitions never
/// read ambient configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Settlement currency for every order (ISO 4217).
    pub currency: String,
    /// Platform fee in percent of the item price; zero disables the fee.
    pub platform_fee_percent: Decimal,
    /// How long a pending order may go untouched before a new purchase
    /// attempt expires it.
    pub pending_order_ttl: Duration,
    /// Public base URL used to build the gateway's return/cancel callbacks.
    pub public_base_url: String,
}

/// Response to a successful purchase-intent creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PurchaseIntent {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    /// Link the buyer follows to approve the payment on the gateway's site.
    pub approve_link: String,
    pub amount_total: Decimal,
    pub currency: String,
}

/// Externally visible order status, returned by capture, callbacks, and
/// cancellation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusView {
    pub order_id: Uuid,
    pub status: OrderState,
    pub gateway_order_id: Option<String>,
    pub gateway_capture_id: Option<String>,
}

impl From<OrderModel> for OrderStatusView {
    fn from(order: OrderModel) -> Self {
        Self {
            order_id: order.id,
            status: order.state,
            gateway_order_id: order.gateway_order_id,
            gateway_capture_id: order.gateway_capture_id,
        }
    }
}

pub struct OrderSettlementService {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogStore>,
    payees: Arc<dyn PayoutDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    config: SettlementConfig,
    events: Option<Arc<EventSender>>,
}

impl OrderSettlementService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogStore>,
        payees: Arc<dyn PayoutDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        config: SettlementConfig,
        events: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            store,
            catalog,
            payees,
            gateway,
            config,
            events,
        }
    }

    /// Creates a purchase intent for `buyer_id` on `project_id`.
    ///
    /// Enforces the central invariant: at most one open order per
    /// (buyer, project) pair. A stale pending order (untouched longer than
    /// the configured TTL) is expired in place and replaced; a fresh one is
    /// reported back as a conflict carrying the ids needed to resume it.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, project_id = %project_id))]
    pub async fn create_purchase_intent(
        &self,
        buyer_id: Uuid,
        project_id: Uuid,
    ) -> Result<PurchaseIntent, OrderError> {
        let project = self
            .catalog
            .listed_project(project_id)
            .await?
            .ok_or(OrderError::ItemNotFound)?;

        if !project.is_published {
            return Err(OrderError::ItemNotPurchasable);
        }
        if project.owner_id == buyer_id {
            return Err(OrderError::SelfPurchaseDenied);
        }

        if let Some(existing) = self
            .store
            .find_open_for_buyer_project(buyer_id, project_id)
            .await?
        {
            let now = Utc::now();
            if existing.is_stale(self.config.pending_order_ttl, now) {
                let expired = self
                    .store
                    .update(
                        existing.id,
                        OrderPatch::closed(OrderState::Expired, STALE_EXPIRY_REASON, now),
                    )
                    .await?;
                info!(order_id = %expired.id, "expired stale pending order");
                self.emit(Event::OrderExpired(expired.id)).await;
            } else {
                return Err(OrderError::OrderAlreadyPending {
                    order_id: existing.id,
                    gateway_order_id: existing.gateway_order_id,
                    state: existing.state,
                });
            }
        }

        if self
            .payees
            .payout_destination(project.owner_id)
            .await?
            .is_none()
        {
            return Err(OrderError::SellerPayoutMissing);
        }

        if project.price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice);
        }
        let (platform_fee, seller_amount) =
            split_amount(project.price, self.config.platform_fee_percent);

        let order = self
            .store
            .insert(NewOrder {
                project_id,
                buyer_id,
                seller_id: project.owner_id,
                currency: self.config.currency.clone(),
                amount_total: project.price,
                platform_fee,
                seller_amount,
            })
            .await?;

        // The gateway redirects the buyer's browser to these system-owned
        // URLs, not back to whatever page initiated the purchase.
        let intent = self
            .gateway
            .create_order(CreateIntentRequest {
                currency: order.currency.clone(),
                amount: order.amount_total,
                return_url: self.callback_url("gateway-return"),
                cancel_url: self.callback_url("gateway-cancel"),
            })
            .await?;

        let order = self
            .store
            .update(
                order.id,
                OrderPatch::gateway_assigned(intent.gateway_order_id.clone()),
            )
            .await?;

        info!(
            order_id = %order.id,
            gateway_order_id = %intent.gateway_order_id,
            amount = %order.amount_total,
            "purchase intent created"
        );
        self.emit(Event::OrderCreated(order.id)).await;

        Ok(PurchaseIntent {
            order_id: order.id,
            gateway_order_id: intent.gateway_order_id,
            approve_link: intent.approve_link,
            amount_total: order.amount_total,
            currency: order.currency,
        })
    }

    /// Captures the buyer's funds for an approved gateway order, then
    /// attempts the seller payout.
    ///
    /// The already-processed fast path is the real double-capture backstop:
    /// it refuses without touching the gateway. A missing seller payout
    /// destination leaves the order `Paid` for out-of-band retry; any other
    /// post-capture failure flips the order to `PayoutFailed` through the
    /// compensating transition, never by reverting the capture.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, gateway_order_id = %gateway_order_id))]
    pub async fn capture(
        &self,
        buyer_id: Uuid,
        gateway_order_id: &str,
    ) -> Result<OrderStatusView, OrderError> {
        let order = self
            .store
            .find_by_gateway_id(gateway_order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if order.buyer_id != buyer_id {
            return Err(OrderError::AccessDenied);
        }

        match order.state {
            OrderState::Paid | OrderState::PayoutSent | OrderState::PayoutFailed => {
                return Err(OrderError::OrderAlreadyProcessed {
                    order_id: order.id,
                    state: order.state,
                });
            }
            OrderState::Canceled => return Err(OrderError::OrderCanceled),
            OrderState::Created | OrderState::Approved => {}
            state => return Err(OrderError::InvalidOrderState { state }),
        }

        let capture = self.gateway.capture_order(gateway_order_id).await?;
        if !capture.is_completed() {
            // Nothing moved; the order stays in its current open state.
            return Err(OrderError::CaptureFailed {
                gateway_status: capture.status,
            });
        }

        let paid = self
            .store
            .update(order.id, OrderPatch::captured(capture.capture_id))
            .await?;
        info!(
            order_id = %paid.id,
            capture_id = ?paid.gateway_capture_id,
            "capture completed"
        );
        self.emit(Event::OrderPaid {
            order_id: paid.id,
            amount: paid.amount_total,
            currency: paid.currency.clone(),
        })
        .await;

        match self.settle_payout(&paid).await {
            Ok(settled) => Ok(OrderStatusView::from(settled)),
            Err(err @ OrderError::SellerPayoutMissing) => {
                // Money captured, payout never attempted; retried out-of-band.
                warn!(order_id = %paid.id, "payout destination missing; order stays paid");
                Err(err)
            }
            Err(err) => {
                self.flag_payout_failed(&paid).await;
                Err(err)
            }
        }
    }

    /// Marks the project sold and forwards the seller's share.
    async fn settle_payout(&self, order: &OrderModel) -> Result<OrderModel, OrderError> {
        self.catalog.mark_sold(order.project_id).await?;

        let receiver = self
            .payees
            .payout_destination(order.seller_id)
            .await?
            .ok_or(OrderError::SellerPayoutMissing)?;

        let receipt = self
            .gateway
            .send_payout(PayoutRequest {
                receiver,
                currency: order.currency.clone(),
                amount: order.seller_amount,
                note: format!("Atelier payout for order {}", order.id),
            })
            .await
            .map_err(|err| match err {
                GatewayError::AuthFailed(msg) => OrderError::GatewayAuthFailed(msg),
                other => OrderError::PayoutFailed(other.to_string()),
            })?;

        let settled = self
            .store
            .update(
                order.id,
                OrderPatch::payout_sent(receipt.batch_id.clone(), receipt.payout_item_id),
            )
            .await?;

        info!(
            order_id = %settled.id,
            payout_batch_id = %receipt.batch_id,
            amount = %settled.seller_amount,
            "payout sent"
        );
        self.emit(Event::PayoutSent {
            order_id: settled.id,
            payout_batch_id: receipt.batch_id,
        })
        .await;

        Ok(settled)
    }

    /// Compensating transition after a post-capture failure: the buyer's
    /// money has genuinely moved and must not be silently lost track of, so
    /// a still-`Paid` order is flipped to `PayoutFailed` rather than
    /// reverted. Best-effort; a failure here is logged, not surfaced.
    async fn flag_payout_failed(&self, order: &OrderModel) {
        let current = match &order.gateway_order_id {
            Some(gateway_id) => self.store.find_by_gateway_id(gateway_id).await,
            None => self.store.find_by_id(order.id).await,
        };

        match current {
            Ok(Some(current)) if current.state == OrderState::Paid => {
                match self
                    .store
                    .update(current.id, OrderPatch::state(OrderState::PayoutFailed))
                    .await
                {
                    Ok(_) => {
                        warn!(order_id = %current.id, "payout failed; order flagged for reconciliation");
                        self.emit(Event::PayoutFailed(current.id)).await;
                    }
                    Err(err) => {
                        error!(order_id = %current.id, error = %err, "failed to record payout failure");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(order_id = %order.id, error = %err, "failed to re-read order after payout failure");
            }
        }
    }

    /// Gateway return redirect: the buyer came back from the gateway's site,
    /// but no capture has necessarily happened yet. Advances `Created` to the
    /// advisory `Approved` state; anything else is reported unchanged.
    #[instrument(skip(self), fields(gateway_order_id = %gateway_order_id))]
    pub async fn handle_gateway_return(
        &self,
        gateway_order_id: &str,
    ) -> Result<OrderStatusView, OrderError> {
        let order = self
            .store
            .find_by_gateway_id(gateway_order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        match order.state {
            OrderState::Created => {
                let approved = self
                    .store
                    .update(order.id, OrderPatch::state(OrderState::Approved))
                    .await?;
                info!(order_id = %approved.id, "buyer returned from gateway; order approved");
                self.emit(Event::OrderApproved(approved.id)).await;
                Ok(OrderStatusView::from(approved))
            }
            _ => Ok(OrderStatusView::from(order)),
        }
    }

    /// Gateway cancel redirect: closes a still-open order so a future
    /// purchase attempt is not blocked by a dead pending one. No-op for any
    /// other state.
    #[instrument(skip(self), fields(gateway_order_id = %gateway_order_id))]
    pub async fn handle_gateway_cancel(
        &self,
        gateway_order_id: &str,
    ) -> Result<OrderStatusView, OrderError> {
        let order = self
            .store
            .find_by_gateway_id(gateway_order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if order.state.is_open() {
            let canceled = self.close_order(&order, GATEWAY_CANCEL_REASON).await?;
            Ok(OrderStatusView::from(canceled))
        } else {
            Ok(OrderStatusView::from(order))
        }
    }

    /// Self-service cancellation: the buyer's only lever to unstick a
    /// pending order without waiting for TTL expiry.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, order_id = %order_id))]
    pub async fn cancel_own_order(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderStatusView, OrderError> {
        let order = self
            .store
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if order.buyer_id != buyer_id {
            return Err(OrderError::AccessDenied);
        }
        if !order.state.is_open() {
            return Err(OrderError::InvalidOrderState { state: order.state });
        }

        let canceled = self.close_order(&order, USER_CANCEL_REASON).await?;
        Ok(OrderStatusView::from(canceled))
    }

    /// Buyer-scoped status lookup, used to resume a pending order reported
    /// through an `order_already_pending` conflict.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderStatusView, OrderError> {
        let order = self
            .store
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if order.buyer_id != buyer_id {
            return Err(OrderError::AccessDenied);
        }

        Ok(OrderStatusView::from(order))
    }

    async fn close_order(
        &self,
        order: &OrderModel,
        reason: &str,
    ) -> Result<OrderModel, OrderError> {
        let canceled = self
            .store
            .update(
                order.id,
                OrderPatch::closed(OrderState::Canceled, reason, Utc::now()),
            )
            .await?;

        info!(order_id = %canceled.id, reason = reason, "order canceled");
        self.emit(Event::OrderCancelled {
            order_id: canceled.id,
            reason: reason.to_string(),
        })
        .await;

        Ok(canceled)
    }

    fn callback_url(&self, leaf: &str) -> String {
        format!(
            "{}/api/v1/orders/{}",
            self.config.public_base_url.trim_end_matches('/'),
            leaf
        )
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(err) = events.send(event).await {
                warn!(error = %err, "failed to publish settlement event");
            }
        }
    }
}

/// Splits an item price into platform fee and seller amount. The fee is
/// rounded to cents; the seller amount is the exact remainder, so the two
/// always add back up to the total.
pub fn split_amount(total: Decimal, fee_percent: Decimal) -> (Decimal, Decimal) {
    if fee_percent.is_zero() {
        return (Decimal::ZERO, total);
    }
    let fee = (total * fee_percent / Decimal::ONE_HUNDRED).round_dp(2);
    (fee, total - fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_fee_gives_seller_everything() {
        let (fee, seller) = split_amount(dec!(100.00), Decimal::ZERO);
        assert_eq!(fee, Decimal::ZERO);
        assert_eq!(seller, dec!(100.00));
    }

    #[test]
    fn ten_percent_fee_on_a_hundred() {
        let (fee, seller) = split_amount(dec!(100.00), dec!(10));
        assert_eq!(fee, dec!(10.00));
        assert_eq!(seller, dec!(90.00));
    }

    #[test]
    fn fee_and_seller_amount_reconcile_after_rounding() {
        for (total, pct) in [
            (dec!(33.33), dec!(2.9)),
            (dec!(0.01), dec!(10)),
            (dec!(19.99), dec!(12.5)),
            (dec!(250), dec!(0.1)),
        ] {
            let (fee, seller) = split_amount(total, pct);
            assert_eq!(fee + seller, total, "fee {fee} + seller {seller} != {total}");
            assert_eq!(fee, fee.round_dp(2));
        }
    }
}
