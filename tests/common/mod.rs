//! Shared test harness: the settlement engine wired to in-memory stores and
//! a programmable mock gateway. No database or network required.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use atelier_api::gateway::{
    CreateIntentRequest, GatewayCapture, GatewayError, GatewayOrder, PaymentGateway,
    PayoutReceipt, PayoutRequest, CAPTURE_COMPLETED,
};
use atelier_api::repositories::memory::{
    InMemoryCatalog, InMemoryOrderStore, InMemoryPayoutDirectory,
};
use atelier_api::repositories::ListedProject;
use atelier_api::services::settlement::{OrderSettlementService, SettlementConfig};

pub const SELLER_PAYOUT_EMAIL: &str = "seller@studio.test";

/// Gateway double with programmable outcomes and call counters.
pub struct MockGateway {
    capture_status: Mutex<String>,
    fail_create: AtomicBool,
    fail_capture: AtomicBool,
    fail_payout: AtomicBool,
    pub create_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub payout_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            capture_status: Mutex::new(CAPTURE_COMPLETED.to_string()),
            fail_create: AtomicBool::new(false),
            fail_capture: AtomicBool::new(false),
            fail_payout: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            payout_calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn set_capture_status(&self, status: &str) {
        *self.capture_status.lock().unwrap() = status.to_string();
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_payout(&self, fail: bool) {
        self.fail_payout.store(fail, Ordering::SeqCst);
    }

    pub fn capture_call_count(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn payout_call_count(&self) -> usize {
        self.payout_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        _request: CreateIntentRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "create order unavailable".into(),
            });
        }

        let n = self.next_id();
        Ok(GatewayOrder {
            gateway_order_id: format!("GW-{n}"),
            approve_link: format!("https://gateway.test/approve/GW-{n}"),
        })
    }

    async fn capture_order(&self, _gateway_order_id: &str) -> Result<GatewayCapture, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 502,
                body: "capture unavailable".into(),
            });
        }

        let status = self.capture_status.lock().unwrap().clone();
        let capture_id = if status == CAPTURE_COMPLETED {
            Some(format!("CAP-{}", self.next_id()))
        } else {
            None
        };

        Ok(GatewayCapture { status, capture_id })
    }

    async fn send_payout(&self, _request: PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_payout.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "payout unavailable".into(),
            });
        }

        let n = self.next_id();
        Ok(PayoutReceipt {
            batch_id: format!("BATCH-{n}"),
            payout_item_id: Some(format!("ITEM-{n}")),
        })
    }
}

pub struct TestHarness {
    pub service: OrderSettlementService,
    pub store: Arc<InMemoryOrderStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub payees: Arc<InMemoryPayoutDirectory>,
    pub gateway: Arc<MockGateway>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_fee(Decimal::ZERO)
    }

    pub fn with_fee(fee_percent: Decimal) -> Self {
        let store = Arc::new(InMemoryOrderStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let payees = Arc::new(InMemoryPayoutDirectory::new());
        let gateway = Arc::new(MockGateway::new());

        let config = SettlementConfig {
            currency: "USD".to_string(),
            platform_fee_percent: fee_percent,
            pending_order_ttl: Duration::minutes(30),
            public_base_url: "https://atelier.test".to_string(),
        };

        let service = OrderSettlementService::new(
            store.clone(),
            catalog.clone(),
            payees.clone(),
            gateway.clone(),
            config,
            None,
        );

        Self {
            service,
            store,
            catalog,
            payees,
            gateway,
        }
    }

    /// Seeds a published project with a payout-ready seller.
    /// Returns (seller_id, project_id).
    pub fn seed_listing(&self, price: Decimal) -> (Uuid, Uuid) {
        let seller_id = Uuid::new_v4();
        let project_id = self.seed_project(seller_id, price, true);
        self.payees.insert(seller_id, SELLER_PAYOUT_EMAIL);
        (seller_id, project_id)
    }

    /// Seeds a project without touching the payout directory.
    pub fn seed_project(&self, seller_id: Uuid, price: Decimal, is_published: bool) -> Uuid {
        let project_id = Uuid::new_v4();
        self.catalog.insert(ListedProject {
            id: project_id,
            owner_id: seller_id,
            title: "Identity refresh kit".to_string(),
            price,
            is_published,
            is_sold: false,
        });
        project_id
    }

    /// Rewinds an order's staleness clock by the given number of minutes.
    pub fn age_order(&self, order_id: Uuid, minutes: i64) {
        self.store
            .backdate_updated_at(order_id, Utc::now() - Duration::minutes(minutes));
    }

    /// Number of open (created/approved) orders for a (buyer, project) pair.
    pub fn open_order_count(&self, buyer_id: Uuid, project_id: Uuid) -> usize {
        self.store
            .snapshot()
            .into_iter()
            .filter(|o| o.buyer_id == buyer_id && o.project_id == project_id && o.state.is_open())
            .count()
    }
}
