use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use uuid::Uuid;

use crate::entities::user::Entity as UserEntity;

/// Identity boundary: read-only lookup of a seller's payout destination.
#[async_trait]
pub trait PayoutDirectory: Send + Sync {
    /// `None` when the seller exists but has not configured a destination,
    /// or does not exist at all; the settlement engine treats both the same.
    async fn payout_destination(&self, seller_id: Uuid) -> Result<Option<String>, DbErr>;
}

#[derive(Clone)]
pub struct SeaOrmPayoutDirectory {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmPayoutDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PayoutDirectory for SeaOrmPayoutDirectory {
    async fn payout_destination(&self, seller_id: Uuid) -> Result<Option<String>, DbErr> {
        let user = UserEntity::find_by_id(seller_id).one(&*self.db).await?;

        Ok(user
            .and_then(|u| u.payout_email)
            .filter(|email| !email.trim().is_empty()))
    }
}
