use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use uuid::Uuid;

use crate::entities::project::{self, Entity as ProjectEntity};

/// What the settlement engine needs to know about a sellable project.
#[derive(Debug, Clone)]
pub struct ListedProject {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub is_published: bool,
    pub is_sold: bool,
}

impl From<project::Model> for ListedProject {
    fn from(model: project::Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            title: model.title,
            price: model.price,
            is_published: model.is_published,
            is_sold: model.is_sold,
        }
    }
}

/// Catalog boundary: read-only project lookup plus the informational sold
/// flag written after a successful capture.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn listed_project(&self, project_id: Uuid) -> Result<Option<ListedProject>, DbErr>;

    /// Idempotent: flipping an already-sold project is a no-op, and a sold
    /// project remains purchasable by other buyers.
    async fn mark_sold(&self, project_id: Uuid) -> Result<(), DbErr>;
}

#[derive(Clone)]
pub struct SeaOrmCatalogStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCatalogStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for SeaOrmCatalogStore {
    async fn listed_project(&self, project_id: Uuid) -> Result<Option<ListedProject>, DbErr> {
        Ok(ProjectEntity::find_by_id(project_id)
            .one(&*self.db)
            .await?
            .map(ListedProject::from))
    }

    async fn mark_sold(&self, project_id: Uuid) -> Result<(), DbErr> {
        let Some(project) = ProjectEntity::find_by_id(project_id).one(&*self.db).await? else {
            return Err(DbErr::RecordNotFound(format!(
                "project {project_id} not found"
            )));
        };

        if project.is_sold {
            return Ok(());
        }

        let mut active: project::ActiveModel = project.into();
        active.is_sold = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        Ok(())
    }
}
