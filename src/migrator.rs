use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users_table::Migration),
            Box::new(m20240601_000002_create_projects_table::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_users_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null())
                        .col(ColumnDef::new(Users::DisplayName).string().null())
                        .col(ColumnDef::new(Users::PayoutEmail).string().null())
                        .col(ColumnDef::new(Users::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_email")
                        .table(Users::Table)
                        .col(Users::Email)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        Email,
        DisplayName,
        PayoutEmail,
        CreatedAt,
    }
}

mod m20240601_000002_create_projects_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_projects_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Projects::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Projects::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Projects::OwnerId).uuid().not_null())
                        .col(ColumnDef::new(Projects::Title).string().not_null())
                        .col(ColumnDef::new(Projects::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(Projects::IsPublished)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Projects::IsSold)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Projects::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Projects::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_projects_owner_id")
                        .table(Projects::Table)
                        .col(Projects::OwnerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Projects::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Projects {
        Table,
        Id,
        OwnerId,
        Title,
        Price,
        IsPublished,
        IsSold,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::GatewayOrderId).string().null())
                        .col(ColumnDef::new(Orders::ProjectId).uuid().not_null())
                        .col(ColumnDef::new(Orders::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::SellerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::AmountTotal).decimal().not_null())
                        .col(ColumnDef::new(Orders::PlatformFee).decimal().not_null())
                        .col(ColumnDef::new(Orders::SellerAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::State).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::GatewayCaptureId).string().null())
                        .col(ColumnDef::new(Orders::PayoutBatchId).string().null())
                        .col(ColumnDef::new(Orders::PayoutItemId).string().null())
                        .col(ColumnDef::new(Orders::CancelReason).string().null())
                        .col(ColumnDef::new(Orders::CanceledAt).timestamp().null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // Capture and callbacks resolve orders by the gateway's id.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_gateway_order_id")
                        .table(Orders::Table)
                        .col(Orders::GatewayOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // Deduplication lookup path: open order per (buyer, project).
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_buyer_project_state")
                        .table(Orders::Table)
                        .col(Orders::BuyerId)
                        .col(Orders::ProjectId)
                        .col(Orders::State)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        GatewayOrderId,
        ProjectId,
        BuyerId,
        SellerId,
        Currency,
        AmountTotal,
        PlatformFee,
        SellerAmount,
        State,
        GatewayCaptureId,
        PayoutBatchId,
        PayoutItemId,
        CancelReason,
        CanceledAt,
        CreatedAt,
        UpdatedAt,
    }
}
