use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_users_table::Migration),
            Box::new(m20250101_000002_create_clients_table::Migration),
            Box::new(m20250101_000003_create_products_table::Migration),
            Box::new(m20250101_000004_create_orders_tables::Migration),
            Box::new(m20250101_000005_create_plans_tables::Migration),
        ]
    }
}

mod m20250101_000001_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_users_table"
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
                        .col(
                            ColumnDef::new(Users::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Users::Username).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::Email).string().null())
                        .col(ColumnDef::new(Users::FirstName).string().not_null().default(""))
                        .col(ColumnDef::new(Users::LastName).string().not_null().default(""))
                        .col(ColumnDef::new(Users::Role).string().not_null().default("manager"))
                        .col(ColumnDef::new(Users::ManagerId).integer().null())
                        .col(ColumnDef::new(Users::IsSuperuser).boolean().not_null().default(false))
                        .col(ColumnDef::new(Users::IsStaff).boolean().not_null().default(false))
                        .col(ColumnDef::new(Users::Active).boolean().not_null().default(true))
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_manager_id")
                                .from(Users::Table, Users::ManagerId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_users_manager_id")
                        .table(Users::Table)
                        .col(Users::ManagerId)
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
    pub enum Users {
        Table,
        Id,
        Username,
        Email,
        FirstName,
        LastName,
        Role,
        ManagerId,
        IsSuperuser,
        IsStaff,
        Active,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000002_create_clients_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_clients_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Clients::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Clients::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Clients::ClientType)
                                .string()
                                .not_null()
                                .default("individual"),
                        )
                        .col(ColumnDef::new(Clients::FirstName).string().null())
                        .col(ColumnDef::new(Clients::LastName).string().null())
                        .col(ColumnDef::new(Clients::MiddleName).string().null())
                        .col(ColumnDef::new(Clients::CompanyName).string().null())
                        .col(ColumnDef::new(Clients::Phone).string().null())
                        .col(ColumnDef::new(Clients::Email).string().null())
                        .col(ColumnDef::new(Clients::City).string().null())
                        .col(
                            ColumnDef::new(Clients::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_clients_phone")
                        .table(Clients::Table)
                        .col(Clients::Phone)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Clients::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Clients {
        Table,
        Id,
        ClientType,
        FirstName,
        LastName,
        MiddleName,
        CompanyName,
        Phone,
        Email,
        City,
        CreatedAt,
    }
}

mod m20250101_000003_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(14, 2).null())
                        .col(ColumnDef::new(Products::WholesalePrice).decimal_len(14, 2).null())
                        .col(
                            ColumnDef::new(Products::PromotionalPrice)
                                .decimal_len(14, 2)
                                .null(),
                        )
                        .col(ColumnDef::new(Products::RetailPrice).decimal_len(14, 2).null())
                        .col(ColumnDef::new(Products::AssortmentGroup).string().null())
                        .col(ColumnDef::new(Products::TireType).string().null())
                        .col(ColumnDef::new(Products::BranchCity).string().null())
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Code,
        Name,
        Price,
        WholesalePrice,
        PromotionalPrice,
        RetailPrice,
        AssortmentGroup,
        TireType,
        BranchCity,
        IsActive,
    }
}

mod m20250101_000004_create_orders_tables {
    use super::m20250101_000001_create_users_table::Users;
    use super::m20250101_000002_create_clients_table::Clients;
    use super::m20250101_000003_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Order numbers are reserved from this counter before the order row is inserted
            manager
                .create_table(
                    Table::create()
                        .table(Sequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sequences::Name)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Sequences::Value)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .exec_stmt(
                    Query::insert()
                        .into_table(Sequences::Table)
                        .columns([Sequences::Name, Sequences::Value])
                        .values_panic(["orders".into(), 0i64.into()])
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).integer().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::ClientId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ResponsibleId).integer().null())
                        .col(ColumnDef::new(Orders::Status).string().not_null().default("new"))
                        .col(
                            ColumnDef::new(Orders::Source)
                                .string()
                                .not_null()
                                .default("website"),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string()
                                .not_null()
                                .default("cash"),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryMethod)
                                .string()
                                .not_null()
                                .default("pickup"),
                        )
                        .col(
                            ColumnDef::new(Orders::PriceLevel)
                                .string()
                                .not_null()
                                .default("retail"),
                        )
                        .col(ColumnDef::new(Orders::IsPromo).boolean().not_null().default(false))
                        .col(ColumnDef::new(Orders::SaleNumber).string().null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(14, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::CreatedBy).integer().null())
                        .col(ColumnDef::new(Orders::UpdatedBy).integer().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_client_id")
                                .from(Orders::Table, Orders::ClientId)
                                .to(Clients::Table, Clients::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_responsible_id")
                                .from(Orders::Table, Orders::ResponsibleId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductCode).string().not_null())
                        .col(ColumnDef::new(OrderItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderItems::Price).decimal_len(14, 2).not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::Amount).decimal_len(14, 2).not_null())
                        .col(ColumnDef::new(OrderItems::Segment).string().null())
                        .col(ColumnDef::new(OrderItems::TireType).string().null())
                        .col(ColumnDef::new(OrderItems::BranchCity).string().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_product_id")
                                .from(OrderItems::Table, OrderItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_responsible_created_at")
                        .table(Orders::Table)
                        .col(Orders::ResponsibleId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sequences {
        Table,
        Name,
        Value,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        ClientId,
        ResponsibleId,
        Status,
        Source,
        PaymentMethod,
        DeliveryMethod,
        PriceLevel,
        IsPromo,
        SaleNumber,
        Notes,
        TotalAmount,
        CreatedBy,
        UpdatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductCode,
        ProductName,
        Price,
        Quantity,
        Amount,
        Segment,
        TireType,
        BranchCity,
    }
}

mod m20250101_000005_create_plans_tables {
    use super::m20250101_000001_create_users_table::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000005_create_plans_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Plans::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Plans::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Plans::Name).string().not_null())
                        .col(ColumnDef::new(Plans::Description).text().null())
                        .col(ColumnDef::new(Plans::StartDate).date().not_null())
                        .col(ColumnDef::new(Plans::EndDate).date().not_null())
                        .col(ColumnDef::new(Plans::CreatedBy).integer().null())
                        .col(
                            ColumnDef::new(Plans::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Plans::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_plans_created_by")
                                .from(Plans::Table, Plans::CreatedBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PlanAssignments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PlanAssignments::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PlanAssignments::PlanId).integer().not_null())
                        .col(ColumnDef::new(PlanAssignments::ManagerId).integer().not_null())
                        .col(
                            ColumnDef::new(PlanAssignments::TargetCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::TargetSum)
                                .decimal_len(14, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::CriteriaOperator)
                                .string()
                                .not_null()
                                .default("both"),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::AchievedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::AchievedSum)
                                .decimal_len(14, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::IsAchieved)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(PlanAssignments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_plan_assignments_plan_id")
                                .from(PlanAssignments::Table, PlanAssignments::PlanId)
                                .to(Plans::Table, Plans::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_plan_assignments_manager_id")
                                .from(PlanAssignments::Table, PlanAssignments::ManagerId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("uq_plan_assignments_plan_manager")
                        .table(PlanAssignments::Table)
                        .col(PlanAssignments::PlanId)
                        .col(PlanAssignments::ManagerId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_plan_assignments_manager_id")
                        .table(PlanAssignments::Table)
                        .col(PlanAssignments::ManagerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PlanAssignments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Plans::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Plans {
        Table,
        Id,
        Name,
        Description,
        StartDate,
        EndDate,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PlanAssignments {
        Table,
        Id,
        PlanId,
        ManagerId,
        TargetCount,
        TargetSum,
        CriteriaOperator,
        AchievedCount,
        AchievedSum,
        IsAchieved,
        UpdatedAt,
    }
}

/// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(5)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
