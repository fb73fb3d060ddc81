use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

pub type DbPool = DatabaseConnection;

/// Establish a database connection pool from the application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("database connection established");
    Ok(db)
}

/// Create any missing tables from the entity definitions. Used for SQLite
/// deployments and the test harness; production Postgres schemas are managed
/// externally.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create_table {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create_table!(entities::Product);
    create_table!(entities::ProductVariant);
    create_table!(entities::Coupon);
    create_table!(entities::CouponRedemption);
    create_table!(entities::Order);
    create_table!(entities::OrderItem);
    create_table!(entities::Payment);
    create_table!(entities::OrderStatusEvent);

    // One redemption counter per (coupon, customer); the schema backstops
    // the insert-or-increment logic in the order transaction.
    let redemption_idx = sea_orm::sea_query::Index::create()
        .name("idx_coupon_redemptions_coupon_customer")
        .table(entities::CouponRedemption)
        .col(entities::coupon_redemption::Column::CouponId)
        .col(entities::coupon_redemption::Column::CustomerId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&redemption_idx)).await?;

    info!("schema bootstrap complete");
    Ok(())
}
