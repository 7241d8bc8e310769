use crate::config::AppConfig;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

/// Type alias for the shared connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool from application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(true);

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Creates any missing tables. Table shapes are derived from the entity
/// definitions, so the same call works against Postgres and the SQLite
/// databases the test harness uses.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    use crate::entities::*;

    create_table(db, shopper::Entity).await?;
    create_table(db, product::Entity).await?;
    create_table(db, warehouse::Entity).await?;
    create_table(db, inventory_record::Entity).await?;
    create_table(db, cart::Entity).await?;
    create_table(db, cart_item::Entity).await?;
    create_table(db, order::Entity).await?;
    create_table(db, order_item::Entity).await?;
    create_table(db, payment::Entity).await?;

    info!("Schema is up to date");
    Ok(())
}
