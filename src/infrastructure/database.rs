use crate::entities::{jobs, media_assets, transcripts};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(50)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    let db_url = env::var("DATABASE_URL").unwrap_or_default();

    if db_url.starts_with("postgres://") {
        info!("🔄 Running SQLx migrations for PostgreSQL...");
        let pool = sqlx::PgPool::connect(&db_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
    } else {
        info!("🔄 Running SeaORM auto-migrations for SQLite/Other...");
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);

        let stmts = vec![
            schema
                .create_table_from_entity(media_assets::Entity)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(transcripts::Entity)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(jobs::Entity)
                .if_not_exists()
                .to_owned(),
        ];

        for stmt in stmts {
            let stmt = builder.build(&stmt);
            let _ = db.execute(stmt).await;
        }
    }

    Ok(())
}
