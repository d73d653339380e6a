use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sqlcoach::assignment::AssignmentStore;
use sqlcoach::config::Config;
use sqlcoach::db;
use sqlcoach::service::QueryService;
use sqlcoach::web;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::from_env()?;
    let pool = db::build_pool(&cfg)?;
    db::check_connectivity(&pool).await?;
    info!("connected to postgres at {}:{}", cfg.pg_host, cfg.pg_port);

    tokio::spawn(db::evict_idle(pool.clone(), cfg.idle_timeout));

    let store = match &cfg.assignments_path {
        Some(path) => AssignmentStore::load(std::path::Path::new(path))?,
        None => AssignmentStore::default(),
    };
    info!("loaded {} assignment(s)", store.len());

    let service = QueryService::new(pool, cfg.limits);
    let app = web::router(service, store);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("listening on {}", cfg.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tokio_postgres=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
