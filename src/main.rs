use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use asclepius_server::{
    appointments::AppointmentManager,
    audit::PgAuditRecorder,
    config::Config,
    db,
    middleware::rate_limit::LoginThrottle,
    models::AppState,
    routes,
    store::{PgAccountStore, PgAppointmentStore},
};

use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::{HeaderValue, header};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;
    if cfg.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let audit = Arc::new(PgAuditRecorder::new(pool.clone()));
    let manager = AppointmentManager::new(Arc::new(PgAppointmentStore::new(pool.clone())), audit.clone())
        .with_retry_limit(cfg.tx_retry_limit);

    let state = AppState {
        appointments: Arc::new(manager),
        accounts: Arc::new(PgAccountStore::new(pool)),
        audit,
        login_throttle: Arc::new(LoginThrottle::new(
            Duration::from_millis(cfg.login_rate_window_ms),
            cfg.login_rate_max,
        )),
        session_ttl_hours: cfg.session_ttl_hours,
    };

    let allow_origin = match cfg.cors_origin.as_deref() {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin)?),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
