//! Create the administrator account, or reset its password and re-activate it.
//!
//! Usage: ADMIN_EMAIL=... ADMIN_PASSWORD=... ensure-admin

use anyhow::{Context, bail};

use asclepius_server::{
    auth::hash_password,
    config::Config,
    db,
    models::Role,
    store::{AccountStore, PgAccountStore},
};

const MIN_PASSWORD_LEN: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let email = std::env::var("ADMIN_EMAIL").context("ADMIN_EMAIL is not set")?;
    let password = std::env::var("ADMIN_PASSWORD").context("ADMIN_PASSWORD is not set")?;
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        bail!("ADMIN_EMAIL must be an email address");
    }
    if password.len() < MIN_PASSWORD_LEN {
        bail!("ADMIN_PASSWORD must have at least {MIN_PASSWORD_LEN} characters");
    }

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, 1).await?;
    if cfg.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let phc = hash_password(&password).map_err(anyhow::Error::msg)?;
    let user = PgAccountStore::new(pool).upsert_user(email, &phc, Role::Admin).await?;

    tracing::info!(user_id = %user.user_id, "admin account ready: {}", user.email);
    Ok(())
}
