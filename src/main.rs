use std::sync::Arc;

use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context as _;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use rustblog::auth::SessionKeys;
use rustblog::mail::SmtpMailer;
use rustblog::password::PasswordHasher;
use rustblog::repo::Repo;
use rustblog::{config, AppConfig, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker, etc.)
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {e}");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };
    info!("Bootstrapping blog server");

    let repo = build_repo(&cfg).await?;
    let mailer = SmtpMailer::new(&cfg.smtp).context("building SMTP relay")?;
    let state = AppState::new(
        repo,
        Arc::new(mailer),
        SessionKeys::new(cfg.session_secret.as_bytes(), cfg.session_ttl, cfg.cookie_secure),
        PasswordHasher::new(cfg.pbkdf2_iterations),
    )
    .context("loading templates")?;

    let security = SecurityHeaders::default().with_hsts(cfg.enable_hsts);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .app_data(web::Data::new(state.clone()))
            .configure(config)
    })
    .bind((cfg.host.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.host, cfg.port);
    server.run().await?;
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use rustblog::repo::pg::PgRepo;

    let Some(url) = cfg.database_url.as_deref() else {
        error!("DATABASE_URL must be set for the postgres store");
        std::process::exit(1);
    };
    let repo = PgRepo::connect(url, cfg.db_max_connections).await.context("connecting to Postgres")?;
    repo.migrate().await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    info!("Using in-memory repository backend");
    Ok(Arc::new(rustblog::repo::inmem::InMemRepo::new()))
}
