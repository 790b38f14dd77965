use actix_cors::Cors;
use actix_web::{middleware::Compress, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use forum::config::Settings;
use forum::openapi::ApiDoc;
use forum::repo::Repo;
use forum::storage::build_image_store;
use forum::{config, AppState};

#[cfg(feature = "postgres-store")]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    use forum::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;
    let db_url = settings
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(db_url)
        .await?;
    let repo = PgRepo::new(pool);
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "postgres-store"))]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    use forum::repo::inmem::InMemRepo;
    info!("Using in-memory repository backend");
    Ok(Arc::new(InMemRepo::open(settings.snapshot_path())))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // .env is loaded automatically only in debug builds
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("invalid configuration: {e}");
            return Err(e.into());
        }
    };
    info!("Bootstrapping forum server");

    let repo = build_repo(&settings).await?;
    let image_store = build_image_store(&settings).await?;
    let openapi = ApiDoc::openapi();
    let state = AppState { repo, image_store };
    let frontend_url = settings.frontend_url.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(actix_web::web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((settings.bind_addr.as_str(), settings.port))?;

    info!("Listening on http://{}:{}", settings.bind_addr, settings.port);

    server.run().await?;
    Ok(())
}
