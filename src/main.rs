use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally::config::Config;
use tally::credentials::CredentialCache;
use tally::crypto::MasterKey;
use tally::db::{create_pool, init_db, queries, AppState};
use tally::gateways::{GatewayRegistry, MercadoPagoGateway, StripeGateway};
use tally::handlers;
use tally::models::{PlanInterval, PLATFORM_SCOPE};

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Payment webhook reconciliation for a multi-tenant coaching platform")]
struct Cli {
    /// Seed the database with dev data (tenant, plan, course, credentials)
    #[arg(long)]
    seed: bool,

    /// Print a freshly generated base64 master key and exit
    #[arg(long)]
    generate_master_key: bool,
}

/// Seeds the database with dev data for manual testing.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM tenants", [], |row| row.get(0))
        .expect("Failed to count tenants");
    if existing > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let tenant = queries::create_tenant(&conn, "Dev Coach").expect("Failed to create dev tenant");
    let plan = queries::create_plan(
        &conn,
        &tenant.id,
        "Dev Monthly Plan",
        PlanInterval::Monthly,
        4990,
        "BRL",
    )
    .expect("Failed to create dev plan");
    let course = queries::create_course(&conn, &tenant.id, "Dev Course", 9900, "BRL")
        .expect("Failed to create dev course");

    // Sandbox tokens; replace via the credential store for real gateways.
    let platform_token = std::env::var("TALLY_DEV_MP_TOKEN")
        .unwrap_or_else(|_| "TEST-platform-access-token".to_string());
    let encrypted = state
        .master_key
        .encrypt_secret(PLATFORM_SCOPE, platform_token.as_bytes())
        .expect("Failed to encrypt dev credentials");
    queries::upsert_gateway_credential(&conn, None, "mercadopago", &encrypted, true)
        .expect("Failed to store dev credentials");

    tracing::info!("Tenant: {} ({})", tenant.name, tenant.id);
    tracing::info!("Plan: {} ({})", plan.name, plan.id);
    tracing::info!("Course: {} ({})", course.name, course.id);
    tracing::info!("Platform mercadopago credentials stored (sandbox)");

    // Copy-paste friendly output for API clients
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  tenant_id: {}", tenant.id);
    println!("  plan_id: {}", plan.id);
    println!("  course_id: {}", course.id);
    println!("--- END COPY ---");
    println!();
}

/// Periodically purge processed webhook events past the retention window.
/// Unprocessed events are never purged: they are still retryable.
fn spawn_purge_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} processed webhook events", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for purge: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Background purge task started (hourly, retention {} days)",
        retention_days
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle key generation command (before normal startup)
    if cli.generate_master_key {
        println!("{}", MasterKey::generate());
        return;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let http_client = reqwest::Client::new();
    let mut gateways = GatewayRegistry::new();
    gateways.register(Arc::new(MercadoPagoGateway::new(http_client.clone())));
    gateways.register(Arc::new(StripeGateway::new(http_client.clone())));

    let state = AppState {
        db: db_pool,
        master_key: config.master_key.clone(),
        http_client,
        gateways: Arc::new(gateways),
        credentials: Arc::new(CredentialCache::new()),
        notify_webhook_url: config.notify_webhook_url.clone(),
        base_url: config.base_url.clone(),
    };

    tracing::info!("Registered gateways: {}", state.gateways.names().join(", "));

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set TALLY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if config.webhook_retention_days > 0 {
        spawn_purge_task(state.clone(), config.webhook_retention_days);
    }

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Tally server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
