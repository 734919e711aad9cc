//! Storefront Demo Binary
//!
//! Runs one scripted shopping session against a mock product API with the
//! telemetry layer fully wired in.
//!
//! ## Usage
//!
//! ```bash
//! # Log every collector call to stderr
//! storefront-demo
//!
//! # CI run: may schedule a crash, waits for it
//! STOREFRONT_CI_MODE=1 storefront-demo
//!
//! # Declined payment, captured telemetry printed as JSON
//! storefront-demo --fail-checkout --dump
//! ```

mod catalog;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use storefront_telemetry::{
    ApiRequest, CrashState, HttpMethod, Instrumentation, LogBackend, LogProperties, MemoryBackend,
    PurchaseSummary, SeededRandom, Severity, TelemetryConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::catalog::MockCatalog;

#[derive(Parser, Debug)]
#[command(name = "storefront-demo")]
#[command(about = "Run a scripted storefront session with telemetry")]
#[command(version)]
struct Args {
    /// Path to a telemetry config JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable CI mode (probabilistic crash scheduling)
    #[arg(long)]
    ci_mode: bool,

    /// Simulated latency of each mock API call
    #[arg(long, default_value_t = 300)]
    api_latency_ms: u64,

    /// Decline the payment at checkout
    #[arg(long)]
    fail_checkout: bool,

    /// Record telemetry in memory and print it as JSON at exit
    #[arg(long)]
    dump: bool,

    /// Seed for the crash roll
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_telemetry=info,storefront_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TelemetryConfig::from_json_file(path)?,
        None => TelemetryConfig::default(),
    }
    .apply_env();
    if args.ci_mode {
        config = config.with_ci_mode(true);
    }

    let memory = args.dump.then(MemoryBackend::new);
    let mut builder = Instrumentation::builder(config);
    builder = match &memory {
        Some(backend) => builder.backend(backend.clone()),
        None => builder.backend(LogBackend::new()),
    };
    if let Some(seed) = args.seed {
        builder = builder.random_source(SeededRandom::new(seed));
    }
    let telemetry = builder.build()?;

    tracing::info!("Starting storefront demo v{}", env!("CARGO_PKG_VERSION"));

    if !telemetry.initialize().await {
        tracing::warn!("Telemetry unavailable, running without it");
    }

    let catalog = MockCatalog::new(Duration::from_millis(args.api_latency_ms));
    run_session(&telemetry, &catalog, args.fail_checkout).await;

    if let CrashState::Armed { delay_ms } = telemetry.crash_state() {
        let wait_ms = delay_ms + telemetry.config().crash.flush_grace_ms + 1_000;
        tracing::info!(wait_ms, "Crash scheduled, waiting for it");
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    }

    telemetry.end_session().await;

    if let Some(backend) = memory {
        println!("{}", serde_json::to_string_pretty(&backend.snapshot()?)?);
    }

    tracing::info!("Storefront demo finished");
    Ok(())
}

async fn run_session(telemetry: &Instrumentation, catalog: &MockCatalog, fail_checkout: bool) {
    // Home
    let home = telemetry.track_screen_view("Home").await;
    let products = match telemetry
        .track_api_call(ApiRequest::get("/products"), catalog.list_products())
        .await
    {
        Ok(products) => products,
        Err(e) => {
            telemetry.log_handled_error(&e, None).await;
            return;
        }
    };
    tracing::info!(count = products.len(), "Loaded product list");

    let query = "audio";
    match telemetry
        .track_api_call(
            ApiRequest::get(&format!("/products/search?q={}", query)),
            catalog.search(query),
        )
        .await
    {
        Ok(results) => telemetry.track_search(query, results.len()).await,
        Err(e) => telemetry.log_handled_error(&e, None).await,
    }
    if let Some(home) = &home {
        telemetry.end_span(home, true);
    }

    // Product detail
    let Some(product) = products.first().cloned() else {
        telemetry
            .log(Severity::Warning, "Catalog returned no products", None)
            .await;
        return;
    };
    let detail = telemetry.track_screen_view("ProductDetail").await;
    telemetry
        .track_product_view(&product.id, &product.name, product.price)
        .await;

    // Cart edits
    let mut extra = None;
    for (item, quantity) in products.iter().take(2).zip([2u32, 1]) {
        let body = serde_json::json!({"product_id": item.id, "quantity": quantity});
        match telemetry
            .track_api_call(ApiRequest::post("/cart", body), catalog.add_to_cart(&item.id, quantity))
            .await
        {
            Ok(cart) => {
                telemetry.track_add_to_cart(&item.id, quantity, item.price).await;
                telemetry.update_cart_properties(cart.item_count(), cart.total()).await;
                if item.id != product.id {
                    extra = Some(item.id.clone());
                }
            }
            Err(e) => telemetry.log_handled_error(&e, None).await,
        }
    }
    if let Some(detail) = &detail {
        telemetry.end_span(detail, true);
    }

    let cart_screen = telemetry.track_screen_view("Cart").await;
    if let Some(extra) = extra {
        let endpoint = format!("/cart/{}", extra);
        match telemetry
            .track_api_call(
                ApiRequest::new(&endpoint, HttpMethod::Delete),
                catalog.remove_from_cart(&extra),
            )
            .await
        {
            Ok(cart) => {
                telemetry.track_remove_from_cart(&extra).await;
                telemetry.update_cart_properties(cart.item_count(), cart.total()).await;
            }
            Err(e) => telemetry.log_handled_error(&e, None).await,
        }
    }
    if let Some(cart_screen) = &cart_screen {
        telemetry.end_span(cart_screen, true);
    }

    telemetry.track_login("demo-user-42").await;

    // Checkout
    let checkout = telemetry.track_screen_view("Checkout").await;
    let checkout_started_at = Utc::now();
    telemetry.track_checkout_step("shipping").await;
    telemetry.track_checkout_step("payment").await;

    let body = serde_json::json!({"payment_method": "card", "decline": fail_checkout});
    let outcome = telemetry
        .track_api_call(ApiRequest::post("/orders", body), catalog.place_order(fail_checkout))
        .await;

    let success = match outcome {
        Ok(order) => {
            telemetry
                .track_purchase(&PurchaseSummary {
                    order_id: order.order_id,
                    total: order.total,
                    item_count: order.item_count,
                    checkout_started_at,
                })
                .await;
            true
        }
        Err(e) => {
            let mut properties = LogProperties::new();
            properties.insert("checkout_step".to_string(), "payment".to_string());
            telemetry.log_handled_error(&e, Some(properties)).await;
            telemetry.track_checkout_step("payment_failed").await;
            false
        }
    };
    if let Some(checkout) = &checkout {
        telemetry.end_span(checkout, success);
    }

    telemetry.track_logout().await;
}
