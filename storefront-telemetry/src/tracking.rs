//! Storefront convenience tracking
//!
//! Thin compositions of the primitives on [`Instrumentation`]. Nothing here
//! keeps state of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::Attributes;
use crate::events::{LogProperties, Severity};
use crate::spans::SpanHandle;
use crate::Instrumentation;

/// Cart size property
pub const PROP_CART_ITEM_COUNT: &str = "cart_item_count";

/// Cart total property
pub const PROP_CART_VALUE: &str = "cart_value";

/// Set permanently once a user has logged in on this device
pub const PROP_USER_LOGGED_IN: &str = "user_logged_in";

/// A completed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseSummary {
    pub order_id: String,
    pub total: f64,
    pub item_count: u32,
    /// When the user entered checkout
    pub checkout_started_at: DateTime<Utc>,
}

fn props<const N: usize>(pairs: [(&str, String); N]) -> LogProperties {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

impl Instrumentation {
    /// Breadcrumb plus a screen-view span. End the span when the screen goes away.
    pub async fn track_screen_view(&self, screen_name: &str) -> Option<SpanHandle> {
        self.breadcrumb(&format!("Viewed screen: {}", screen_name)).await;
        self.start_screen_view_span(screen_name)
    }

    /// Breadcrumb plus an info log for a product detail view
    pub async fn track_product_view(&self, product_id: &str, name: &str, price: f64) {
        self.breadcrumb(&format!("Viewed product: {}", name)).await;
        self.log(
            Severity::Info,
            "Product viewed",
            Some(props([
                ("product_id", product_id.to_string()),
                ("product_name", name.to_string()),
                ("price", money(price)),
            ])),
        )
        .await;
    }

    /// Breadcrumb plus an info log for a cart addition
    pub async fn track_add_to_cart(&self, product_id: &str, quantity: u32, price: f64) {
        self.breadcrumb(&format!("Added to cart: {} x{}", product_id, quantity))
            .await;
        self.log(
            Severity::Info,
            "Item added to cart",
            Some(props([
                ("product_id", product_id.to_string()),
                ("quantity", quantity.to_string()),
                ("price", money(price)),
            ])),
        )
        .await;
    }

    /// Breadcrumb for a cart removal
    pub async fn track_remove_from_cart(&self, product_id: &str) {
        self.breadcrumb(&format!("Removed from cart: {}", product_id))
            .await;
    }

    /// Mirror the cart into session properties; an empty cart removes them
    pub async fn update_cart_properties(&self, item_count: u32, total: f64) {
        if item_count == 0 {
            self.remove_session_property(PROP_CART_ITEM_COUNT).await;
            self.remove_session_property(PROP_CART_VALUE).await;
            return;
        }
        self.set_session_property(PROP_CART_ITEM_COUNT, &item_count.to_string(), false)
            .await;
        self.set_session_property(PROP_CART_VALUE, &money(total), false)
            .await;
    }

    /// Breadcrumb for a checkout step
    pub async fn track_checkout_step(&self, step: &str) {
        self.breadcrumb(&format!("Checkout step: {}", step)).await;
    }

    /// Log the order, emit a `checkout_flow` span covering checkout, clear the cart
    pub async fn track_purchase(&self, purchase: &PurchaseSummary) {
        self.breadcrumb(&format!("Purchase completed: {}", purchase.order_id))
            .await;
        self.log(
            Severity::Info,
            "Purchase completed",
            Some(props([
                ("order_id", purchase.order_id.clone()),
                ("total", money(purchase.total)),
                ("item_count", purchase.item_count.to_string()),
            ])),
        )
        .await;

        let mut attributes = Attributes::new();
        attributes.insert("order_id".to_string(), purchase.order_id.clone());
        attributes.insert("item_count".to_string(), purchase.item_count.to_string());
        self.record_completed_span(
            "checkout_flow",
            purchase.checkout_started_at,
            Utc::now(),
            Some(attributes),
            true,
        );

        self.update_cart_properties(0, 0.0).await;
    }

    /// Breadcrumb plus an info log with the result count
    pub async fn track_search(&self, query: &str, result_count: usize) {
        self.breadcrumb(&format!("Searched: {}", query)).await;
        self.log(
            Severity::Info,
            "Search performed",
            Some(props([
                ("query", query.to_string()),
                ("result_count", result_count.to_string()),
            ])),
        )
        .await;
    }

    /// Identify the user and mark the device as logged in
    pub async fn track_login(&self, user_id: &str) {
        self.set_user_identifier(user_id).await;
        self.set_session_property(PROP_USER_LOGGED_IN, "true", true)
            .await;
        self.breadcrumb("User logged in").await;
    }

    /// Clear the user identifier and the logged-in flag
    pub async fn track_logout(&self) {
        self.breadcrumb("User logged out").await;
        self.clear_user_identifier().await;
        self.remove_session_property(PROP_USER_LOGGED_IN).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SpanKind};
    use crate::config::TelemetryConfig;

    async fn instrumentation() -> (Instrumentation, MemoryBackend) {
        let backend = MemoryBackend::new();
        let telemetry = Instrumentation::with_backend(TelemetryConfig::default(), backend.clone())
            .unwrap();
        assert!(telemetry.initialize().await);
        (telemetry, backend)
    }

    #[test]
    fn test_money() {
        assert_eq!(money(12.5), "12.50");
        assert_eq!(money(0.0), "0.00");
    }

    #[tokio::test]
    async fn test_cart_properties() {
        let (telemetry, backend) = instrumentation().await;

        telemetry.update_cart_properties(3, 59.97).await;
        assert_eq!(backend.property(PROP_CART_ITEM_COUNT).unwrap().value, "3");
        assert_eq!(backend.property(PROP_CART_VALUE).unwrap().value, "59.97");

        telemetry.update_cart_properties(0, 0.0).await;
        assert!(backend.property(PROP_CART_ITEM_COUNT).is_none());
        assert!(backend.property(PROP_CART_VALUE).is_none());
    }

    #[tokio::test]
    async fn test_screen_view() {
        let (telemetry, backend) = instrumentation().await;

        let handle = telemetry.track_screen_view("Cart").await.unwrap();
        telemetry.end_span(&handle, true);

        assert!(backend.breadcrumbs().contains(&"Viewed screen: Cart".to_string()));
        assert_eq!(backend.span_named("Cart").unwrap().kind, SpanKind::View);
    }

    #[tokio::test]
    async fn test_purchase() {
        let (telemetry, backend) = instrumentation().await;
        telemetry.update_cart_properties(2, 40.0).await;

        telemetry
            .track_purchase(&PurchaseSummary {
                order_id: "ord-42".to_string(),
                total: 40.0,
                item_count: 2,
                checkout_started_at: Utc::now() - chrono::Duration::seconds(30),
            })
            .await;

        let span = backend.span_named("checkout_flow").unwrap();
        assert_eq!(span.kind, SpanKind::Completed);
        assert!((span.end_time - span.start_time).num_seconds() >= 30);

        let log = backend
            .logs()
            .into_iter()
            .find(|l| l.message == "Purchase completed")
            .unwrap();
        assert_eq!(log.properties.get("total").map(String::as_str), Some("40.00"));
        assert!(backend.property(PROP_CART_ITEM_COUNT).is_none());
    }

    #[tokio::test]
    async fn test_login_logout() {
        let (telemetry, backend) = instrumentation().await;

        telemetry.track_login("user-7").await;
        assert_eq!(backend.user_id().as_deref(), Some("user-7"));
        assert!(backend.property(PROP_USER_LOGGED_IN).unwrap().permanent);

        telemetry.track_logout().await;
        assert!(backend.user_id().is_none());
        assert!(backend.property(PROP_USER_LOGGED_IN).is_none());
    }

    #[tokio::test]
    async fn test_search() {
        let (telemetry, backend) = instrumentation().await;

        telemetry.track_search("headphones", 4).await;

        let log = backend.logs().pop().unwrap();
        assert_eq!(log.message, "Search performed");
        assert_eq!(log.properties.get("result_count").map(String::as_str), Some("4"));
    }
}
