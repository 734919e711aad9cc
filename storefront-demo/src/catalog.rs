//! In-process mock of the storefront API
//!
//! Every call sleeps for the configured latency before answering, so the
//! network wrapper sees realistic durations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Payment declined")]
    PaymentDeclined,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn total(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| l.unit_price * f64::from(l.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub order_id: String,
    pub total: f64,
    pub item_count: u32,
}

pub struct MockCatalog {
    latency: Duration,
    products: Vec<Product>,
    cart: Mutex<Cart>,
    order_seq: AtomicU64,
}

impl MockCatalog {
    pub fn new(latency: Duration) -> Self {
        let products = [
            ("p-100", "Wireless Headphones", "audio", 129.99),
            ("p-101", "Bluetooth Speaker", "audio", 59.50),
            ("p-200", "4K Action Camera", "video", 249.00),
            ("p-201", "Camera Tripod", "video", 34.95),
            ("p-300", "USB-C Charger", "accessories", 24.99),
            ("p-301", "Braided Cable 2m", "accessories", 12.49),
        ]
        .into_iter()
        .map(|(id, name, category, price)| Product {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            price,
        })
        .collect();

        Self {
            latency,
            products,
            cart: Mutex::new(Cart::default()),
            order_seq: AtomicU64::new(1000),
        }
    }

    async fn delay(&self) {
        tokio::time::sleep(self.latency).await;
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, ApiError> {
        self.delay().await;
        Ok(self.products.clone())
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Product>, ApiError> {
        self.delay().await;
        let query = query.to_lowercase();
        Ok(self
            .products
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&query) || p.category == query)
            .cloned()
            .collect())
    }

    pub async fn add_to_cart(&self, product_id: &str, quantity: u32) -> Result<Cart, ApiError> {
        self.delay().await;
        let product = self
            .products
            .iter()
            .find(|p| p.id == product_id)
            .ok_or_else(|| ApiError::NotFound(product_id.to_string()))?;

        let mut cart = self.cart.lock();
        match cart.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity += quantity,
            None => cart.lines.push(CartLine {
                product_id: product.id.clone(),
                quantity,
                unit_price: product.price,
            }),
        }
        Ok(cart.clone())
    }

    pub async fn remove_from_cart(&self, product_id: &str) -> Result<Cart, ApiError> {
        self.delay().await;
        let mut cart = self.cart.lock();
        let before = cart.lines.len();
        cart.lines.retain(|l| l.product_id != product_id);
        if cart.lines.len() == before {
            return Err(ApiError::NotFound(product_id.to_string()));
        }
        Ok(cart.clone())
    }

    /// Place an order for the current cart; `decline` simulates a card failure
    pub async fn place_order(&self, decline: bool) -> Result<Order, ApiError> {
        // Payment processing is slower than catalog reads
        self.delay().await;
        self.delay().await;

        let mut cart = self.cart.lock();
        if cart.lines.is_empty() {
            return Err(ApiError::EmptyCart);
        }
        if decline {
            return Err(ApiError::PaymentDeclined);
        }

        let order = Order {
            order_id: format!("ord-{}", self.order_seq.fetch_add(1, Ordering::SeqCst)),
            total: cart.total(),
            item_count: cart.item_count(),
        };
        *cart = Cart::default();
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cart_and_order() {
        let catalog = MockCatalog::new(Duration::from_millis(100));

        catalog.add_to_cart("p-100", 1).await.unwrap();
        let cart = catalog.add_to_cart("p-100", 2).await.unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.item_count(), 3);

        let order = catalog.place_order(false).await.unwrap();
        assert_eq!(order.item_count, 3);
        assert!((order.total - 389.97).abs() < 1e-9);

        assert!(matches!(catalog.place_order(false).await, Err(ApiError::EmptyCart)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_payment_keeps_cart() {
        let catalog = MockCatalog::new(Duration::ZERO);
        catalog.add_to_cart("p-301", 1).await.unwrap();

        assert!(matches!(catalog.place_order(true).await, Err(ApiError::PaymentDeclined)));
        assert!(catalog.place_order(false).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let catalog = MockCatalog::new(Duration::ZERO);
        assert!(matches!(
            catalog.add_to_cart("nope", 1).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(catalog.remove_from_cart("p-100").await.is_err());
    }

    #[tokio::test]
    async fn test_search() {
        let catalog = MockCatalog::new(Duration::ZERO);
        assert_eq!(catalog.search("audio").await.unwrap().len(), 2);
        assert_eq!(catalog.search("camera").await.unwrap().len(), 2);
    }
}
