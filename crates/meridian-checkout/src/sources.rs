//! # Collaborator Seams
//!
//! Async traits the orchestrator depends on, plus in-memory
//! implementations used in tests and by embedding hosts that have not
//! wired real persistence yet.
//!
//! ## Seam Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CheckoutService Collaborators                       │
//! │                                                                         │
//! │  CartStore            load / save-with-version (optimistic check)      │
//! │  DiscountSource       coupon lookup, automatic discounts, usage counts │
//! │  TaxConfigSource      zones, categories, rates                         │
//! │  ShippingConfigSource zones, methods, rates                            │
//! │  UsageTracker         discount usage, recorded AFTER order creation    │
//! │                                                                         │
//! │  All traits are object-safe: hosts inject Arc<dyn Trait>.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use meridian_core::discount::Discount;
use meridian_core::shipping::{ShippingMethod, ShippingRate, ShippingZone};
use meridian_core::tax::{TaxCategory, TaxRate, TaxZone};
use meridian_core::Cart;

use crate::error::CheckoutResult;

// =============================================================================
// Traits
// =============================================================================

/// Cart persistence with optimistic concurrency.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Loads a cart by id; `None` when it does not exist.
    async fn load(&self, cart_id: &str) -> CheckoutResult<Option<Cart>>;

    /// Saves a cart only if the stored version still equals
    /// `expected_version`, bumping the version on success. Returns `false`
    /// on a version mismatch so the caller can reload and retry.
    async fn save(&self, cart: &Cart, expected_version: i64) -> CheckoutResult<bool>;
}

/// Read access to discount configuration.
#[async_trait]
pub trait DiscountSource: Send + Sync {
    /// Looks a discount up by coupon code (exact match).
    async fn find_by_code(&self, code: &str) -> CheckoutResult<Option<Discount>>;

    /// Every active automatic (code-less) discount.
    async fn active_automatic(&self) -> CheckoutResult<Vec<Discount>>;

    /// How many times this customer has used this discount.
    async fn customer_usage_count(
        &self,
        discount_id: &str,
        customer_id: &str,
    ) -> CheckoutResult<i64>;
}

/// Read access to tax configuration.
#[async_trait]
pub trait TaxConfigSource: Send + Sync {
    async fn zones(&self) -> CheckoutResult<Vec<TaxZone>>;
    async fn categories(&self) -> CheckoutResult<Vec<TaxCategory>>;
    async fn rates(&self) -> CheckoutResult<Vec<TaxRate>>;
}

/// Read access to shipping configuration.
#[async_trait]
pub trait ShippingConfigSource: Send + Sync {
    async fn zones(&self) -> CheckoutResult<Vec<ShippingZone>>;
    async fn methods(&self) -> CheckoutResult<Vec<ShippingMethod>>;
    async fn rates(&self) -> CheckoutResult<Vec<ShippingRate>>;
}

/// Usage recording, driven by the host AFTER an order is created.
/// Calculation never moves counters; abandoned carts must not consume
/// usage budget.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    /// Records one use of a discount against the order it helped create,
    /// with the amount it contributed (for redemption reporting).
    async fn record_usage(
        &self,
        discount_id: &str,
        order_id: &str,
        customer_id: Option<&str>,
        amount: meridian_core::Money,
    ) -> CheckoutResult<()>;
}

// =============================================================================
// In-Memory Implementations
// =============================================================================

/// In-memory cart store with the same optimistic versioning contract a
/// database row would enforce.
#[derive(Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<String, Cart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a cart, bypassing the version check (fixture setup).
    pub async fn insert(&self, cart: Cart) {
        self.carts.write().await.insert(cart.id.clone(), cart);
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, cart_id: &str) -> CheckoutResult<Option<Cart>> {
        Ok(self.carts.read().await.get(cart_id).cloned())
    }

    async fn save(&self, cart: &Cart, expected_version: i64) -> CheckoutResult<bool> {
        let mut carts = self.carts.write().await;
        match carts.get(&cart.id) {
            Some(stored) if stored.version != expected_version => {
                debug!(
                    cart_id = %cart.id,
                    stored = stored.version,
                    expected = expected_version,
                    "version conflict on save"
                );
                Ok(false)
            }
            _ => {
                let mut saved = cart.clone();
                saved.version = expected_version + 1;
                carts.insert(saved.id.clone(), saved);
                Ok(true)
            }
        }
    }
}

/// In-memory discount source over a fixed configuration set.
#[derive(Default)]
pub struct InMemoryDiscountSource {
    discounts: Vec<Discount>,
    usage: RwLock<HashMap<(String, String), i64>>,
}

impl InMemoryDiscountSource {
    pub fn new(discounts: Vec<Discount>) -> Self {
        Self {
            discounts,
            usage: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds a customer usage count (fixture setup).
    pub async fn set_customer_usage(&self, discount_id: &str, customer_id: &str, count: i64) {
        self.usage
            .write()
            .await
            .insert((discount_id.to_string(), customer_id.to_string()), count);
    }
}

#[async_trait]
impl DiscountSource for InMemoryDiscountSource {
    async fn find_by_code(&self, code: &str) -> CheckoutResult<Option<Discount>> {
        Ok(self
            .discounts
            .iter()
            .find(|d| d.code.as_deref() == Some(code))
            .cloned())
    }

    async fn active_automatic(&self) -> CheckoutResult<Vec<Discount>> {
        Ok(self
            .discounts
            .iter()
            .filter(|d| d.code.is_none() && d.is_active)
            .cloned()
            .collect())
    }

    async fn customer_usage_count(
        &self,
        discount_id: &str,
        customer_id: &str,
    ) -> CheckoutResult<i64> {
        Ok(self
            .usage
            .read()
            .await
            .get(&(discount_id.to_string(), customer_id.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl UsageTracker for InMemoryDiscountSource {
    async fn record_usage(
        &self,
        discount_id: &str,
        _order_id: &str,
        customer_id: Option<&str>,
        _amount: meridian_core::Money,
    ) -> CheckoutResult<()> {
        if let Some(customer_id) = customer_id {
            *self
                .usage
                .write()
                .await
                .entry((discount_id.to_string(), customer_id.to_string()))
                .or_insert(0) += 1;
        }
        Ok(())
    }
}

/// In-memory tax configuration.
#[derive(Default)]
pub struct InMemoryTaxConfig {
    pub zones: Vec<TaxZone>,
    pub categories: Vec<TaxCategory>,
    pub rates: Vec<TaxRate>,
}

#[async_trait]
impl TaxConfigSource for InMemoryTaxConfig {
    async fn zones(&self) -> CheckoutResult<Vec<TaxZone>> {
        Ok(self.zones.clone())
    }

    async fn categories(&self) -> CheckoutResult<Vec<TaxCategory>> {
        Ok(self.categories.clone())
    }

    async fn rates(&self) -> CheckoutResult<Vec<TaxRate>> {
        Ok(self.rates.clone())
    }
}

/// In-memory shipping configuration.
#[derive(Default)]
pub struct InMemoryShippingConfig {
    pub zones: Vec<ShippingZone>,
    pub methods: Vec<ShippingMethod>,
    pub rates: Vec<ShippingRate>,
}

#[async_trait]
impl ShippingConfigSource for InMemoryShippingConfig {
    async fn zones(&self) -> CheckoutResult<Vec<ShippingZone>> {
        Ok(self.zones.clone())
    }

    async fn methods(&self) -> CheckoutResult<Vec<ShippingMethod>> {
        Ok(self.methods.clone())
    }

    async fn rates(&self) -> CheckoutResult<Vec<ShippingRate>> {
        Ok(self.rates.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
