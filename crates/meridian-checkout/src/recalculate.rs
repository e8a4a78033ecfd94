//! # Cart Recalculation Orchestrator
//!
//! The single entry point that turns cart mutations into consistent
//! totals. Every mutation funnels through the same pipeline so the cart
//! invariant holds after every save:
//!
//! `grand_total == subtotal - discount_total + shipping_total + tax_total`
//!
//! ## Recalculation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Recalculation Pipeline                              │
//! │                                                                         │
//! │  acquire per-cart lock ── one recalculation per cart at a time         │
//! │        ▼                                                                │
//! │  1. subtotal from line items                                           │
//! │  2. discounts, pass 1 (shipping unknown; FreeShipping defers)          │
//! │  3. shipping cost on the DISCOUNTED merchandise total                  │
//! │  4. discounts, pass 2 (FreeShipping now sees the shipping cost)        │
//! │  5. order tax on discounted lines + taxable shipping                   │
//! │  6. grand total, per-line amounts, receipt breakdowns                  │
//! │        ▼                                                                │
//! │  save with optimistic version check ── reload + re-run on conflict    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A stored coupon that has become invalid (expired, exhausted) is skipped
//! with a warning, never an error: recalculation must always produce a
//! priceable cart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use meridian_core::discount::{
    calculate_cart_discounts, validate_coupon, CouponRejection, Discount,
};
use meridian_core::shipping::{
    calculate_shipping_cost, get_shipping_options, AvailableShippingMethod, ShippingContext,
};
use meridian_core::tax::{calculate_order_tax, TaxRequest};
use meridian_core::{Cart, Money};

use crate::error::{CheckoutError, CheckoutResult};
use crate::sources::{
    CartStore, DiscountSource, ShippingConfigSource, TaxConfigSource, UsageTracker,
};

/// How many times a save is retried after a version conflict before the
/// orchestrator gives up.
pub const MAX_SAVE_RETRIES: u32 = 3;

// =============================================================================
// Service
// =============================================================================

/// The checkout orchestrator. Holds the collaborator seams and the
/// per-cart serialization point.
pub struct CheckoutService {
    carts: Arc<dyn CartStore>,
    discounts: Arc<dyn DiscountSource>,
    tax_config: Arc<dyn TaxConfigSource>,
    shipping_config: Arc<dyn ShippingConfigSource>,
    usage: Arc<dyn UsageTracker>,
    /// One mutex per cart id; recalculations for the same cart serialize,
    /// different carts proceed in parallel.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckoutService {
    pub fn new(
        carts: Arc<dyn CartStore>,
        discounts: Arc<dyn DiscountSource>,
        tax_config: Arc<dyn TaxConfigSource>,
        shipping_config: Arc<dyn ShippingConfigSource>,
        usage: Arc<dyn UsageTracker>,
    ) -> Self {
        CheckoutService {
            carts,
            discounts,
            tax_config,
            shipping_config,
            usage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn cart_lock(&self, cart_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(cart_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the map entry once nobody else holds the lock, so the map
    /// stays bounded by the number of carts in flight rather than every
    /// cart id ever seen. The map mutex is held during the count check;
    /// a concurrent locker cannot clone the Arc until we release it.
    async fn evict_cart_lock(&self, cart_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Two strong refs: the map's and ours.
        if Arc::strong_count(lock) == 2 {
            locks.remove(cart_id);
        }
    }

    async fn load_cart(&self, cart_id: &str) -> CheckoutResult<Cart> {
        self.carts
            .load(cart_id)
            .await?
            .ok_or_else(|| CheckoutError::CartNotFound(cart_id.to_string()))
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Recalculates every derived total on the cart and saves it.
    pub async fn recalculate(&self, cart_id: &str) -> CheckoutResult<Cart> {
        let lock = self.cart_lock(cart_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.load_cart(cart_id).await {
                Ok(cart) => self.price_and_save(cart).await,
                Err(err) => Err(err),
            }
        };
        self.evict_cart_lock(cart_id, &lock).await;
        result
    }

    /// Applies a coupon code to the cart. Rejections are typed and carry
    /// the stable code the storefront displays.
    pub async fn apply_coupon(&self, cart_id: &str, code: &str) -> CheckoutResult<Cart> {
        let lock = self.cart_lock(cart_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_coupon_locked(cart_id, code).await
        };
        self.evict_cart_lock(cart_id, &lock).await;
        result
    }

    async fn apply_coupon_locked(&self, cart_id: &str, code: &str) -> CheckoutResult<Cart> {
        let mut cart = self.load_cart(cart_id).await?;
        let discount = self
            .discounts
            .find_by_code(code)
            .await?
            .ok_or(CouponRejection::InvalidCode)?;

        let usage_count = self.customer_usage(&discount, &cart).await?;
        validate_coupon(&discount, &cart, usage_count, Utc::now())?;

        cart.coupon_code = Some(code.to_string());
        self.price_and_save(cart).await
    }

    /// Removes any applied coupon and reprices.
    pub async fn remove_coupon(&self, cart_id: &str) -> CheckoutResult<Cart> {
        let lock = self.cart_lock(cart_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.load_cart(cart_id).await {
                Ok(mut cart) => {
                    cart.coupon_code = None;
                    self.price_and_save(cart).await
                }
                Err(err) => Err(err),
            }
        };
        self.evict_cart_lock(cart_id, &lock).await;
        result
    }

    /// Selects (or clears) a shipping method and reprices. An unknown,
    /// inactive, or ineligible method is a typed error and nothing is
    /// saved.
    pub async fn set_shipping_method(
        &self,
        cart_id: &str,
        method_id: Option<&str>,
    ) -> CheckoutResult<Cart> {
        let lock = self.cart_lock(cart_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.set_shipping_method_locked(cart_id, method_id).await
        };
        self.evict_cart_lock(cart_id, &lock).await;
        result
    }

    async fn set_shipping_method_locked(
        &self,
        cart_id: &str,
        method_id: Option<&str>,
    ) -> CheckoutResult<Cart> {
        let mut cart = self.load_cart(cart_id).await?;

        if let Some(method_id) = method_id {
            // Validate up front so the failure reaches the caller instead
            // of being degraded by the pipeline.
            let now = Utc::now();
            let discounted = self.discounted_merchandise_total(&cart, now).await?;
            let address = cart
                .destination_address()
                .cloned()
                .ok_or(meridian_core::shipping::ShippingError::NoZoneForAddress)?;
            let ctx = self.shipping_context(&cart, discounted);
            calculate_shipping_cost(
                method_id,
                &address,
                &ctx,
                &self.shipping_config.zones().await?,
                &self.shipping_config.methods().await?,
                &self.shipping_config.rates().await?,
            )?;
            cart.selected_shipping_method_id = Some(method_id.to_string());
        } else {
            cart.selected_shipping_method_id = None;
        }

        self.price_and_save(cart).await
    }

    /// Lists the shipping methods available for the cart's destination,
    /// costed against the discounted merchandise total. No address means
    /// no options, not an error.
    pub async fn shipping_options(
        &self,
        cart_id: &str,
    ) -> CheckoutResult<Vec<AvailableShippingMethod>> {
        let cart = self.load_cart(cart_id).await?;
        let Some(address) = cart.destination_address().cloned() else {
            return Ok(Vec::new());
        };

        let discounted = self.discounted_merchandise_total(&cart, Utc::now()).await?;
        let ctx = self.shipping_context(&cart, discounted);
        Ok(get_shipping_options(
            &address,
            &ctx,
            &self.shipping_config.zones().await?,
            &self.shipping_config.methods().await?,
            &self.shipping_config.rates().await?,
        ))
    }

    /// Records usage for every discount applied to the cart, against the
    /// order that was just created from it. Driven by the host after
    /// order creation succeeds; calculation never moves counters.
    pub async fn record_discount_usage(&self, cart: &Cart, order_id: &str) -> CheckoutResult<()> {
        for applied in &cart.applied_discounts {
            self.usage
                .record_usage(
                    &applied.discount_id,
                    order_id,
                    cart.customer_id.as_deref(),
                    applied.amount,
                )
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Runs the pricing pipeline and saves with optimistic retry. On a
    /// version conflict the cart is reloaded (picking up the concurrent
    /// change) and repriced before the next attempt.
    async fn price_and_save(&self, mut cart: Cart) -> CheckoutResult<Cart> {
        for attempt in 0..MAX_SAVE_RETRIES {
            self.price(&mut cart).await?;
            let expected = cart.version;
            if self.carts.save(&cart, expected).await? {
                cart.version = expected + 1;
                debug!(cart_id = %cart.id, version = cart.version, "cart repriced and saved");
                return Ok(cart);
            }

            warn!(cart_id = %cart.id, attempt, "version conflict, reloading");
            let reloaded = self.load_cart(&cart.id).await?;
            // Intent (coupon code, method selection) carries over to the
            // reloaded state; derived totals are recomputed from scratch.
            let mut merged = reloaded;
            merged.coupon_code = cart.coupon_code.clone();
            merged.selected_shipping_method_id = cart.selected_shipping_method_id.clone();
            cart = merged;
        }

        Err(CheckoutError::VersionConflict {
            cart_id: cart.id.clone(),
        })
    }

    /// The pricing pipeline proper. Mutates every derived field on the
    /// cart; never touches line items, addresses, or selections.
    async fn price(&self, cart: &mut Cart) -> CheckoutResult<()> {
        let now = Utc::now();
        let currency = cart.currency;

        if cart.is_empty() {
            cart.discount_total = Money::zero(currency);
            cart.shipping_total = None;
            cart.tax_total = Money::zero(currency);
            cart.grand_total = Money::zero(currency);
            cart.applied_discounts = Vec::new();
            cart.tax_breakdown = Vec::new();
            cart.updated_at = now;
            return Ok(());
        }

        let subtotal = cart.subtotal();
        let coupon = self.resolve_stored_coupon(cart, now).await?;
        let automatic = self.discounts.active_automatic().await?;

        // Pass 1: shipping unknown; FreeShipping contributes nothing yet.
        let pass1 = calculate_cart_discounts(cart, &automatic, coupon.as_ref(), None, now)?;

        // Shipping is costed on the discounted merchandise total.
        let discounted = subtotal.try_sub(&pass1.total_discount)?.clamp_non_negative();
        let shipping_total = self.cost_selected_shipping(cart, discounted, now).await?;

        // Pass 2: only needed once shipping is known.
        let discounts = match &shipping_total {
            Some(shipping) => {
                calculate_cart_discounts(cart, &automatic, coupon.as_ref(), Some(shipping), now)?
            }
            None => pass1,
        };

        // Per-line discount attribution, summed across applied discounts.
        for line in &mut cart.line_items {
            let allocated: Decimal = discounts
                .applied_discounts
                .iter()
                .flat_map(|d| &d.line_allocations)
                .filter(|a| a.line_item_id == line.id)
                .map(|a| a.amount.amount())
                .sum();
            line.discount_amount = Money::new(allocated, currency);
        }

        // Tax on the discounted line amounts, plus taxable shipping.
        let address = cart.destination_address().cloned();
        let requests: Vec<TaxRequest> = cart
            .line_items
            .iter()
            .map(|line| TaxRequest {
                address: address.clone(),
                amount: line
                    .line_total()
                    .try_sub(&line.discount_amount)
                    .unwrap_or_else(|_| Money::zero(currency))
                    .clamp_non_negative(),
                tax_class: line.tax_class.clone(),
                is_tax_exempt: false,
                exemption_number: None,
                shipping_amount: Money::zero(currency),
                includes_shipping: false,
            })
            .collect();

        let tax = calculate_order_tax(
            &requests,
            shipping_total.as_ref(),
            address.as_ref(),
            &self.tax_config.zones().await?,
            &self.tax_config.categories().await?,
            &self.tax_config.rates().await?,
            now,
            currency,
        );

        for (line, line_tax) in cart.line_items.iter_mut().zip(&tax.line_taxes) {
            line.tax_amount = line_tax.tax_amount;
        }

        let shipping_amount = shipping_total
            .as_ref()
            .map(|s| s.amount())
            .unwrap_or(Decimal::ZERO);
        let grand = subtotal.amount() - discounts.total_discount.amount()
            + shipping_amount
            + tax.tax_amount.amount();

        cart.discount_total = discounts.total_discount;
        cart.shipping_total = shipping_total;
        cart.tax_total = tax.tax_amount;
        cart.grand_total = Money::new(grand, currency);
        cart.applied_discounts = discounts.applied_discounts;
        cart.tax_breakdown = tax.breakdown;
        cart.updated_at = now;

        debug!(
            cart_id = %cart.id,
            subtotal = %subtotal,
            discount = %cart.discount_total,
            tax = %cart.tax_total,
            grand = %cart.grand_total,
            "pipeline complete"
        );
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Resolves the stored coupon code to a live discount. A code that no
    /// longer validates is skipped with a warning; the code stays on the
    /// cart so the storefront can explain why it stopped applying.
    async fn resolve_stored_coupon(
        &self,
        cart: &Cart,
        now: DateTime<Utc>,
    ) -> CheckoutResult<Option<Discount>> {
        let Some(code) = cart.coupon_code.as_deref() else {
            return Ok(None);
        };

        let Some(discount) = self.discounts.find_by_code(code).await? else {
            warn!(cart_id = %cart.id, code, "stored coupon no longer exists, skipping");
            return Ok(None);
        };

        let usage_count = self.customer_usage(&discount, cart).await?;
        match validate_coupon(&discount, cart, usage_count, now) {
            Ok(()) => Ok(Some(discount)),
            Err(rejection) => {
                warn!(cart_id = %cart.id, code, %rejection, "stored coupon invalid, skipping");
                Ok(None)
            }
        }
    }

    async fn customer_usage(&self, discount: &Discount, cart: &Cart) -> CheckoutResult<i64> {
        match &cart.customer_id {
            Some(customer_id) => {
                self.discounts
                    .customer_usage_count(&discount.id, customer_id)
                    .await
            }
            None => Ok(0),
        }
    }

    /// Costs the selected shipping method, if any. A stored selection
    /// that has become invalid clears itself rather than failing the
    /// whole recalculation.
    async fn cost_selected_shipping(
        &self,
        cart: &mut Cart,
        discounted_total: Money,
        _now: DateTime<Utc>,
    ) -> CheckoutResult<Option<Money>> {
        let Some(method_id) = cart.selected_shipping_method_id.clone() else {
            return Ok(None);
        };
        let Some(address) = cart.destination_address().cloned() else {
            return Ok(None);
        };

        let ctx = self.shipping_context(cart, discounted_total);
        match calculate_shipping_cost(
            &method_id,
            &address,
            &ctx,
            &self.shipping_config.zones().await?,
            &self.shipping_config.methods().await?,
            &self.shipping_config.rates().await?,
        ) {
            Ok(option) => Ok(Some(option.cost)),
            Err(err) => {
                warn!(cart_id = %cart.id, method_id, %err, "selected shipping method invalid, clearing");
                cart.selected_shipping_method_id = None;
                Ok(None)
            }
        }
    }

    /// Discounted merchandise total as the shipping engines see it:
    /// pass-1 discounts only, shipping unknown.
    async fn discounted_merchandise_total(
        &self,
        cart: &Cart,
        now: DateTime<Utc>,
    ) -> CheckoutResult<Money> {
        let coupon = self.resolve_stored_coupon(cart, now).await?;
        let automatic = self.discounts.active_automatic().await?;
        let pass1 = calculate_cart_discounts(cart, &automatic, coupon.as_ref(), None, now)?;
        Ok(cart
            .subtotal()
            .try_sub(&pass1.total_discount)?
            .clamp_non_negative())
    }

    fn shipping_context(&self, cart: &Cart, order_amount: Money) -> ShippingContext {
        ShippingContext {
            order_amount: order_amount.amount(),
            total_weight: cart.total_weight(),
            total_quantity: cart.total_quantity(),
            currency: cart.currency,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::Duration;
    use rust_decimal_macros::dec;

    use meridian_core::discount::{DiscountScope, DiscountType};
    use meridian_core::shipping::{CalculationType, ShippingMethod, ShippingRate, ShippingZone};
    use meridian_core::tax::{TaxCategory, TaxRate, TaxRateType, TaxZone};
    use meridian_core::zone::GeoRules;
    use meridian_core::{Address, CurrencyCode, LineItem};

    use crate::sources::{
        InMemoryCartStore, InMemoryDiscountSource, InMemoryShippingConfig, InMemoryTaxConfig,
    };

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn line(id: &str, unit_price: Decimal, quantity: i64) -> LineItem {
        LineItem {
            id: id.to_string(),
            product_id: format!("prod-{}", id),
            variant_id: None,
            name: format!("Product {}", id),
            sku: format!("SKU-{}", id),
            unit_price: Money::new(unit_price, usd()),
            quantity,
            category_ids: HashSet::new(),
            tax_class: None,
            weight: dec!(1),
            discount_amount: Money::zero(usd()),
            tax_amount: Money::zero(usd()),
            added_at: Utc::now(),
        }
    }

    fn us_address() -> Address {
        Address {
            country: "US".to_string(),
            state: "CA".to_string(),
            city: "Los Angeles".to_string(),
            postal_code: "90210".to_string(),
        }
    }

    fn percentage_coupon(code: &str, value: Decimal) -> Discount {
        Discount {
            id: format!("disc-{}", code),
            code: Some(code.to_string()),
            name: format!("{} off", code),
            discount_type: DiscountType::Percentage,
            value,
            scope: DiscountScope::Cart,
            applicable_product_ids: HashSet::new(),
            applicable_category_ids: HashSet::new(),
            minimum_order_amount: None,
            max_discount_amount: None,
            start_date: None,
            end_date: None,
            total_usage_limit: None,
            usage_count: 0,
            per_customer_limit: None,
            minimum_quantity: None,
            maximum_quantity: None,
            is_active: true,
        }
    }

    fn free_shipping_coupon(code: &str) -> Discount {
        Discount {
            discount_type: DiscountType::FreeShipping,
            value: Decimal::ZERO,
            ..percentage_coupon(code, Decimal::ZERO)
        }
    }

    fn shipping_config(flat_rate: Decimal) -> InMemoryShippingConfig {
        InMemoryShippingConfig {
            zones: vec![ShippingZone {
                id: "sz-us".to_string(),
                code: "US".to_string(),
                name: "United States".to_string(),
                sort_order: 1,
                is_default: false,
                rules: GeoRules {
                    countries: vec!["US".to_string()],
                    ..Default::default()
                },
            }],
            methods: vec![ShippingMethod {
                id: "ship-standard".to_string(),
                code: "standard".to_string(),
                name: "Standard".to_string(),
                calculation_type: CalculationType::FlatRate,
                flat_rate: Some(flat_rate),
                weight_base_rate: None,
                weight_per_unit_rate: None,
                price_percentage: None,
                per_item_rate: None,
                handling_fee: None,
                minimum_cost: None,
                maximum_cost: None,
                free_shipping_threshold: None,
                min_weight: None,
                max_weight: None,
                min_order_amount: None,
                max_order_amount: None,
                sort_order: 1,
                is_active: true,
            }],
            rates: vec![ShippingRate {
                id: "sr-1".to_string(),
                shipping_zone_id: "sz-us".to_string(),
                shipping_method_id: "ship-standard".to_string(),
                flat_rate: None,
                weight_base_rate: None,
                weight_per_unit_rate: None,
                price_percentage: None,
                per_item_rate: None,
                handling_fee: None,
                free_shipping_threshold: None,
                min_weight: None,
                max_weight: None,
                min_order_amount: None,
                max_order_amount: None,
                is_active: true,
            }],
        }
    }

    fn tax_config(rate_pct: Decimal, tax_shipping: bool) -> InMemoryTaxConfig {
        InMemoryTaxConfig {
            zones: vec![TaxZone {
                id: "tz-ca".to_string(),
                code: "US-CA".to_string(),
                name: "California".to_string(),
                priority: 1,
                is_default: false,
                rules: GeoRules {
                    states: vec!["CA".to_string()],
                    ..Default::default()
                },
            }],
            categories: vec![TaxCategory {
                id: "tc-std".to_string(),
                code: "standard".to_string(),
                name: "Standard".to_string(),
                is_tax_exempt: false,
                is_default: true,
            }],
            rates: vec![TaxRate {
                id: "tr-1".to_string(),
                tax_zone_id: "tz-ca".to_string(),
                tax_category_id: "tc-std".to_string(),
                name: "CA State Tax".to_string(),
                rate: rate_pct,
                rate_type: TaxRateType::Percentage,
                is_compound: false,
                priority: 1,
                sort_order: 0,
                tax_shipping,
                effective_from: None,
                effective_to: None,
                is_active: true,
            }],
        }
    }

    struct Fixture {
        service: CheckoutService,
        store: Arc<InMemoryCartStore>,
    }

    fn fixture(
        discounts: Vec<Discount>,
        tax: InMemoryTaxConfig,
        shipping: InMemoryShippingConfig,
    ) -> Fixture {
        let store = Arc::new(InMemoryCartStore::new());
        let discount_source = Arc::new(InMemoryDiscountSource::new(discounts));
        let service = CheckoutService::new(
            store.clone(),
            discount_source.clone(),
            Arc::new(tax),
            Arc::new(shipping),
            discount_source,
        );
        Fixture { service, store }
    }

    fn assert_invariant(cart: &Cart) {
        let shipping = cart
            .shipping_total
            .as_ref()
            .map(|s| s.amount())
            .unwrap_or(Decimal::ZERO);
        assert_eq!(
            cart.grand_total.amount(),
            cart.subtotal().amount() - cart.discount_total.amount()
                + shipping
                + cart.tax_total.amount()
        );
    }

    // ==================== Basic Pipeline ====================

    #[tokio::test]
    async fn test_empty_cart_recalculates_to_zero() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        f.store.insert(Cart::new("c1", usd())).await;

        let cart = f.service.recalculate("c1").await.unwrap();
        assert!(cart.grand_total.is_zero());
        assert!(cart.discount_total.is_zero());
        assert!(cart.tax_total.is_zero());
        assert!(cart.shipping_total.is_none());
        assert_invariant(&cart);
    }

    #[tokio::test]
    async fn test_missing_cart_is_typed_error() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        assert!(matches!(
            f.service.recalculate("nope").await,
            Err(CheckoutError::CartNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_cart_grand_total_is_subtotal() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(25), 2)).unwrap();
        cart.add_item(line("b", dec!(10), 5)).unwrap();
        f.store.insert(cart).await;

        let cart = f.service.recalculate("c1").await.unwrap();
        assert_eq!(cart.grand_total.amount(), dec!(100));
        assert_invariant(&cart);
    }

    // ==================== Coupons ====================

    #[tokio::test]
    async fn test_apply_percentage_coupon() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            InMemoryTaxConfig::default(),
            InMemoryShippingConfig::default(),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        f.store.insert(cart).await;

        let cart = f.service.apply_coupon("c1", "SAVE10").await.unwrap();
        assert_eq!(cart.coupon_code.as_deref(), Some("SAVE10"));
        assert_eq!(cart.discount_total.amount(), dec!(10));
        assert_eq!(cart.grand_total.amount(), dec!(90));
        assert_eq!(cart.applied_discounts.len(), 1);
        assert_eq!(cart.line_items[0].discount_amount.amount(), dec!(10));
        assert_invariant(&cart);
    }

    #[tokio::test]
    async fn test_unknown_coupon_rejected_and_not_saved() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        f.store.insert(cart).await;

        let err = f.service.apply_coupon("c1", "NOPE").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Coupon(CouponRejection::InvalidCode)));

        let stored = f.store.load("c1").await.unwrap().unwrap();
        assert!(stored.coupon_code.is_none());
    }

    #[tokio::test]
    async fn test_expired_coupon_rejected_on_apply() {
        let mut expired = percentage_coupon("OLD", dec!(10));
        expired.end_date = Some(Utc::now() - Duration::days(1));
        let f = fixture(vec![expired], InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        f.store.insert(cart).await;

        let err = f.service.apply_coupon("c1", "OLD").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Coupon(CouponRejection::Expired)));
    }

    #[tokio::test]
    async fn test_stored_coupon_gone_invalid_is_skipped_not_fatal() {
        let mut expired = percentage_coupon("WAS-GOOD", dec!(10));
        expired.end_date = Some(Utc::now() - Duration::days(1));
        let f = fixture(vec![expired], InMemoryTaxConfig::default(), InMemoryShippingConfig::default());
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.coupon_code = Some("WAS-GOOD".to_string());
        f.store.insert(cart).await;

        let cart = f.service.recalculate("c1").await.unwrap();
        assert!(cart.discount_total.is_zero());
        assert_eq!(cart.grand_total.amount(), dec!(100));
        // The code stays so the storefront can explain the change.
        assert_eq!(cart.coupon_code.as_deref(), Some("WAS-GOOD"));
    }

    #[tokio::test]
    async fn test_remove_coupon_reprices() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            InMemoryTaxConfig::default(),
            InMemoryShippingConfig::default(),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        f.store.insert(cart).await;

        f.service.apply_coupon("c1", "SAVE10").await.unwrap();
        let cart = f.service.remove_coupon("c1").await.unwrap();
        assert!(cart.coupon_code.is_none());
        assert_eq!(cart.grand_total.amount(), dec!(100));
    }

    // ==================== Shipping ====================

    #[tokio::test]
    async fn test_shipping_options_costed_on_discounted_total() {
        let mut threshold_config = shipping_config(dec!(9.99));
        threshold_config.methods[0].free_shipping_threshold = Some(dec!(75));
        let f = fixture(
            vec![percentage_coupon("SAVE50", dec!(50))],
            InMemoryTaxConfig::default(),
            threshold_config,
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.shipping_address = Some(us_address());
        f.store.insert(cart).await;

        // Without the coupon: $100 >= $75 threshold, shipping free.
        let options = f.service.shipping_options("c1").await.unwrap();
        assert!(options[0].free_shipping_applied);

        // With the 50% coupon the discounted total is $50, below threshold.
        f.service.apply_coupon("c1", "SAVE50").await.unwrap();
        let options = f.service.shipping_options("c1").await.unwrap();
        assert!(!options[0].free_shipping_applied);
        assert_eq!(options[0].cost.amount(), dec!(9.99));
    }

    #[tokio::test]
    async fn test_set_shipping_method_prices_shipping() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), shipping_config(dec!(10)));
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.shipping_address = Some(us_address());
        f.store.insert(cart).await;

        let cart = f
            .service
            .set_shipping_method("c1", Some("ship-standard"))
            .await
            .unwrap();
        assert_eq!(cart.shipping_total.unwrap().amount(), dec!(10));
        assert_eq!(cart.grand_total.amount(), dec!(110));
        assert_invariant(&cart);
    }

    #[tokio::test]
    async fn test_set_unknown_shipping_method_is_typed_error() {
        let f = fixture(Vec::new(), InMemoryTaxConfig::default(), shipping_config(dec!(10)));
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.shipping_address = Some(us_address());
        f.store.insert(cart).await;

        let err = f
            .service
            .set_shipping_method("c1", Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Shipping(_)));
    }

    #[tokio::test]
    async fn test_free_shipping_coupon_runs_two_phase() {
        let f = fixture(
            vec![free_shipping_coupon("FREESHIP")],
            InMemoryTaxConfig::default(),
            shipping_config(dec!(10)),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.shipping_address = Some(us_address());
        cart.selected_shipping_method_id = Some("ship-standard".to_string());
        f.store.insert(cart).await;

        let cart = f.service.apply_coupon("c1", "FREESHIP").await.unwrap();
        // Shipping is still charged, then discounted back out.
        assert_eq!(cart.shipping_total.as_ref().unwrap().amount(), dec!(10));
        assert_eq!(cart.discount_total.amount(), dec!(10));
        assert_eq!(cart.grand_total.amount(), dec!(100));
        assert_invariant(&cart);
    }

    // ==================== Tax ====================

    #[tokio::test]
    async fn test_tax_applies_to_discounted_amounts_and_shipping() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            tax_config(dec!(10), true),
            shipping_config(dec!(10)),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.shipping_address = Some(us_address());
        cart.selected_shipping_method_id = Some("ship-standard".to_string());
        f.store.insert(cart).await;

        let cart = f.service.apply_coupon("c1", "SAVE10").await.unwrap();
        // Discounted merchandise: 90. Tax: 10% of 90 + 10% of shipping 10 = 10.
        assert_eq!(cart.discount_total.amount(), dec!(10));
        assert_eq!(cart.shipping_total.as_ref().unwrap().amount(), dec!(10));
        assert_eq!(cart.tax_total.amount(), dec!(10));
        assert_eq!(cart.grand_total.amount(), dec!(110));
        assert_eq!(cart.line_items[0].tax_amount.amount(), dec!(9));
        assert!(!cart.tax_breakdown.is_empty());
        assert_invariant(&cart);
    }

    #[tokio::test]
    async fn test_no_address_means_no_tax() {
        let f = fixture(Vec::new(), tax_config(dec!(10), false), InMemoryShippingConfig::default());
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        f.store.insert(cart).await;

        let cart = f.service.recalculate("c1").await.unwrap();
        assert!(cart.tax_total.is_zero());
        assert_eq!(cart.grand_total.amount(), dec!(100));
    }

    // ==================== Stability ====================

    #[tokio::test]
    async fn test_recalculation_is_idempotent() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            tax_config(dec!(8.25), false),
            shipping_config(dec!(5.99)),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(19.99), 3)).unwrap();
        cart.shipping_address = Some(us_address());
        cart.selected_shipping_method_id = Some("ship-standard".to_string());
        cart.coupon_code = Some("SAVE10".to_string());
        f.store.insert(cart).await;

        let first = f.service.recalculate("c1").await.unwrap();
        let second = f.service.recalculate("c1").await.unwrap();

        assert_eq!(first.grand_total, second.grand_total);
        assert_eq!(first.discount_total, second.discount_total);
        assert_eq!(first.tax_total, second.tax_total);
        assert_eq!(first.shipping_total, second.shipping_total);
        assert_eq!(second.version, first.version + 1);
        assert_invariant(&second);
    }

    #[tokio::test]
    async fn test_concurrent_recalculations_serialize_per_cart() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            tax_config(dec!(10), false),
            shipping_config(dec!(10)),
        );
        let mut cart = Cart::new("c1", usd());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        cart.coupon_code = Some("SAVE10".to_string());
        f.store.insert(cart).await;

        let service = Arc::new(f.service);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.recalculate("c1").await
            }));
        }
        for handle in handles {
            let cart = handle.await.unwrap().unwrap();
            assert_eq!(cart.grand_total.amount(), dec!(90));
        }

        let stored = f.store.load("c1").await.unwrap().unwrap();
        assert_eq!(stored.version, 8);
        // All in-flight work is done, so no per-cart locks remain.
        assert!(service.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cart_locks_are_released_after_each_operation() {
        let f = fixture(
            vec![percentage_coupon("SAVE10", dec!(10))],
            InMemoryTaxConfig::default(),
            InMemoryShippingConfig::default(),
        );
        for id in ["c1", "c2", "c3"] {
            let mut cart = Cart::new(id, usd());
            cart.add_item(line("a", dec!(100), 1)).unwrap();
            f.store.insert(cart).await;
        }

        f.service.recalculate("c1").await.unwrap();
        f.service.apply_coupon("c2", "SAVE10").await.unwrap();
        f.service.remove_coupon("c3").await.unwrap();
        // Failed operations release their lock entry too.
        assert!(f.service.recalculate("missing").await.is_err());

        assert!(f.service.locks.lock().await.is_empty());
    }

    // ==================== Usage Recording ====================

    #[tokio::test]
    async fn test_usage_recorded_only_when_driven_by_host() {
        let discount_source = Arc::new(InMemoryDiscountSource::new(vec![percentage_coupon(
            "SAVE10",
            dec!(10),
        )]));
        let store = Arc::new(InMemoryCartStore::new());
        let service = CheckoutService::new(
            store.clone(),
            discount_source.clone(),
            Arc::new(InMemoryTaxConfig::default()),
            Arc::new(InMemoryShippingConfig::default()),
            discount_source.clone(),
        );

        let mut cart = Cart::new("c1", usd());
        cart.customer_id = Some("cust-1".to_string());
        cart.add_item(line("a", dec!(100), 1)).unwrap();
        store.insert(cart).await;

        let cart = service.apply_coupon("c1", "SAVE10").await.unwrap();
        // Applying and recalculating never move counters.
        assert_eq!(
            discount_source
                .customer_usage_count("disc-SAVE10", "cust-1")
                .await
                .unwrap(),
            0
        );

        service.record_discount_usage(&cart, "order-1").await.unwrap();
        assert_eq!(
            discount_source
                .customer_usage_count("disc-SAVE10", "cust-1")
                .await
                .unwrap(),
            1
        );
    }
}
