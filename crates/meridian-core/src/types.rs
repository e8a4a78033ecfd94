//! # Domain Types
//!
//! Core cart and address types used throughout Meridian.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Cart       │   │    LineItem     │   │    Address      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  country        │       │
//! │  │  line_items     │   │  unit_price     │   │  state          │       │
//! │  │  coupon_code    │   │  quantity       │   │  city           │       │
//! │  │  *_total        │   │  tax_class      │   │  postal_code    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership Rules
//! The pricing engines mutate ONLY computed output fields on the cart
//! (`discount_total`, `shipping_total`, `tax_total`, `grand_total`, per-line
//! `discount_amount`/`tax_amount`, `applied_discounts`, `tax_breakdown`).
//! Prices and quantities belong to the cart collaborator; configuration
//! entities (discounts, zones, rates) are read-only during calculation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::discount::DiscountCalculation;
use crate::error::{CoreError, CoreResult};
use crate::money::{CurrencyCode, Money};
use crate::tax::TaxBreakdown;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Address
// =============================================================================

/// A postal address, reduced to the fields zone matching cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// ISO 3166-1 alpha-2 country code ("US", "DE").
    pub country: String,
    /// State or province code.
    pub state: String,
    pub city: String,
    pub postal_code: String,
}

// =============================================================================
// Line Item
// =============================================================================

/// A line in the cart.
/// Uses the snapshot pattern: name, sku, and unit price are frozen at the
/// moment the product is added, so the cart stays consistent even if the
/// catalog changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Line item id (UUID).
    pub id: String,

    /// Product this line refers to.
    pub product_id: String,

    /// Variant, when the product has them.
    pub variant_id: Option<String>,

    /// Product name at time of adding (frozen).
    pub name: String,

    /// SKU at time of adding (frozen).
    pub sku: String,

    /// Unit price at time of adding (frozen).
    pub unit_price: Money,

    /// Quantity in cart. Invariant: > 0.
    pub quantity: i64,

    /// Categories the product belongs to, for discount/tax scoping.
    pub category_ids: HashSet<String>,

    /// Tax class code; `None` resolves to the default tax category.
    pub tax_class: Option<String>,

    /// Weight per unit, in the store's weight unit.
    pub weight: Decimal,

    /// Computed output: discount allocated to this line.
    pub discount_amount: Money,

    /// Computed output: tax attributed to this line.
    pub tax_amount: Money,

    /// When this item was added to the cart.
    pub added_at: DateTime<Utc>,
}

impl LineItem {
    /// Line total before any discount: `unit_price * quantity`.
    ///
    /// Always derived, never stored, so it cannot go stale.
    pub fn line_total(&self) -> Money {
        self.unit_price.mul_quantity(self.quantity)
    }

    /// Total weight contributed by this line.
    pub fn line_weight(&self) -> Decimal {
        self.weight * Decimal::from(self.quantity)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The shopping cart.
///
/// ## Invariants
/// - Lines are unique by `(product_id, variant_id)`; adding the same
///   product again increases quantity
/// - Quantity must be > 0 (updating to 0 removes the line)
/// - Maximum lines: [`MAX_CART_ITEMS`]; maximum quantity: [`MAX_ITEM_QUANTITY`]
/// - `grand_total == subtotal - discount_total + shipping_total + tax_total`
///   after every recalculation, at 4-decimal precision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub currency: CurrencyCode,
    pub line_items: Vec<LineItem>,

    /// Coupon code the customer entered, if any.
    pub coupon_code: Option<String>,
    pub customer_id: Option<String>,

    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub selected_shipping_method_id: Option<String>,

    /// Computed output: aggregate discount, hard-clamped to the subtotal.
    pub discount_total: Money,
    /// Computed output: `None` until a shipping method is selected.
    pub shipping_total: Option<Money>,
    /// Computed output: order tax including taxable shipping.
    pub tax_total: Money,
    /// Computed output: the one hard global invariant.
    pub grand_total: Money,
    /// Computed output: per-discount amounts and allocations for receipts.
    pub applied_discounts: Vec<DiscountCalculation>,
    /// Computed output: jurisdiction breakdown for receipts/audits.
    pub tax_breakdown: Vec<TaxBreakdown>,

    /// Optimistic concurrency token; bumped by the store on save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new(id: impl Into<String>, currency: CurrencyCode) -> Self {
        let now = Utc::now();
        Cart {
            id: id.into(),
            currency,
            line_items: Vec::new(),
            coupon_code: None,
            customer_id: None,
            shipping_address: None,
            billing_address: None,
            selected_shipping_method_id: None,
            discount_total: Money::zero(currency),
            shipping_total: None,
            tax_total: Money::zero(currency),
            grand_total: Money::zero(currency),
            applied_discounts: Vec::new(),
            tax_breakdown: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subtotal: sum of line totals, independent of discounts.
    pub fn subtotal(&self) -> Money {
        let sum: Decimal = self
            .line_items
            .iter()
            .map(|line| line.line_total().amount())
            .sum();
        Money::new(sum, self.currency)
    }

    /// Total quantity across all lines.
    pub fn total_quantity(&self) -> i64 {
        self.line_items.iter().map(|line| line.quantity).sum()
    }

    /// Number of unique lines.
    pub fn item_count(&self) -> usize {
        self.line_items.len()
    }

    /// Total cart weight for shipping formulas.
    pub fn total_weight(&self) -> Decimal {
        self.line_items.iter().map(|line| line.line_weight()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }

    /// The address tax and shipping zones are resolved against:
    /// shipping address when present, billing address otherwise.
    pub fn destination_address(&self) -> Option<&Address> {
        self.shipping_address
            .as_ref()
            .or(self.billing_address.as_ref())
    }

    /// Adds a line to the cart, merging with an existing line for the same
    /// product/variant pair.
    pub fn add_item(&mut self, item: LineItem) -> CoreResult<()> {
        if let Some(existing) = self.line_items.iter_mut().find(|line| {
            line.product_id == item.product_id && line.variant_id == item.variant_id
        }) {
            let new_qty = existing.quantity + item.quantity;
            if new_qty > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            existing.quantity = new_qty;
            return Ok(());
        }

        if self.line_items.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }
        if item.quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: item.quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        self.line_items.push(item);
        Ok(())
    }

    /// Updates a line's quantity; 0 removes the line.
    pub fn update_quantity(&mut self, line_item_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(line_item_id);
        }
        if quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        match self
            .line_items
            .iter_mut()
            .find(|line| line.id == line_item_id)
        {
            Some(line) => {
                line.quantity = quantity;
                Ok(())
            }
            None => Err(CoreError::LineItemNotFound(line_item_id.to_string())),
        }
    }

    /// Removes a line by id.
    pub fn remove_item(&mut self, line_item_id: &str) -> CoreResult<()> {
        let before = self.line_items.len();
        self.line_items.retain(|line| line.id != line_item_id);

        if self.line_items.len() == before {
            Err(CoreError::LineItemNotFound(line_item_id.to_string()))
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Cart Totals
// =============================================================================

/// Totals summary handed back to the cart collaborator after recalculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub item_count: usize,
    pub total_quantity: i64,
    pub subtotal: Money,
    pub discount_total: Money,
    pub shipping_total: Option<Money>,
    pub tax_total: Money,
    pub grand_total: Money,
}

impl From<&Cart> for CartTotals {
    fn from(cart: &Cart) -> Self {
        CartTotals {
            item_count: cart.item_count(),
            total_quantity: cart.total_quantity(),
            subtotal: cart.subtotal(),
            discount_total: cart.discount_total,
            shipping_total: cart.shipping_total,
            tax_total: cart.tax_total,
            grand_total: cart.grand_total,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
