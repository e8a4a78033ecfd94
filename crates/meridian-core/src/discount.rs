//! # Discount Engine
//!
//! Evaluates coupon and automatic discounts against a cart, producing a
//! total discount and a per-line allocation for every applied discount.
//!
//! ## Evaluation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Discount Evaluation                                │
//! │                                                                         │
//! │  Coupon code ──► validate_coupon() ── first failure wins ──► rejection │
//! │                       │ ok                                              │
//! │                       ▼                                                 │
//! │  calculate_discount() ── dispatch on DiscountType:                     │
//! │      Percentage  ── uniform value% over (restricted) lines             │
//! │      FixedAmount ── min(value, applicable subtotal), proportional      │
//! │      FreeShipping── amount = current shipping total (two-phase)        │
//! │      BuyXGetY    ── cheapest eligible units go free                    │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  calculate_cart_discounts() ── automatic + coupon, aggregate           │
//! │                                hard-clamped to the subtotal            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - For every discount, `Σ line_allocations == amount` exactly; rounding
//!   remainders are reconciled onto the last allocated line
//! - `total_discount <= subtotal` (hard clamp on the aggregate)
//! - Calculation is pure: no usage counters move here. Usage is recorded
//!   by the checkout collaborator after order creation succeeds.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::CoreResult;
use crate::money::{round_amount, CurrencyCode, Money};
use crate::types::{Cart, LineItem};

// =============================================================================
// Configuration Types
// =============================================================================

/// How a discount's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `value` percent off the (restricted) subtotal.
    Percentage,
    /// `value` off, capped at the applicable subtotal.
    FixedAmount,
    /// The cart's shipping cost, once shipping is known.
    FreeShipping,
    /// Buy `minimum_quantity`, get `maximum_quantity` free (cheapest units).
    BuyXGetY,
}

/// Whether a discount targets the whole cart or individual items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountScope {
    Cart,
    Item,
}

/// A configured discount, owned by the admin collaborator and read-only
/// during calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    /// Present for coupon discounts; `None` for automatic ones.
    pub code: Option<String>,
    pub name: String,
    pub discount_type: DiscountType,
    /// Percentage in `[0,100]` or a fixed amount, per `discount_type`.
    pub value: Decimal,
    pub scope: DiscountScope,
    /// Empty set = applies to every product.
    pub applicable_product_ids: HashSet<String>,
    /// Empty set = applies to every category.
    pub applicable_category_ids: HashSet<String>,
    pub minimum_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_usage_limit: Option<i64>,
    pub usage_count: i64,
    pub per_customer_limit: Option<i64>,
    /// BuyXGetY: the buy quantity. Defaults to 1 when unset.
    pub minimum_quantity: Option<i64>,
    /// BuyXGetY: the get quantity. Defaults to 1 when unset.
    pub maximum_quantity: Option<i64>,
    pub is_active: bool,
}

impl Discount {
    /// True when either restriction set is non-empty.
    pub fn restricts_products(&self) -> bool {
        !self.applicable_product_ids.is_empty() || !self.applicable_category_ids.is_empty()
    }

    /// Whether a line item falls under this discount's restrictions.
    /// Unrestricted discounts match every line.
    pub fn line_matches(&self, line: &LineItem) -> bool {
        if !self.restricts_products() {
            return true;
        }
        if self.applicable_product_ids.contains(&line.product_id) {
            return true;
        }
        line.category_ids
            .iter()
            .any(|cat| self.applicable_category_ids.contains(cat))
    }

    /// Whether `now` falls within the discount's date window.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if now > end {
                return false;
            }
        }
        true
    }

    fn usage_exhausted(&self) -> bool {
        matches!(self.total_usage_limit, Some(limit) if self.usage_count >= limit)
    }
}

// =============================================================================
// Coupon Rejection
// =============================================================================

/// Why a coupon could not be applied. Surfaced verbatim to the end user;
/// serialized as the stable rejection codes the storefront displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    /// Code not found.
    #[error("coupon code is not valid")]
    InvalidCode,
    /// Discount is deactivated.
    #[error("coupon is not active")]
    Inactive,
    /// Before the discount's start date.
    #[error("coupon is not active yet")]
    NotStarted,
    /// Past the discount's end date.
    #[error("coupon has expired")]
    Expired,
    /// Total usage limit exhausted.
    #[error("coupon usage limit has been reached")]
    UsageLimitReached,
    /// This customer has used the coupon too many times.
    #[error("coupon usage limit for this customer has been reached")]
    CustomerUsageLimit,
    /// Cart subtotal below the minimum order amount.
    #[error("cart does not meet the minimum order amount")]
    MinimumNotMet,
    /// No line item matches the discount's product/category restrictions.
    #[error("coupon does not apply to any item in the cart")]
    NotApplicable,
}

// =============================================================================
// Calculation Results
// =============================================================================

/// The portion of one discount attributed to one line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDiscountAllocation {
    pub line_item_id: String,
    pub amount: Money,
}

/// One applied discount: its total amount and how it spreads over lines.
///
/// The audit collaborator consumes this verbatim for receipts and partial
/// refunds; aggregation must not lose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountCalculation {
    pub discount_id: String,
    pub code: Option<String>,
    pub name: String,
    pub discount_type: DiscountType,
    pub amount: Money,
    pub line_allocations: Vec<LineDiscountAllocation>,
}

/// The cart-level aggregation of every applied discount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartDiscountCalculation {
    pub subtotal: Money,
    pub applied_discounts: Vec<DiscountCalculation>,
    /// Hard-clamped: never exceeds the subtotal.
    pub total_discount: Money,
}

// =============================================================================
// Coupon Validation
// =============================================================================

/// Validates a coupon discount against a cart. Sequential checks, first
/// failure wins.
///
/// `InvalidCode` is produced by the lookup layer (a missing code never
/// reaches this function). `customer_usage_count` comes from the
/// usage-tracking collaborator; pass 0 for anonymous customers.
pub fn validate_coupon(
    discount: &Discount,
    cart: &Cart,
    customer_usage_count: i64,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !discount.is_active {
        return Err(CouponRejection::Inactive);
    }
    if let Some(start) = discount.start_date {
        if now < start {
            return Err(CouponRejection::NotStarted);
        }
    }
    if let Some(end) = discount.end_date {
        if now > end {
            return Err(CouponRejection::Expired);
        }
    }
    if discount.usage_exhausted() {
        return Err(CouponRejection::UsageLimitReached);
    }
    if let Some(limit) = discount.per_customer_limit {
        if customer_usage_count >= limit {
            return Err(CouponRejection::CustomerUsageLimit);
        }
    }
    if let Some(minimum) = discount.minimum_order_amount {
        if cart.subtotal().amount() < minimum {
            return Err(CouponRejection::MinimumNotMet);
        }
    }
    if discount.restricts_products() && !cart.line_items.iter().any(|l| discount.line_matches(l)) {
        return Err(CouponRejection::NotApplicable);
    }
    Ok(())
}

// =============================================================================
// Single-Discount Calculation
// =============================================================================

/// Computes one discount's amount and per-line allocations.
///
/// Returns `Ok(None)` when the discount yields nothing for this cart:
/// no eligible lines, a zero amount, or a `FreeShipping` discount evaluated
/// before shipping is known (`shipping_total == None`) — the orchestrator
/// re-runs the engine once shipping is finalized.
pub fn calculate_discount(
    discount: &Discount,
    cart: &Cart,
    shipping_total: Option<&Money>,
) -> CoreResult<Option<DiscountCalculation>> {
    let currency = cart.currency;

    let computed = match discount.discount_type {
        DiscountType::Percentage => percentage_discount(discount, cart, currency),
        DiscountType::FixedAmount => fixed_amount_discount(discount, cart, currency),
        DiscountType::FreeShipping => free_shipping_discount(shipping_total),
        DiscountType::BuyXGetY => buy_x_get_y_discount(discount, cart, currency)?,
    };

    let Some((amount, allocations)) = computed else {
        return Ok(None);
    };
    if !amount.is_positive() {
        return Ok(None);
    }

    let (amount, allocations) = clamp_to_max(amount, allocations, discount.max_discount_amount);

    Ok(Some(DiscountCalculation {
        discount_id: discount.id.clone(),
        code: discount.code.clone(),
        name: discount.name.clone(),
        discount_type: discount.discount_type,
        amount,
        line_allocations: allocations,
    }))
}

type RawCalculation = Option<(Money, Vec<LineDiscountAllocation>)>;

/// Percentage: the same `value/100` factor applies to the aggregate and to
/// every (restricted) line, so allocations are proportional by definition.
fn percentage_discount(discount: &Discount, cart: &Cart, currency: CurrencyCode) -> RawCalculation {
    let lines: Vec<&LineItem> = cart
        .line_items
        .iter()
        .filter(|l| discount.line_matches(l))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let applicable_subtotal: Decimal = lines.iter().map(|l| l.line_total().amount()).sum();
    let target = applicable_subtotal * discount.value / Decimal::ONE_HUNDRED;
    Some(allocate_proportionally(target, &lines, currency))
}

/// FixedAmount: `min(value, applicable subtotal)`, spread over the
/// applicable lines in proportion to their line totals.
fn fixed_amount_discount(
    discount: &Discount,
    cart: &Cart,
    currency: CurrencyCode,
) -> RawCalculation {
    let lines: Vec<&LineItem> = cart
        .line_items
        .iter()
        .filter(|l| discount.line_matches(l))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let applicable_subtotal: Decimal = lines.iter().map(|l| l.line_total().amount()).sum();
    let target = discount.value.min(applicable_subtotal);
    Some(allocate_proportionally(target, &lines, currency))
}

/// FreeShipping: worth the cart's current shipping total. Deferred (None)
/// until the orchestrator has finalized shipping.
fn free_shipping_discount(shipping_total: Option<&Money>) -> RawCalculation {
    shipping_total
        .filter(|s| s.is_positive())
        .map(|s| (*s, Vec::new()))
}

/// BuyXGetY: the cheapest eligible units are the ones given away. This is
/// the customer-favoring tie-break and must be preserved exactly.
fn buy_x_get_y_discount(
    discount: &Discount,
    cart: &Cart,
    currency: CurrencyCode,
) -> CoreResult<RawCalculation> {
    let buy_qty = discount.minimum_quantity.unwrap_or(1).max(1);
    let get_qty = discount.maximum_quantity.unwrap_or(1).max(1);

    // Eligible lines, cheapest unit price first.
    let mut lines: Vec<&LineItem> = cart
        .line_items
        .iter()
        .filter(|l| discount.line_matches(l))
        .collect();
    if lines.is_empty() {
        return Ok(None);
    }
    lines.sort_by(|a, b| a.unit_price.amount().cmp(&b.unit_price.amount()));

    let total_eligible_qty: i64 = lines.iter().map(|l| l.quantity).sum();
    let sets_eligible = total_eligible_qty / (buy_qty + get_qty);
    let mut remaining_free = sets_eligible * get_qty;
    if remaining_free == 0 {
        return Ok(None);
    }

    let mut allocations = Vec::new();
    let mut amount = Money::zero(currency);
    for line in lines {
        if remaining_free == 0 {
            break;
        }
        let freed = line.quantity.min(remaining_free);
        remaining_free -= freed;

        let line_amount = line.unit_price.mul_quantity(freed);
        amount = amount.try_add(&line_amount)?;
        allocations.push(LineDiscountAllocation {
            line_item_id: line.id.clone(),
            amount: line_amount,
        });
    }

    Ok(Some((amount, allocations)))
}

// =============================================================================
// Cart-Level Aggregation
// =============================================================================

/// Evaluates every currently-applicable automatic discount plus the
/// (already validated) coupon discount, and aggregates the results.
///
/// The aggregate is hard-clamped to the subtotal; per-discount amounts and
/// allocations are left untouched by this clamp.
pub fn calculate_cart_discounts(
    cart: &Cart,
    automatic: &[Discount],
    coupon: Option<&Discount>,
    shipping_total: Option<&Money>,
    now: DateTime<Utc>,
) -> CoreResult<CartDiscountCalculation> {
    let subtotal = cart.subtotal();
    let mut applied = Vec::new();

    for discount in automatic {
        if !automatic_discount_applies(discount, cart, now) {
            continue;
        }
        if let Some(calc) = calculate_discount(discount, cart, shipping_total)? {
            applied.push(calc);
        }
    }

    if let Some(discount) = coupon {
        if let Some(calc) = calculate_discount(discount, cart, shipping_total)? {
            applied.push(calc);
        }
    }

    let raw_total: Decimal = applied.iter().map(|c| c.amount.amount()).sum();
    let total_discount = Money::new(raw_total.min(subtotal.amount()), cart.currency);

    debug!(
        cart_id = %cart.id,
        applied = applied.len(),
        total = %total_discount,
        "calculated cart discounts"
    );

    Ok(CartDiscountCalculation {
        subtotal,
        applied_discounts: applied,
        total_discount,
    })
}

/// Applicability checks for automatic (non-coupon) discounts. Coupon-only
/// checks — per-customer usage, which needs a collaborator lookup — are
/// skipped here.
fn automatic_discount_applies(discount: &Discount, cart: &Cart, now: DateTime<Utc>) -> bool {
    if !discount.is_active || discount.code.is_some() {
        return false;
    }
    if !discount.is_within_window(now) {
        return false;
    }
    if discount.usage_exhausted() {
        return false;
    }
    if let Some(minimum) = discount.minimum_order_amount {
        if cart.subtotal().amount() < minimum {
            return false;
        }
    }
    if discount.restricts_products() && !cart.line_items.iter().any(|l| discount.line_matches(l)) {
        return false;
    }
    true
}

// =============================================================================
// Allocation Helpers
// =============================================================================

/// Distributes `target` (an unrounded decimal) over `lines` in proportion
/// to their line totals. Each share is computed at full precision and then
/// rounded; any residue against the rounded aggregate lands on the last
/// allocated line so the sums reconcile exactly.
fn allocate_proportionally(
    target: Decimal,
    lines: &[&LineItem],
    currency: CurrencyCode,
) -> (Money, Vec<LineDiscountAllocation>) {
    let amount = Money::new(target, currency);
    let weight_sum: Decimal = lines.iter().map(|l| l.line_total().amount()).sum();
    if weight_sum.is_zero() {
        return (Money::zero(currency), Vec::new());
    }

    let mut allocations: Vec<LineDiscountAllocation> = lines
        .iter()
        .map(|line| {
            let share = target * line.line_total().amount() / weight_sum;
            LineDiscountAllocation {
                line_item_id: line.id.clone(),
                amount: Money::new(share, currency),
            }
        })
        .collect();

    reconcile_remainder(amount, &mut allocations, currency);
    (amount, allocations)
}

/// Caps the discount at `max_discount_amount`, re-scaling every allocation
/// by `clamped / raw` so the allocation-sum invariant survives the clamp.
fn clamp_to_max(
    amount: Money,
    mut allocations: Vec<LineDiscountAllocation>,
    max_discount_amount: Option<Decimal>,
) -> (Money, Vec<LineDiscountAllocation>) {
    let Some(max) = max_discount_amount else {
        return (amount, allocations);
    };
    if amount.amount() <= max {
        return (amount, allocations);
    }

    let currency = amount.currency();
    let scale = max / amount.amount();
    for alloc in &mut allocations {
        alloc.amount = Money::new(alloc.amount.amount() * scale, currency);
    }

    let clamped = Money::new(max, currency);
    reconcile_remainder(clamped, &mut allocations, currency);
    (clamped, allocations)
}

/// Pushes any rounding residue onto the last allocation so that
/// `Σ allocations == amount` exactly.
fn reconcile_remainder(
    amount: Money,
    allocations: &mut [LineDiscountAllocation],
    currency: CurrencyCode,
) {
    let sum: Decimal = allocations.iter().map(|a| a.amount.amount()).sum();
    let residue = round_amount(amount.amount() - sum);
    if residue.is_zero() {
        return;
    }
    if let Some(last) = allocations.last_mut() {
        last.amount = Money::new(last.amount.amount() + residue, currency);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
