//! # Shipping Rate Engine
//!
//! Zone resolution and shipping cost calculation.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shipping Calculation                               │
//! │                                                                         │
//! │  match_zone(address) ── first non-default match by sort order,         │
//! │        │                else the default zone                          │
//! │        ▼                                                               │
//! │  for each active method with a rate in the zone:                       │
//! │     eligibility ── weight / order-amount windows (rate AND method)     │
//! │        ▼                                                               │
//! │     cost = formula(calculation_type) + handling fee                    │
//! │     cost = clamp(cost, minimum_cost, maximum_cost)                     │
//! │     free-shipping threshold met? ──► cost = 0                          │
//! │        ▼                                                               │
//! │  options sorted by (method sort order, cost)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one zone applies per address (unlike tax, where jurisdictions
//! stack). Rates carry per-zone overrides of the method's base formula.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::money::{CurrencyCode, Money};
use crate::types::Address;
use crate::zone::GeoRules;

// =============================================================================
// Configuration Types
// =============================================================================

/// A shipping zone described by geographic rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingZone {
    pub id: String,
    pub code: String,
    pub name: String,
    /// Non-default zones are tried in ascending sort order; first match wins.
    pub sort_order: i32,
    /// Fallback when no other zone matches.
    pub is_default: bool,
    pub rules: GeoRules,
}

/// How a shipping method's cost formula works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    /// Fixed cost per shipment.
    FlatRate,
    /// `base + per_unit * total_weight`.
    WeightBased,
    /// `percentage` of the order amount.
    PriceBased,
    /// `per_item * total_quantity`.
    PerItem,
    /// Always zero (marketing "free shipping" tier).
    FreeShipping,
}

/// A shipping method with its base cost formula.
///
/// Formula parameters are all optional; a method only reads the ones its
/// `calculation_type` needs, with absent values treated as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMethod {
    pub id: String,
    pub code: String,
    pub name: String,
    pub calculation_type: CalculationType,
    pub flat_rate: Option<Decimal>,
    pub weight_base_rate: Option<Decimal>,
    pub weight_per_unit_rate: Option<Decimal>,
    pub price_percentage: Option<Decimal>,
    pub per_item_rate: Option<Decimal>,
    pub handling_fee: Option<Decimal>,
    /// Cost floor after the formula and handling fee.
    pub minimum_cost: Option<Decimal>,
    /// Cost ceiling after the formula and handling fee.
    pub maximum_cost: Option<Decimal>,
    /// Order amount at or above which this method costs zero.
    pub free_shipping_threshold: Option<Decimal>,
    pub min_weight: Option<Decimal>,
    pub max_weight: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub max_order_amount: Option<Decimal>,
    pub sort_order: i32,
    pub is_active: bool,
}

impl ShippingMethod {
    fn meets_requirements(&self, order_amount: Decimal, total_weight: Decimal) -> bool {
        within_window(total_weight, self.min_weight, self.max_weight)
            && within_window(order_amount, self.min_order_amount, self.max_order_amount)
    }
}

/// A method's availability and overrides inside one zone.
///
/// A method participates in a zone only through a rate row; rate-level
/// values win over the method's base values where present. Every formula
/// parameter can be overridden per zone, not just the flat rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingRate {
    pub id: String,
    pub shipping_zone_id: String,
    pub shipping_method_id: String,
    pub flat_rate: Option<Decimal>,
    pub weight_base_rate: Option<Decimal>,
    pub weight_per_unit_rate: Option<Decimal>,
    pub price_percentage: Option<Decimal>,
    pub per_item_rate: Option<Decimal>,
    pub handling_fee: Option<Decimal>,
    pub free_shipping_threshold: Option<Decimal>,
    pub min_weight: Option<Decimal>,
    pub max_weight: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub max_order_amount: Option<Decimal>,
    pub is_active: bool,
}

impl ShippingRate {
    fn meets_requirements(&self, order_amount: Decimal, total_weight: Decimal) -> bool {
        within_window(total_weight, self.min_weight, self.max_weight)
            && within_window(order_amount, self.min_order_amount, self.max_order_amount)
    }
}

fn within_window(value: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> bool {
    if let Some(min) = min {
        if value < min {
            return false;
        }
    }
    if let Some(max) = max {
        if value > max {
            return false;
        }
    }
    true
}

// =============================================================================
// Errors
// =============================================================================

/// Why a specific shipping method could not be costed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingError {
    #[error("Shipping method not found: {0}")]
    MethodNotFound(String),

    #[error("Shipping method is inactive: {0}")]
    MethodInactive(String),

    #[error("No shipping zone covers the destination address")]
    NoZoneForAddress,

    #[error("Shipping method {0} is not offered in the destination zone")]
    NoRateForZone(String),

    #[error("Order does not meet the requirements for shipping method {0}")]
    RequirementsNotMet(String),
}

// =============================================================================
// Results
// =============================================================================

/// One method the customer can choose, with its computed cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableShippingMethod {
    pub method_id: String,
    pub code: String,
    pub name: String,
    pub cost: Money,
    /// True when a free-shipping threshold zeroed the cost.
    pub free_shipping_applied: bool,
    /// The threshold in effect, for "spend X more" prompts.
    pub free_shipping_threshold: Option<Decimal>,
}

// =============================================================================
// Zone Matching
// =============================================================================

/// Resolves the single shipping zone for an address.
///
/// Non-default zones are tried in ascending sort order and the FIRST match
/// wins; the default zone is the fallback. `None` means no zone covers the
/// address and no default exists.
pub fn match_zone<'a>(address: &Address, zones: &'a [ShippingZone]) -> Option<&'a ShippingZone> {
    let mut candidates: Vec<&ShippingZone> = zones.iter().filter(|z| !z.is_default).collect();
    candidates.sort_by_key(|z| z.sort_order);

    candidates
        .into_iter()
        .find(|z| z.rules.matches(address))
        .or_else(|| zones.iter().find(|z| z.is_default))
}

// =============================================================================
// Cost Calculation
// =============================================================================

/// Order facts the cost formulas consume.
#[derive(Debug, Clone, Copy)]
pub struct ShippingContext {
    /// Discounted merchandise total.
    pub order_amount: Decimal,
    pub total_weight: Decimal,
    pub total_quantity: i64,
    pub currency: CurrencyCode,
}

/// Lists every method available for the destination, with computed costs.
///
/// A method is offered when it is active, has an active rate in the
/// matched zone, and both the rate's and the method's weight/order-amount
/// windows admit the order. Ineligible methods are silently omitted.
/// Options come back sorted by (method sort order, cost).
pub fn get_shipping_options(
    address: &Address,
    ctx: &ShippingContext,
    zones: &[ShippingZone],
    methods: &[ShippingMethod],
    rates: &[ShippingRate],
) -> Vec<AvailableShippingMethod> {
    let Some(zone) = match_zone(address, zones) else {
        debug!(country = %address.country, "no shipping zone for address");
        return Vec::new();
    };

    let mut options: Vec<(i32, AvailableShippingMethod)> = Vec::new();
    for method in methods.iter().filter(|m| m.is_active) {
        let Some(rate) = rates.iter().find(|r| {
            r.is_active && r.shipping_zone_id == zone.id && r.shipping_method_id == method.id
        }) else {
            continue;
        };
        if !rate.meets_requirements(ctx.order_amount, ctx.total_weight)
            || !method.meets_requirements(ctx.order_amount, ctx.total_weight)
        {
            continue;
        }
        options.push((method.sort_order, cost_method(method, rate, ctx)));
    }

    options.sort_by(|a, b| {
        (a.0, a.1.cost.amount()).cmp(&(b.0, b.1.cost.amount()))
    });
    debug!(zone = %zone.code, options = options.len(), "resolved shipping options");
    options.into_iter().map(|(_, opt)| opt).collect()
}

/// Costs one specific method for the destination, with typed errors for
/// every way it can fail (the selected-method path at checkout, where
/// "silently omitted" is not acceptable).
pub fn calculate_shipping_cost(
    method_id: &str,
    address: &Address,
    ctx: &ShippingContext,
    zones: &[ShippingZone],
    methods: &[ShippingMethod],
    rates: &[ShippingRate],
) -> Result<AvailableShippingMethod, ShippingError> {
    let method = methods
        .iter()
        .find(|m| m.id == method_id)
        .ok_or_else(|| ShippingError::MethodNotFound(method_id.to_string()))?;
    if !method.is_active {
        return Err(ShippingError::MethodInactive(method.code.clone()));
    }

    let zone = match_zone(address, zones).ok_or(ShippingError::NoZoneForAddress)?;
    let rate = rates
        .iter()
        .find(|r| {
            r.is_active && r.shipping_zone_id == zone.id && r.shipping_method_id == method.id
        })
        .ok_or_else(|| ShippingError::NoRateForZone(method.code.clone()))?;

    if !rate.meets_requirements(ctx.order_amount, ctx.total_weight)
        || !method.meets_requirements(ctx.order_amount, ctx.total_weight)
    {
        return Err(ShippingError::RequirementsNotMet(method.code.clone()));
    }

    Ok(cost_method(method, rate, ctx))
}

fn cost_method(
    method: &ShippingMethod,
    rate: &ShippingRate,
    ctx: &ShippingContext,
) -> AvailableShippingMethod {
    // Zone-level rate values win over the method's base values, for
    // every formula parameter.
    let base = match method.calculation_type {
        CalculationType::FlatRate => rate
            .flat_rate
            .or(method.flat_rate)
            .unwrap_or(Decimal::ZERO),
        CalculationType::WeightBased => {
            rate.weight_base_rate
                .or(method.weight_base_rate)
                .unwrap_or(Decimal::ZERO)
                + rate
                    .weight_per_unit_rate
                    .or(method.weight_per_unit_rate)
                    .unwrap_or(Decimal::ZERO)
                    * ctx.total_weight
        }
        CalculationType::PriceBased => {
            ctx.order_amount
                * rate
                    .price_percentage
                    .or(method.price_percentage)
                    .unwrap_or(Decimal::ZERO)
                / Decimal::ONE_HUNDRED
        }
        CalculationType::PerItem => {
            rate.per_item_rate
                .or(method.per_item_rate)
                .unwrap_or(Decimal::ZERO)
                * Decimal::from(ctx.total_quantity)
        }
        CalculationType::FreeShipping => Decimal::ZERO,
    };

    let handling = rate
        .handling_fee
        .or(method.handling_fee)
        .unwrap_or(Decimal::ZERO);
    let mut cost = base + handling;

    if let Some(min) = method.minimum_cost {
        cost = cost.max(min);
    }
    if let Some(max) = method.maximum_cost {
        cost = cost.min(max);
    }

    // Rate-level threshold overrides the method's.
    let threshold = rate.free_shipping_threshold.or(method.free_shipping_threshold);
    let free = matches!(threshold, Some(t) if ctx.order_amount >= t);
    if free {
        cost = Decimal::ZERO;
    }

    AvailableShippingMethod {
        method_id: method.id.clone(),
        code: method.code.clone(),
        name: method.name.clone(),
        cost: Money::new(cost, ctx.currency),
        free_shipping_applied: free,
        free_shipping_threshold: threshold,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
