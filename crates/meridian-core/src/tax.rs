//! # Tax Engine
//!
//! Zone/category resolution and tax calculation with jurisdictional
//! stacking and compounding.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tax Calculation                                  │
//! │                                                                         │
//! │  exempt flag / exemption number? ──► yes ──► zero tax, no lookups      │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  match_zones(address) ── none & no default ──► zero tax (config gap)   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  match_category(tax_class) ── exempt category ──► zero tax             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  rates per (zone, category), active + currently effective,             │
//! │  applied ascending (priority, sort_order):                             │
//! │     non-compound: base = taxable amount                                │
//! │     compound:     base = taxable amount + tax applied so far           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  total rounded once at the end; one TaxBreakdown per applied rate      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multiple zones may legitimately apply at once (country-level VAT plus a
//! city-level surcharge); all matched zones contribute rates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::money::Money;
use crate::types::Address;
use crate::zone::GeoRules;

// =============================================================================
// Configuration Types
// =============================================================================

/// A tax category ("standard", "reduced", "food", ...). Line items carry a
/// tax class code that resolves to one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxCategory {
    pub id: String,
    pub code: String,
    pub name: String,
    /// An exempt category short-circuits the whole calculation.
    pub is_tax_exempt: bool,
    /// Fallback when a tax class code matches nothing.
    pub is_default: bool,
}

/// A tax jurisdiction described by geographic rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxZone {
    pub id: String,
    /// Jurisdiction code, reported as `jurisdiction_type` in breakdowns
    /// ("US-CA", "EU-VAT", ...).
    pub code: String,
    pub name: String,
    /// Zones are tried in descending priority.
    pub priority: i32,
    /// Fallback when no zone matches the address.
    pub is_default: bool,
    pub rules: GeoRules,
}

/// How a tax rate's `rate` field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRateType {
    /// `rate` percent of the base. Invariant: rate in `[0, 100]`.
    Percentage,
    /// A flat amount, independent of the base.
    Flat,
}

/// A tax rate scoped to one zone and one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRate {
    pub id: String,
    pub tax_zone_id: String,
    pub tax_category_id: String,
    /// Jurisdiction label for receipts ("CA State Tax").
    pub name: String,
    pub rate: Decimal,
    pub rate_type: TaxRateType,
    /// Compound rates tax previously-applied tax as well.
    pub is_compound: bool,
    /// Rates apply in ascending (priority, sort_order).
    pub priority: i32,
    pub sort_order: i32,
    /// Whether this rate also applies to shipping cost.
    pub tax_shipping: bool,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl TaxRate {
    /// Whether `now` falls within `[effective_from, effective_to]` (both
    /// ends optional).
    pub fn is_currently_effective(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.effective_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.effective_to {
            if now > to {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Results
// =============================================================================

/// One applied rate, for receipts and audits. The audit collaborator
/// consumes these verbatim; aggregation keys on (type, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub jurisdiction_type: String,
    pub jurisdiction_name: String,
    pub rate: Decimal,
    pub amount: Money,
    pub is_compound: bool,
}

/// Input for one tax calculation (a line item, or an order-level amount).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRequest {
    /// Destination address; `None` degrades to zero tax.
    pub address: Option<Address>,
    pub amount: Money,
    pub tax_class: Option<String>,
    pub is_tax_exempt: bool,
    pub exemption_number: Option<String>,
    pub shipping_amount: Money,
    /// Fold the shipping amount into this request's taxable base.
    pub includes_shipping: bool,
}

/// The outcome of one tax calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxCalculation {
    pub is_exempt: bool,
    pub exempt_amount: Money,
    pub taxable_amount: Money,
    pub tax_amount: Money,
    /// `total_tax / taxable_amount * 100`, 4 decimal places. Reported for
    /// transparency; never used in further arithmetic.
    pub effective_rate: Decimal,
    pub breakdown: Vec<TaxBreakdown>,
}

impl TaxCalculation {
    fn exempt(amount: Money) -> Self {
        TaxCalculation {
            is_exempt: true,
            exempt_amount: amount,
            taxable_amount: Money::zero(amount.currency()),
            tax_amount: Money::zero(amount.currency()),
            effective_rate: Decimal::ZERO,
            breakdown: Vec::new(),
        }
    }

    fn untaxed(taxable: Money) -> Self {
        TaxCalculation {
            is_exempt: false,
            exempt_amount: Money::zero(taxable.currency()),
            taxable_amount: taxable,
            tax_amount: Money::zero(taxable.currency()),
            effective_rate: Decimal::ZERO,
            breakdown: Vec::new(),
        }
    }
}

// =============================================================================
// Zone / Category Matching
// =============================================================================

/// Resolves every tax zone covering an address.
///
/// Zones are tried in descending priority and ALL matches are returned —
/// a country-level VAT zone and a city-level surcharge zone can both
/// apply. When nothing matches, the single zone flagged `is_default` is
/// the fallback (configuration gap ⇒ empty result, not an error).
pub fn match_zones<'a>(address: &Address, zones: &'a [TaxZone]) -> Vec<&'a TaxZone> {
    let mut candidates: Vec<&TaxZone> = zones.iter().filter(|z| !z.is_default).collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    let matched: Vec<&TaxZone> = candidates
        .into_iter()
        .filter(|z| z.rules.matches(address))
        .collect();
    if !matched.is_empty() {
        return matched;
    }

    zones.iter().filter(|z| z.is_default).take(1).collect()
}

/// Resolves a tax class code to a category: exact code match, else the
/// category flagged `is_default`.
pub fn match_category<'a>(
    tax_class: Option<&str>,
    categories: &'a [TaxCategory],
) -> Option<&'a TaxCategory> {
    if let Some(code) = tax_class {
        if let Some(cat) = categories.iter().find(|c| c.code == code) {
            return Some(cat);
        }
    }
    categories.iter().find(|c| c.is_default)
}

// =============================================================================
// Tax Calculation
// =============================================================================

/// Computes tax for one request against the configured zones, categories,
/// and rates.
///
/// Configuration gaps (no matching zone, no rates) degrade to zero tax —
/// an incompletely configured store must not block checkout.
pub fn calculate_tax(
    request: &TaxRequest,
    zones: &[TaxZone],
    categories: &[TaxCategory],
    rates: &[TaxRate],
    now: DateTime<Utc>,
) -> TaxCalculation {
    let currency = request.amount.currency();

    // Exemption short-circuits before any zone/rate lookup.
    if request.is_tax_exempt || request.exemption_number.is_some() {
        return TaxCalculation::exempt(request.amount);
    }

    let Some(address) = request.address.as_ref() else {
        return TaxCalculation::untaxed(request.amount);
    };

    let matched_zones = match_zones(address, zones);
    if matched_zones.is_empty() {
        return TaxCalculation::untaxed(request.amount);
    }

    let category = match match_category(request.tax_class.as_deref(), categories) {
        Some(cat) if cat.is_tax_exempt => return TaxCalculation::exempt(request.amount),
        Some(cat) => cat,
        None => return TaxCalculation::untaxed(request.amount),
    };

    let mut taxable = request.amount.amount();
    if request.includes_shipping {
        taxable += request.shipping_amount.amount();
    }
    let taxable_money = Money::new(taxable, currency);

    // Collect applicable rates across all matched zones, then order them
    // globally: ascending priority, then sort order.
    let mut applicable: Vec<(&TaxZone, &TaxRate)> = Vec::new();
    for &zone in &matched_zones {
        for rate in rates.iter().filter(|r| {
            r.is_active
                && r.tax_zone_id == zone.id
                && r.tax_category_id == category.id
                && r.is_currently_effective(now)
        }) {
            applicable.push((zone, rate));
        }
    }
    applicable.sort_by(|a, b| {
        (a.1.priority, a.1.sort_order).cmp(&(b.1.priority, b.1.sort_order))
    });

    let mut total_tax = Decimal::ZERO;
    let mut breakdown = Vec::with_capacity(applicable.len());
    for (zone, rate) in applicable {
        // A compound rate taxes the running total of tax applied so far;
        // non-compound rates always see the original taxable base.
        let base = if rate.is_compound {
            taxable + total_tax
        } else {
            taxable
        };
        let tax = match rate.rate_type {
            TaxRateType::Percentage => base * rate.rate / Decimal::ONE_HUNDRED,
            TaxRateType::Flat => rate.rate,
        };
        total_tax += tax;

        breakdown.push(TaxBreakdown {
            jurisdiction_type: zone.code.clone(),
            jurisdiction_name: rate.name.clone(),
            rate: rate.rate,
            amount: Money::new(tax, currency),
            is_compound: rate.is_compound,
        });
    }

    // Round once at the end, not per rate.
    let tax_amount = Money::new(total_tax, currency);
    let effective_rate = if taxable.is_zero() {
        Decimal::ZERO
    } else {
        (total_tax / taxable * Decimal::ONE_HUNDRED).round_dp(4)
    };

    debug!(
        taxable = %taxable_money,
        tax = %tax_amount,
        rates = breakdown.len(),
        "calculated tax"
    );

    TaxCalculation {
        is_exempt: false,
        exempt_amount: Money::zero(currency),
        taxable_amount: taxable_money,
        tax_amount,
        effective_rate,
        breakdown,
    }
}

// =============================================================================
// Order-Level Aggregation
// =============================================================================

/// Order totals with per-line detail preserved for receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTaxCalculation {
    pub taxable_amount: Money,
    pub tax_amount: Money,
    pub exempt_amount: Money,
    /// Shipping tax, computed independently of the item compounding chain.
    pub shipping_tax_amount: Money,
    /// Per-line results, aligned with the input order.
    pub line_taxes: Vec<TaxCalculation>,
    /// Jurisdiction breakdown aggregated by (type, name) across lines.
    pub breakdown: Vec<TaxBreakdown>,
}

/// Runs the per-line calculation for every taxable line and aggregates.
///
/// Jurisdiction breakdowns from different lines merge by
/// `(jurisdiction_type, jurisdiction_name)` with amounts summed. If any
/// matching zone carries shipping-taxable rates, shipping tax is computed
/// over the FULL shipping amount, outside the item compounding chain.
pub fn calculate_order_tax(
    line_requests: &[TaxRequest],
    shipping_amount: Option<&Money>,
    shipping_address: Option<&Address>,
    zones: &[TaxZone],
    categories: &[TaxCategory],
    rates: &[TaxRate],
    now: DateTime<Utc>,
    currency: crate::money::CurrencyCode,
) -> OrderTaxCalculation {
    let mut taxable = Decimal::ZERO;
    let mut tax = Decimal::ZERO;
    let mut exempt = Decimal::ZERO;
    let mut line_taxes = Vec::with_capacity(line_requests.len());
    let mut breakdown: Vec<TaxBreakdown> = Vec::new();

    for request in line_requests {
        let calc = calculate_tax(request, zones, categories, rates, now);
        taxable += calc.taxable_amount.amount();
        tax += calc.tax_amount.amount();
        exempt += calc.exempt_amount.amount();
        for entry in &calc.breakdown {
            merge_breakdown(&mut breakdown, entry);
        }
        line_taxes.push(calc);
    }

    // Shipping tax: full shipping amount against every matching zone's
    // shipping-taxable rates, never compounded with item tax.
    let mut shipping_tax = Decimal::ZERO;
    if let (Some(shipping), Some(address)) = (shipping_amount, shipping_address) {
        if shipping.is_positive() {
            let mut seen: Vec<&str> = Vec::new();
            for zone in match_zones(address, zones) {
                for rate in rates.iter().filter(|r| {
                    r.is_active
                        && r.tax_shipping
                        && r.tax_zone_id == zone.id
                        && r.is_currently_effective(now)
                }) {
                    if seen.contains(&rate.id.as_str()) {
                        continue;
                    }
                    seen.push(&rate.id);

                    let amount = match rate.rate_type {
                        TaxRateType::Percentage => {
                            shipping.amount() * rate.rate / Decimal::ONE_HUNDRED
                        }
                        TaxRateType::Flat => rate.rate,
                    };
                    shipping_tax += amount;
                    merge_breakdown(
                        &mut breakdown,
                        &TaxBreakdown {
                            jurisdiction_type: zone.code.clone(),
                            jurisdiction_name: rate.name.clone(),
                            rate: rate.rate,
                            amount: Money::new(amount, currency),
                            is_compound: false,
                        },
                    );
                }
            }
        }
    }

    OrderTaxCalculation {
        taxable_amount: Money::new(taxable, currency),
        tax_amount: Money::new(tax + shipping_tax, currency),
        exempt_amount: Money::new(exempt, currency),
        shipping_tax_amount: Money::new(shipping_tax, currency),
        line_taxes,
        breakdown,
    }
}

fn merge_breakdown(breakdown: &mut Vec<TaxBreakdown>, entry: &TaxBreakdown) {
    if let Some(existing) = breakdown.iter_mut().find(|b| {
        b.jurisdiction_type == entry.jurisdiction_type
            && b.jurisdiction_name == entry.jurisdiction_name
    }) {
        existing.amount = Money::new(
            existing.amount.amount() + entry.amount.amount(),
            existing.amount.currency(),
        );
    } else {
        breakdown.push(entry.clone());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use crate::money::CurrencyCode;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn ca_address() -> Address {
        Address {
            country: "US".to_string(),
            state: "CA".to_string(),
            city: "Los Angeles".to_string(),
            postal_code: "90210".to_string(),
        }
    }

    fn zone(id: &str, priority: i32, is_default: bool, states: Vec<&str>) -> TaxZone {
        TaxZone {
            id: id.to_string(),
            code: format!("ZONE-{}", id),
            name: format!("Zone {}", id),
            priority,
            is_default,
            rules: GeoRules {
                states: states.into_iter().map(String::from).collect(),
                ..Default::default()
            },
        }
    }

    fn standard_category() -> TaxCategory {
        TaxCategory {
            id: "cat-std".to_string(),
            code: "standard".to_string(),
            name: "Standard".to_string(),
            is_tax_exempt: false,
            is_default: true,
        }
    }

    fn rate(id: &str, zone_id: &str, pct: Decimal, compound: bool, priority: i32) -> TaxRate {
        TaxRate {
            id: id.to_string(),
            tax_zone_id: zone_id.to_string(),
            tax_category_id: "cat-std".to_string(),
            name: format!("Rate {}", id),
            rate: pct,
            rate_type: TaxRateType::Percentage,
            is_compound: compound,
            priority,
            sort_order: 0,
            tax_shipping: false,
            effective_from: None,
            effective_to: None,
            is_active: true,
        }
    }

    fn request(amount: Decimal) -> TaxRequest {
        TaxRequest {
            address: Some(ca_address()),
            amount: Money::new(amount, usd()),
            tax_class: None,
            is_tax_exempt: false,
            exemption_number: None,
            shipping_amount: Money::zero(usd()),
            includes_shipping: false,
        }
    }

    // ==================== Matching ====================

    #[test]
    fn test_match_zones_returns_all_matches_desc_priority() {
        let zones = vec![
            zone("state", 10, false, vec!["CA"]),
            zone("country", 1, false, vec![]),
            zone("other", 5, false, vec!["NY"]),
        ];
        let matched = match_zones(&ca_address(), &zones);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].id, "state"); // higher priority first
        assert_eq!(matched[1].id, "country");
    }

    #[test]
    fn test_match_zones_falls_back_to_default() {
        let zones = vec![zone("ny", 10, false, vec!["NY"]), zone("dflt", 0, true, vec![])];
        let matched = match_zones(&ca_address(), &zones);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "dflt");
    }

    #[test]
    fn test_match_category_exact_then_default() {
        let categories = vec![
            standard_category(),
            TaxCategory {
                id: "cat-food".to_string(),
                code: "food".to_string(),
                name: "Food".to_string(),
                is_tax_exempt: false,
                is_default: false,
            },
        ];
        assert_eq!(match_category(Some("food"), &categories).unwrap().id, "cat-food");
        assert_eq!(match_category(Some("nope"), &categories).unwrap().id, "cat-std");
        assert_eq!(match_category(None, &categories).unwrap().id, "cat-std");
    }

    // ==================== Core Algorithm ====================

    #[test]
    fn test_compounding_matches_worked_example() {
        // $100, 10% non-compound = $10; 5% compound on $110 = $5.50.
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![
            rate("a", "z", dec!(10), false, 1),
            rate("b", "z", dec!(5), true, 2),
        ];

        let calc = calculate_tax(&request(dec!(100)), &zones, &categories, &rates, Utc::now());
        assert_eq!(calc.tax_amount.amount(), dec!(15.50));
        assert_eq!(calc.effective_rate, dec!(15.5000));
        assert_eq!(calc.breakdown.len(), 2);
        assert_eq!(calc.breakdown[0].amount.amount(), dec!(10));
        assert_eq!(calc.breakdown[1].amount.amount(), dec!(5.50));
        assert!(calc.breakdown[1].is_compound);
    }

    #[test]
    fn test_rates_apply_in_ascending_priority() {
        // The compound 5% must see the 10% applied first even if listed
        // in the other order.
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![
            rate("b", "z", dec!(5), true, 2),
            rate("a", "z", dec!(10), false, 1),
        ];

        let calc = calculate_tax(&request(dec!(100)), &zones, &categories, &rates, Utc::now());
        assert_eq!(calc.tax_amount.amount(), dec!(15.50));
    }

    #[test]
    fn test_exempt_flag_short_circuits() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![rate("a", "z", dec!(10), false, 1)];

        let mut req = request(dec!(100));
        req.is_tax_exempt = true;
        let calc = calculate_tax(&req, &zones, &categories, &rates, Utc::now());
        assert!(calc.is_exempt);
        assert_eq!(calc.exempt_amount.amount(), dec!(100));
        assert!(calc.tax_amount.is_zero());
        assert!(calc.breakdown.is_empty());
    }

    #[test]
    fn test_exemption_number_short_circuits() {
        let mut req = request(dec!(100));
        req.exemption_number = Some("EX-12345".to_string());
        let calc = calculate_tax(&req, &[], &[], &[], Utc::now());
        assert!(calc.is_exempt);
    }

    #[test]
    fn test_exempt_category_short_circuits() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![TaxCategory {
            id: "cat-ex".to_string(),
            code: "exempt".to_string(),
            name: "Exempt".to_string(),
            is_tax_exempt: true,
            is_default: true,
        }];
        let rates = vec![rate("a", "z", dec!(10), false, 1)];

        let calc = calculate_tax(&request(dec!(100)), &zones, &categories, &rates, Utc::now());
        assert!(calc.is_exempt);
        assert!(calc.tax_amount.is_zero());
    }

    #[test]
    fn test_no_zone_and_no_default_is_config_gap_not_error() {
        let zones = vec![zone("ny", 1, false, vec!["NY"])];
        let calc = calculate_tax(
            &request(dec!(100)),
            &zones,
            &[standard_category()],
            &[],
            Utc::now(),
        );
        assert!(!calc.is_exempt);
        assert!(calc.tax_amount.is_zero());
        assert_eq!(calc.taxable_amount.amount(), dec!(100));
    }

    #[test]
    fn test_effectivity_window_filters_rates() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let now = Utc::now();

        let mut stale = rate("a", "z", dec!(10), false, 1);
        stale.effective_to = Some(now - Duration::days(1));
        let mut future = rate("b", "z", dec!(20), false, 2);
        future.effective_from = Some(now + Duration::days(1));
        let live = rate("c", "z", dec!(5), false, 3);

        let calc = calculate_tax(&request(dec!(100)), &zones, &categories, &[stale, future, live], now);
        assert_eq!(calc.tax_amount.amount(), dec!(5));
        assert_eq!(calc.breakdown.len(), 1);
    }

    #[test]
    fn test_flat_rate() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let mut flat = rate("a", "z", dec!(2.50), false, 1);
        flat.rate_type = TaxRateType::Flat;

        let calc = calculate_tax(&request(dec!(100)), &zones, &categories, &[flat], Utc::now());
        assert_eq!(calc.tax_amount.amount(), dec!(2.50));
    }

    #[test]
    fn test_includes_shipping_extends_taxable_base() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![rate("a", "z", dec!(10), false, 1)];

        let mut req = request(dec!(100));
        req.shipping_amount = Money::new(dec!(10), usd());
        req.includes_shipping = true;

        let calc = calculate_tax(&req, &zones, &categories, &rates, Utc::now());
        assert_eq!(calc.taxable_amount.amount(), dec!(110));
        assert_eq!(calc.tax_amount.amount(), dec!(11));
    }

    // ==================== Order Aggregation ====================

    #[test]
    fn test_order_tax_aggregates_breakdown_by_jurisdiction() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![rate("a", "z", dec!(10), false, 1)];

        let lines = vec![request(dec!(60)), request(dec!(40))];
        let order = calculate_order_tax(
            &lines, None, None, &zones, &categories, &rates, Utc::now(), usd(),
        );

        assert_eq!(order.taxable_amount.amount(), dec!(100));
        assert_eq!(order.tax_amount.amount(), dec!(10));
        // Two lines, one jurisdiction entry with summed amount.
        assert_eq!(order.breakdown.len(), 1);
        assert_eq!(order.breakdown[0].amount.amount(), dec!(10));
        assert_eq!(order.line_taxes.len(), 2);
    }

    #[test]
    fn test_shipping_tax_is_separate_from_item_compounding() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let mut shippable = rate("a", "z", dec!(10), false, 1);
        shippable.tax_shipping = true;
        // Compound rate on items must NOT compound over shipping tax.
        let compound = rate("b", "z", dec!(5), true, 2);

        let shipping = Money::new(dec!(20), usd());
        let order = calculate_order_tax(
            &[request(dec!(100))],
            Some(&shipping),
            Some(&ca_address()),
            &zones,
            &categories,
            &[shippable, compound],
            Utc::now(),
            usd(),
        );

        // Items: 10% of 100 = 10, then 5% compound of 110 = 5.50 -> 15.50
        // Shipping: 10% of 20 = 2.00, flat on the full shipping amount.
        assert_eq!(order.shipping_tax_amount.amount(), dec!(2));
        assert_eq!(order.tax_amount.amount(), dec!(17.50));
    }

    #[test]
    fn test_order_tax_with_exempt_line() {
        let zones = vec![zone("z", 1, false, vec!["CA"])];
        let categories = vec![standard_category()];
        let rates = vec![rate("a", "z", dec!(10), false, 1)];

        let mut exempt_line = request(dec!(50));
        exempt_line.is_tax_exempt = true;

        let order = calculate_order_tax(
            &[request(dec!(100)), exempt_line],
            None,
            None,
            &zones,
            &categories,
            &rates,
            Utc::now(),
            usd(),
        );
        assert_eq!(order.tax_amount.amount(), dec!(10));
        assert_eq!(order.exempt_amount.amount(), dec!(50));
    }
}
