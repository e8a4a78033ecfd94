//! # Validation Module
//!
//! Input validation for configuration entities and cart operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Storefront / admin surface                                   │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Business rule validation before the engines run                   │
//! │  └── Configuration sanity (percentages, windows, formulas)             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: The engines themselves                                       │
//! │  └── Currency mismatch and arithmetic preconditions                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use meridian_core::validation::{validate_quantity, validate_currency_code};
//!
//! validate_quantity(5).unwrap();
//! validate_currency_code("USD").unwrap();
//! ```

use rust_decimal::Decimal;

use crate::discount::{Discount, DiscountType};
use crate::error::ValidationError;
use crate::tax::{TaxRate, TaxRateType};
use crate::types::{Cart, LineItem};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Scalar Validators
// =============================================================================

/// Validates an item quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed `MAX_ITEM_QUANTITY`
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(1_000).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a percentage value is within `[0, 100]`.
pub fn validate_percentage(field: &str, value: Decimal) -> ValidationResult<()> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::InvalidPercentage {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validates a currency code: exactly three ASCII letters.
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_currency_code;
///
/// assert!(validate_currency_code("USD").is_ok());
/// assert!(validate_currency_code("usd").is_ok());
/// assert!(validate_currency_code("US").is_err());
/// assert!(validate_currency_code("U$D").is_err());
/// ```
pub fn validate_currency_code(code: &str) -> ValidationResult<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "must be a three-letter ISO 4217 code".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

/// Validates a line item before it enters a cart.
///
/// ## Rules
/// - Name must not be empty
/// - Quantity within `[1, MAX_ITEM_QUANTITY]`
/// - Unit price and weight must not be negative
/// - Accumulated discount must not exceed the line total
pub fn validate_line_item(line: &LineItem) -> ValidationResult<()> {
    if line.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    validate_quantity(line.quantity)?;

    if line.unit_price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    if line.weight < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: "weight".to_string(),
        });
    }

    if line.discount_amount.amount() > line.line_total().amount() {
        return Err(ValidationError::Inconsistent {
            field: "discount_amount".to_string(),
            reason: "exceeds the line total".to_string(),
        });
    }

    Ok(())
}

/// Validates a cart's size limit.
pub fn validate_cart_size(cart: &Cart) -> ValidationResult<()> {
    if cart.line_items.len() > MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "line_items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }
    Ok(())
}

/// Validates a discount's configuration before it is saved.
///
/// ## Rules
/// - Name must not be empty; a present code must not be empty
/// - Percentage discounts: value within `[0, 100]`
/// - Fixed-amount discounts: value must be positive
/// - BuyXGetY: buy and get quantities must be positive when set
/// - Date window must not be inverted; caps and limits must be positive
pub fn validate_discount_config(discount: &Discount) -> ValidationResult<()> {
    if discount.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if let Some(code) = &discount.code {
        if code.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "code".to_string(),
            });
        }
    }

    match discount.discount_type {
        DiscountType::Percentage => validate_percentage("value", discount.value)?,
        DiscountType::FixedAmount => {
            if discount.value <= Decimal::ZERO {
                return Err(ValidationError::MustBePositive {
                    field: "value".to_string(),
                });
            }
        }
        DiscountType::BuyXGetY => {
            for (field, qty) in [
                ("minimum_quantity", discount.minimum_quantity),
                ("maximum_quantity", discount.maximum_quantity),
            ] {
                if matches!(qty, Some(q) if q <= 0) {
                    return Err(ValidationError::MustBePositive {
                        field: field.to_string(),
                    });
                }
            }
        }
        DiscountType::FreeShipping => {}
    }

    if let (Some(start), Some(end)) = (discount.start_date, discount.end_date) {
        if end < start {
            return Err(ValidationError::Inconsistent {
                field: "end_date".to_string(),
                reason: "ends before it starts".to_string(),
            });
        }
    }

    if matches!(discount.minimum_order_amount, Some(min) if min < Decimal::ZERO) {
        return Err(ValidationError::MustNotBeNegative {
            field: "minimum_order_amount".to_string(),
        });
    }

    if matches!(discount.max_discount_amount, Some(cap) if cap <= Decimal::ZERO) {
        return Err(ValidationError::MustBePositive {
            field: "max_discount_amount".to_string(),
        });
    }

    for (field, limit) in [
        ("total_usage_limit", discount.total_usage_limit),
        ("per_customer_limit", discount.per_customer_limit),
    ] {
        if matches!(limit, Some(l) if l <= 0) {
            return Err(ValidationError::MustBePositive {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

/// Validates a tax rate's configuration before it is saved.
///
/// ## Rules
/// - Name must not be empty
/// - Percentage rates: rate within `[0, 100]`
/// - Flat rates: rate must not be negative
/// - Effectivity window must not be inverted
pub fn validate_tax_rate(rate: &TaxRate) -> ValidationResult<()> {
    if rate.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    match rate.rate_type {
        TaxRateType::Percentage => validate_percentage("rate", rate.rate)?,
        TaxRateType::Flat => {
            if rate.rate < Decimal::ZERO {
                return Err(ValidationError::MustNotBeNegative {
                    field: "rate".to_string(),
                });
            }
        }
    }

    if let (Some(from), Some(to)) = (rate.effective_from, rate.effective_to) {
        if to < from {
            return Err(ValidationError::Inconsistent {
                field: "effective_to".to_string(),
                reason: "ends before it starts".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    use crate::money::{CurrencyCode, Money};
    use crate::types::tests::line;

    fn discount(discount_type: DiscountType, value: Decimal) -> Discount {
        Discount {
            id: "d1".to_string(),
            code: Some("SAVE10".to_string()),
            name: "Save".to_string(),
            discount_type,
            value,
            scope: crate::discount::DiscountScope::Cart,
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

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_percentage() {
        assert!(validate_percentage("rate", dec!(0)).is_ok());
        assert!(validate_percentage("rate", dec!(100)).is_ok());
        assert!(validate_percentage("rate", dec!(100.01)).is_err());
        assert!(validate_percentage("rate", dec!(-1)).is_err());
    }

    #[test]
    fn test_validate_currency_code() {
        assert!(validate_currency_code("USD").is_ok());
        assert!(validate_currency_code("eur").is_ok());
        assert!(validate_currency_code("US").is_err());
        assert!(validate_currency_code("USDT").is_err());
        assert!(validate_currency_code("U5D").is_err());
    }

    #[test]
    fn test_validate_line_item() {
        assert!(validate_line_item(&line("a", dec!(10), 2)).is_ok());

        let mut unnamed = line("a", dec!(10), 2);
        unnamed.name = " ".to_string();
        assert!(validate_line_item(&unnamed).is_err());

        let mut negative = line("a", dec!(-1), 2);
        assert!(validate_line_item(&negative).is_err());
        negative = line("a", dec!(10), 2);
        negative.weight = dec!(-0.5);
        assert!(validate_line_item(&negative).is_err());

        let mut over_discounted = line("a", dec!(10), 1);
        over_discounted.discount_amount =
            Money::new(dec!(11), CurrencyCode::new("USD").unwrap());
        assert!(validate_line_item(&over_discounted).is_err());
    }

    #[test]
    fn test_validate_discount_config() {
        assert!(validate_discount_config(&discount(DiscountType::Percentage, dec!(10))).is_ok());
        assert!(validate_discount_config(&discount(DiscountType::Percentage, dec!(101))).is_err());
        assert!(validate_discount_config(&discount(DiscountType::FixedAmount, dec!(0))).is_err());

        let mut empty_code = discount(DiscountType::Percentage, dec!(10));
        empty_code.code = Some("".to_string());
        assert!(validate_discount_config(&empty_code).is_err());

        let mut inverted = discount(DiscountType::Percentage, dec!(10));
        let now = Utc::now();
        inverted.start_date = Some(now);
        inverted.end_date = Some(now - Duration::days(1));
        assert!(validate_discount_config(&inverted).is_err());

        let mut bad_bxgy = discount(DiscountType::BuyXGetY, dec!(0));
        bad_bxgy.minimum_quantity = Some(0);
        assert!(validate_discount_config(&bad_bxgy).is_err());
    }

    #[test]
    fn test_validate_tax_rate() {
        let mut rate = TaxRate {
            id: "r1".to_string(),
            tax_zone_id: "z1".to_string(),
            tax_category_id: "c1".to_string(),
            name: "State Tax".to_string(),
            rate: dec!(8.25),
            rate_type: TaxRateType::Percentage,
            is_compound: false,
            priority: 1,
            sort_order: 0,
            tax_shipping: false,
            effective_from: None,
            effective_to: None,
            is_active: true,
        };
        assert!(validate_tax_rate(&rate).is_ok());

        rate.rate = dec!(105);
        assert!(validate_tax_rate(&rate).is_err());

        rate.rate_type = TaxRateType::Flat;
        assert!(validate_tax_rate(&rate).is_ok());
        rate.rate = dec!(-1);
        assert!(validate_tax_rate(&rate).is_err());
    }
}
