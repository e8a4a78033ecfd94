//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── CoreError        - Money/cart domain errors                       │
//! │  └── ValidationError  - Configuration/input validation failures        │
//! │                                                                         │
//! │  Typed VALUE results (not errors):                                     │
//! │  ├── CouponRejection  - why a coupon failed (discount module)          │
//! │  └── ShippingError    - why a method could not be costed (shipping)    │
//! │                                                                         │
//! │  meridian-checkout errors (separate crate)                             │
//! │  └── CheckoutError    - orchestration/store failures                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (cart id, currency codes, etc.)
//! 3. Errors are enum variants, never String
//! 4. Recoverable business outcomes (coupon rejected, no shipping zone)
//!    are values in the result types, not errors

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core pricing-engine errors.
///
/// These represent misuse of the engine or violated preconditions, not
/// business outcomes. A rejected coupon is a `CouponRejection` value; an
/// EUR amount added to a USD amount is a `CoreError`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Arithmetic attempted between two different currencies.
    ///
    /// ## When This Occurs
    /// - A discount configured in one currency is applied to a cart in
    ///   another without an explicit conversion step
    /// - Mixed-currency line items end up in the same cart
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// A currency code that is not three ASCII letters.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// Line item cannot be found in the cart.
    #[error("Line item not found: {0}")]
    LineItemNotFound(String),

    /// Cart has exceeded maximum allowed items.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Configuration and input validation errors.
///
/// These occur when a configuration entity (discount, tax rate, shipping
/// method) or caller input doesn't meet requirements. Used for early
/// validation before the engines run.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Percentage outside `[0, 100]`.
    #[error("{field} must be a percentage between 0 and 100, got {value}")]
    InvalidPercentage { field: String, value: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, malformed currency).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A stored derived value disagrees with its definition
    /// (e.g., line total != unit price x quantity).
    #[error("{field} is inconsistent: {reason}")]
    Inconsistent { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
