//! # meridian-core: Pure Pricing Logic for Meridian Checkout
//!
//! This crate is the **heart** of the Meridian pricing engine. It contains
//! all cart pricing logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Meridian Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Storefront / Admin Surface                      │   │
//! │  │    Cart UI ──► Coupon UI ──► Shipping UI ──► Checkout UI       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              meridian-checkout (Orchestration)                  │   │
//! │  │    recalculate, apply_coupon, shipping_options, sessions       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ meridian-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   money   │  │ discount  │  │    tax    │  │ shipping  │  │   │
//! │  │   │   Money   │  │  coupons  │  │  zones &  │  │  zones &  │  │   │
//! │  │   │ Currency  │  │  BxGy     │  │ compound  │  │ formulas  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with fixed-point decimal arithmetic
//! - [`types`] - Domain types (Cart, LineItem, Address)
//! - [`zone`] - Geographic rule matching shared by tax and shipping
//! - [`discount`] - Coupon validation and discount calculation
//! - [`tax`] - Tax zone/category matching and tax calculation
//! - [`shipping`] - Shipping zone matching and rate calculation
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every calculation is deterministic given the cart,
//!    configuration, and an explicit `now`
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Decimal Money**: All monetary values use fixed-point decimals at
//!    four fractional digits (no floating point!)
//! 4. **Explicit Errors**: All errors are typed, never strings or panics;
//!    recoverable business outcomes are values, not errors
//!
//! ## Example Usage
//!
//! ```rust
//! use meridian_core::money::{CurrencyCode, Money};
//! use rust_decimal_macros::dec;
//!
//! let usd = CurrencyCode::new("USD").unwrap();
//! let price = Money::new(dec!(10.99), usd);
//! let tax = price.percent_of(dec!(8.25));
//!
//! assert_eq!(tax.amount(), dec!(0.9067));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod discount;
pub mod error;
pub mod money;
pub mod shipping;
pub mod tax;
pub mod types;
pub mod validation;
pub mod zone;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use meridian_core::Money` instead of
// `use meridian_core::money::Money`

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{CurrencyCode, Money};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum items allowed in a single cart
///
/// ## Business Reason
/// Prevents runaway carts and ensures reasonable transaction sizes.
/// Can be made configurable per-store in future versions.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single item in cart
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
/// Configurable per-store in future versions.
pub const MAX_ITEM_QUANTITY: i64 = 999;
