//! # Checkout Errors
//!
//! Orchestration-layer errors. Pricing errors from meridian-core and the
//! typed business outcomes (coupon rejections, shipping failures) are
//! wrapped here so callers handle one error type at the seam.

use meridian_core::discount::CouponRejection;
use meridian_core::shipping::ShippingError;
use meridian_core::CoreError;
use thiserror::Error;

/// Errors surfaced by the checkout orchestrator.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No cart with this id in the store.
    #[error("Cart not found: {0}")]
    CartNotFound(String),

    /// The coupon could not be applied; the variant carries the stable
    /// rejection code for the storefront.
    #[error("Coupon rejected: {0}")]
    Coupon(#[from] CouponRejection),

    /// The selected shipping method could not be costed.
    #[error("Shipping error: {0}")]
    Shipping(#[from] ShippingError),

    /// A pricing precondition was violated (currency mismatch, cart
    /// limits, validation).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The cart changed underneath a save and retries were exhausted.
    #[error("Cart {cart_id} was modified concurrently, retries exhausted")]
    VersionConflict { cart_id: String },

    /// No live checkout session with this id.
    #[error("Checkout session not found or expired: {0}")]
    SessionNotFound(String),
}

/// Convenience type alias for Results with CheckoutError.
pub type CheckoutResult<T> = Result<T, CheckoutError>;
