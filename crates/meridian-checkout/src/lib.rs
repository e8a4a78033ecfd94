//! # meridian-checkout: Cart Recalculation Orchestrator
//!
//! Everything around the pure pricing math: the recalculation pipeline,
//! coupon application, shipping selection, checkout sessions, and the
//! collaborator seams hosts implement to plug in real persistence.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       meridian-checkout                                 │
//! │                                                                         │
//! │  ┌──────────────────┐      ┌──────────────────────────────────────┐    │
//! │  │ CheckoutService  │─────►│ collaborator traits (sources.rs)     │    │
//! │  │  recalculate     │      │  CartStore / DiscountSource /        │    │
//! │  │  apply_coupon    │      │  TaxConfigSource /                   │    │
//! │  │  shipping_options│      │  ShippingConfigSource / UsageTracker │    │
//! │  └────────┬─────────┘      └──────────────────────────────────────┘    │
//! │           │ per-cart keyed mutex, optimistic save retry               │
//! │           ▼                                                            │
//! │  ┌──────────────────┐                                                  │
//! │  │  meridian-core   │  pure pricing: discounts, tax, shipping         │
//! │  └──────────────────┘                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Recalculations for the same cart serialize behind a per-cart mutex;
//! different carts run in parallel. Saves carry an optimistic version
//! check and retry a bounded number of times after conflicts from writers
//! outside this process.

pub mod error;
pub mod recalculate;
pub mod session;
pub mod sources;

pub use error::{CheckoutError, CheckoutResult};
pub use recalculate::{CheckoutService, MAX_SAVE_RETRIES};
pub use session::{CheckoutSession, InMemorySessionStore, SessionStore};
pub use sources::{
    CartStore, DiscountSource, InMemoryCartStore, InMemoryDiscountSource, InMemoryShippingConfig,
    InMemoryTaxConfig, ShippingConfigSource, TaxConfigSource, UsageTracker,
};
