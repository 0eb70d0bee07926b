//! # Siren
//!
//! Watches a public alert feed, keeps the alerts that are recent, local and
//! not seen before, and fans them out to sinks. A second, independent
//! surface relays messages through a queue over authenticated HTTP.
//!
//! ## Architecture
//!
//! ```text
//! Feed -> FeedPoller -> FilterEngine (+ Ledger) -> Router -> Effects
//!
//! Producer -> POST /write -> RelayHandler -> Queue -> GET /read -> Consumer
//! ```
//!
//! ## Modules
//!
//! - [`event`]: The alert record as the feed serves it
//! - [`fingerprint`]: Canonical content hash used for dedup
//! - [`ledger`]: Persisted set of fingerprints already accepted
//! - [`feed`]: Fetching feed snapshots
//! - [`filter`]: Recency, location and novelty checks
//! - [`router`]: Dispatch of accepted alerts to effects
//! - [`effects`]: Effect trait and built-in sinks
//! - [`cycle`]: The poll loop
//! - [`relay`]: Queue relay handler and its HTTP surface
//! - [`config`]: TOML configuration

pub mod config;
pub mod cycle;
pub mod effects;
pub mod event;
pub mod feed;
pub mod filter;
pub mod fingerprint;
pub mod ledger;
pub mod media;
pub mod relay;
pub mod router;
pub mod shutdown;

// Re-export commonly used types at crate root
pub use effects::{Effect, EffectError, EffectResult};
pub use event::AlertEvent;
pub use fingerprint::Fingerprint;
pub use router::Router;
