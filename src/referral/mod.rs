//! Referral attribution: stealth-link tokens, session capture, sponsor notices.
//!
//! Components:
//! - `codec`: reversible URL-safe token for a (referrer, shop) pair
//! - `context`: the typed attribution record
//! - `store`: session-scoped storage (memory or JSON file)
//! - `notify`: sponsor notification channels
//! - `service`: link generation, capture and lookup

pub mod codec;
pub mod context;
pub mod notify;
pub mod service;
pub mod store;

pub use codec::{DecodeError, EncodeError, ReferralPair};
pub use context::ReferralContext;
pub use service::{Capture, ReferralService};
