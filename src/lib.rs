//! partner-hub: voice playback coordination and referral links for the
//! partner dashboard.

pub mod api;
pub mod config;
pub mod referral;
pub mod speech;
