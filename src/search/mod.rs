//! Search layer.
//!
//! - **[`canonicalize`]**: markdown and markup stripping into plain text.
//! - **[`store`]**: the current index generation, freshness and rebuilds.
//! - **[`query`]**: filtering, scoring and ranking over one generation.
//! - **[`suggest`]**: autocomplete candidates.

pub mod canonicalize;
pub mod query;
pub mod store;
pub mod suggest;
