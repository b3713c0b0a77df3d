//! # TTL Policy Module
//!
//! ## Purpose
//! Pure freshness predicate for cache entries: is a cached file still usable
//! given its age and the configured maximum age?
//!
//! ## Input/Output Specification
//! - **Input**: File modification time, TTL in minutes
//! - **Output**: Boolean freshness verdict
//!
//! A TTL of zero or below treats every entry as already expired. That disables
//! freshness caching entirely and forces a re-fetch on every request; it is a
//! deliberate policy choice, not a fallback default.

use std::time::{Duration, SystemTime};

/// Check whether an entry modified at `modified` is still fresh
pub fn is_fresh(modified: SystemTime, ttl_minutes: i64) -> bool {
    if ttl_minutes <= 0 {
        return false;
    }

    // A modification time in the future counts as age zero
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);

    age < Duration::from_secs(ttl_minutes as u64 * 60)
}
