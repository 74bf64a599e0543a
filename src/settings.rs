//! Internal settings for the R-tree index crate.
//!
//! When built with the `setup_tracing` feature, this module installs a
//! `tracing` subscriber at process startup. Logging is controlled by the
//! `DEBUG_RTREE_INDEX` environment variable: if it is unset or set to a
//! falsy value ("0", "false", or empty), logging stays disabled; otherwise
//! a debug-level subscriber is installed. Embedding applications that
//! configure `tracing` themselves should not enable this feature.

#![cfg(feature = "setup_tracing")]

use ctor::ctor;
use tracing::Level;

#[ctor]
fn set_debug_level() {
    if std::env::var("DEBUG_RTREE_INDEX").map_or(true, |v| v == "0" || v == "false" || v.is_empty())
    {
        // Logging stays disabled; tracing macros are no-ops without a subscriber.
    } else {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .init();
    }
}
