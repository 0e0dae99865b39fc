//! Kestrel aggregate crate that re-exports the main components for downstream users.

pub use kestrel_broker as broker;
pub use kestrel_config as config;
pub use kestrel_core as core;
pub use kestrel_feed as feed;
pub use kestrel_store as store;
pub use kestrel_venue as venue;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use kestrel_broker::*;
    pub use kestrel_config::*;
    pub use kestrel_core::*;
    pub use kestrel_feed::*;
    pub use kestrel_store::*;
    pub use kestrel_venue::*;
}
