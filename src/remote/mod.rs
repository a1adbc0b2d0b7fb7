//! Client side of the production tracking server.

pub mod client;
pub mod error;
pub mod query;
pub mod traits;
pub mod types;

pub use client::HttpTracker;
pub use error::RemoteError;
pub use query::{Field, Filter, Order, Query};
pub use traits::{RemoteResult, TrackingService};
pub use types::*;
