pub mod manager;
pub mod models;
pub mod reconcile;

pub use manager::PlaylistManager;
pub use models::{LocalStatus, Playlist, PlaylistDetails, SyncStatus, VersionMembership};
pub use reconcile::{MembershipOutcome, ReconcileOutcome, Reconciler};
