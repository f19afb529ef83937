//! Bundle registry: content fingerprinting, archive staging, the sled state store and
//! the load/unload lifecycle.

pub mod fingerprint;
pub mod registry;
pub mod stage;
pub mod store;

pub use fingerprint::fingerprint;
pub use registry::{BundleListing, BundleRegistry, LoadRequest, UnloadOutcome};
pub use stage::{ArchiveKind, StagedBundle};
pub use store::{ActiveContext, BundleRecord, BundleStatus, BundleStore, Claim, Removal};
