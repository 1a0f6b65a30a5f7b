//! Self-update engine for qrapp.
//!
//! The update check runs as a strictly sequential pipeline:
//! - version gate and comparison ([`update::compare_versions`]),
//! - release feed fetch ([`update::ReleaseFeed`]),
//! - platform asset selection ([`update::select_asset`]),
//! - binary download ([`auto_update::download_to_temp`]),
//! - on-disk replacement ([`auto_update::BinaryInstaller`]),
//! - relaunch ([`auto_update::Relauncher`]).
//!
//! [`Updater`] wires the stages together. [`local_feed`] provides an
//! in-process release feed for exercising the whole pipeline locally.

pub mod auto_update;
mod error;
pub mod local_feed;
pub mod update;
mod updater;

/// Error type shared by every update stage.
pub use error::UpdateError;
/// Release feed model, feed client and version comparison helpers.
pub use update::{
    DEV_VERSION, FeedMode, ReleaseAsset, ReleaseDescriptor, ReleaseFeed, UpdateConfig,
    VersionOrdering, compare_versions,
};
/// Orchestrated update check.
pub use updater::{UpdateOutcome, Updater};
