mod commands;
mod paths;
mod target;

pub use commands::HideWindow;
pub use paths::{AppPaths, AppPathsError};
pub use target::{APP_NAME, PlatformTarget};
