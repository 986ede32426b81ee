mod store;
mod time;

pub use store::{ArtifactStore, ImageUpload, spawn_retention};
pub use time::{format_local, now_local};
