pub mod loader;
pub mod models;

pub use loader::load_settings;
pub use models::{LogFiles, Settings};
