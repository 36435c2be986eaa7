pub mod core;
pub mod courses;
pub mod directory;
pub mod flags;
pub mod lessons;
pub mod setup;
pub mod sync;
