pub mod append;
pub mod gc;
pub mod history;
pub mod ingest;
pub mod jobs;
pub mod pin;
pub mod project;
pub mod render;
