pub mod completions;
pub mod health;
pub(crate) mod streaming;
