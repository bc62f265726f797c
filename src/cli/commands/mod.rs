//! CLI command implementations

pub mod cache;
pub mod import;
pub mod ls;
pub mod remove;
pub mod schema;
pub mod tag;
