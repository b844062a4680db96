pub mod admin;
pub mod core;
pub mod faculty;
pub mod query;
pub mod upload;
