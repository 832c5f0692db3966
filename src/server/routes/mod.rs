//! API route handlers

pub mod chapters;
pub mod health;
pub mod translate;
