//! Request handlers, grouped by resource.

pub mod documents;
pub mod health;
pub mod jobs;
pub mod webhook;
