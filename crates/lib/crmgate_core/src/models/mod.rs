//! Domain models shared across crmgate crates.

pub mod auth;
pub mod token;
