//! Access-token values and the redacting secret wrapper they carry.

pub mod access;
pub mod secret;
