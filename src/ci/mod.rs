//! CI-server domain: job types, wire types, and the remote API client seam.

pub mod api_types;
pub mod client;
pub mod types;
