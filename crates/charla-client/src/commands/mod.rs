//! The command façade, one module per domain.
//!
//! Each module is an `impl Session` block: the methods build an envelope,
//! go through [`Session::request`](crate::Session) or its helpers, and
//! translate the raw response into typed results. Failures come back as
//! `false`, empty vectors or absent outcomes; the wire details stay here.

mod auth;
mod channels;
mod listing;
mod messaging;

pub use messaging::AudioUpload;
