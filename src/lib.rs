//! A content-addressed semantic-graph engine.
//!
//! The crate stores two kinds of *abstractions* — plain data values and
//! constructed compounds of labeled triples that may cite themselves — behind
//! one shared contract ([`store::AbstractionStore`]) implemented by an
//! in-memory backend and a Postgres-backed durable backend. On top of the
//! store sits a pattern-search engine ([`search`]) and a cross-store
//! transformer ([`transform`]) that resolves mutually recursive rewrites to a
//! fixed point.
#![forbid(unsafe_code)]

pub mod abstraction;
pub mod codec;
pub mod error;
pub mod handle;
pub mod logging;
pub mod search;
pub mod store;
pub mod transform;

pub use self::{
    abstraction::{AbstractionId, Kind, Slot, Triple},
    handle::Handle,
    store::AbstractionStore,
};
