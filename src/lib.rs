//! An open-addressed, Robin-Hood-balanced hash table from byte-string keys
//! to a fixed-size, `Copy` value type.
//!
//! The engine ([`table::RobinHoodTable`]) is a from-scratch Rust port of the
//! `pascal_robin_hood.c` probing, displacement and back-shift-deletion
//! discipline, generalized from a runtime value size to a type parameter and
//! from a raw-pointer key token to the pluggable [`token::KeyStore`] trait.
//! [`funnel::Funnel`] sits above it as an optional batching façade with
//! software prefetch for bulk workloads.
//!
//! This crate is single-threaded by design (see the data model docs on
//! [`table::RobinHoodTable`]): no locks, no atomics, not `Sync`. Callers
//! needing concurrent access must synchronize externally.
#![cfg_attr(feature = "nightly", feature(core_intrinsics))]

pub mod bucket;
pub mod capacity;
pub mod config;
pub mod error;
pub mod funnel;
pub mod table;
pub mod token;

mod hint;

pub use config::TableConfig;
pub use error::{Result, TableError};
pub use funnel::Funnel;
pub use table::{RobinHoodTable, UpsertSlot};
pub use token::{ArenaKeyStore, KeyStore, KeyToken};
