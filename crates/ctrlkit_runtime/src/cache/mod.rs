//! Local object cache.
//!
//! The informer owns the store; controllers and sync
//! handlers see it only through the read-only [`Lister`].

mod lister;
pub(crate) mod store;

pub use lister::Lister;
