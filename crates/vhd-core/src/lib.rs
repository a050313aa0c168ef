//! Traits and error types shared by the VHD decoder.
//!
//! This crate carries no VHD-specific parsing — it is the narrow seam the
//! decoder is parametric over: a stream capability (`ReadSeek`), a thin
//! container facade (`Vault`), a way to ask a host for a named ancestor
//! image (`ParentResolver`), the error type all of that returns, and the
//! resource-limit constants a parser checks untrusted sizes against before
//! it allocates.

pub mod error;
pub mod limits;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{ParentResolver, ReadSeek, Vault};
