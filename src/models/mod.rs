//! Core data models for the semantic model manager.
//!
//! These types describe what lives on disk (artifact metadata, backup
//! bookkeeping), what travels over the wire (model definitions) and the
//! result records returned by the storage operations. All of them serialize
//! naturally as JSON via `serde`.

pub mod artifact;
pub mod definition;
pub mod operations;
pub mod remote;
pub mod replacement;
pub mod validation;
