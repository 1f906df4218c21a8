//! Core types for the molecule system.
//!
//! Records shared by the storage layer, the formula catalog and the molecule
//! engine: instances, steps, dependency edges, digests and their enums.

pub mod dependency;
pub mod digest;
pub mod enums;
pub mod event;
pub mod filter;
pub mod instance;
pub mod step;
pub mod validation;
