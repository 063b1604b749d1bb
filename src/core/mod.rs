//! core
//!
//! Core domain types, records, and configuration for the SDLC server.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, ProjectId, VersionId, EntityPath, etc.
//! - [`workspace`] - Workspace specifications and branch naming
//! - [`model`] - Domain records exchanged with API clients
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Every branch name is derived from a validated specification
//! - Schemas are strict and self-describing

pub mod config;
pub mod model;
pub mod types;
pub mod workspace;
