//! sdlc-server - projects, workspaces, reviews and versions on Git
//!
//! A project is a Git repository of entity files. Work happens on
//! workspace branches, lands through reviews (merge requests) and is
//! published as tagged versions; patches are release branches off a
//! version.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface (`serve`, `config`)
//! - [`server`] - axum REST API, request identity and scopes
//! - [`service`] - The [`Sdlc`](service::Sdlc) facade over a project store
//! - [`store`] - Storage backends: bare repositories on disk, or GitLab
//! - [`auth`] - GitLab identity, OAuth sessions and tokens
//! - [`structure`] - Entity file layout and project configuration
//! - [`git`] - libgit2 access for the filesystem backend
//! - [`core`] - Domain types, workspace naming and configuration
//!
//! # Invariants
//!
//! 1. Branch and tag names are derived from validated ids only
//! 2. Writes carry the expected head revision and fail on mismatch
//! 3. A workspace in conflict resolution accepts writes only on its
//!    resolution branch

pub mod auth;
pub mod cli;
pub mod core;
pub mod git;
pub mod server;
pub mod service;
pub mod store;
pub mod structure;
