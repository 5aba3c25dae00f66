//! Code-hosting collaborator for repovet.
//!
//! The rest of the workspace talks to the hosting service only through the
//! [`CodeHost`] trait. [`GitHubClient`] implements it over the GitHub REST
//! API; [`fake::FakeHost`] implements it in memory for tests.
//!
//! Every failure crossing this boundary is already a
//! [`RepovetError`](repovet_core::RepovetError) category: not-found, auth,
//! rate-limited (with a reset hint), generic HTTP, or network.

pub mod client;
pub mod fake;
pub mod host;
pub mod tree;

pub use client::GitHubClient;
pub use host::{CodeHost, RepoInfo};
pub use tree::{render_tree, EntryKind, TreeEntry};
