//! Core business logic for the notes service.
//!
//! - [`services::note`]: note creation and reads, the entry point for clients
//! - [`services::file`]: per-file processing and download URLs
//! - [`services::dispatch`]: where processing runs (inline or cluster job)
//! - [`services::session`]: sign-in and session rotation
//! - [`cached`]: cache-aside wrappers around the relational repositories

pub mod cached;
pub mod fanout;
pub mod services;

#[cfg(test)]
mod test_support;

pub use services::*;
