//! mailqa - hybrid retrieval over a personal email corpus
//!
//! Questions are expanded into several phrasings, each searched with BM25 and
//! vector similarity. Rankings are fused with Reciprocal Rank Fusion, rescored
//! with email metadata, and cut to one passage per conversation thread.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod expansion;
pub mod index;
pub mod retrieval;
pub mod session;

pub use error::{MailQaError, Result};
