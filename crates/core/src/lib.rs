//! Core types and errors for the medical QA assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Corpus documents and retrieval candidates
//! - The shared error type

pub mod document;
pub mod error;

pub use document::{sort_by_score, Candidate, Document, DocumentId};
pub use error::{Error, Result};
