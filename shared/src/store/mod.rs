//! Backend command store
//!
//! This module handles:
//! - The `CommandStore` abstraction consumed by the agent loops
//! - Typed store errors (transient vs. decode vs. HTTP status)
//! - A PostgREST client for Supabase-hosted command and device tables

mod postgrest;
mod traits;

pub use postgrest::{PostgrestStore, StoreConfig};
pub use traits::{CommandStore, StoreError};
