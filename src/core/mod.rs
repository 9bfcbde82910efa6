/*!
 * Core Module
 * Shared types and allocator limits
 */

pub mod limits;
pub mod types;

pub use types::*;
