//! Utils module - Utility functions and helpers

pub mod fs;
pub mod logging;
