//! Shared utility functions: UTF-8-safe truncation and human-readable
//! duration formatting for status tables and queue statistics.

mod format;
mod string;

pub use format::{format_age, format_duration};
pub use string::{truncate_chars, truncate_str};
