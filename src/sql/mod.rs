//! SQL text: identifier quoting and statement builders

pub mod quote;
pub mod statements;

pub use quote::{permission_keyword, quote_identifier, quote_literal, validate_identifier};
