//! SQL dump output

pub mod writer;

pub use writer::{escape_string_literal, sql_literal, DumpSinkFactory, DumpWriter};
