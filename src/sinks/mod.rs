//! Built-in terminal sinks: writer, JSON, and markdown destinations.

pub mod json;
pub mod markdown;
pub mod writer;

pub use json::JsonSink;
pub use markdown::MarkdownSink;
pub use writer::WriterSink;
