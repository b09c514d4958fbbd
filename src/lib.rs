//! # Chainflow
//!
//! A composable pipeline framework: build staged data-processing workflows
//! as a directed graph of processing units ("links"), configure them
//! uniformly, execute them concurrently with well-defined ordering and
//! failure semantics, and collect final results via pluggable sinks.
//!
//! - **Links**: typed processing stages with initialize/process/complete
//!   hooks, each running in its own task
//! - **Chains**: sequential composition with channel-mediated backpressure;
//!   a chain is itself a link, so chains nest
//! - **MultiChain / Hopper**: fan one input out across sibling chains, or
//!   drain independent chains sequentially into one stream
//! - **Adaptation**: a glue layer reconciles a producer's emitted type with
//!   a consumer's declared input type
//! - **Parameters**: one registry for programmatic, CLI, and environment
//!   arguments with declared types, defaults, and validation
//! - **Strictness**: choose which error kinds kill a chain
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chainflow::prelude::*;
//!
//! let mut chain = Chain::new(vec![
//!     FetchLink::new().into_link(),
//!     ParseLink::new().with_configs(vec![with_arg("depth", 2)]),
//! ])
//! .with_outputters(vec![JsonSink::new().into_outputter()]);
//!
//! chain.send("https://example.com".to_string()).await?;
//! chain.close();
//! chain.wait().await;
//! assert!(chain.error().is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod cfg;
pub mod chain;
pub mod errors;
pub mod hopper;
pub mod link;
pub mod links;
pub mod logging;
pub mod module;
pub mod multichain;
pub mod outputter;
pub mod parallel;
pub mod payload;
pub mod sinks;
pub mod testing;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cfg::{
        with_arg, with_args, with_cancel, with_cli_args, with_env, with_runner, CommandRunner,
        Config, Metadata, Param, ParamValue, Permission, Platform, ProcessRunner,
    };
    pub use crate::chain::Chain;
    pub use crate::errors::{AdaptError, ChainError, LinkError, ParamError};
    pub use crate::hopper::Hopper;
    pub use crate::link::{
        DynLink, ErrorSink, Link, LinkContext, PayloadReceiver, PayloadSender, Strictness,
    };
    pub use crate::links::{from_transformer, from_wrapper, JsonDecoder};
    pub use crate::logging::{
        set_default_color, set_default_level, set_default_writer, CaptureBuffer, LogLevel, Logger,
        SharedWriter,
    };
    pub use crate::module::{Module, OutputterConstructor};
    pub use crate::multichain::MultiChain;
    pub use crate::outputter::{DynOutputter, Outputter, OutputterContext};
    pub use crate::parallel::{link_constructor, parallelize, preconfigured, LinkConstructor};
    pub use crate::payload::{decode_json, register_cast, FromPayload, Payload};
    pub use crate::sinks::{JsonSink, MarkdownSink, WriterSink};
}
