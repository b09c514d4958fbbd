//! Configuration: parameters, arguments, configs, metadata, permissions,
//! and the command-execution delegate.

pub mod config;
pub mod holder;
pub mod metadata;
pub mod methods;
pub mod param;
pub mod permission;

pub use config::{
    with_arg, with_args, with_cancel, with_cli_args, with_env, with_runner, Config, Configurable,
};
pub use holder::ParamHolder;
pub use metadata::Metadata;
pub use methods::{CommandRunner, ProcessRunner};
pub use param::{
    convert_primitive, FromParamValue, OpaqueValue, Param, ParamKind, ParamValue,
};
pub use permission::{Permission, Platform};
