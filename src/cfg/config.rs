//! Configuration values applied uniformly to links, chains, outputters,
//! and modules.
//!
//! A [`Config`] is a cloneable closure over anything [`Configurable`].
//! Reuse matters: a module applies the same base configs to every fresh
//! chain it builds.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cfg::holder::ParamHolder;
use crate::cfg::methods::CommandRunner;
use crate::cfg::param::ParamValue;
use crate::errors::ParamError;

/// The surface a [`Config`] can act on.
pub trait Configurable {
    /// Binds an argument (possibly pending) by name.
    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError>;

    /// Binds arguments from CLI-style tokens.
    fn set_args_from_list(&mut self, tokens: &[String]) -> Result<(), ParamError>;

    /// Binds declared parameters from prefixed environment variables.
    fn bind_env(&mut self, prefix: &str) -> Result<(), ParamError>;

    /// Replaces the command-execution delegate.
    fn set_runner(&mut self, runner: Arc<dyn CommandRunner>);

    /// Attaches a cancellation token.
    fn set_cancel(&mut self, token: CancellationToken);
}

impl Configurable for ParamHolder {
    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        ParamHolder::set_arg(self, name, value)
    }

    fn set_args_from_list(&mut self, tokens: &[String]) -> Result<(), ParamError> {
        ParamHolder::set_args_from_list(self, tokens)
    }

    fn bind_env(&mut self, prefix: &str) -> Result<(), ParamError> {
        ParamHolder::bind_env(self, prefix)
    }

    fn set_runner(&mut self, _runner: Arc<dyn CommandRunner>) {}

    fn set_cancel(&mut self, _token: CancellationToken) {}
}

type ApplyFn = Arc<dyn Fn(&mut dyn Configurable) -> Result<(), ParamError> + Send + Sync>;

/// A reusable configuration step.
#[derive(Clone)]
pub struct Config {
    apply: ApplyFn,
}

impl Config {
    /// Wraps a configuration closure.
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&mut dyn Configurable) -> Result<(), ParamError> + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
        }
    }

    /// Applies this configuration to a target.
    pub fn apply(&self, target: &mut dyn Configurable) -> Result<(), ParamError> {
        (self.apply)(target)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Config")
    }
}

/// Binds one argument by name.
pub fn with_arg(name: impl Into<String>, value: impl Into<ParamValue>) -> Config {
    let name = name.into();
    let value = value.into();
    Config::new(move |target| target.set_arg(&name, value.clone()))
}

/// Binds several arguments.
pub fn with_args(args: impl IntoIterator<Item = (String, ParamValue)>) -> Config {
    let args: Vec<(String, ParamValue)> = args.into_iter().collect();
    Config::new(move |target| {
        for (name, value) in &args {
            target.set_arg(name, value.clone())?;
        }
        Ok(())
    })
}

/// Binds arguments from CLI-style tokens
/// (`["-flag", "value", "-other", "a", "b"]`).
pub fn with_cli_args<I, S>(tokens: I) -> Config
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
    Config::new(move |target| target.set_args_from_list(&tokens))
}

/// Binds declared parameters from `{PREFIX}_{NAME}` environment variables.
pub fn with_env(prefix: impl Into<String>) -> Config {
    let prefix = prefix.into();
    Config::new(move |target| target.bind_env(&prefix))
}

/// Replaces the command-execution delegate.
pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Config {
    Config::new(move |target| {
        target.set_runner(runner.clone());
        Ok(())
    })
}

/// Attaches a cancellation token, propagated to every link at chain start.
pub fn with_cancel(token: CancellationToken) -> Config {
    Config::new(move |target| {
        target.set_cancel(token.clone());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::param::Param;

    #[test]
    fn configs_are_reusable() {
        let config = with_arg("count", 5);

        let mut first = ParamHolder::new();
        first.declare(Param::int("count", "a count")).unwrap();
        config.apply(&mut first).unwrap();

        let mut second = ParamHolder::new();
        second.declare(Param::int("count", "a count")).unwrap();
        config.apply(&mut second).unwrap();

        assert!(matches!(first.arg("count"), Some(ParamValue::Int(5))));
        assert!(matches!(second.arg("count"), Some(ParamValue::Int(5))));
    }

    #[test]
    fn cli_config_parses_tokens() {
        let mut holder = ParamHolder::new();
        holder
            .declare(Param::string("name", "").with_shortcode("n"))
            .unwrap();
        with_cli_args(["-n", "zed"]).apply(&mut holder).unwrap();
        assert!(matches!(holder.arg("name"), Some(ParamValue::Str(s)) if s == "zed"));
    }
}
