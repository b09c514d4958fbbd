//! Outputters: terminal sinks for chain output.
//!
//! An outputter has the same parameter registry semantics as a link and a
//! minimal lifecycle: initialize, accept one value at a time, complete.
//! Accept failures are warnings and never kill a chain; complete failures
//! are reported to the chain's error sink.

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::cfg::param::FromParamValue;
use crate::cfg::{Config, Param, ParamHolder, ParamValue};
use crate::errors::{ChainError, LinkError, ParamError};
use crate::logging::{LogLevel, Logger, SharedWriter};
use crate::payload::{short_type_name, FromPayload, Payload};

/// What an outputter hook can reach: bound arguments and the logger.
pub struct OutputterContext<'a> {
    params: &'a ParamHolder,
    logger: &'a Logger,
}

impl<'a> OutputterContext<'a> {
    pub(crate) fn new(params: &'a ParamHolder, logger: &'a Logger) -> Self {
        Self { params, logger }
    }

    /// The bound value for a parameter, default included.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<ParamValue> {
        self.params.arg(name)
    }

    /// The bound value for a parameter, extracted as a primitive shape.
    pub fn arg_as<T: FromParamValue>(&self, name: &str) -> Result<T, ParamError> {
        let value = self
            .params
            .arg(name)
            .ok_or_else(|| ParamError::Unset(name.to_string()))?;
        T::from_param_value(&value)
    }

    /// The bound value for an opaque parameter, extracted by exact type.
    pub fn arg_opaque<T: Any + Clone>(&self, name: &str) -> Result<T, ParamError> {
        match self.params.arg(name) {
            Some(ParamValue::Opaque(opaque)) => opaque.extract(),
            Some(other) => Err(ParamError::WrongType {
                expected: short_type_name::<T>().to_string(),
                actual: other.kind_name(),
            }),
            None => Err(ParamError::Unset(name.to_string())),
        }
    }

    /// All bound arguments.
    #[must_use]
    pub fn args(&self) -> HashMap<String, ParamValue> {
        self.params.args()
    }

    /// The outputter's logger.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        self.logger
    }
}

/// A terminal consumer of chain output.
#[async_trait]
pub trait Outputter: Send + 'static {
    /// The input type values are adapted to before `output` runs.
    type Input: FromPayload;

    /// Parameters this outputter accepts.
    fn params(&self) -> Vec<Param> {
        Vec::new()
    }

    /// Called once when the owning chain starts.
    async fn initialize(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        let _ = cx;
        Ok(())
    }

    /// Accepts one value.
    async fn output(
        &mut self,
        value: Self::Input,
        cx: &mut OutputterContext<'_>,
    ) -> Result<(), LinkError>;

    /// Called once after the chain's tail closes.
    async fn complete(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        let _ = cx;
        Ok(())
    }

    /// Wraps this outputter for composition into a chain.
    fn into_outputter(self) -> Box<dyn DynOutputter>
    where
        Self: Sized,
    {
        Box::new(OutputterBase::new(self))
    }

    /// Wraps this outputter with configuration applied.
    fn with_configs(self, configs: Vec<Config>) -> Box<dyn DynOutputter>
    where
        Self: Sized,
    {
        Box::new(OutputterBase::new(self).configured(configs))
    }
}

/// The erased outputter object a chain drives.
#[async_trait]
pub trait DynOutputter: Send {
    /// The outputter's name (its type name).
    fn name(&self) -> String;

    /// Declared parameters with their current values.
    fn params(&self) -> Vec<Param>;

    /// Whether a parameter is declared.
    fn has_param(&self, name: &str) -> bool;

    /// Whether an argument was explicitly bound.
    fn was_set(&self, name: &str) -> bool;

    /// The bound value for a name.
    fn arg(&self, name: &str) -> Option<ParamValue>;

    /// Declares a parameter after construction. Chains use this to
    /// propagate arguments the outputter never declared.
    fn declare_param(&mut self, param: Param) -> Result<(), ParamError>;

    /// Binds an argument.
    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError>;

    /// The construction-time error, if any.
    fn error(&self) -> Option<ChainError>;

    /// Sets the logger level.
    fn set_log_level(&mut self, level: LogLevel);

    /// Sets the logger writer.
    fn set_log_writer(&mut self, writer: SharedWriter);

    /// Enables or disables log coloring.
    fn set_log_coloring(&mut self, color: bool);

    /// Runs the initialize hook.
    async fn initialize(&mut self) -> Result<(), LinkError>;

    /// Adapts a payload to the declared input type and accepts it.
    async fn accept(&mut self, payload: Payload) -> Result<(), LinkError>;

    /// Runs the complete hook.
    async fn complete(&mut self) -> Result<(), LinkError>;
}

/// Owns an [`Outputter`] together with its registry and logger.
pub struct OutputterBase<O: Outputter> {
    outputter: O,
    holder: ParamHolder,
    logger: Logger,
    name: String,
    err: Option<ChainError>,
}

impl<O: Outputter> OutputterBase<O> {
    /// Wraps an outputter, declaring its parameters.
    pub fn new(outputter: O) -> Self {
        let mut base = Self {
            holder: ParamHolder::new(),
            logger: Logger::new(),
            name: short_type_name::<O>().to_string(),
            err: None,
            outputter,
        };
        if let Err(e) = base.holder.declare_all(base.outputter.params()) {
            base.err = Some(e.into());
        }
        base
    }

    /// Applies configuration, storing the first failure.
    #[must_use]
    pub fn configured(mut self, configs: Vec<Config>) -> Self {
        for config in configs {
            if let Err(e) = config.apply(&mut self.holder) {
                self.err = Some(e.into());
                break;
            }
        }
        self
    }
}

#[async_trait]
impl<O: Outputter> DynOutputter for OutputterBase<O> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn params(&self) -> Vec<Param> {
        self.holder.params()
    }

    fn has_param(&self, name: &str) -> bool {
        self.holder.has_param(name)
    }

    fn was_set(&self, name: &str) -> bool {
        self.holder.was_set(name)
    }

    fn arg(&self, name: &str) -> Option<ParamValue> {
        self.holder.arg(name)
    }

    fn declare_param(&mut self, param: Param) -> Result<(), ParamError> {
        self.holder.declare(param)
    }

    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        self.holder.set_arg(name, value)
    }

    fn error(&self) -> Option<ChainError> {
        self.err.clone()
    }

    fn set_log_level(&mut self, level: LogLevel) {
        self.logger.set_level(level);
    }

    fn set_log_writer(&mut self, writer: SharedWriter) {
        self.logger.set_writer(writer);
    }

    fn set_log_coloring(&mut self, color: bool) {
        self.logger.set_color(color);
    }

    async fn initialize(&mut self) -> Result<(), LinkError> {
        self.logger.set_link_path(&self.name);
        self.holder.validate()?;
        let mut cx = OutputterContext::new(&self.holder, &self.logger);
        self.outputter.initialize(&mut cx).await
    }

    async fn accept(&mut self, payload: Payload) -> Result<(), LinkError> {
        let value = O::Input::from_payload(payload)?;
        let mut cx = OutputterContext::new(&self.holder, &self.logger);
        self.outputter.output(value, &mut cx).await
    }

    async fn complete(&mut self) -> Result<(), LinkError> {
        let mut cx = OutputterContext::new(&self.holder, &self.logger);
        self.outputter.complete(&mut cx).await
    }
}
