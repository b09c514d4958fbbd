//! Modules: reusable factories producing fresh chain instances.
//!
//! A module holds link and outputter constructors (never instances), base
//! configuration, an optional input parameter, and an auto-run flag.
//! [`Module::new_chain`] builds an independent chain on every call, so the
//! same module can run concurrently; [`Module::run`] builds one, feeds it
//! from the bound input parameter (or the auto-run sentinel), and waits.

use std::sync::Arc;

use crate::cfg::{Config, Metadata, Param, ParamValue};
use crate::chain::Chain;
use crate::errors::ChainError;
use crate::link::Strictness;
use crate::outputter::DynOutputter;
use crate::parallel::LinkConstructor;

/// The sentinel input an auto-run module sends through its chain.
pub const AUTO_RUN_INPUT: &str = "autorun";

/// A reusable factory producing fresh outputter instances.
pub type OutputterConstructor = Arc<dyn Fn(Vec<Config>) -> Box<dyn DynOutputter> + Send + Sync>;

/// Wraps a closure as an [`OutputterConstructor`].
pub fn outputter_constructor<F>(factory: F) -> OutputterConstructor
where
    F: Fn(Vec<Config>) -> Box<dyn DynOutputter> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Curries base configuration onto an outputter constructor.
pub fn preconfigured_outputter(
    ctor: OutputterConstructor,
    configs: Vec<Config>,
) -> OutputterConstructor {
    Arc::new(move |mut extra| {
        extra.extend(configs.iter().cloned());
        ctor(extra)
    })
}

/// A reusable description of a chain: metadata, constructors, and base
/// configuration.
pub struct Module {
    metadata: Metadata,
    constructors: Vec<LinkConstructor>,
    outputters: Vec<OutputterConstructor>,
    configs: Vec<Config>,
    input_param: Option<Param>,
    strictness: Strictness,
    auto_run: bool,
    err: Option<ChainError>,
}

impl Module {
    /// Creates a module from metadata.
    #[must_use]
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            constructors: Vec::new(),
            outputters: Vec::new(),
            configs: Vec::new(),
            input_param: None,
            strictness: Strictness::default(),
            auto_run: false,
            err: None,
        }
    }

    /// Sets the ordered link constructors.
    #[must_use]
    pub fn with_links(mut self, constructors: Vec<LinkConstructor>) -> Self {
        self.constructors = constructors;
        self
    }

    /// Appends link constructors.
    #[must_use]
    pub fn with_added_links(mut self, constructors: Vec<LinkConstructor>) -> Self {
        self.constructors.extend(constructors);
        self
    }

    /// Sets the outputter constructors.
    #[must_use]
    pub fn with_outputters(mut self, outputters: Vec<OutputterConstructor>) -> Self {
        self.outputters = outputters;
        self
    }

    /// Declares the chain input parameter.
    #[must_use]
    pub fn with_input_param(mut self, param: Param) -> Self {
        self.input_param = Some(param);
        self
    }

    /// Configures the module to run without an input parameter, sending
    /// the [`AUTO_RUN_INPUT`] sentinel once instead.
    #[must_use]
    pub fn with_auto_run(mut self) -> Self {
        self.auto_run = true;
        self
    }

    /// Sets base configuration applied to every chain this module builds.
    #[must_use]
    pub fn with_configs(mut self, configs: Vec<Config>) -> Self {
        self.configs = configs;
        self
    }

    /// Sets the failure policy of built chains.
    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Builds a fresh, independent chain from the constructors.
    pub fn new_chain(&mut self) -> Chain {
        let links = self
            .constructors
            .iter()
            .map(|ctor| ctor(Vec::new()))
            .collect();
        let outputters = self
            .outputters
            .iter()
            .map(|ctor| ctor(Vec::new()))
            .collect();

        let mut chain = Chain::new(links)
            .with_outputters(outputters)
            .with_configs(self.configs.clone())
            .with_strictness(self.strictness);
        if let Some(param) = &self.input_param {
            chain = chain.with_input_param(param.clone());
        }
        self.err = chain.error();
        chain
    }

    /// Builds a fresh chain, applies base plus extra configuration, feeds
    /// it from the declared input parameter (a string sequence) or the
    /// auto-run sentinel, closes it, and waits.
    pub async fn run(&mut self, configs: Vec<Config>) -> Result<(), ChainError> {
        if self.outputters.is_empty() {
            return self.fail(format!(
                "module must have outputters to call .run(). {} has no outputters",
                self.metadata.name()
            ));
        }
        if self.metadata.input_param().is_none() && !self.auto_run {
            return self.fail(format!(
                "input parameter or auto-run is required to call .run(), but module {:?} has no input parameter",
                self.metadata.name()
            ));
        }

        let mut chain = self.new_chain();
        let mut combined = self.configs.clone();
        combined.extend(configs);
        chain = chain.with_configs(combined);
        if let Err(e) = chain.reset_params() {
            self.err = Some(e.clone());
            return Err(e);
        }

        if self.auto_run {
            let _ = chain.send(AUTO_RUN_INPUT.to_string()).await;
        } else {
            let name = self.metadata.input_param().unwrap_or_default().to_string();
            if !chain.has_param(&name) {
                return self.fail(format!(
                    "module {:?} specifies {name:?} as input parameter, but the module params do not contain {name:?}",
                    self.metadata.name()
                ));
            }
            let Some(input) = chain.arg(&name) else {
                return self.fail(format!(
                    "input parameter {name:?} is unset for module {:?}",
                    self.metadata.name()
                ));
            };
            let values = match input {
                ParamValue::StrList(values) => values,
                other => {
                    return self.fail(format!(
                        "module input parameter {name:?} must be a sequence of strings, but it is a {}",
                        other.kind_name()
                    ));
                }
            };
            for value in values {
                let _ = chain.send(value).await;
            }
        }

        chain.close();
        chain.wait().await;

        self.err = chain.error();
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fail(&mut self, message: String) -> Result<(), ChainError> {
        let err = ChainError::other(message);
        self.err = Some(err.clone());
        Err(err)
    }

    /// The parameters a chain built from this module exposes.
    pub fn params(&mut self) -> Vec<Param> {
        self.new_chain().params()
    }

    /// The module's metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The most recent build or run error.
    #[must_use]
    pub fn error(&self) -> Option<ChainError> {
        self.err.clone()
    }
}
