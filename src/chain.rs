//! Chains: sequential composition of links plus optional sinks.
//!
//! A chain claims its links at construction, threads each link's output
//! channel into the next link's input at start, and spawns a collector
//! that either drives the configured outputters or buffers values on the
//! chain's own output channel for caller-driven receive.
//!
//! A chain is itself a link: nesting one chain inside another threads the
//! outer channel straight into the inner head, and inner errors report to
//! the outer error sink.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cfg::{
    CommandRunner, Config, Configurable, Param, ParamHolder, ParamValue, Permission, Platform,
};
use crate::errors::{ChainError, ParamError};
use crate::link::{
    join_link_path, shared_name, stage_channel, DynLink, ErrorSink, PayloadReceiver,
    PayloadSender, SharedName, Strictness,
};
use crate::logging::{LogLevel, Logger, SharedWriter};
use crate::outputter::DynOutputter;
use crate::payload::{FromPayload, Payload};

/// State shared by [`Chain`] and [`MultiChain`](crate::multichain::MultiChain):
/// identity, registry, channels, error slot, and start/close bookkeeping.
pub(crate) struct ChainCore {
    pub(crate) name: SharedName,
    pub(crate) title: String,
    pub(crate) ancestors: Vec<SharedName>,
    pub(crate) holder: ParamHolder,
    pub(crate) logger: Logger,
    pub(crate) sink: ErrorSink,
    pub(crate) head_tx: Option<PayloadSender>,
    pub(crate) head_rx: Option<PayloadReceiver>,
    pub(crate) out_tx: Option<PayloadSender>,
    pub(crate) out_rx: Option<PayloadReceiver>,
    pub(crate) started: bool,
    pub(crate) closed: bool,
    pub(crate) claimed: bool,
    pub(crate) strictness: Strictness,
    pub(crate) added_configs: Vec<Config>,
    pub(crate) collector: Option<JoinHandle<()>>,
    pub(crate) had_outputters: bool,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) runner: Option<Arc<dyn CommandRunner>>,
}

impl ChainCore {
    pub(crate) fn new(name: &str) -> Self {
        let (head_tx, head_rx) = stage_channel();
        let (out_tx, out_rx) = stage_channel();
        Self {
            name: shared_name(name),
            title: String::new(),
            ancestors: Vec::new(),
            holder: ParamHolder::new(),
            logger: Logger::new(),
            sink: ErrorSink::new(),
            head_tx: Some(head_tx),
            head_rx: Some(head_rx),
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            started: false,
            closed: false,
            claimed: false,
            strictness: Strictness::default(),
            added_configs: Vec::new(),
            collector: None,
            had_outputters: false,
            cancel: None,
            runner: None,
        }
    }

    pub(crate) fn link_path(&self) -> String {
        join_link_path(&self.name, &self.ancestors)
    }

    /// Pushes a value into the head channel, refusing when the chain is in
    /// an error state.
    pub(crate) async fn push(&mut self, payload: Payload) -> Result<(), ChainError> {
        if let Some(err) = self.sink.get() {
            return Err(ChainError::ErrorState(Box::new(err)));
        }
        match &self.head_tx {
            Some(tx) => tx.send(payload).await.map_err(|_| ChainError::Closed),
            None => Err(ChainError::Closed),
        }
    }

    /// Drains the chain's own output (when no outputters were configured)
    /// and joins the collector.
    pub(crate) async fn wait_done(&mut self) {
        if self.sink.is_set() {
            return;
        }
        if !self.had_outputters {
            if let Some(rx) = self.out_rx.as_mut() {
                while rx.recv().await.is_some() {}
            }
        }
        if let Some(handle) = self.collector.take() {
            let _ = handle.await;
        }
    }

    pub(crate) fn take_out_rx(&mut self) -> PayloadReceiver {
        self.out_rx.take().unwrap_or_else(|| stage_channel().1)
    }
}

impl Configurable for ChainCore {
    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        self.holder.set_arg(name, value)
    }

    fn set_args_from_list(&mut self, tokens: &[String]) -> Result<(), ParamError> {
        self.holder.set_args_from_list(tokens)
    }

    fn bind_env(&mut self, prefix: &str) -> Result<(), ParamError> {
        self.holder.bind_env(prefix)
    }

    fn set_runner(&mut self, runner: Arc<dyn CommandRunner>) {
        self.runner = Some(runner);
    }

    fn set_cancel(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }
}

/// Copies chain-level arguments into a child link for every parameter the
/// child declares but was not explicitly configured with. Link-specific
/// arguments always win over chain-level ones.
pub(crate) fn propagate_args(
    args: &HashMap<String, ParamValue>,
    link: &mut dyn DynLink,
) -> Result<(), ParamError> {
    for (key, value) in args {
        if link.has_param(key) && !link.was_set(key) {
            link.set_arg(key, value.clone())?;
        }
    }
    Ok(())
}

/// Copies arguments into an outputter for parameters it declares and has
/// not been explicitly configured with.
pub(crate) fn propagate_declared_args(
    args: &HashMap<String, ParamValue>,
    outputter: &mut dyn DynOutputter,
) -> Result<(), ParamError> {
    for (key, value) in args {
        if outputter.has_param(key) && !outputter.was_set(key) {
            outputter.set_arg(key, value.clone())?;
        }
    }
    Ok(())
}

/// Copies every argument into an outputter, declaring parameters it never
/// declared from the observed value's kind.
pub(crate) fn propagate_all_args(
    args: &HashMap<String, ParamValue>,
    outputter: &mut dyn DynOutputter,
) -> Result<(), ParamError> {
    for (key, value) in args {
        if !outputter.has_param(key) {
            outputter.declare_param(Param::dynamic(key, value))?;
        }
        outputter.set_arg(key, value.clone())?;
    }
    Ok(())
}

/// Drains tail channels in order, feeding outputters when configured or
/// buffering for caller-driven receive otherwise; flushes the buffer on
/// the chain's own output channel after the last tail closes, then
/// completes the outputters.
pub(crate) async fn run_collector(
    mut tails: Vec<PayloadReceiver>,
    mut outputters: Vec<Box<dyn DynOutputter>>,
    out_tx: PayloadSender,
    logger: Logger,
    sink: ErrorSink,
) {
    for outputter in &mut outputters {
        if let Err(e) = outputter.initialize().await {
            sink.report(ChainError::other(format!(
                "outputter {} failed to initialize: {e}",
                outputter.name()
            )));
        }
    }

    let mut buffered = Vec::new();
    for tail in &mut tails {
        while let Some(payload) = tail.recv().await {
            if outputters.is_empty() {
                buffered.push(payload);
            } else {
                for outputter in &mut outputters {
                    if let Err(e) = outputter.accept(payload.clone()).await {
                        logger.log(
                            LogLevel::Warn,
                            &format!("chain outputter {} failed to output item", outputter.name()),
                            &[("error", e.to_string())],
                        );
                    }
                }
            }
        }
    }

    for payload in buffered {
        if out_tx.send(payload).await.is_err() {
            break;
        }
    }
    drop(out_tx);

    for outputter in &mut outputters {
        if let Err(e) = outputter.complete().await {
            sink.report(ChainError::Complete {
                message: e.to_string(),
            });
        }
    }
}

/// A sequential composition of links plus optional outputters.
///
/// Callers `send` values, `close` the chain, then either `wait` (when
/// outputters consume the results) or pull values with `recv_as`.
pub struct Chain {
    core: ChainCore,
    links: Vec<Box<dyn DynLink>>,
    outputters: Vec<Box<dyn DynOutputter>>,
    input_param: Option<Param>,
}

impl Chain {
    /// Composes links into a chain, claiming each one. Reusing a link
    /// already claimed by another chain puts this chain in an error state.
    #[must_use]
    pub fn new(links: Vec<Box<dyn DynLink>>) -> Self {
        let mut chain = Self {
            core: ChainCore::new("Chain"),
            links,
            outputters: Vec::new(),
            input_param: None,
        };
        for link in &mut chain.links {
            claim_into(link.as_mut(), &chain.core.name, &chain.core.sink);
        }
        chain
    }

    /// Stores configuration applied to the chain's own registry at start.
    #[must_use]
    pub fn with_configs(mut self, configs: Vec<Config>) -> Self {
        self.core.added_configs = configs;
        self
    }

    /// Attaches outputters.
    #[must_use]
    pub fn with_outputters(mut self, outputters: Vec<Box<dyn DynOutputter>>) -> Self {
        self.outputters = outputters;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.core.strictness = strictness;
        self
    }

    /// Declares the parameter whose bound value [`start`](Self::start)
    /// feeds into the chain.
    #[must_use]
    pub fn with_input_param(mut self, param: Param) -> Self {
        self.input_param = Some(param);
        self
    }

    /// Renames the chain. Descendant link paths pick the new name up
    /// through their shared ancestry.
    #[must_use]
    pub fn with_name(self, name: &str) -> Self {
        *self.core.name.write() = name.to_string();
        self
    }

    /// Appends links after construction, claiming them like
    /// [`new`](Self::new) does.
    #[must_use]
    pub fn with_added_links(mut self, links: Vec<Box<dyn DynLink>>) -> Self {
        for mut link in links {
            claim_into(link.as_mut(), &self.core.name, &self.core.sink);
            self.links.push(link);
        }
        self
    }

    /// Sets the log level on the chain and every contained link and
    /// outputter.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.core.logger.set_level(level);
        for link in &mut self.links {
            link.set_log_level(level);
        }
        for outputter in &mut self.outputters {
            outputter.set_log_level(level);
        }
        self
    }

    /// Sets the log writer on the chain and every contained link and
    /// outputter.
    #[must_use]
    pub fn with_log_writer(mut self, writer: SharedWriter) -> Self {
        self.core.logger.set_writer(writer.clone());
        for link in &mut self.links {
            link.set_log_writer(writer.clone());
        }
        for outputter in &mut self.outputters {
            outputter.set_log_writer(writer.clone());
        }
        self
    }

    /// Sets log coloring on the chain and every contained link and
    /// outputter.
    #[must_use]
    pub fn with_log_coloring(mut self, color: bool) -> Self {
        self.core.logger.set_color(color);
        for link in &mut self.links {
            link.set_log_coloring(color);
        }
        for outputter in &mut self.outputters {
            outputter.set_log_coloring(color);
        }
        self
    }

    /// The chain's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.core.name.read().clone()
    }

    /// The first error reported by any link, or `None`.
    #[must_use]
    pub fn error(&self) -> Option<ChainError> {
        self.core.sink.get()
    }

    /// Aggregated parameters: the input parameter first, then every
    /// contained link's and outputter's parameters, deduplicated by
    /// identity.
    #[must_use]
    pub fn params(&self) -> Vec<Param> {
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        if let Some(param) = &self.input_param {
            params.push(param.clone());
        }
        for link in &self.links {
            for param in link.params() {
                if seen.insert(param.identifier()) {
                    params.push(param);
                }
            }
        }
        for outputter in &self.outputters {
            for param in outputter.params() {
                if seen.insert(param.identifier()) {
                    params.push(param);
                }
            }
        }
        params
    }

    /// Whether the chain (through any contained link or outputter)
    /// exposes a parameter.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params().iter().any(|p| p.name() == name) || self.core.holder.has_param(name)
    }

    /// The chain's own bound value for a name (populated at start from
    /// the aggregated children and the chain's configs).
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<ParamValue> {
        self.core.holder.arg(name)
    }

    /// Binds an argument directly on every contained link declaring the
    /// parameter. Applied immediately, so it wins over chain-level configs
    /// propagated at start.
    pub fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        for link in &mut self.links {
            if link.has_param(name) {
                link.set_arg(name, value.clone())?;
            }
        }
        Ok(())
    }

    /// The deduplicated union of permissions across contained links.
    #[must_use]
    pub fn permissions(&self) -> Vec<Permission> {
        let mut seen = HashSet::new();
        let mut permissions = Vec::new();
        for link in &self.links {
            for permission in link.permissions() {
                if seen.insert(permission.to_string()) {
                    permissions.push(permission);
                }
            }
        }
        permissions
    }

    /// Permissions grouped by platform.
    #[must_use]
    pub fn permissions_map(&self) -> HashMap<Platform, Vec<String>> {
        let mut map: HashMap<Platform, Vec<String>> = HashMap::new();
        for permission in self.permissions() {
            map.entry(permission.platform)
                .or_default()
                .push(permission.permission);
        }
        map
    }

    /// Sends one data value, starting the chain on first use.
    pub async fn send<T>(&mut self, value: T) -> Result<(), ChainError>
    where
        T: Any + Send + Sync + Clone + Serialize,
    {
        self.send_payload(Payload::new(value)).await
    }

    /// Sends several data values.
    pub async fn send_all<T>(
        &mut self,
        values: impl IntoIterator<Item = T> + Send,
    ) -> Result<(), ChainError>
    where
        T: Any + Send + Sync + Clone + Serialize,
    {
        for value in values {
            self.send_payload(Payload::new(value)).await?;
        }
        Ok(())
    }

    /// Sends an opaque handle.
    pub async fn send_handle<T>(&mut self, value: T) -> Result<(), ChainError>
    where
        T: Any + Send + Sync,
    {
        self.send_payload(Payload::handle(value)).await
    }

    /// Sends an already-wrapped payload.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<(), ChainError> {
        if self.core.closed {
            self.core.sink.report(ChainError::Closed);
            return Err(ChainError::Closed);
        }
        self.ensure_started();
        self.core.push(payload).await
    }

    /// Closes the chain head exactly once. Links process remaining data,
    /// then close themselves in sequence.
    pub fn close(&mut self) {
        self.ensure_started();
        self.core.head_tx = None;
        self.core.closed = true;
    }

    /// Waits for the chain to finish processing. Discards all output if
    /// no outputters are configured and the caller never received it.
    pub async fn wait(&mut self) {
        self.ensure_started();
        self.core.wait_done().await;
    }

    /// Receives one value from the chain's tail, adapted to `T`. Returns
    /// `None` on stream end or adaptation failure (which is logged).
    pub async fn recv_as<T: FromPayload>(&mut self) -> Option<T> {
        self.ensure_started();
        let payload = self.core.out_rx.as_mut()?.recv().await?;
        match T::from_payload(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.core.logger.log(
                    LogLevel::Error,
                    "failed to receive value from chain",
                    &[("error", e.to_string())],
                );
                None
            }
        }
    }

    /// Takes the chain's output receiver, e.g. to feed a
    /// [`Hopper`](crate::hopper::Hopper). The chain still has to be driven
    /// (sent to and closed) by its owner.
    #[must_use]
    pub fn tap(&mut self) -> PayloadReceiver {
        self.core.take_out_rx()
    }

    /// Sends the bound value of the declared input parameter and closes
    /// the chain.
    pub async fn start(&mut self) -> Result<(), ChainError> {
        if !self.core.started {
            if let Err(e) = self.reset_params() {
                self.core.sink.report(e.clone());
                return Err(e);
            }
        }
        let Some(param) = self.input_param.clone() else {
            let err = ChainError::other("chain has no input param");
            self.core.sink.report(err.clone());
            return Err(err);
        };
        let Some(value) = self.core.holder.arg(param.name()) else {
            let err = ChainError::other(format!(
                "chain input param {:?} has no value",
                param.name()
            ));
            self.core.sink.report(err.clone());
            return Err(err);
        };
        self.send_payload(param_value_payload(value)).await?;
        self.close();
        Ok(())
    }

    /// Re-aggregates child parameters into the chain's own registry and
    /// applies the chain's configs. Runs automatically at start.
    pub(crate) fn reset_params(&mut self) -> Result<(), ChainError> {
        let params = self.params();
        self.core.holder.declare_all(params)?;
        let configs = self.core.added_configs.clone();
        for config in configs {
            config.apply(&mut self.core)?;
        }
        Ok(())
    }

    fn ensure_started(&mut self) {
        if self.core.started {
            return;
        }
        self.core.started = true;
        let Some(input) = self.core.head_rx.take() else {
            return;
        };
        let sink = self.core.sink.clone();
        let strictness = self.core.strictness;
        self.start_internal(input, sink, strictness);
    }

    /// Starts outputters and links, threading channels head to tail, and
    /// spawns the collector.
    fn start_internal(&mut self, input: PayloadReceiver, sink: ErrorSink, strictness: Strictness) {
        self.core.logger.set_link_path(&self.core.link_path());

        if let Err(e) = self.reset_params() {
            sink.report(e);
            // Drop both ends so senders fail fast and receivers see a
            // closed stream instead of blocking forever.
            self.core.out_tx = None;
            return;
        }

        let chain_args = self.core.holder.args();
        let mut all_args = chain_args.clone();
        for link in &self.links {
            for (key, value) in link.args() {
                all_args.entry(key).or_insert(value);
            }
        }
        for outputter in &mut self.outputters {
            if let Err(e) = propagate_all_args(&all_args, outputter.as_mut()) {
                sink.report(e.into());
            }
        }

        let cancel = self.core.cancel.clone();
        let runner = self.core.runner.clone();
        let mut prev = input;
        for mut link in self.links.drain(..) {
            if let Some(token) = &cancel {
                link.set_cancel(token.clone());
            }
            if let Some(runner) = &runner {
                link.set_runner(runner.clone());
            }
            if let Err(e) = propagate_args(&chain_args, link.as_mut()) {
                sink.report(e.into());
            }
            prev = link.launch(prev, sink.clone(), strictness);
        }

        let outputters = std::mem::take(&mut self.outputters);
        self.core.had_outputters = !outputters.is_empty();
        let Some(out_tx) = self.core.out_tx.take() else {
            return;
        };
        self.core.collector = Some(tokio::spawn(run_collector(
            vec![prev],
            outputters,
            out_tx,
            self.core.logger.clone(),
            sink,
        )));
    }
}

/// Claims a link into a chain: rejects reuse, propagates construction
/// errors, and wires ancestry.
pub(crate) fn claim_into(link: &mut dyn DynLink, chain_name: &SharedName, sink: &ErrorSink) {
    if link.is_claimed() {
        sink.report(ChainError::LinkInUse(link.name()));
    }
    link.claim();
    if let Some(err) = link.error() {
        sink.report(err);
    }
    link.add_ancestor(chain_name.clone());
}

fn param_value_payload(value: ParamValue) -> Payload {
    match value {
        ParamValue::Str(v) => Payload::new(v),
        ParamValue::Int(v) => Payload::new(v),
        ParamValue::Float(v) => Payload::new(v),
        ParamValue::Bool(v) => Payload::new(v),
        ParamValue::StrList(v) => Payload::new(v),
        ParamValue::IntList(v) => Payload::new(v),
        ParamValue::FloatList(v) => Payload::new(v),
        ParamValue::BoolList(v) => Payload::new(v),
        ParamValue::Opaque(v) => Payload::handle(v),
    }
}

#[async_trait]
impl DynLink for Chain {
    fn name(&self) -> String {
        self.core.name.read().clone()
    }

    fn set_name(&mut self, name: &str) {
        *self.core.name.write() = name.to_string();
    }

    fn title(&self) -> String {
        if self.core.title.is_empty() {
            self.name()
        } else {
            self.core.title.clone()
        }
    }

    fn set_title(&mut self, title: &str) {
        self.core.title = title.to_string();
    }

    fn add_ancestor(&mut self, name: SharedName) {
        self.core.ancestors.push(name.clone());
        for link in &mut self.links {
            link.add_ancestor(name.clone());
        }
    }

    fn link_path(&self) -> String {
        self.core.link_path()
    }

    fn params(&self) -> Vec<Param> {
        Chain::params(self)
    }

    fn has_param(&self, name: &str) -> bool {
        Chain::has_param(self, name)
    }

    fn was_set(&self, name: &str) -> bool {
        self.core.holder.was_set(name)
    }

    fn arg(&self, name: &str) -> Option<ParamValue> {
        self.core.holder.arg(name)
    }

    fn args(&self) -> HashMap<String, ParamValue> {
        self.core.holder.args()
    }

    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        Chain::set_arg(self, name, value)
    }

    fn permissions(&self) -> Vec<Permission> {
        Chain::permissions(self)
    }

    fn error(&self) -> Option<ChainError> {
        self.core.sink.get()
    }

    fn set_error(&mut self, err: ChainError) {
        self.core.sink.report(err);
    }

    fn is_claimed(&self) -> bool {
        self.core.claimed
    }

    fn claim(&mut self) {
        self.core.claimed = true;
    }

    fn set_log_level(&mut self, level: LogLevel) {
        self.core.logger.set_level(level);
        for link in &mut self.links {
            link.set_log_level(level);
        }
        for outputter in &mut self.outputters {
            outputter.set_log_level(level);
        }
    }

    fn set_log_writer(&mut self, writer: SharedWriter) {
        self.core.logger.set_writer(writer.clone());
        for link in &mut self.links {
            link.set_log_writer(writer.clone());
        }
        for outputter in &mut self.outputters {
            outputter.set_log_writer(writer.clone());
        }
    }

    fn set_log_coloring(&mut self, color: bool) {
        self.core.logger.set_color(color);
        for link in &mut self.links {
            link.set_log_coloring(color);
        }
        for outputter in &mut self.outputters {
            outputter.set_log_coloring(color);
        }
    }

    fn set_cancel(&mut self, token: CancellationToken) {
        self.core.cancel = Some(token);
    }

    fn set_runner(&mut self, runner: Arc<dyn CommandRunner>) {
        self.core.runner = Some(runner);
    }

    fn launch(
        mut self: Box<Self>,
        input: PayloadReceiver,
        sink: ErrorSink,
        strictness: Strictness,
    ) -> PayloadReceiver {
        // Nested: the outer channel feeds the inner head directly, and
        // inner errors report upward through the outer sink.
        self.core.started = true;
        self.core.head_rx = None;
        self.start_internal(input, sink, strictness);
        self.core.take_out_rx()
    }

    async fn invoke(&mut self, _inputs: Vec<Payload>) -> Result<Vec<Payload>, ChainError> {
        Err(ChainError::other("invoke is not supported on chains"))
    }

    async fn finish(&mut self) -> Result<(), crate::errors::LinkError> {
        Ok(())
    }
}
