//! Parallel fan-out of one input stream across sibling chains.
//!
//! A disperser task replicates every input to each sibling's input channel
//! in submission order; the collector merges sibling outputs sequentially
//! (sibling k drains fully before sibling k+1 contributes).

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cfg::{CommandRunner, Config, Param, ParamValue, Permission};
use crate::chain::{
    claim_into, propagate_args, propagate_declared_args, run_collector, ChainCore,
};
use crate::errors::{ChainError, ParamError};
use crate::link::{
    stage_channel, DynLink, ErrorSink, PayloadReceiver, SharedName, Strictness,
};
use crate::logging::{LogLevel, SharedWriter};
use crate::outputter::DynOutputter;
use crate::payload::{FromPayload, Payload};

/// A chain-shaped composite that replicates every input to N sibling
/// chains and merges their outputs.
pub struct MultiChain {
    core: ChainCore,
    chains: Vec<Box<dyn DynLink>>,
    outputters: Vec<Box<dyn DynOutputter>>,
}

impl MultiChain {
    /// Composes sibling chains, claiming each one.
    #[must_use]
    pub fn new(chains: Vec<Box<dyn DynLink>>) -> Self {
        let mut multi = Self {
            core: ChainCore::new("MultiChain"),
            chains,
            outputters: Vec::new(),
        };
        for chain in &mut multi.chains {
            claim_into(chain.as_mut(), &multi.core.name, &multi.core.sink);
        }
        multi
    }

    /// Stores configuration applied at start.
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

    /// Renames the multi-chain.
    #[must_use]
    pub fn with_name(self, name: &str) -> Self {
        *self.core.name.write() = name.to_string();
        self
    }

    /// Unsupported: a multi-chain owns sibling chains, not loose links.
    /// Calling this puts the multi-chain in an error state.
    #[must_use]
    pub fn with_added_links(self, _links: Vec<Box<dyn DynLink>>) -> Self {
        self.core.sink.report(ChainError::AddedLinksUnsupported);
        self
    }

    /// The first error reported by any sibling, or `None`.
    #[must_use]
    pub fn error(&self) -> Option<ChainError> {
        self.core.sink.get()
    }

    /// Aggregated parameters across siblings and outputters.
    #[must_use]
    pub fn params(&self) -> Vec<Param> {
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        for chain in &self.chains {
            for param in chain.params() {
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

    /// Whether any sibling exposes a parameter.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params().iter().any(|p| p.name() == name) || self.core.holder.has_param(name)
    }

    /// Sends one data value to every sibling, starting the multi-chain on
    /// first use.
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

    /// Sends an already-wrapped payload.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<(), ChainError> {
        if self.core.closed {
            self.core.sink.report(ChainError::Closed);
            return Err(ChainError::Closed);
        }
        self.ensure_started();
        self.core.push(payload).await
    }

    /// Closes the multi-chain's head exactly once; the disperser then
    /// closes every sibling's input.
    pub fn close(&mut self) {
        self.ensure_started();
        self.core.head_tx = None;
        self.core.closed = true;
    }

    /// Waits for every sibling to finish.
    pub async fn wait(&mut self) {
        self.ensure_started();
        self.core.wait_done().await;
    }

    /// Receives one merged value, adapted to `T`.
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

    /// Takes the merged output receiver.
    #[must_use]
    pub fn tap(&mut self) -> PayloadReceiver {
        self.core.take_out_rx()
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

    fn start_internal(
        &mut self,
        mut input: PayloadReceiver,
        sink: ErrorSink,
        strictness: Strictness,
    ) {
        self.core.logger.set_link_path(&self.core.link_path());

        if let Err(e) = self.reset_params() {
            sink.report(e);
            self.core.out_tx = None;
            return;
        }

        let chain_args = self.core.holder.args();
        for outputter in &mut self.outputters {
            if let Err(e) = propagate_declared_args(&chain_args, outputter.as_mut()) {
                sink.report(e.into());
            }
        }

        let cancel = self.core.cancel.clone();
        let runner = self.core.runner.clone();
        let mut sibling_txs = Vec::with_capacity(self.chains.len());
        let mut tails = Vec::with_capacity(self.chains.len());
        for mut chain in self.chains.drain(..) {
            if let Some(token) = &cancel {
                chain.set_cancel(token.clone());
            }
            if let Some(runner) = &runner {
                chain.set_runner(runner.clone());
            }
            if let Err(e) = propagate_args(&chain_args, chain.as_mut()) {
                sink.report(e.into());
            }
            let (tx, rx) = stage_channel();
            sibling_txs.push(tx);
            tails.push(chain.launch(rx, sink.clone(), strictness));
        }

        // Disperser: replicate each input to every sibling, back-pressured
        // by the slowest one; closing the head closes every sibling input.
        tokio::spawn(async move {
            while let Some(payload) = input.recv().await {
                for tx in &sibling_txs {
                    let _ = tx.send(payload.clone()).await;
                }
            }
        });

        let outputters = std::mem::take(&mut self.outputters);
        self.core.had_outputters = !outputters.is_empty();
        let Some(out_tx) = self.core.out_tx.take() else {
            return;
        };
        self.core.collector = Some(tokio::spawn(run_collector(
            tails,
            outputters,
            out_tx,
            self.core.logger.clone(),
            sink,
        )));
    }

    fn reset_params(&mut self) -> Result<(), ChainError> {
        let params = self.params();
        self.core.holder.declare_all(params)?;
        let configs = self.core.added_configs.clone();
        for config in configs {
            config.apply(&mut self.core)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DynLink for MultiChain {
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
        for chain in &mut self.chains {
            chain.add_ancestor(name.clone());
        }
    }

    fn link_path(&self) -> String {
        self.core.link_path()
    }

    fn params(&self) -> Vec<Param> {
        MultiChain::params(self)
    }

    fn has_param(&self, name: &str) -> bool {
        MultiChain::has_param(self, name)
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
        for chain in &mut self.chains {
            if chain.has_param(name) {
                chain.set_arg(name, value.clone())?;
            }
        }
        Ok(())
    }

    fn permissions(&self) -> Vec<Permission> {
        let mut seen = HashSet::new();
        let mut permissions = Vec::new();
        for chain in &self.chains {
            for permission in chain.permissions() {
                if seen.insert(permission.to_string()) {
                    permissions.push(permission);
                }
            }
        }
        permissions
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
        for chain in &mut self.chains {
            chain.set_log_level(level);
        }
        for outputter in &mut self.outputters {
            outputter.set_log_level(level);
        }
    }

    fn set_log_writer(&mut self, writer: SharedWriter) {
        self.core.logger.set_writer(writer.clone());
        for chain in &mut self.chains {
            chain.set_log_writer(writer.clone());
        }
        for outputter in &mut self.outputters {
            outputter.set_log_writer(writer.clone());
        }
    }

    fn set_log_coloring(&mut self, color: bool) {
        self.core.logger.set_color(color);
        for chain in &mut self.chains {
            chain.set_log_coloring(color);
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
