//! Sequential drain of independent chains into one output stream.
//!
//! A hopper takes no input of its own. When its containing chain starts
//! it, the hopper forwards every value from each referenced chain's output
//! tap, in declared order, draining one chain to exhaustion before moving
//! to the next.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cfg::{CommandRunner, Param, ParamValue, Permission};
use crate::errors::{ChainError, ParamError};
use crate::link::{
    join_link_path, shared_name, stage_channel, DynLink, ErrorSink, PayloadReceiver,
    PayloadSender, SharedName, Strictness,
};
use crate::logging::{LogLevel, Logger, SharedWriter};
use crate::payload::Payload;

/// A link that drains external chains sequentially into its own output.
pub struct Hopper {
    name: SharedName,
    title: String,
    ancestors: Vec<SharedName>,
    logger: Logger,
    sources: Vec<PayloadReceiver>,
    out_tx: Option<PayloadSender>,
    out_rx: Option<PayloadReceiver>,
    claimed: bool,
    err: Option<ChainError>,
}

impl Hopper {
    /// Creates a hopper over output taps (see `Chain::tap` and
    /// `MultiChain::tap`). The referenced chains stay owned and driven by
    /// the caller.
    #[must_use]
    pub fn new(sources: Vec<PayloadReceiver>) -> Self {
        let (out_tx, out_rx) = stage_channel();
        Self {
            name: shared_name("Hopper"),
            title: String::new(),
            ancestors: Vec::new(),
            logger: Logger::new(),
            sources,
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            claimed: false,
            err: None,
        }
    }

    /// Creates a boxed hopper, ready for composition into a chain.
    #[must_use]
    pub fn boxed(sources: Vec<PayloadReceiver>) -> Box<dyn DynLink> {
        Box::new(Self::new(sources))
    }
}

#[async_trait]
impl DynLink for Hopper {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn set_name(&mut self, name: &str) {
        *self.name.write() = name.to_string();
    }

    fn title(&self) -> String {
        if self.title.is_empty() {
            self.name()
        } else {
            self.title.clone()
        }
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn add_ancestor(&mut self, name: SharedName) {
        self.ancestors.push(name);
    }

    fn link_path(&self) -> String {
        join_link_path(&self.name, &self.ancestors)
    }

    fn params(&self) -> Vec<Param> {
        Vec::new()
    }

    fn has_param(&self, _name: &str) -> bool {
        false
    }

    fn was_set(&self, _name: &str) -> bool {
        false
    }

    fn arg(&self, _name: &str) -> Option<ParamValue> {
        None
    }

    fn args(&self) -> HashMap<String, ParamValue> {
        HashMap::new()
    }

    fn set_arg(&mut self, _name: &str, _value: ParamValue) -> Result<(), ParamError> {
        Ok(())
    }

    fn permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    fn error(&self) -> Option<ChainError> {
        self.err.clone()
    }

    fn set_error(&mut self, err: ChainError) {
        self.err = Some(err);
    }

    fn is_claimed(&self) -> bool {
        self.claimed
    }

    fn claim(&mut self) {
        self.claimed = true;
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

    fn set_cancel(&mut self, _token: CancellationToken) {}

    fn set_runner(&mut self, _runner: Arc<dyn CommandRunner>) {}

    fn launch(
        mut self: Box<Self>,
        input: PayloadReceiver,
        _sink: ErrorSink,
        _strictness: Strictness,
    ) -> PayloadReceiver {
        // A hopper has no input of its own; the upstream channel closes
        // unread.
        drop(input);
        self.logger.set_link_path(&self.link_path());

        let out_rx = match self.out_rx.take() {
            Some(rx) => rx,
            None => stage_channel().1,
        };
        let out_tx = self.out_tx.take();
        let sources = std::mem::take(&mut self.sources);

        tokio::spawn(async move {
            let Some(out_tx) = out_tx else { return };
            for mut source in sources {
                while let Some(payload) = source.recv().await {
                    if out_tx.send(payload).await.is_err() {
                        return;
                    }
                }
            }
        });

        out_rx
    }

    async fn invoke(&mut self, _inputs: Vec<Payload>) -> Result<Vec<Payload>, ChainError> {
        Err(ChainError::other("invoke is not supported on hoppers"))
    }

    async fn finish(&mut self) -> Result<(), crate::errors::LinkError> {
        Ok(())
    }
}
