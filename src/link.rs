//! Links: the processing units of a pipeline.
//!
//! A [`Link`] declares a typed input and a `process` hook; the framework
//! wraps it in a [`LinkBase`] that owns its parameters, logger, and output
//! channel and drives the lifecycle:
//!
//! ```text
//! constructed → claimed → starting → initialized → running → completing → closed
//!                                                         ↘  errored  ↗
//! ```
//!
//! Composition works through the erased [`DynLink`] object trait: a chain
//! holds `Box<dyn DynLink>` values and threads each link's output channel
//! into the next link's input. [`Strictness`] decides whether conversion
//! and processing errors kill the chain.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cfg::{
    CommandRunner, Config, Configurable, Param, ParamHolder, ParamValue, Permission,
    ProcessRunner,
};
use crate::cfg::param::FromParamValue;
use crate::errors::{ChainError, LinkError, ParamError};
use crate::logging::{LogLevel, Logger, SharedWriter};
use crate::payload::{short_type_name, FromPayload, Payload};

/// Capacity of every stage-to-stage channel. One slot approximates the
/// original unbuffered rendezvous: a producer suspends until the consumer
/// has drained the previous value.
pub(crate) const CHANNEL_CAPACITY: usize = 1;

/// Sending half of a stage channel.
pub type PayloadSender = mpsc::Sender<Payload>;
/// Receiving half of a stage channel.
pub type PayloadReceiver = mpsc::Receiver<Payload>;

/// Creates a stage channel.
pub(crate) fn stage_channel() -> (PayloadSender, PayloadReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// A link or chain name shared by reference, so renaming a chain after
/// construction is visible in every descendant's link path.
pub type SharedName = Arc<RwLock<String>>;

/// Creates a shared name.
pub(crate) fn shared_name(name: impl Into<String>) -> SharedName {
    Arc::new(RwLock::new(name.into()))
}

/// Joins ancestor chain names (outermost first) and the link's own name
/// with slashes.
pub(crate) fn join_link_path(name: &SharedName, ancestors: &[SharedName]) -> String {
    let mut parts: Vec<String> = ancestors.iter().rev().map(|a| a.read().clone()).collect();
    parts.push(name.read().clone());
    parts.join("/")
}

/// Failure policy: which error kinds kill a chain.
///
/// | Strictness | Conversion error | Process error |
/// |---|---|---|
/// | `Lax` | continue | continue |
/// | `Moderate` (default) | continue | kill |
/// | `Strict` | kill | kill |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Kill the chain on process errors only.
    #[default]
    Moderate,
    /// Never kill the chain.
    Lax,
    /// Kill the chain on conversion or process errors.
    Strict,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Moderate => "Moderate",
            Self::Lax => "Lax",
            Self::Strict => "Strict",
        };
        write!(f, "{name}")
    }
}

/// First-error-wins slot shared by every link of a chain.
#[derive(Clone, Default)]
pub struct ErrorSink {
    slot: Arc<Mutex<Option<ChainError>>>,
}

impl ErrorSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the error if the slot is empty. Later reports are dropped;
    /// the reporting link has already logged them.
    pub fn report(&self, err: ChainError) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// The stored error, if any.
    #[must_use]
    pub fn get(&self) -> Option<ChainError> {
        self.slot.lock().clone()
    }

    /// Whether an error is stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Where emitted values go: the link's output channel while running in a
/// chain, or a collection vector during [`DynLink::invoke`].
pub(crate) enum Emitter {
    /// Forward to the link's own output channel.
    Channel(PayloadSender),
    /// Collect for a synchronous caller.
    Collect(Vec<Payload>),
}

impl Emitter {
    async fn send(&mut self, payload: Payload) {
        match self {
            Self::Channel(tx) => {
                // A dropped receiver means the consumer is gone; emission
                // becomes a no-op rather than an error.
                let _ = tx.send(payload).await;
            }
            Self::Collect(collected) => collected.push(payload),
        }
    }

    fn sender(&self) -> Option<PayloadSender> {
        match self {
            Self::Channel(tx) => Some(tx.clone()),
            Self::Collect(_) => None,
        }
    }
}

/// Everything a link hook can reach while running: emission, bound
/// arguments, the logger, the cancellation token, and the command runner.
pub struct LinkContext<'a> {
    emitter: &'a mut Emitter,
    params: &'a ParamHolder,
    logger: &'a Logger,
    cancel: &'a CancellationToken,
    runner: &'a Arc<dyn CommandRunner>,
}

impl<'a> LinkContext<'a> {
    pub(crate) fn new(
        emitter: &'a mut Emitter,
        params: &'a ParamHolder,
        logger: &'a Logger,
        cancel: &'a CancellationToken,
        runner: &'a Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            emitter,
            params,
            logger,
            cancel,
            runner,
        }
    }

    /// Emits a data value to the link's output.
    pub async fn emit<T>(&mut self, value: T)
    where
        T: Any + Send + Sync + Clone + Serialize,
    {
        self.emitter.send(Payload::new(value)).await;
    }

    /// Emits an opaque handle (for example a boxed trait object).
    pub async fn emit_handle<T>(&mut self, value: T)
    where
        T: Any + Send + Sync,
    {
        self.emitter.send(Payload::handle(value)).await;
    }

    /// Emits an already-wrapped payload.
    pub async fn emit_payload(&mut self, payload: Payload) {
        self.emitter.send(payload).await;
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

    /// The link's logger, already scoped to its link path.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        self.logger
    }

    /// The cancellation token attached to this link.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The command-execution delegate.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        self.runner
    }

    /// A clone of the output-channel sender, when the link is running in a
    /// chain. `None` during [`DynLink::invoke`].
    pub(crate) fn output_sender(&self) -> Option<PayloadSender> {
        self.emitter.sender()
    }
}

/// A processing stage with a typed input.
///
/// Implementations declare parameters and permissions, then process one
/// adapted input at a time, emitting any number of outputs through the
/// context.
#[async_trait]
pub trait Link: Send + 'static {
    /// The input type values are adapted to before `process` runs.
    type Input: FromPayload;

    /// Parameters this link accepts.
    fn params(&self) -> Vec<Param> {
        Vec::new()
    }

    /// Permissions this link needs.
    fn permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    /// Called once before processing. Parameter validation runs right
    /// after this hook.
    async fn initialize(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let _ = cx;
        Ok(())
    }

    /// Processes one input.
    async fn process(&mut self, input: Self::Input, cx: &mut LinkContext<'_>)
        -> Result<(), LinkError>;

    /// Called once after the input stream ends, before the output channel
    /// closes. May still emit.
    async fn complete(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let _ = cx;
        Ok(())
    }

    /// Wraps this link for composition into a chain.
    fn into_link(self) -> Box<dyn DynLink>
    where
        Self: Sized,
    {
        Box::new(LinkBase::new(self))
    }

    /// Wraps this link with configuration applied.
    fn with_configs(self, configs: Vec<Config>) -> Box<dyn DynLink>
    where
        Self: Sized,
    {
        Box::new(LinkBase::new(self).configured(configs))
    }
}

/// The erased link object a chain composes and drives.
#[async_trait]
pub trait DynLink: Send {
    /// The link's name (defaults to its type name).
    fn name(&self) -> String;

    /// Renames the link.
    fn set_name(&mut self, name: &str);

    /// A human-readable title, falling back to the name.
    fn title(&self) -> String;

    /// Sets the title.
    fn set_title(&mut self, title: &str);

    /// Appends an enclosing chain's name to the link's ancestry.
    fn add_ancestor(&mut self, name: SharedName);

    /// The slash-joined path of enclosing chain names plus the link name.
    fn link_path(&self) -> String;

    /// Declared parameters with their current values.
    fn params(&self) -> Vec<Param>;

    /// Whether the link declares a parameter.
    fn has_param(&self, name: &str) -> bool;

    /// Whether an argument was explicitly bound.
    fn was_set(&self, name: &str) -> bool;

    /// The bound value for a name.
    fn arg(&self, name: &str) -> Option<ParamValue>;

    /// All bound arguments.
    fn args(&self) -> HashMap<String, ParamValue>;

    /// Binds an argument.
    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError>;

    /// Declared permissions.
    fn permissions(&self) -> Vec<Permission>;

    /// The construction-time error, if any.
    fn error(&self) -> Option<ChainError>;

    /// Stores a construction-time error.
    fn set_error(&mut self, err: ChainError);

    /// Whether a chain has claimed this link.
    fn is_claimed(&self) -> bool;

    /// Claims the link for a chain.
    fn claim(&mut self);

    /// Sets the logger level.
    fn set_log_level(&mut self, level: LogLevel);

    /// Sets the logger writer.
    fn set_log_writer(&mut self, writer: SharedWriter);

    /// Enables or disables log coloring.
    fn set_log_coloring(&mut self, color: bool);

    /// Attaches a cancellation token.
    fn set_cancel(&mut self, token: CancellationToken);

    /// Replaces the command-execution delegate.
    fn set_runner(&mut self, runner: Arc<dyn CommandRunner>);

    /// Starts the link in its own task: initialize, validate, process the
    /// input stream, complete, close the output. Returns the output
    /// receiver for the next stage.
    fn launch(
        self: Box<Self>,
        input: PayloadReceiver,
        sink: ErrorSink,
        strictness: Strictness,
    ) -> PayloadReceiver;

    /// Synchronous convenience: initialize, process each input, and return
    /// everything emitted. Stops at the first non-debug error. Does not
    /// run `complete`; callers that need it follow up with
    /// [`finish`](Self::finish).
    async fn invoke(&mut self, inputs: Vec<Payload>) -> Result<Vec<Payload>, ChainError>;

    /// Runs the link's `complete` hook outside of a chain. Emissions made
    /// during completion are discarded.
    async fn finish(&mut self) -> Result<(), LinkError>;
}

/// Owns a [`Link`] together with its registry, logger, ancestry, and
/// output channel, and adapts it to [`DynLink`].
pub struct LinkBase<L: Link> {
    link: L,
    holder: ParamHolder,
    logger: Logger,
    name: SharedName,
    title: String,
    ancestors: Vec<SharedName>,
    out_tx: Option<PayloadSender>,
    out_rx: Option<PayloadReceiver>,
    cancel: CancellationToken,
    runner: Arc<dyn CommandRunner>,
    claimed: bool,
    err: Option<ChainError>,
}

impl<L: Link> LinkBase<L> {
    /// Wraps a link, declaring its parameters. A declaration failure is
    /// stored and surfaces when a chain claims the link.
    pub fn new(link: L) -> Self {
        let (out_tx, out_rx) = stage_channel();
        let mut base = Self {
            holder: ParamHolder::new(),
            logger: Logger::new(),
            name: shared_name(short_type_name::<L>()),
            title: String::new(),
            ancestors: Vec::new(),
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            cancel: CancellationToken::new(),
            runner: Arc::new(ProcessRunner),
            claimed: false,
            err: None,
            link,
        };
        if let Err(e) = base.holder.declare_all(base.link.params()) {
            base.err = Some(e.into());
        }
        base
    }

    /// Applies configuration, storing the first failure.
    #[must_use]
    pub fn configured(mut self, configs: Vec<Config>) -> Self {
        self.apply_configs(configs);
        self
    }

    fn apply_configs(&mut self, configs: Vec<Config>) {
        for config in configs {
            if let Err(e) = config.apply(self) {
                self.err = Some(e.into());
                return;
            }
        }
    }
}

impl<L: Link> Configurable for LinkBase<L> {
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
        self.runner = runner;
    }

    fn set_cancel(&mut self, token: CancellationToken) {
        self.cancel = token;
    }
}

/// What a link error was classified as, for the strictness decision.
enum ErrorClass {
    Conversion,
    Process,
}

fn should_kill(class: &ErrorClass, strictness: Strictness) -> bool {
    match strictness {
        Strictness::Lax => false,
        Strictness::Moderate => matches!(class, ErrorClass::Process),
        Strictness::Strict => true,
    }
}

#[async_trait]
impl<L: Link> DynLink for LinkBase<L> {
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

    fn args(&self) -> HashMap<String, ParamValue> {
        self.holder.args()
    }

    fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        self.holder.set_arg(name, value)
    }

    fn permissions(&self) -> Vec<Permission> {
        self.link.permissions()
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

    fn set_cancel(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn set_runner(&mut self, runner: Arc<dyn CommandRunner>) {
        self.runner = runner;
    }

    fn launch(
        mut self: Box<Self>,
        mut input: PayloadReceiver,
        sink: ErrorSink,
        strictness: Strictness,
    ) -> PayloadReceiver {
        let out_rx = match self.out_rx.take() {
            Some(rx) => rx,
            None => stage_channel().1,
        };
        self.logger.set_link_path(&self.link_path());

        tokio::spawn(async move {
            let name = self.name();
            let LinkBase {
                mut link,
                holder,
                logger,
                out_tx,
                cancel,
                runner,
                ..
            } = *self;
            let mut emitter = match out_tx {
                Some(tx) => Emitter::Channel(tx),
                None => Emitter::Collect(Vec::new()),
            };
            let mut cx = LinkContext::new(&mut emitter, &holder, &logger, &cancel, &runner);

            let mut failed = false;
            if let Err(e) = link.initialize(&mut cx).await {
                sink.report(ChainError::Initialize {
                    link: name.clone(),
                    message: e.to_string(),
                });
                failed = true;
            }
            if let Err(e) = holder.validate() {
                sink.report(ChainError::InvalidParams {
                    link: name.clone(),
                    message: e.to_string(),
                });
                failed = true;
            }

            // After a failure the loop keeps draining so upstream senders
            // never block on a dead stage.
            let mut ignore_remaining = failed;
            while let Some(payload) = input.recv().await {
                if ignore_remaining {
                    continue;
                }
                let outcome = match L::Input::from_payload(payload) {
                    Err(e) if e.is_debug() => {
                        logger.log(
                            LogLevel::Debug,
                            "encountered debug error, continuing",
                            &[("error", e.to_string())],
                        );
                        None
                    }
                    Err(e) => Some((ErrorClass::Conversion, e.to_string())),
                    Ok(value) => match link.process(value, &mut cx).await {
                        Ok(()) => None,
                        Err(e) => Some((ErrorClass::Process, e.to_string())),
                    },
                };
                if let Some((class, message)) = outcome {
                    let label = match class {
                        ErrorClass::Conversion => "conversion error",
                        ErrorClass::Process => "process error",
                    };
                    logger.log(LogLevel::Error, label, &[("error", message.clone())]);
                    if should_kill(&class, strictness) {
                        sink.report(ChainError::Killed {
                            strictness: strictness.to_string(),
                            message: format!(
                                "failed to process item in link {name:?}: {message}"
                            ),
                        });
                        ignore_remaining = true;
                    }
                }
            }

            if let Err(e) = link.complete(&mut cx).await {
                sink.report(ChainError::Complete {
                    message: e.to_string(),
                });
            }
            // Dropping the emitter closes the output channel exactly once.
        });

        out_rx
    }

    async fn invoke(&mut self, inputs: Vec<Payload>) -> Result<Vec<Payload>, ChainError> {
        self.logger.set_link_path(&self.link_path());
        let name = self.name();
        let mut emitter = Emitter::Collect(Vec::new());
        {
            let mut cx = LinkContext::new(
                &mut emitter,
                &self.holder,
                &self.logger,
                &self.cancel,
                &self.runner,
            );
            if let Err(e) = self.link.initialize(&mut cx).await {
                return Err(ChainError::Initialize {
                    link: name,
                    message: e.to_string(),
                });
            }
            for payload in inputs {
                match L::Input::from_payload(payload) {
                    Err(e) if e.is_debug() => {
                        self.logger.log(
                            LogLevel::Debug,
                            "encountered debug error, continuing",
                            &[("error", e.to_string())],
                        );
                    }
                    Err(e) => {
                        return Err(ChainError::other(format!(
                            "failed to process item in link {name:?}: {e}"
                        )));
                    }
                    Ok(value) => {
                        if let Err(e) = self.link.process(value, &mut cx).await {
                            return Err(ChainError::other(format!(
                                "failed to process item in link {name:?}: {e}"
                            )));
                        }
                    }
                }
            }
        }
        match emitter {
            Emitter::Collect(collected) => Ok(collected),
            Emitter::Channel(_) => Ok(Vec::new()),
        }
    }

    async fn finish(&mut self) -> Result<(), LinkError> {
        let mut emitter = Emitter::Collect(Vec::new());
        let mut cx = LinkContext::new(
            &mut emitter,
            &self.holder,
            &self.logger,
            &self.cancel,
            &self.runner,
        );
        self.link.complete(&mut cx).await
    }
}
