//! Mock links for exercising pipelines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cfg::{CommandRunner, Param, ParamValue, Permission};
use crate::chain::Chain;
use crate::errors::{LinkError, ParamError};
use crate::link::{Link, LinkContext};
use crate::logging::{LogLevel, SharedWriter};
use crate::payload::{register_cast, Payload};
use crate::{payload_handle, payload_struct};

/// A string transformation bound as an opaque argument.
pub type StrOp = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Wraps a string transformation as a parameter value.
pub fn str_op(f: impl Fn(String) -> String + Send + Sync + 'static) -> ParamValue {
    let op: StrOp = Arc::new(f);
    ParamValue::opaque(op)
}

/// An integer transformation bound as an opaque argument.
pub type IntOp = Arc<dyn Fn(i64) -> i64 + Send + Sync>;

/// Wraps an integer transformation as a parameter value.
pub fn int_op(f: impl Fn(i64) -> i64 + Send + Sync + 'static) -> ParamValue {
    let op: IntOp = Arc::new(f);
    ParamValue::opaque(op)
}

/// Accepts strings, applies the optional `strOp`, and emits strings.
#[derive(Default)]
pub struct StrLink {
    op: Option<StrOp>,
}

impl StrLink {
    /// Creates a string link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for StrLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::opaque::<StrOp>(
            "strOp",
            "operation to apply to the input string",
        )]
    }

    async fn initialize(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.op = cx.arg_opaque::<StrOp>("strOp").ok();
        Ok(())
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.logger().debug(&format!("StrLink.process input={input:?}"));
        let output = match &self.op {
            Some(op) => op(input),
            None => input,
        };
        cx.emit(output).await;
        Ok(())
    }
}

/// Accepts integers, applies the optional `intOp`, and emits integers.
#[derive(Default)]
pub struct IntLink {
    op: Option<IntOp>,
}

impl IntLink {
    /// Creates an integer link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for IntLink {
    type Input = i64;

    fn params(&self) -> Vec<Param> {
        vec![Param::opaque::<IntOp>(
            "intOp",
            "operation to apply to the input int",
        )]
    }

    async fn initialize(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.op = cx.arg_opaque::<IntOp>("intOp").ok();
        Ok(())
    }

    async fn process(&mut self, input: i64, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let output = match &self.op {
            Some(op) => op(input),
            None => input,
        };
        cx.emit(output).await;
        Ok(())
    }
}

/// Parses strings into integers, silently skipping unparsable input.
#[derive(Default)]
pub struct StrIntLink;

impl StrIntLink {
    /// Creates a string-to-int link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for StrIntLink {
    type Input = String;

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        if let Ok(parsed) = input.parse::<i64>() {
            cx.emit(parsed).await;
        }
        Ok(())
    }
}

/// Forwards any payload unchanged.
#[derive(Default)]
pub struct EchoLink;

impl EchoLink {
    /// Creates an echo link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for EchoLink {
    type Input = Payload;

    async fn process(&mut self, input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit_payload(input).await;
        Ok(())
    }
}

/// Declares an optional, a required, and a defaulted parameter.
#[derive(Default)]
pub struct ParamsLink;

impl ParamsLink {
    /// Creates a params link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for ParamsLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("optional", "optional param"),
            Param::string("required", "required param").required(),
            Param::int("default", "default param").with_default(3),
        ]
    }

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Callback receiving the `argument` value during processing.
pub type ArgAssert = Arc<dyn Fn(Result<String, ParamError>) + Send + Sync>;

/// Hands its `argument` parameter to a callback on every processed value.
pub struct ArgCheckingLink {
    assert: ArgAssert,
}

impl ArgCheckingLink {
    /// Creates an arg-checking link around a callback.
    pub fn new(assert: impl Fn(Result<String, ParamError>) + Send + Sync + 'static) -> Self {
        Self {
            assert: Arc::new(assert),
        }
    }
}

#[async_trait]
impl Link for ArgCheckingLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::string("argument", "test param").with_default("default value")]
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        (self.assert)(cx.arg_as::<String>("argument"));
        cx.emit(input).await;
        Ok(())
    }
}

/// Callback receiving the full context during processing.
pub type ContextAssert = Arc<dyn Fn(&LinkContext<'_>) + Send + Sync>;

/// Declares shortcode-bound parameters of every shape and hands the
/// context to a callback.
pub struct CliArgsLink {
    assert: ContextAssert,
}

impl CliArgsLink {
    /// Creates a CLI-args link around a callback.
    pub fn new(assert: impl Fn(&LinkContext<'_>) + Send + Sync + 'static) -> Self {
        Self {
            assert: Arc::new(assert),
        }
    }
}

#[async_trait]
impl Link for CliArgsLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("string", "").with_shortcode("s"),
            Param::string("stringWithDefault", "")
                .with_shortcode("d")
                .with_default("default value"),
            Param::string_list("stringSlice", "").with_shortcode("slice"),
            Param::string_list("anotherSlice", "").with_shortcode("anotherslice"),
            Param::int("int", "").with_shortcode("i"),
            Param::opaque::<SharedWriter>("writer", "")
                .with_shortcode("w")
                .with_converter(|path| {
                    SharedWriter::file(path)
                        .map(ParamValue::opaque)
                        .map_err(|e| ParamError::Convert {
                            value: path.to_string(),
                            kind: "SharedWriter".to_string(),
                            message: e.to_string(),
                        })
                }),
        ]
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        (self.assert)(cx);
        cx.emit(input).await;
        Ok(())
    }
}

/// Declares an `argument` parameter validated by a regex.
pub struct RegexChecker {
    regex: Regex,
}

impl RegexChecker {
    /// Creates a regex-checking link.
    #[must_use]
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

#[async_trait]
impl Link for RegexChecker {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("argument", "argument to be validated by regex")
                .with_regex(self.regex.clone()),
        ]
    }

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Fails every `process` call.
#[derive(Default)]
pub struct ProcessErrorLink;

impl ProcessErrorLink {
    /// Creates a failing link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for ProcessErrorLink {
    type Input = String;

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Err(LinkError::process("mock process error"))
    }
}

/// Fails at the lifecycle phase named by its required `errorAt` parameter.
#[derive(Default)]
pub struct ErrorLink {
    error_at: String,
}

impl ErrorLink {
    /// Creates an error link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ErrorLink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("errorAt", "the phase at which the error is returned")
                .required()
                .with_regex(Regex::new("^initialize|process|complete$").expect("static regex")),
        ]
    }

    async fn initialize(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.error_at = cx.arg_as::<String>("errorAt").unwrap_or_default();
        if self.error_at == "initialize" {
            return Err(LinkError::process("initialize error"));
        }
        Ok(())
    }

    async fn process(&mut self, _input: Payload, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        if self.error_at == "process" {
            return Err(LinkError::process("process error"));
        }
        Ok(())
    }

    async fn complete(&mut self, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        if self.error_at == "complete" {
            return Err(LinkError::process("complete error"));
        }
        Ok(())
    }
}

/// Sleeps `delay_ms` before forwarding each value.
#[derive(Default)]
pub struct DelayLink;

impl DelayLink {
    /// Creates a delay link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for DelayLink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![Param::int("delay_ms", "milliseconds to wait on each value").with_default(10)]
    }

    async fn process(&mut self, input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let delay = cx.arg_as::<i64>("delay_ms")?.max(0);
        tokio::time::sleep(std::time::Duration::from_millis(delay.unsigned_abs())).await;
        cx.emit_payload(input).await;
        Ok(())
    }
}

/// Declares a `profile` parameter and forwards strings, for propagation
/// tests.
#[derive(Default)]
pub struct ProfileLink;

impl ProfileLink {
    /// Creates a profile link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for ProfileLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::string("profile", "profile parameter for propagation tests")]
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit(input).await;
        Ok(())
    }
}

/// Builds and drains a nested chain inside `process`, prefixing results.
#[derive(Default)]
pub struct ChainInsideChain {
    prefix: String,
}

impl ChainInsideChain {
    /// Creates a chain-inside-chain link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ChainInsideChain {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::string("prefix", "prefix for the inner chain's results")]
    }

    async fn initialize(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.prefix = cx.arg_as::<String>("prefix").unwrap_or_default();
        Ok(())
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let mut inner = Chain::new(vec![StrLink::new().into_link(), StrIntLink::new().into_link()]);
        inner.send(input).await.map_err(|e| LinkError::process(e.to_string()))?;
        inner.close();

        while let Some(value) = inner.recv_as::<i64>().await {
            cx.emit(format!("{}{}", self.prefix, value)).await;
        }
        match inner.error() {
            Some(e) => Err(LinkError::process(e.to_string())),
            None => Ok(()),
        }
    }
}

/// A log request processed by [`LoggingLink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    /// Level to log at.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

payload_struct!(Msg);

/// Logs each incoming [`Msg`] at its requested level.
#[derive(Default)]
pub struct LoggingLink;

impl LoggingLink {
    /// Creates a logging link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for LoggingLink {
    type Input = Msg;

    async fn process(&mut self, input: Msg, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        match input.level {
            LogLevel::None => {
                return Err(LinkError::process(format!(
                    "unknown log level: {}",
                    input.level
                )))
            }
            level => cx.logger().log(level, &input.message, &[]),
        }
        Ok(())
    }
}

/// Forwards payloads and declares configurable permissions.
#[derive(Default)]
pub struct PermissionsLink {
    permissions: Vec<Permission>,
}

impl PermissionsLink {
    /// Creates a permissions link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the permissions this link reports.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = permissions;
        self
    }
}

#[async_trait]
impl Link for PermissionsLink {
    type Input = Payload;

    fn permissions(&self) -> Vec<Permission> {
        self.permissions.clone()
    }

    async fn process(&mut self, input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit_payload(input).await;
        Ok(())
    }
}

/// Declares `argument` as a required string.
#[derive(Default)]
pub struct Collider1;

#[async_trait]
impl Link for Collider1 {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::string("argument", "argument to be collided").required()]
    }

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Declares `argument` as a required integer, colliding with
/// [`Collider1`].
#[derive(Default)]
pub struct Collider2;

#[async_trait]
impl Link for Collider2 {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::int("argument", "argument to be collided").required()]
    }

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Ok(())
    }
}

/// A minimal note record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// The note's text.
    pub text: String,
}

/// A note with an extra field, structurally adaptable down to [`Note`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedNote {
    /// The note's text.
    pub text: String,
    /// Additional detail.
    pub extra: String,
}

/// A note with a non-serialized private field, which structural copy
/// skips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardedNote {
    /// The note's text.
    pub text: String,
    /// Additional detail.
    pub extra: String,
    #[serde(skip)]
    secret: String,
}

impl GuardedNote {
    /// Creates a guarded note.
    #[must_use]
    pub fn new(text: &str, extra: &str, secret: &str) -> Self {
        Self {
            text: text.into(),
            extra: extra.into(),
            secret: secret.into(),
        }
    }

    /// The private field.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

payload_struct!(Note, DetailedNote, GuardedNote);

/// Accepts [`Note`] values and emits their text.
#[derive(Default)]
pub struct NoteLink;

impl NoteLink {
    /// Creates a note link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for NoteLink {
    type Input = Note;

    async fn process(&mut self, input: Note, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit(input.text).await;
        Ok(())
    }
}

/// Accepts [`Note`] values and re-emits them as structs.
#[derive(Default)]
pub struct NoteEchoLink;

impl NoteEchoLink {
    /// Creates a note echo link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for NoteEchoLink {
    type Input = Note;

    async fn process(&mut self, input: Note, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit(input).await;
        Ok(())
    }
}

/// A capability consumed through a trait object.
pub trait Mocker: Send + Sync {
    /// Produces the mocked message.
    fn mock(&self) -> String;
}

/// A concrete type satisfying [`Mocker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mockable {
    /// Message returned by [`Mocker::mock`].
    pub msg: String,
}

impl Mocker for Mockable {
    fn mock(&self) -> String {
        self.msg.clone()
    }
}

payload_handle!(Box<dyn Mocker>);

/// Accepts any registered [`Mocker`] and emits its message.
#[derive(Default)]
pub struct InterfaceLink;

impl InterfaceLink {
    /// Creates an interface link, registering the casts it accepts.
    #[must_use]
    pub fn new() -> Self {
        register_cast::<Mockable, Box<dyn Mocker>, _>(|m| Box::new(m));
        Self
    }
}

#[async_trait]
impl Link for InterfaceLink {
    type Input = Box<dyn Mocker>;

    async fn process(
        &mut self,
        input: Box<dyn Mocker>,
        cx: &mut LinkContext<'_>,
    ) -> Result<(), LinkError> {
        cx.emit(input.mock()).await;
        Ok(())
    }
}

/// Accepts any registered [`Mocker`] and forwards the handle.
#[derive(Default)]
pub struct MockerEchoLink;

impl MockerEchoLink {
    /// Creates a mocker echo link, registering the casts it accepts.
    #[must_use]
    pub fn new() -> Self {
        register_cast::<Mockable, Box<dyn Mocker>, _>(|m| Box::new(m));
        Self
    }
}

#[async_trait]
impl Link for MockerEchoLink {
    type Input = Box<dyn Mocker>;

    async fn process(
        &mut self,
        input: Box<dyn Mocker>,
        cx: &mut LinkContext<'_>,
    ) -> Result<(), LinkError> {
        cx.emit_handle(input).await;
        Ok(())
    }
}

/// Discards input and emits `"completed"` from its complete hook.
#[derive(Default)]
pub struct CompleterLink;

impl CompleterLink {
    /// Creates a completer link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for CompleterLink {
    type Input = String;

    async fn process(&mut self, _input: String, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        Ok(())
    }

    async fn complete(&mut self, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit("completed".to_string()).await;
        Ok(())
    }
}

/// Counts initialize and complete calls, for worker lifecycle tests.
pub struct TrackingLink {
    inits: Arc<AtomicUsize>,
    completes: Arc<AtomicUsize>,
}

impl TrackingLink {
    /// Creates a tracking link over shared counters.
    #[must_use]
    pub fn new(inits: Arc<AtomicUsize>, completes: Arc<AtomicUsize>) -> Self {
        Self { inits, completes }
    }
}

#[async_trait]
impl Link for TrackingLink {
    type Input = Payload;

    async fn initialize(&mut self, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn process(&mut self, input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        cx.emit_payload(input).await;
        Ok(())
    }

    async fn complete(&mut self, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Runs the configured command with the input as its argument, emitting
/// one value per output line.
#[derive(Default)]
pub struct ExecLink;

impl ExecLink {
    /// Creates an exec link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for ExecLink {
    type Input = String;

    fn params(&self) -> Vec<Param> {
        vec![Param::string("cmd", "command to execute for each input").with_default("echo")]
    }

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let program = cx.arg_as::<String>("cmd")?;
        let mut command = tokio::process::Command::new(program);
        command.arg(&input);

        let runner = cx.runner().clone();
        let mut lines = Vec::new();
        runner
            .run_streamed(command, &mut |line| lines.push(line.to_string()))
            .await?;
        for line in lines {
            cx.emit(line).await;
        }
        Ok(())
    }
}

/// A [`CommandRunner`] that replays canned lines instead of spawning
/// processes.
pub struct MockRunner {
    lines: Vec<String>,
    executed: Arc<AtomicBool>,
}

impl MockRunner {
    /// Creates a mock runner replaying the given lines.
    #[must_use]
    pub fn new(lines: Vec<String>, executed: Arc<AtomicBool>) -> Self {
        Self { lines, executed }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run_streamed(
        &self,
        _cmd: tokio::process::Command,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LinkError> {
        self.executed.store(true, Ordering::SeqCst);
        for line in &self.lines {
            on_line(line);
        }
        Ok(())
    }

    async fn run_captured(&self, _cmd: tokio::process::Command) -> Result<Vec<u8>, LinkError> {
        self.executed.store(true, Ordering::SeqCst);
        Ok(self.lines.join("\n").into_bytes())
    }
}
