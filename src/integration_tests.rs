//! Cross-component scenarios: chains end to end, nesting, fan-out,
//! hoppers, modules, and the parallel wrapper.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::cfg::{
    with_arg, with_cli_args, with_env, with_runner, CommandRunner, Metadata, Param, ParamValue,
    Permission, Platform,
};
use crate::chain::Chain;
use crate::errors::{ChainError, LinkError, ParamError};
use crate::hopper::Hopper;
use crate::link::{DynLink, Link, Strictness};
use crate::logging::{CaptureBuffer, LogLevel};
use crate::module::{outputter_constructor, Module};
use crate::multichain::MultiChain;
use crate::outputter::{Outputter, OutputterContext};
use crate::parallel::{link_constructor, parallelize, preconfigured};
use crate::payload::Payload;
use crate::sinks::{JsonSink, WriterSink};
use crate::testing::mocks::{
    int_op, str_op, ArgCheckingLink, ChainInsideChain, CliArgsLink, CompleterLink, DelayLink,
    DetailedNote, ErrorLink, ExecLink, IntLink, InterfaceLink, LoggingLink, MockRunner, Mockable,
    Msg, ParamsLink, PermissionsLink, ProcessErrorLink, ProfileLink, RegexChecker, StrIntLink,
    StrLink, TrackingLink,
};

fn boxed(chain: Chain) -> Box<dyn DynLink> {
    Box::new(chain)
}

async fn collect_strings(chain: &mut Chain) -> Vec<String> {
    let mut received = Vec::new();
    while let Some(value) = chain.recv_as::<String>().await {
        received.push(value);
    }
    received
}

async fn collect_ints(chain: &mut Chain) -> Vec<i64> {
    let mut received = Vec::new();
    while let Some(value) = chain.recv_as::<i64>().await {
        received.push(value);
    }
    received
}

mod chains {
    use super::*;

    #[tokio::test]
    async fn single_link_passes_values_through() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()]);

        for _ in 0..3 {
            chain.send("hello".to_string()).await.unwrap();
        }
        chain.close();

        let received = collect_strings(&mut chain).await;
        assert_eq!(received, vec!["hello", "hello", "hello"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn linear_conversion_preserves_order_and_transforms() {
        // S1: string in, doubled int out.
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
            IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i * 2))]),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();

        assert_eq!(collect_ints(&mut chain).await, vec![246]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn send_all_keeps_submission_order() {
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
            IntLink::new().into_link(),
        ]);

        chain
            .send_all(["123".to_string(), "456".to_string(), "789".to_string()])
            .await
            .unwrap();
        chain.close();

        assert_eq!(collect_ints(&mut chain).await, vec![123, 456, 789]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn close_without_input_is_clean() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()]);
        chain.close();
        chain.close();
        chain.wait().await;
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn struct_values_adapt_structurally() {
        let mut chain = Chain::new(vec![
            crate::testing::mocks::NoteLink::new().into_link(),
            StrLink::new().into_link(),
        ]);

        chain
            .send(DetailedNote {
                text: "123".into(),
                extra: String::new(),
            })
            .await
            .unwrap();
        chain.close();

        assert_eq!(collect_strings(&mut chain).await, vec!["123"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn interface_values_adapt_through_registered_casts() {
        let mut chain = Chain::new(vec![
            InterfaceLink::new().into_link(),
            StrLink::new().into_link(),
        ]);

        chain
            .send(Mockable {
                msg: "mocking".into(),
            })
            .await
            .unwrap();
        chain.close();

        assert_eq!(chain.recv_as::<String>().await.as_deref(), Some("mocking"));
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn null_input_is_skipped_at_debug_level() {
        let capture = CaptureBuffer::new();
        let mut chain = Chain::new(vec![
            InterfaceLink::new().into_link(),
            StrLink::new().into_link(),
        ])
        .with_log_writer(capture.writer())
        .with_log_level(LogLevel::Debug);

        chain.send_payload(Payload::null()).await.unwrap();
        chain.close();

        assert_eq!(chain.recv_as::<String>().await, None);
        assert!(chain.error().is_none());
        assert!(
            capture.contents().contains("input is absent"),
            "{}",
            capture.contents()
        );
    }

    #[tokio::test]
    async fn chains_nest_as_links() {
        let inner = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
        ]);
        let mut outer = Chain::new(vec![boxed(inner), IntLink::new().into_link()]);

        outer.send("123".to_string()).await.unwrap();
        outer.close();

        assert_eq!(collect_ints(&mut outer).await, vec![123]);
        assert!(outer.error().is_none());
    }

    #[tokio::test]
    async fn complete_hook_can_emit() {
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            CompleterLink::new().into_link(),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();

        assert_eq!(collect_strings(&mut chain).await, vec!["completed"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn params_aggregate_across_links_and_outputters() {
        let chain = Chain::new(vec![
            ParamsLink::new().into_link(),
            StrLink::new().into_link(),
        ])
        .with_outputters(vec![WriterSink::new().into_outputter()]);

        // optional + required + default from ParamsLink, strOp from
        // StrLink, writer from the sink.
        assert_eq!(chain.params().len(), 5);
        assert!(chain.has_param("optional"));
        assert!(chain.has_param("required"));
        assert!(chain.has_param("default"));
        assert!(chain.has_param("writer"));
        assert!(!chain.has_param("not_a_param"));
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn chain_level_args_reach_links() {
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let mut chain = Chain::new(vec![
            ArgCheckingLink::new(move |arg| sink.lock().push(arg)).into_link()
        ])
        .with_configs(vec![with_arg("argument", "123")]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "link did not run");
        assert_eq!(seen[0].as_deref().unwrap(), "123");
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn link_args_override_chain_args() {
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let mut chain = Chain::new(vec![ArgCheckingLink::new(move |arg| sink.lock().push(arg))
            .with_configs(vec![with_arg("argument", "123")])])
        .with_configs(vec![with_arg("argument", "456")]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert_eq!(seen.lock()[0].as_deref().unwrap(), "123");
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn defaults_apply_when_nothing_is_bound() {
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let mut chain = Chain::new(vec![
            ArgCheckingLink::new(move |arg| sink.lock().push(arg)).into_link()
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert_eq!(seen.lock()[0].as_deref().unwrap(), "default value");
    }

    #[tokio::test]
    async fn programmatic_set_arg_wins_over_cli() {
        // P5: precedence.
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let mut chain = Chain::new(vec![
            ArgCheckingLink::new(move |arg| sink.lock().push(arg)).into_link()
        ])
        .with_configs(vec![with_cli_args(["-argument", "cli value"])]);

        chain
            .set_arg("argument", ParamValue::Str("programmatic".into()))
            .unwrap();

        chain.send("x".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert_eq!(seen.lock()[0].as_deref().unwrap(), "programmatic");
    }

    #[tokio::test]
    async fn env_binding_feeds_declared_params() {
        std::env::set_var("CHAINFLOW_IT_ARGUMENT", "env value");
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let mut chain = Chain::new(vec![ArgCheckingLink::new(move |arg| sink.lock().push(arg))
            .with_configs(vec![with_env("CHAINFLOW_IT")])]);

        chain.send("x".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert_eq!(seen.lock()[0].as_deref().unwrap(), "env value");
        std::env::remove_var("CHAINFLOW_IT_ARGUMENT");
    }

    #[tokio::test]
    async fn required_param_without_value_fails_the_chain() {
        // S5 / P6.
        let mut chain = Chain::new(vec![ParamsLink::new().into_link()]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(
            err.to_string().contains("parameter \"required\" is required"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn regex_validation_failure_names_the_pattern() {
        // P7.
        let mut chain = Chain::new(vec![
            RegexChecker::new(Regex::new("^[0-9]+$").unwrap()).into_link()
        ])
        .with_configs(vec![with_arg("argument", "does not match")]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(
            err.to_string().contains(
                "error validating regex: value \"does not match\" does not match regex \"^[0-9]+$\""
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn mistyped_args_fail_the_chain() {
        let mut chain = Chain::new(vec![ParamsLink::new().into_link()]).with_configs(vec![
            with_arg("optional", 123),
            with_arg("required", ""),
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(
            err.to_string().contains(
                "parameter \"optional\" expects type \"string\", but argument value is type \"int\""
            ),
            "{err}"
        );
    }

    #[derive(Default, Clone)]
    struct CliObserved {
        string: Option<String>,
        string_with_default: Option<String>,
        string_slice: Option<Vec<String>>,
        another_slice: Option<Vec<String>>,
        int: Option<i64>,
        wrote_to_writer: bool,
    }

    #[tokio::test]
    async fn cli_tokens_bind_by_shortcode_and_convert() {
        // S6, plus the writer-converter and empty-slice edge cases.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli-writer.txt");
        let path_str = path.to_string_lossy().to_string();

        let observed: Arc<Mutex<CliObserved>> = Arc::default();
        let sink = observed.clone();

        let mut chain = Chain::new(vec![CliArgsLink::new(move |cx| {
            let mut observed = sink.lock();
            observed.string = cx.arg_as::<String>("string").ok();
            observed.string_with_default = cx.arg_as::<String>("stringWithDefault").ok();
            observed.string_slice = cx.arg_as::<Vec<String>>("stringSlice").ok();
            observed.another_slice = cx.arg_as::<Vec<String>>("anotherSlice").ok();
            observed.int = cx.arg_as::<i64>("int").ok();
            if let Ok(writer) = cx.arg_opaque::<crate::logging::SharedWriter>("writer") {
                writer.write_raw(b"hello").unwrap();
                observed.wrote_to_writer = true;
            }
        })
        .into_link()])
        .with_configs(vec![with_cli_args([
            "-s",
            "hello",
            "-slice",
            "hello,world",
            "-i",
            "123",
            "-w",
            path_str.as_str(),
            "-anotherslice",
            "",
        ])]);

        chain.send(String::new()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_none());
        let observed = observed.lock().clone();
        assert_eq!(observed.string.as_deref(), Some("hello"));
        assert_eq!(observed.string_with_default.as_deref(), Some("default value"));
        assert_eq!(
            observed.string_slice,
            Some(vec!["hello".to_string(), "world".to_string()])
        );
        assert_eq!(observed.another_slice, Some(Vec::new()));
        assert_eq!(observed.int, Some(123));
        assert!(observed.wrote_to_writer);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn cli_regex_failures_fail_the_chain() {
        let mut chain = Chain::new(vec![
            RegexChecker::new(Regex::new("^[0-9]+$").unwrap()).into_link()
        ])
        .with_configs(vec![with_cli_args(["-argument", "does not match"])]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        assert!(chain
            .error()
            .unwrap()
            .to_string()
            .contains("does not match regex"));
    }

    #[tokio::test]
    async fn cli_conversion_failures_fail_the_chain() {
        let mut chain = Chain::new(vec![ParamsLink::new().into_link()]).with_configs(vec![
            with_cli_args(["-default", "should be integer", "-required", "present"]),
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(
            err.to_string()
                .contains("failed to convert value \"should be integer\" to type \"int\""),
            "{err}"
        );
    }

    #[tokio::test]
    async fn outputters_receive_final_values() {
        let capture = CaptureBuffer::new();
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("test.json");

        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
        ])
        .with_configs(vec![
            with_arg("writer", ParamValue::opaque(capture.writer())),
            with_arg("jsonoutfile", json_path.to_string_lossy().to_string()),
        ])
        .with_outputters(vec![
            WriterSink::new().into_outputter(),
            JsonSink::new().into_outputter(),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_none(), "{:?}", chain.error());
        assert_eq!(capture.contents(), "123\n");
        assert_eq!(std::fs::read_to_string(&json_path).unwrap(), "[123]\n");
    }

    #[tokio::test]
    async fn outputters_before_configs_behave_the_same() {
        let capture = CaptureBuffer::new();
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("test.json");

        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
        ])
        .with_outputters(vec![
            WriterSink::new().into_outputter(),
            JsonSink::new().into_outputter(),
        ])
        .with_configs(vec![
            with_arg("writer", ParamValue::opaque(capture.writer())),
            with_arg("jsonoutfile", json_path.to_string_lossy().to_string()),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_none());
        assert_eq!(capture.contents(), "123\n");
        assert_eq!(std::fs::read_to_string(&json_path).unwrap(), "[123]\n");
    }

    struct UndeclaredParamOutputter {
        seen: Arc<Mutex<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl Outputter for UndeclaredParamOutputter {
        type Input = Payload;

        fn params(&self) -> Vec<Param> {
            vec![Param::string(
                "declared-param",
                "a parameter this outputter declares",
            )]
        }

        async fn initialize(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
            *self.seen.lock() = cx.arg_as::<String>("profile").ok();
            Ok(())
        }

        async fn output(
            &mut self,
            _value: Payload,
            _cx: &mut OutputterContext<'_>,
        ) -> Result<(), LinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn outputters_receive_undeclared_link_params() {
        let seen: Arc<Mutex<Option<String>>> = Arc::default();

        let mut chain = Chain::new(vec![
            ProfileLink::new().with_configs(vec![with_arg("profile", "test-profile")])
        ])
        .with_configs(vec![with_arg("declared-param", "test-value")])
        .with_outputters(vec![UndeclaredParamOutputter { seen: seen.clone() }.into_outputter()]);

        chain.send("test".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_none(), "{:?}", chain.error());
        assert_eq!(seen.lock().as_deref(), Some("test-profile"));
    }

    #[tokio::test]
    async fn moderate_chains_survive_conversion_but_die_on_process_errors() {
        // S4 / P9.
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            ProcessErrorLink::new().into_link(),
        ]);

        chain.send(1i64).await.unwrap(); // conversion error
        let _ = chain.send("1".to_string()).await; // process error
        chain.close();
        chain.wait().await;

        let err = chain.error().expect("moderate chain should fail");
        assert!(err.to_string().contains("process error"), "{err}");
    }

    #[tokio::test]
    async fn lax_chains_survive_everything() {
        // P8.
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            ProcessErrorLink::new().into_link(),
        ])
        .with_strictness(Strictness::Lax);

        chain.send(1i64).await.unwrap();
        chain.send("1".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn strict_chains_die_on_conversion_errors() {
        // P10.
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            ProcessErrorLink::new().into_link(),
        ])
        .with_strictness(Strictness::Strict);

        chain.send(1i64).await.unwrap();
        let _ = chain.send("1".to_string()).await;
        chain.close();
        chain.wait().await;

        assert!(chain.error().is_some());
    }

    #[tokio::test]
    async fn claimed_links_cannot_be_reused() {
        // P1, adapted: ownership makes literal reuse a compile error, so
        // the runtime claim check is exercised directly.
        let mut link = StrLink::new().into_link();
        link.claim();

        let chain = Chain::new(vec![link]);
        let err = chain.error().expect("claimed link must be rejected");
        assert!(
            err.to_string().contains("is in-use by another chain"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn sends_after_close_are_rejected() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()]);
        chain.close();

        let err = chain.send("x".to_string()).await.unwrap_err();
        assert!(matches!(err, ChainError::Closed));
        assert!(chain.error().is_some());
    }

    #[tokio::test]
    async fn initialize_errors_surface() {
        let mut chain = Chain::new(vec![
            ErrorLink::new().with_configs(vec![with_arg("errorAt", "initialize")])
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        assert!(chain
            .error()
            .unwrap()
            .to_string()
            .contains("initialize error"));
    }

    #[tokio::test]
    async fn process_errors_surface() {
        let mut chain = Chain::new(vec![
            ErrorLink::new().with_configs(vec![with_arg("errorAt", "process")])
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(
            err.to_string().contains("process error: process error"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn complete_errors_surface() {
        let mut chain = Chain::new(vec![
            ErrorLink::new().with_configs(vec![with_arg("errorAt", "complete")])
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        assert!(chain
            .error()
            .unwrap()
            .to_string()
            .contains("complete error"));
    }

    #[tokio::test]
    async fn links_can_run_whole_chains_inside_process() {
        let mut chain = Chain::new(vec![
            ChainInsideChain::new().into_link(),
            StrLink::new().into_link(),
        ])
        .with_configs(vec![with_arg("prefix", "test-prefix")]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();

        assert_eq!(collect_strings(&mut chain).await, vec!["test-prefix123"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn nested_chain_links_take_direct_args() {
        let mut chain = Chain::new(vec![
            ChainInsideChain::new().with_configs(vec![with_arg("prefix", "test-prefix")]),
            StrLink::new().into_link(),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();

        assert_eq!(collect_strings(&mut chain).await, vec!["test-prefix123"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn delayed_links_still_deliver() {
        let capture = CaptureBuffer::new();

        let mut chain = Chain::new(vec![
            DelayLink::new().into_link(),
            StrLink::new().into_link(),
        ])
        .with_outputters(vec![WriterSink::new().into_outputter()])
        .with_configs(vec![
            with_arg("writer", ParamValue::opaque(capture.writer())),
            with_arg("delay_ms", 1),
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        assert_eq!(capture.contents(), "123\n");
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn added_links_extend_the_chain() {
        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrIntLink::new().into_link(),
        ])
        .with_added_links(vec![
            IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i + 1))])
        ]);

        chain.send("123".to_string()).await.unwrap();
        chain.close();

        assert_eq!(collect_ints(&mut chain).await, vec![124]);
    }

    #[tokio::test]
    async fn typed_receive_returns_none_on_adapt_failure() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()]);
        chain.send("abc".to_string()).await.unwrap();
        chain.close();

        assert_eq!(chain.recv_as::<i64>().await, None);
    }

    #[tokio::test]
    async fn dependency_injection_replaces_command_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let runner: Arc<dyn CommandRunner> = Arc::new(MockRunner::new(
            vec![
                "injected1.example.com".to_string(),
                "injected2.example.com".to_string(),
                "injected3.example.com".to_string(),
            ],
            executed.clone(),
        ));

        let mut chain =
            Chain::new(vec![ExecLink::new().with_configs(vec![with_runner(runner)])]);

        chain.send("example.com".to_string()).await.unwrap();
        chain.close();

        let received = collect_strings(&mut chain).await;
        assert_eq!(
            received,
            vec![
                "injected1.example.com",
                "injected2.example.com",
                "injected3.example.com"
            ]
        );
        assert!(executed.load(Ordering::SeqCst), "runner did not execute");
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn missing_binaries_fail_processing() {
        let mut chain = Chain::new(vec![
            ExecLink::new().with_configs(vec![with_arg("cmd", "chainflow-no-such-binary")])
        ]);

        let _ = chain.send("123".to_string()).await;
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(err.to_string().contains("failed to start"), "{err}");
    }

    #[tokio::test]
    async fn log_records_carry_the_link_path() {
        let capture = CaptureBuffer::new();
        let mut chain = Chain::new(vec![LoggingLink::new().into_link()])
            .with_name("test-chain")
            .with_log_writer(capture.writer());

        chain
            .send(Msg {
                level: LogLevel::Info,
                message: "test".into(),
            })
            .await
            .unwrap();
        chain.close();
        chain.wait().await;

        assert!(
            capture
                .contents()
                .contains("level=INFO link=test-chain/LoggingLink msg=test"),
            "{}",
            capture.contents()
        );
    }

    #[tokio::test]
    async fn log_level_filters_lower_records() {
        let capture = CaptureBuffer::new();
        let mut chain = Chain::new(vec![LoggingLink::new().into_link()])
            .with_name("test-chain")
            .with_log_writer(capture.writer())
            .with_log_level(LogLevel::Warn);

        for (level, message) in [
            (LogLevel::Debug, "Debug message"),
            (LogLevel::Info, "Info message"),
            (LogLevel::Warn, "Warn message"),
            (LogLevel::Error, "Error message"),
        ] {
            chain
                .send(Msg {
                    level,
                    message: message.into(),
                })
                .await
                .unwrap();
        }
        chain.close();
        chain.wait().await;

        let contents = capture.contents();
        assert!(contents.contains("level=WARN link=test-chain/LoggingLink msg=\"Warn message\""));
        assert!(contents.contains("level=ERROR link=test-chain/LoggingLink msg=\"Error message\""));
        assert!(!contents.contains("Debug message"));
        assert!(!contents.contains("Info message"));
    }

    #[tokio::test]
    async fn permissions_union_is_deduplicated() {
        let chain = Chain::new(vec![
            PermissionsLink::new()
                .with_permissions(vec![Permission::new(Platform::Aws, "permission1")])
                .into_link(),
            PermissionsLink::new()
                .with_permissions(vec![Permission::new(Platform::Gcp, "permission2")])
                .into_link(),
            PermissionsLink::new()
                .with_permissions(vec![
                    Permission::new(Platform::Azure, "permission3"),
                    Permission::new(Platform::Azure, "permission3"),
                ])
                .into_link(),
        ]);

        let rendered: Vec<String> = chain.permissions().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["AWS:permission1", "GCP:permission2", "Azure:permission3"]
        );
    }

    #[tokio::test]
    async fn permissions_map_groups_by_platform() {
        let chain = Chain::new(vec![
            PermissionsLink::new()
                .with_permissions(vec![
                    Permission::new(Platform::Aws, "permissionA"),
                    Permission::new(Platform::Aws, "permissionB"),
                ])
                .into_link(),
            PermissionsLink::new()
                .with_permissions(vec![
                    Permission::new(Platform::Gcp, "permissionA"),
                    Permission::new(Platform::Gcp, "permissionB"),
                ])
                .into_link(),
        ]);

        let map = chain.permissions_map();
        assert_eq!(map.len(), 2);
        for permissions in map.values() {
            assert_eq!(permissions, &vec!["permissionA".to_string(), "permissionB".to_string()]);
        }
    }

    #[tokio::test]
    async fn start_feeds_the_bound_input_param() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()])
            .with_input_param(Param::string("seed", "initial value"))
            .with_configs(vec![with_arg("seed", "go")]);

        chain.start().await.unwrap();

        assert_eq!(collect_strings(&mut chain).await, vec!["go"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn start_without_an_input_param_fails() {
        let mut chain = Chain::new(vec![StrLink::new().into_link()]);
        let err = chain.start().await.unwrap_err();
        assert!(err.to_string().contains("no input param"), "{err}");
    }

    #[tokio::test]
    async fn no_permissions_is_an_empty_union() {
        let chain = Chain::new(vec![
            StrLink::new().into_link(),
            StrLink::new().into_link(),
        ]);
        assert!(chain.permissions().is_empty());
    }
}

mod multichains {
    use super::*;

    #[tokio::test]
    async fn fan_out_applies_every_sibling() {
        // S2.
        let mut multi = MultiChain::new(vec![
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i + 1))])
            ])),
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i - 1))])
            ])),
        ]);

        multi.send(1i64).await.unwrap();
        multi.close();

        let mut received = Vec::new();
        while let Some(value) = multi.recv_as::<i64>().await {
            received.push(value);
        }
        assert!(received.contains(&2));
        assert!(received.contains(&0));
        assert!(multi.error().is_none());
    }

    #[tokio::test]
    async fn fan_out_multiplicity_is_siblings_times_inputs() {
        // P4: 2 siblings, 3 inputs, 6 outputs.
        let mut multi = MultiChain::new(vec![
            boxed(Chain::new(vec![
                StrLink::new().into_link(),
                StrIntLink::new().into_link(),
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i + 1))]),
            ])),
            boxed(Chain::new(vec![
                StrLink::new().into_link(),
                StrIntLink::new().into_link(),
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i - 1))]),
            ])),
        ]);

        multi
            .send_all(["10".to_string(), "20".to_string(), "30".to_string()])
            .await
            .unwrap();
        multi.close();

        let mut received = Vec::new();
        while let Some(value) = multi.recv_as::<i64>().await {
            received.push(value);
        }

        let expected = [9, 11, 19, 21, 29, 31];
        assert_eq!(received.len(), expected.len());
        for value in expected {
            assert!(received.contains(&value), "missing {value} in {received:?}");
        }
    }

    #[tokio::test]
    async fn multichains_nest_inside_chains() {
        let multi = MultiChain::new(vec![
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i + 1))])
            ])),
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i - 1))])
            ])),
        ]);

        let mut chain = Chain::new(vec![
            IntLink::new().into_link(),
            Box::new(multi),
            IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i * 2))]),
        ]);

        chain.send(1i64).await.unwrap();
        chain.close();

        assert_eq!(collect_ints(&mut chain).await, vec![4, 0]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn outputters_collect_merged_results() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("multi.json");

        let mut multi = MultiChain::new(vec![
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i + 1))])
            ])),
            boxed(Chain::new(vec![
                IntLink::new().with_configs(vec![with_arg("intOp", int_op(|i| i - 1))])
            ])),
        ])
        .with_configs(vec![with_arg(
            "jsonoutfile",
            json_path.to_string_lossy().to_string(),
        )])
        .with_outputters(vec![JsonSink::new().into_outputter()]);

        multi.send(1i64).await.unwrap();
        multi.close();
        multi.wait().await;

        assert!(multi.error().is_none(), "{:?}", multi.error());
        let content = std::fs::read_to_string(&json_path).unwrap();
        assert!(
            content == "[2,0]\n" || content == "[0,2]\n",
            "unexpected content {content:?}"
        );
    }

    #[tokio::test]
    async fn required_params_fail_multichains_too() {
        let mut multi = MultiChain::new(vec![
            boxed(Chain::new(vec![ParamsLink::new().into_link()])),
            boxed(Chain::new(vec![ParamsLink::new().into_link()])),
        ]);

        let _ = multi.send("data".to_string()).await;
        multi.close();
        multi.wait().await;

        assert!(multi
            .error()
            .unwrap()
            .to_string()
            .contains("parameter \"required\" is required"));
    }

    #[tokio::test]
    async fn added_links_are_rejected() {
        let mut multi = MultiChain::new(vec![boxed(Chain::new(vec![StrLink::new().into_link()]))])
            .with_added_links(vec![StrLink::new().into_link()]);

        multi.send("x".to_string()).await.unwrap_err();
        multi.close();
        multi.wait().await;

        assert!(matches!(
            multi.error(),
            Some(ChainError::AddedLinksUnsupported)
        ));
    }
}

mod hoppers {
    use super::*;

    #[tokio::test]
    async fn hopper_merges_chains_into_a_containing_chain() {
        let mut chain1 = Chain::new(vec![
            InterfaceLink::new().into_link(),
            StrLink::new().into_link(),
        ]);
        let mut chain2 = Chain::new(vec![StrLink::new().into_link()]);

        let mut outer = Chain::new(vec![
            Hopper::boxed(vec![chain1.tap(), chain2.tap()]),
            StrIntLink::new().into_link(),
        ]);

        chain1.send(Mockable { msg: "123".into() }).await.unwrap();
        chain2.send("456".to_string()).await.unwrap();
        chain1.close();
        chain2.close();
        outer.close();

        let received = collect_ints(&mut outer).await;
        assert!(received.contains(&123));
        assert!(received.contains(&456));
        assert!(outer.error().is_none());
        assert!(chain1.error().is_none());
        assert!(chain2.error().is_none());
    }

    #[tokio::test]
    async fn hopper_drains_chains_in_declared_order() {
        // S3.
        let mut chain_a = Chain::new(vec![StrLink::new().into_link()]);
        let mut chain_b = Chain::new(vec![StrLink::new().into_link()]);

        let mut outer = Chain::new(vec![Hopper::boxed(vec![chain_a.tap(), chain_b.tap()])]);

        chain_a.send("hello".to_string()).await.unwrap();
        chain_b.send("world".to_string()).await.unwrap();
        chain_a.close();
        chain_b.close();
        outer.close();

        assert_eq!(collect_strings(&mut outer).await, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn hopper_composes_with_multichains() {
        let add_suffix = |suffix: &str| {
            let suffix = suffix.to_string();
            str_op(move |s| format!("{s}:{suffix}"))
        };

        let mut multi1 = MultiChain::new(vec![
            boxed(Chain::new(vec![
                StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("multichain1A"))])
            ])),
            boxed(Chain::new(vec![
                StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("multichain1B"))])
            ])),
        ]);
        let mut multi2 = MultiChain::new(vec![
            boxed(Chain::new(vec![
                StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("multichain2A"))])
            ])),
            boxed(Chain::new(vec![
                StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("multichain2B"))])
            ])),
        ]);

        let hopper_chain = Chain::new(vec![
            Hopper::boxed(vec![multi1.tap(), multi2.tap()]),
            StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("hopper"))]),
        ]);

        let mut outer = Chain::new(vec![
            StrLink::new().into_link(),
            boxed(hopper_chain),
            StrLink::new().with_configs(vec![with_arg("strOp", add_suffix("final"))]),
        ]);

        multi1.send("first".to_string()).await.unwrap();
        multi2.send("second".to_string()).await.unwrap();
        multi1.close();
        multi2.close();
        outer.close();

        let received = collect_strings(&mut outer).await;
        let expected = [
            "first:multichain1A:hopper:final",
            "first:multichain1B:hopper:final",
            "second:multichain2A:hopper:final",
            "second:multichain2B:hopper:final",
        ];
        assert_eq!(received.len(), expected.len(), "{received:?}");
        for value in expected {
            assert!(received.contains(&value.to_string()), "missing {value}");
        }
        assert!(outer.error().is_none());
        assert!(multi1.error().is_none());
        assert!(multi2.error().is_none());
    }
}

mod modules {
    use super::*;

    fn writer_module(capture: &CaptureBuffer) -> Module {
        Module::new(Metadata::new("test", "test").with_input_param("strings"))
            .with_links(vec![
                link_constructor(|c| StrLink::new().with_configs(c)),
                link_constructor(|c| StrIntLink::new().with_configs(c)),
                link_constructor(|c| IntLink::new().with_configs(c)),
            ])
            .with_configs(vec![with_arg(
                "writer",
                ParamValue::opaque(capture.writer()),
            )])
            .with_input_param(Param::string_list("strings", "strings to process"))
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })])
    }

    #[tokio::test]
    async fn modules_run_their_chains_from_the_input_param() {
        let capture = CaptureBuffer::new();
        let mut module = writer_module(&capture);

        let params = module.params();
        let names: Vec<&str> = params.iter().map(Param::name).collect();
        assert_eq!(params.len(), 4, "{names:?}");
        assert!(names.contains(&"strings"));
        assert!(names.contains(&"writer"));
        assert!(names.contains(&"strOp"));
        assert!(names.contains(&"intOp"));

        module
            .run(vec![with_cli_args(["-strings", "1,2,3,4,5"])])
            .await
            .unwrap();
        assert!(module.error().is_none());

        assert_eq!(capture.contents(), "1\n2\n3\n4\n5\n");
    }

    #[tokio::test]
    async fn mistyped_input_params_fail_the_run() {
        let capture = CaptureBuffer::new();
        let mut module = Module::new(Metadata::new("test", "test").with_input_param("strings"))
            .with_links(vec![link_constructor(|c| StrLink::new().with_configs(c))])
            .with_configs(vec![with_arg(
                "writer",
                ParamValue::opaque(capture.writer()),
            )])
            .with_input_param(Param::string("strings", "strings to process"))
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })]);

        let err = module
            .run(vec![with_cli_args(["-strings", "1,2,3"])])
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("module input parameter \"strings\""),
            "{err}"
        );
    }

    #[tokio::test]
    async fn process_errors_fail_the_run() {
        let capture = CaptureBuffer::new();
        let mut module = Module::new(Metadata::new("test", "test").with_input_param("strings"))
            .with_links(vec![preconfigured(
                link_constructor(|c| ErrorLink::new().with_configs(c)),
                vec![with_arg("errorAt", "process")],
            )])
            .with_configs(vec![with_arg(
                "writer",
                ParamValue::opaque(capture.writer()),
            )])
            .with_input_param(Param::string_list("strings", "strings to process"))
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })]);

        let err = module
            .run(vec![with_cli_args(["-strings", "1,2,3"])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("process error"), "{err}");
    }

    #[tokio::test]
    async fn added_links_extend_the_built_chain() {
        let capture = CaptureBuffer::new();
        let mut module = Module::new(Metadata::new("test", "test").with_input_param("strings"))
            .with_links(vec![
                link_constructor(|c| StrLink::new().with_configs(c)),
                link_constructor(|c| StrIntLink::new().with_configs(c)),
            ])
            .with_configs(vec![with_arg(
                "writer",
                ParamValue::opaque(capture.writer()),
            )])
            .with_input_param(Param::string_list("strings", "strings to process"))
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })]);

        module = module.with_added_links(vec![preconfigured(
            link_constructor(|c| IntLink::new().with_configs(c)),
            vec![with_arg("intOp", int_op(|i| i * 2))],
        )]);

        module
            .run(vec![with_cli_args(["-strings", "1,2,3,4,5"])])
            .await
            .unwrap();

        assert_eq!(capture.contents(), "2\n4\n6\n8\n10\n");
    }

    #[tokio::test]
    async fn fresh_chains_from_one_module_run_independently() {
        let mut module = Module::new(Metadata::new("test", "test"))
            .with_links(vec![link_constructor(|c| StrIntLink::new().with_configs(c))])
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })]);

        let capture1 = CaptureBuffer::new();
        let capture2 = CaptureBuffer::new();
        let mut chain1 = module
            .new_chain()
            .with_configs(vec![with_arg("writer", ParamValue::opaque(capture1.writer()))]);
        let mut chain2 = module
            .new_chain()
            .with_configs(vec![with_arg("writer", ParamValue::opaque(capture2.writer()))]);

        for _ in 0..5 {
            chain1.send("1".to_string()).await.unwrap();
            chain2.send("2".to_string()).await.unwrap();
        }
        chain1.close();
        chain2.close();
        chain1.wait().await;
        chain2.wait().await;

        assert!(chain1.error().is_none());
        assert!(chain2.error().is_none());
        assert_eq!(capture1.contents(), "1\n1\n1\n1\n1\n");
        assert_eq!(capture2.contents(), "2\n2\n2\n2\n2\n");
    }

    #[tokio::test]
    async fn auto_run_modules_feed_the_sentinel() {
        let capture = CaptureBuffer::new();
        let mut module = Module::new(Metadata::new("AutoRun", "AutoRun test"))
            .with_links(vec![preconfigured(
                link_constructor(|c| StrLink::new().with_configs(c)),
                vec![with_arg("strOp", str_op(|s| format!("{s}!")))],
            )])
            .with_configs(vec![with_arg(
                "writer",
                ParamValue::opaque(capture.writer()),
            )])
            .with_outputters(vec![outputter_constructor(|c| {
                WriterSink::new().with_configs(c)
            })])
            .with_auto_run();

        module.run(Vec::new()).await.unwrap();
        assert!(module.error().is_none());
        assert_eq!(capture.contents(), "autorun!\n");
    }

    #[tokio::test]
    async fn modules_without_outputters_refuse_to_run() {
        let mut module = Module::new(Metadata::new("bare", "no outputters")).with_auto_run();
        let err = module.run(Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("must have outputters"), "{err}");
    }

    #[tokio::test]
    async fn lax_modules_tolerate_process_errors() {
        let capture = CaptureBuffer::new();
        let mut module =
            Module::new(Metadata::new("strictness-lax-test", "lax").with_input_param("strings"))
                .with_strictness(Strictness::Lax)
                .with_links(vec![
                    link_constructor(|c| StrLink::new().with_configs(c)),
                    link_constructor(|c| ProcessErrorLink::new().with_configs(c)),
                ])
                .with_configs(vec![with_arg(
                    "writer",
                    ParamValue::opaque(capture.writer()),
                )])
                .with_outputters(vec![outputter_constructor(|c| {
                    WriterSink::new().with_configs(c)
                })])
                .with_input_param(Param::string_list("strings", "strings to process"));

        module
            .run(vec![with_cli_args(["-strings", "test"])])
            .await
            .unwrap();
        assert!(module.error().is_none());
    }

    #[tokio::test]
    async fn moderate_modules_fail_on_process_errors() {
        let capture = CaptureBuffer::new();
        let mut module = Module::new(
            Metadata::new("strictness-moderate-test", "moderate").with_input_param("strings"),
        )
        .with_links(vec![
            link_constructor(|c| StrLink::new().with_configs(c)),
            link_constructor(|c| ProcessErrorLink::new().with_configs(c)),
        ])
        .with_configs(vec![with_arg(
            "writer",
            ParamValue::opaque(capture.writer()),
        )])
        .with_outputters(vec![outputter_constructor(|c| {
            WriterSink::new().with_configs(c)
        })])
        .with_input_param(Param::string_list("strings", "strings to process"));

        let err = module
            .run(vec![with_cli_args(["-strings", "test"])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("process error"), "{err}");
        assert!(module.error().is_some());
    }
}

mod parallel_wrapper {
    use super::*;

    #[tokio::test]
    async fn parallelized_links_process_every_input() {
        let parallel_str = parallelize(link_constructor(|c| StrLink::new().with_configs(c)));

        let mut chain = Chain::new(vec![parallel_str(Vec::new())])
            .with_configs(vec![with_arg("workers", 2)]);

        chain
            .send_all(["hello".to_string(), "world".to_string(), "test".to_string()])
            .await
            .unwrap();
        chain.close();

        let mut received = collect_strings(&mut chain).await;
        received.sort();
        assert_eq!(received, vec!["hello", "test", "world"]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn workers_parameter_is_declared_with_a_default() {
        let parallel_str = parallelize(link_constructor(|c| StrLink::new().with_configs(c)));
        let link = parallel_str(Vec::new());

        let params = link.params();
        let workers = params
            .iter()
            .find(|p| p.name() == "workers")
            .expect("workers parameter should be declared");
        assert!(workers.has_default());
    }

    #[tokio::test]
    async fn more_workers_than_inputs_is_fine() {
        let parallel_str = parallelize(link_constructor(|c| StrLink::new().with_configs(c)));
        let mut chain = Chain::new(vec![parallel_str(Vec::new())])
            .with_configs(vec![with_arg("workers", 10)]);

        chain
            .send_all(["input1".to_string(), "input2".to_string()])
            .await
            .unwrap();
        chain.close();

        let received = collect_strings(&mut chain).await;
        assert_eq!(received.len(), 2);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn zero_input_passes_through_cleanly() {
        let parallel_str = parallelize(link_constructor(|c| StrLink::new().with_configs(c)));
        let mut chain = Chain::new(vec![parallel_str(Vec::new())])
            .with_configs(vec![with_arg("workers", 5)]);

        chain.close();

        assert!(collect_strings(&mut chain).await.is_empty());
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn worker_failures_do_not_kill_the_chain() {
        let parallel_err = parallelize(link_constructor(|c| ErrorLink::new().with_configs(c)));
        let mut chain = Chain::new(vec![parallel_err(Vec::new())]).with_configs(vec![
            with_arg("workers", 2),
            with_arg("errorAt", "process"),
        ]);

        chain.send("trigger-error".to_string()).await.unwrap();
        chain.close();

        assert!(collect_strings(&mut chain).await.is_empty());
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn runtime_args_reach_worker_links() {
        let seen: Arc<Mutex<Vec<Result<String, ParamError>>>> = Arc::default();
        let sink = seen.clone();

        let parallel_check = parallelize(link_constructor(move |c| {
            let sink = sink.clone();
            ArgCheckingLink::new(move |arg| sink.lock().push(arg)).with_configs(c)
        }));
        let mut chain = Chain::new(vec![parallel_check(Vec::new())]).with_configs(vec![
            with_arg("workers", 1),
            with_arg("argument", "test-arg"),
        ]);

        chain.send("test-input".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "worker should have run");
        assert_eq!(seen[0].as_deref().unwrap(), "test-arg");
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn parallel_stages_compose_with_typed_neighbors() {
        let parallel_convert = parallelize(link_constructor(|c| StrIntLink::new().with_configs(c)));

        let mut chain = Chain::new(vec![
            StrLink::new().into_link(),
            parallel_convert(Vec::new()),
            IntLink::new().into_link(),
        ])
        .with_configs(vec![with_arg("workers", 3)]);

        chain
            .send_all(["123".to_string(), "456".to_string(), "789".to_string()])
            .await
            .unwrap();
        chain.close();

        let mut received = collect_ints(&mut chain).await;
        received.sort_unstable();
        assert_eq!(received, vec![123, 456, 789]);
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn workers_are_initialized_and_completed() {
        let inits = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));
        let (inits_ctor, completes_ctor) = (inits.clone(), completes.clone());

        let parallel_tracking = parallelize(link_constructor(move |c| {
            TrackingLink::new(inits_ctor.clone(), completes_ctor.clone()).with_configs(c)
        }));
        let mut chain = Chain::new(vec![parallel_tracking(Vec::new())])
            .with_configs(vec![with_arg("workers", 2)]);

        chain
            .send_all(["input1".to_string(), "input2".to_string(), "input3".to_string()])
            .await
            .unwrap();
        chain.close();
        chain.wait().await;

        assert!(inits.load(Ordering::SeqCst) > 0, "workers should initialize");
        assert!(
            completes.load(Ordering::SeqCst) > 0,
            "workers should complete"
        );
        assert!(chain.error().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_throughput_beats_sequential() {
        // S7: four 100ms inputs with four workers should land well under
        // 1.5x the sequential wall clock.
        let input_count = 4;
        let delay_ms = 100i64;

        let sequential_start = std::time::Instant::now();
        let mut sequential = Chain::new(vec![
            DelayLink::new().with_configs(vec![with_arg("delay_ms", delay_ms)])
        ]);
        for _ in 0..input_count {
            sequential.send("input".to_string()).await.unwrap();
        }
        sequential.close();
        assert_eq!(collect_strings(&mut sequential).await.len(), input_count);
        let sequential_elapsed = sequential_start.elapsed();

        let parallel_start = std::time::Instant::now();
        let parallel_delay = parallelize(link_constructor(|c| DelayLink::new().with_configs(c)));
        let mut parallel = Chain::new(vec![parallel_delay(Vec::new())]).with_configs(vec![
            with_arg("workers", 4),
            with_arg("delay_ms", delay_ms),
        ]);
        for _ in 0..input_count {
            parallel.send("input".to_string()).await.unwrap();
        }
        parallel.close();
        assert_eq!(collect_strings(&mut parallel).await.len(), input_count);
        let parallel_elapsed = parallel_start.elapsed();

        let ceiling = sequential_elapsed + sequential_elapsed / 2;
        assert!(
            parallel_elapsed < ceiling,
            "parallel ({parallel_elapsed:?}) should beat 1.5x sequential ({sequential_elapsed:?})"
        );
        assert!(sequential.error().is_none());
        assert!(parallel.error().is_none());
    }
}

mod adapter_properties {
    use super::*;
    use crate::testing::mocks::{GuardedNote, Note};

    #[tokio::test]
    async fn adaptation_is_idempotent_for_matching_types() {
        // P11.
        let first: String = Payload::new("value".to_string()).adapt().unwrap();
        let second: String = Payload::new(first).adapt().unwrap();
        assert_eq!(second, "value");
    }

    #[tokio::test]
    async fn structural_copy_drops_extras_and_fails_on_missing() {
        // P12.
        let narrowed: Note = Payload::new(DetailedNote {
            text: "123".into(),
            extra: "456".into(),
        })
        .adapt()
        .unwrap();
        assert_eq!(narrowed.text, "123");

        let widened = Payload::new(Note { text: "123".into() }).adapt::<DetailedNote>();
        assert!(widened.is_err());
    }

    #[tokio::test]
    async fn non_serialized_fields_are_skipped_in_structural_copy() {
        let guarded = GuardedNote::new("123", "456", "789");
        let copied: DetailedNote = Payload::new(guarded.clone()).adapt().unwrap();
        assert_eq!(copied.text, "123");
        assert_eq!(copied.extra, "456");

        let round_tripped: GuardedNote = Payload::new(copied).adapt().unwrap();
        assert_eq!(round_tripped.secret(), "");
        assert_eq!(guarded.secret(), "789");
    }
}
