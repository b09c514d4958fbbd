//! Per-link work distribution across a worker pool.
//!
//! [`parallelize`] wraps a link constructor in a link that multiplexes
//! `process` across N workers (parameter `workers`, default 3). Each work
//! item carries the input and a snapshot of the wrapper's non-`workers`
//! arguments; a worker constructs a fresh link from the constructor,
//! invokes it on the single input, completes it, and forwards the outputs
//! to the wrapper's output channel. Ordering across workers is not
//! preserved; a failed worker logs at error level and emits nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::cfg::{with_arg, Config, Param, ParamValue};
use crate::errors::LinkError;
use crate::link::{DynLink, Link, LinkContext, PayloadSender};
use crate::logging::{LogLevel, Logger};
use crate::payload::Payload;

/// A reusable factory producing fresh link instances from configuration.
pub type LinkConstructor = Arc<dyn Fn(Vec<Config>) -> Box<dyn DynLink> + Send + Sync>;

/// Wraps a closure as a [`LinkConstructor`].
pub fn link_constructor<F>(factory: F) -> LinkConstructor
where
    F: Fn(Vec<Config>) -> Box<dyn DynLink> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Curries base configuration onto a constructor; per-call configs are
/// applied first so the base configs win.
pub fn preconfigured(ctor: LinkConstructor, configs: Vec<Config>) -> LinkConstructor {
    Arc::new(move |mut extra| {
        extra.extend(configs.iter().cloned());
        ctor(extra)
    })
}

/// Returns a constructor producing parallelized versions of the wrapped
/// constructor's link.
///
/// ```ignore
/// let fast = parallelize(link_constructor(|c| SlowLink::default().with_configs(c)));
/// let chain = Chain::new(vec![fast(vec![with_arg("workers", 4)])]);
/// ```
pub fn parallelize(ctor: LinkConstructor) -> LinkConstructor {
    Arc::new(move |configs| {
        ParallelLink {
            ctor: ctor.clone(),
            pool: None,
        }
        .with_configs(configs)
    })
}

/// Default worker count when the `workers` parameter is unset.
const DEFAULT_WORKERS: i64 = 3;

struct ParallelLink {
    ctor: LinkConstructor,
    pool: Option<WorkerPool>,
}

#[async_trait]
impl Link for ParallelLink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        let mut params = vec![
            Param::int("workers", "number of parallel workers").with_default(DEFAULT_WORKERS)
        ];
        params.extend((self.ctor)(Vec::new()).params());
        params
    }

    async fn process(
        &mut self,
        input: Payload,
        cx: &mut LinkContext<'_>,
    ) -> Result<(), LinkError> {
        let runtime_args: HashMap<String, ParamValue> = cx
            .args()
            .into_iter()
            .filter(|(key, _)| key != "workers")
            .collect();

        if self.pool.is_none() {
            if let Some(out) = cx.output_sender() {
                let workers = cx.arg_as::<i64>("workers").unwrap_or(DEFAULT_WORKERS).max(1);
                self.pool = Some(WorkerPool::new(
                    self.ctor.clone(),
                    workers as usize,
                    out,
                    cx.logger().clone(),
                ));
            }
        }

        let item = WorkItem {
            input,
            args: runtime_args,
        };
        match &self.pool {
            Some(pool) => pool.submit(item).await,
            None => {
                // No output channel to share with workers (the wrapper is
                // being invoked synchronously): process inline.
                let outputs = run_work_item(&self.ctor, item, cx.logger()).await;
                for payload in outputs {
                    cx.emit_payload(payload).await;
                }
            }
        }
        Ok(())
    }

    async fn complete(&mut self, _cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown().await;
        }
        Ok(())
    }
}

struct WorkItem {
    input: Payload,
    args: HashMap<String, ParamValue>,
}

/// Builds a fresh link from the constructor with the snapshot arguments,
/// invokes it on the single input, completes it, and returns the outputs.
/// Failures log at error level and yield nothing.
async fn run_work_item(ctor: &LinkConstructor, item: WorkItem, logger: &Logger) -> Vec<Payload> {
    let configs: Vec<Config> = item
        .args
        .into_iter()
        .map(|(key, value)| with_arg(key, value))
        .collect();
    let mut link = ctor(configs);

    let invoked = link.invoke(vec![item.input]).await;
    if let Err(e) = link.finish().await {
        logger.log(
            LogLevel::Error,
            "worker completion failed",
            &[("error", e.to_string())],
        );
    }
    match invoked {
        Ok(outputs) => outputs,
        Err(e) => {
            logger.log(
                LogLevel::Error,
                "worker processing failed",
                &[("error", e.to_string())],
            );
            Vec::new()
        }
    }
}

struct WorkerPool {
    ctor: LinkConstructor,
    tx: Option<mpsc::Sender<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
    out: PayloadSender,
    logger: Logger,
}

impl WorkerPool {
    fn new(ctor: LinkConstructor, workers: usize, out: PayloadSender, logger: Logger) -> Self {
        let (tx, rx) = mpsc::channel::<WorkItem>(workers * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = rx.clone();
            let ctor = ctor.clone();
            let out = out.clone();
            let logger = logger.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    let outputs = run_work_item(&ctor, item, &logger).await;
                    for payload in outputs {
                        if out.send(payload).await.is_err() {
                            return;
                        }
                    }
                }
            }));
        }
        logger.log(
            LogLevel::Debug,
            "started worker pool",
            &[("workers", workers.to_string())],
        );

        Self {
            ctor,
            tx: Some(tx),
            workers: handles,
            out,
            logger,
        }
    }

    /// Queues a work item, falling back to inline processing when the
    /// submission queue is full.
    async fn submit(&self, item: WorkItem) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item) | TrySendError::Closed(item)) => {
                let outputs = run_work_item(&self.ctor, item, &self.logger).await;
                for payload in outputs {
                    if self.out.send(payload).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Closes the submission queue and joins every worker.
    async fn shutdown(&mut self) {
        self.tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        self.logger.debug("worker pool shutdown complete");
    }
}
