//! Injectable command execution.
//!
//! Links that shell out to external tools go through a [`CommandRunner`]
//! so tests can substitute a mock instead of spawning real processes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::errors::LinkError;

/// Executes external commands on behalf of a link.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command, invoking `on_line` for every line of stdout and
    /// stderr as it arrives.
    async fn run_streamed(
        &self,
        cmd: Command,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LinkError>;

    /// Runs a command to completion and returns its stdout.
    async fn run_captured(&self, cmd: Command) -> Result<Vec<u8>, LinkError>;
}

/// The default runner, built on `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run_streamed(
        &self,
        mut cmd: Command,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LinkError> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LinkError::process(format!("failed to start: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LinkError::process("could not get stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LinkError::process("could not get stderr pipe"))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut stderr_text = String::new();
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => {
                    match line {
                        Ok(Some(line)) => on_line(&line),
                        _ => out_done = true,
                    }
                },
                line = err_lines.next_line(), if !err_done => {
                    match line {
                        Ok(Some(line)) => {
                            stderr_text.push_str(&line);
                            stderr_text.push('\n');
                            on_line(&line);
                        }
                        _ => err_done = true,
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| LinkError::process(e.to_string()))?;
        if !status.success() {
            return Err(LinkError::process(stderr_text.trim_end().to_string()));
        }
        Ok(())
    }

    async fn run_captured(&self, mut cmd: Command) -> Result<Vec<u8>, LinkError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| LinkError::process(format!("failed to execute: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            return Err(LinkError::process(format!("failed to execute: {stderr}")));
        }
        Ok(output.stdout)
    }
}
