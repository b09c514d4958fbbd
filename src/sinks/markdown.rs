//! Markdown report sink.

use std::fs::File;
use std::io::Write;

use async_trait::async_trait;

use crate::cfg::Param;
use crate::errors::LinkError;
use crate::outputter::{Outputter, OutputterContext};
use crate::payload::Payload;

/// Writes a markdown report with a bullet per value: strings verbatim,
/// everything else as inline JSON code.
#[derive(Default)]
pub struct MarkdownSink {
    file: Option<File>,
}

impl MarkdownSink {
    /// Creates a markdown sink; the destination defaults to `out.md`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Outputter for MarkdownSink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("mdoutfile", "the file to write the markdown to").with_default("out.md"),
            Param::string("title", "report title").with_default("Results"),
        ]
    }

    async fn initialize(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        let filename = cx.arg_as::<String>("mdoutfile")?;
        let title = cx.arg_as::<String>("title")?;

        let mut file = File::create(&filename)?;
        writeln!(file, "# {title}")?;
        writeln!(file)?;
        self.file = Some(file);
        Ok(())
    }

    async fn output(
        &mut self,
        value: Payload,
        _cx: &mut OutputterContext<'_>,
    ) -> Result<(), LinkError> {
        let Some(file) = self.file.as_mut() else {
            return Err(LinkError::process("markdown sink was not initialized"));
        };
        if let Some(text) = value.downcast_ref::<String>() {
            writeln!(file, "- {text}")?;
        } else {
            writeln!(file, "- `{}`", value.display_string())?;
        }
        Ok(())
    }

    async fn complete(&mut self, _cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
