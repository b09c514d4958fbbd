//! JSON array sink.

use std::fs::File;
use std::io::Write;

use async_trait::async_trait;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde::Serialize;

use crate::cfg::Param;
use crate::errors::LinkError;
use crate::outputter::{Outputter, OutputterContext};
use crate::payload::Payload;

/// Buffers every value and writes them as one JSON array when the chain
/// completes.
#[derive(Default)]
pub struct JsonSink {
    file: Option<File>,
    indent: i64,
    values: Vec<serde_json::Value>,
}

impl JsonSink {
    /// Creates a JSON sink; the destination defaults to `out.json`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Outputter for JsonSink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::string("jsonoutfile", "the file to write the JSON to").with_default("out.json"),
            Param::int("indent", "the number of spaces to use for the JSON indentation")
                .with_default(0),
        ]
    }

    async fn initialize(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        let filename = cx.arg_as::<String>("jsonoutfile")?;
        self.indent = cx.arg_as::<i64>("indent").unwrap_or(0);

        cx.logger().debug(&format!("creating JSON output file {filename:?}"));
        self.file = Some(File::create(&filename)?);
        Ok(())
    }

    async fn output(
        &mut self,
        value: Payload,
        _cx: &mut OutputterContext<'_>,
    ) -> Result<(), LinkError> {
        self.values.push(value.to_json()?);
        Ok(())
    }

    async fn complete(&mut self, _cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        let Some(file) = self.file.as_mut() else {
            return Err(LinkError::process("json sink was not initialized"));
        };
        if self.indent > 0 {
            let pad = " ".repeat(self.indent.unsigned_abs() as usize);
            let formatter = PrettyFormatter::with_indent(pad.as_bytes());
            let mut serializer = Serializer::with_formatter(&mut *file, formatter);
            self.values
                .serialize(&mut serializer)
                .map_err(|e| LinkError::process(e.to_string()))?;
        } else {
            serde_json::to_writer(&mut *file, &self.values)
                .map_err(|e| LinkError::process(e.to_string()))?;
        }
        writeln!(file)?;
        file.flush()?;
        Ok(())
    }
}
