//! Line-oriented writer sink.

use async_trait::async_trait;

use crate::cfg::{Param, ParamValue};
use crate::errors::{LinkError, ParamError};
use crate::logging::SharedWriter;
use crate::outputter::{Outputter, OutputterContext};
use crate::payload::Payload;

/// Writes each value as one line: strings bare, everything else as
/// compact JSON.
///
/// The `writer` parameter accepts a [`SharedWriter`] directly or, from the
/// CLI, a file path.
#[derive(Default)]
pub struct WriterSink {
    writer: Option<SharedWriter>,
}

impl WriterSink {
    /// Creates a writer sink; the destination defaults to stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Outputter for WriterSink {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![Param::opaque::<SharedWriter>("writer", "destination writer")
            .with_default(ParamValue::opaque(SharedWriter::stdout()))
            .with_converter(|path| {
                SharedWriter::file(path)
                    .map(ParamValue::opaque)
                    .map_err(|e| ParamError::Convert {
                        value: path.to_string(),
                        kind: "SharedWriter".to_string(),
                        message: e.to_string(),
                    })
            })]
    }

    async fn initialize(&mut self, cx: &mut OutputterContext<'_>) -> Result<(), LinkError> {
        self.writer = Some(cx.arg_opaque::<SharedWriter>("writer")?);
        Ok(())
    }

    async fn output(
        &mut self,
        value: Payload,
        _cx: &mut OutputterContext<'_>,
    ) -> Result<(), LinkError> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| LinkError::process("writer sink was not initialized"))?;
        writer.write_line(&value.display_string())?;
        Ok(())
    }
}
