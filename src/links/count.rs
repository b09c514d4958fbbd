//! Running-count link.

use async_trait::async_trait;

use crate::errors::LinkError;
use crate::link::{Link, LinkContext};
use crate::payload::Payload;

/// Emits the running count of values seen so far, one count per input.
#[derive(Default)]
pub struct Count {
    count: i64,
}

impl Count {
    /// Creates a count link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for Count {
    type Input = Payload;

    async fn process(&mut self, _input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        self.count += 1;
        cx.emit(self.count).await;
        Ok(())
    }
}
