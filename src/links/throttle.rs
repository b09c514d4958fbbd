//! Rate-limiting link.

use std::time::Duration;

use async_trait::async_trait;

use crate::cfg::Param;
use crate::errors::LinkError;
use crate::link::{Link, LinkContext};
use crate::payload::Payload;

/// Forwards each value after a minimum interval, honoring cancellation:
/// a cancelled chain stops waiting and drops the value.
#[derive(Default)]
pub struct Throttle;

impl Throttle {
    /// Creates a throttle link.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for Throttle {
    type Input = Payload;

    fn params(&self) -> Vec<Param> {
        vec![
            Param::int("interval_ms", "minimum milliseconds between forwarded items")
                .with_default(1000),
        ]
    }

    async fn process(&mut self, input: Payload, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let interval = cx.arg_as::<i64>("interval_ms")?.max(0);
        let token = cx.cancel_token().clone();

        tokio::select! {
            () = token.cancelled() => return Ok(()),
            () = tokio::time::sleep(Duration::from_millis(interval.unsigned_abs())) => {}
        }
        cx.emit_payload(input).await;
        Ok(())
    }
}
