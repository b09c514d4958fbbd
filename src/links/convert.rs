//! The string-converter link.
//!
//! Accepts strings and produces values of a target type: first by direct
//! adaptation (covers the identity case), then by decoding the string as
//! JSON.

use std::any::Any;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::LinkError;
use crate::link::{Link, LinkContext};
use crate::payload::{decode_json, short_type_name, FromPayload, Payload};

/// Converts string inputs into `T`, falling back to JSON decoding when
/// direct adaptation fails.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> JsonDecoder<T> {
    /// Creates a decoder targeting `T`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> Link for JsonDecoder<T>
where
    T: FromPayload + DeserializeOwned + Serialize + Clone + Send + Sync + Any,
{
    type Input = String;

    async fn process(&mut self, input: String, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        if let Ok(value) = T::from_payload(Payload::new(input.clone())) {
            cx.emit(value).await;
            return Ok(());
        }
        match decode_json::<T>(&input) {
            Ok(value) => {
                cx.emit(value).await;
                Ok(())
            }
            Err(_) => Err(LinkError::process(format!(
                "failed to convert input to {}",
                short_type_name::<T>()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::payload_struct;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Target {
        text: String,
        extra: String,
    }

    payload_struct!(Target);

    #[tokio::test]
    async fn decodes_json_strings_into_structs() {
        let mut chain = Chain::new(vec![JsonDecoder::<Target>::new().into_link()]);
        chain
            .send(r#"{"text": "123", "extra": "456"}"#.to_string())
            .await
            .unwrap();
        chain.close();

        let target = chain.recv_as::<Target>().await.unwrap();
        assert_eq!(
            target,
            Target {
                text: "123".into(),
                extra: "456".into()
            }
        );
        assert!(chain.error().is_none());
    }

    #[tokio::test]
    async fn identity_strings_pass_through() {
        let mut chain = Chain::new(vec![JsonDecoder::<String>::new().into_link()]);
        chain.send("plain".to_string()).await.unwrap();
        chain.close();

        assert_eq!(chain.recv_as::<String>().await.as_deref(), Some("plain"));
    }

    #[tokio::test]
    async fn garbage_is_a_process_error() {
        let mut chain = Chain::new(vec![JsonDecoder::<Target>::new().into_link()]);
        chain.send("not json".to_string()).await.unwrap();
        chain.close();
        chain.wait().await;

        let err = chain.error().unwrap();
        assert!(err.to_string().contains("failed to convert input"), "{err}");
    }
}
