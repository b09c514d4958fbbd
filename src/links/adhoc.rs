//! Ad-hoc links built from plain closures.
//!
//! These wrap a function as a link so one-off transformations do not need
//! a struct and trait implementation of their own.

use std::any::Any;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::LinkError;
use crate::link::{DynLink, Link, LinkContext};
use crate::parallel::LinkConstructor;
use crate::payload::FromPayload;

/// A link that applies a function to each input and emits the result.
pub struct WrapperLink<I, O, F> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

#[async_trait]
impl<I, O, F> Link for WrapperLink<I, O, F>
where
    I: FromPayload,
    O: Any + Send + Sync + Clone + Serialize,
    F: FnMut(I) -> O + Send + 'static,
{
    type Input = I;

    async fn process(&mut self, input: I, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        let output = (self.func)(input);
        cx.emit(output).await;
        Ok(())
    }
}

/// Wraps an infallible transformation as a link.
pub fn from_wrapper<I, O, F>(func: F) -> Box<dyn DynLink>
where
    I: FromPayload,
    O: Any + Send + Sync + Clone + Serialize,
    F: FnMut(I) -> O + Send + 'static,
{
    WrapperLink {
        func,
        _marker: PhantomData,
    }
    .into_link()
}

/// Builds a [`LinkConstructor`] from an infallible transformation.
pub fn wrapper_constructor<I, O, F>(func: F) -> LinkConstructor
where
    I: FromPayload,
    O: Any + Send + Sync + Clone + Serialize,
    F: Fn(I) -> O + Clone + Send + Sync + 'static,
{
    crate::parallel::link_constructor(move |configs| {
        WrapperLink {
            func: func.clone(),
            _marker: PhantomData,
        }
        .with_configs(configs)
    })
}

/// A link that applies a fallible transformation producing zero or more
/// outputs per input.
pub struct TransformerLink<I, O, F> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

#[async_trait]
impl<I, O, F> Link for TransformerLink<I, O, F>
where
    I: FromPayload,
    O: Any + Send + Sync + Clone + Serialize,
    F: FnMut(I) -> Result<Vec<O>, LinkError> + Send + 'static,
{
    type Input = I;

    async fn process(&mut self, input: I, cx: &mut LinkContext<'_>) -> Result<(), LinkError> {
        for output in (self.func)(input)? {
            cx.emit(output).await;
        }
        Ok(())
    }
}

/// Wraps a fallible, one-to-many transformation as a link.
pub fn from_transformer<I, O, F>(func: F) -> Box<dyn DynLink>
where
    I: FromPayload,
    O: Any + Send + Sync + Clone + Serialize,
    F: FnMut(I) -> Result<Vec<O>, LinkError> + Send + 'static,
{
    TransformerLink {
        func,
        _marker: PhantomData,
    }
    .into_link()
}
