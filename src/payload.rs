//! The value envelope and adaptation ("glue") layer.
//!
//! Values travel between stages as [`Payload`] envelopes. A payload wraps
//! an `Arc<dyn Any>` together with hooks captured at wrap time: a serialize
//! hook (when the concrete type is `Serialize`) powering structural
//! adaptation, and a duplicate hook (when the type is `Clone`) so a shared
//! payload can still be taken by value after fan-out.
//!
//! Adaptation to a consumer's declared input type tries, in order:
//!
//! 1. identity downcast,
//! 2. a registered cast (see [`register_cast`]) — the explicit form of
//!    interface satisfaction,
//! 3. structural field copy: serialize the source and deserialize the
//!    target type from the resulting JSON; extra source fields are
//!    dropped, missing destination fields fail.
//!
//! The explicit null payload adapts to nothing and produces the
//! distinguished debug-level [`AdaptError::Absent`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::AdaptError;

type ErasedValue = Arc<dyn Any + Send + Sync>;
type SerializeFn = fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value, AdaptError>;
type DuplicateFn = fn(&(dyn Any + Send + Sync)) -> Option<ErasedValue>;
type CastFn = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Option<ErasedValue> + Send + Sync>;

/// Returns the unqualified name of a type, without module path or the
/// generic arguments' paths. Used for link names and adapt errors.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    let tail = head.rsplit("::").next().unwrap_or(head);
    // For generic types the name would lose its arguments; keep the tail
    // of the outer type only, which is what log records key on.
    tail
}

fn serialize_erased<T: Any + Serialize>(
    value: &(dyn Any + Send + Sync),
) -> Result<serde_json::Value, AdaptError> {
    let concrete = value.downcast_ref::<T>().ok_or_else(|| {
        AdaptError::incompatible_because(
            short_type_name::<T>(),
            "json",
            "payload hook applied to a foreign value",
        )
    })?;
    serde_json::to_value(concrete).map_err(|e| {
        AdaptError::incompatible_because(short_type_name::<T>(), "json", e.to_string())
    })
}

fn duplicate_erased<T: Any + Send + Sync + Clone>(
    value: &(dyn Any + Send + Sync),
) -> Option<ErasedValue> {
    value
        .downcast_ref::<T>()
        .map(|v| Arc::new(v.clone()) as ErasedValue)
}

#[derive(Clone)]
struct Inner {
    value: ErasedValue,
    type_name: &'static str,
    serialize: Option<SerializeFn>,
    duplicate: Option<DuplicateFn>,
}

/// A dynamically typed value flowing through a pipeline.
///
/// Cloning a payload is cheap and shares the underlying value, which is how
/// a multi-chain replicates one input to every sibling.
#[derive(Clone)]
pub struct Payload {
    inner: Option<Inner>,
}

impl Payload {
    /// Wraps a plain data value, capturing its serialize and duplicate
    /// hooks for structural adaptation and shared extraction.
    #[must_use]
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + Clone + Serialize,
    {
        Self {
            inner: Some(Inner {
                value: Arc::new(value),
                type_name: short_type_name::<T>(),
                serialize: Some(serialize_erased::<T>),
                duplicate: Some(duplicate_erased::<T>),
            }),
        }
    }

    /// Wraps an opaque handle such as a boxed trait object.
    ///
    /// Handle payloads adapt by identity and registered cast only; they do
    /// not participate in structural field copy.
    #[must_use]
    pub fn handle<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: Some(Inner {
                value: Arc::new(value),
                type_name: short_type_name::<T>(),
                serialize: None,
                duplicate: None,
            }),
        }
    }

    /// The explicit absent value. Adapting it yields the debug-level
    /// [`AdaptError::Absent`], which never kills a chain.
    #[must_use]
    pub fn null() -> Self {
        Self { inner: None }
    }

    /// Whether this is the explicit null payload.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// The unqualified name of the wrapped type, or `"null"`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.inner.as_ref().map_or("null", |i| i.type_name)
    }

    /// Whether the wrapped value is exactly `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|i| (*i.value).type_id() == TypeId::of::<T>())
    }

    /// Borrows the wrapped value as `T` if the types match exactly.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|i| i.value.downcast_ref())
    }

    /// Adapts the payload into a data type: identity, then registered
    /// cast, then structural field copy.
    pub fn adapt<T>(self) -> Result<T, AdaptError>
    where
        T: Any + Send + Sync + DeserializeOwned,
    {
        let Some(inner) = self.inner else {
            return Err(absent_error::<T>());
        };
        let inner = match take_inner::<T>(inner) {
            Ok(value) => return Ok(value),
            Err(inner) => inner,
        };
        let inner = match apply_cast::<T>(inner) {
            Ok(value) => return Ok(value),
            Err(inner) => inner,
        };
        restructure_inner(&inner)
    }

    /// Adapts the payload into a handle type: identity, then registered
    /// cast. Structural copy does not apply to handles.
    pub fn adapt_handle<T>(self) -> Result<T, AdaptError>
    where
        T: Any + Send + Sync,
    {
        let Some(inner) = self.inner else {
            return Err(absent_error::<T>());
        };
        let inner = match take_inner::<T>(inner) {
            Ok(value) => return Ok(value),
            Err(inner) => inner,
        };
        match apply_cast::<T>(inner) {
            Ok(value) => Ok(value),
            Err(inner) => Err(AdaptError::incompatible(
                inner.type_name,
                short_type_name::<T>(),
            )),
        }
    }

    /// Serializes the wrapped value to JSON using the hook captured at
    /// wrap time. Handle payloads fail; the null payload yields JSON null.
    pub fn to_json(&self) -> Result<serde_json::Value, AdaptError> {
        let Some(inner) = &self.inner else {
            return Ok(serde_json::Value::Null);
        };
        let serialize = inner.serialize.ok_or_else(|| {
            AdaptError::incompatible_because(inner.type_name, "json", "value is not serializable")
        })?;
        serialize(&*inner.value)
    }

    /// Renders the wrapped value for line-oriented sinks: strings print
    /// bare, everything else prints as compact JSON.
    #[must_use]
    pub fn display_string(&self) -> String {
        if let Some(s) = self.downcast_ref::<String>() {
            return s.clone();
        }
        if let Some(s) = self.downcast_ref::<&str>() {
            return (*s).to_string();
        }
        match self.to_json() {
            Ok(serde_json::Value::String(s)) => s,
            Ok(value) => value.to_string(),
            Err(_) => format!("<{}>", self.type_name()),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.type_name())
            .finish()
    }
}

fn absent_error<T>() -> AdaptError {
    AdaptError::Absent(format!(
        "no value to adapt to {:?}",
        short_type_name::<T>()
    ))
}

fn restructure_inner<T: DeserializeOwned>(inner: &Inner) -> Result<T, AdaptError> {
    let serialize = inner.serialize.ok_or_else(|| {
        AdaptError::incompatible_because(
            inner.type_name,
            short_type_name::<T>(),
            "source is not serializable",
        )
    })?;
    let json = serialize(&*inner.value)?;
    serde_json::from_value(json).map_err(|e| {
        AdaptError::incompatible_because(inner.type_name, short_type_name::<T>(), e.to_string())
    })
}

/// Identity extraction. Returns the inner back unchanged when the types
/// differ or the value is shared without a duplicate hook.
fn take_inner<T: Any + Send + Sync>(inner: Inner) -> Result<T, Inner> {
    if (*inner.value).type_id() != TypeId::of::<T>() {
        return Err(inner);
    }
    let Inner {
        value,
        type_name,
        serialize,
        duplicate,
    } = inner;
    let arc = match value.downcast::<T>() {
        Ok(arc) => arc,
        Err(value) => {
            return Err(Inner {
                value,
                type_name,
                serialize,
                duplicate,
            })
        }
    };
    match Arc::try_unwrap(arc) {
        Ok(value) => Ok(value),
        Err(shared) => {
            if let Some(duplicate) = duplicate {
                if let Some(fresh) = duplicate(&*shared) {
                    if let Ok(arc) = fresh.downcast::<T>() {
                        if let Ok(value) = Arc::try_unwrap(arc) {
                            return Ok(value);
                        }
                    }
                }
            }
            Err(Inner {
                value: shared,
                type_name,
                serialize,
                duplicate,
            })
        }
    }
}

fn cast_registry() -> &'static RwLock<HashMap<(TypeId, TypeId), CastFn>> {
    static CASTS: OnceLock<RwLock<HashMap<(TypeId, TypeId), CastFn>>> = OnceLock::new();
    CASTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a cast from a concrete source type to a destination type.
///
/// This is the explicit form of interface satisfaction: a link whose input
/// is `Box<dyn Widget>` registers a cast from each concrete type expected
/// to flow into it. Registration is process-wide and idempotent (the last
/// registration for a pair wins).
pub fn register_cast<S, D, F>(cast: F)
where
    S: Any + Send + Sync + Clone,
    D: Any + Send + Sync,
    F: Fn(S) -> D + Send + Sync + 'static,
{
    let erased: CastFn = Box::new(move |value| {
        value
            .downcast_ref::<S>()
            .map(|s| Arc::new(cast(s.clone())) as ErasedValue)
    });
    cast_registry()
        .write()
        .insert((TypeId::of::<S>(), TypeId::of::<D>()), erased);
}

fn apply_cast<T: Any + Send + Sync>(inner: Inner) -> Result<T, Inner> {
    let key = ((*inner.value).type_id(), TypeId::of::<T>());
    let fresh = {
        let registry = cast_registry().read();
        registry.get(&key).and_then(|cast| cast(&*inner.value))
    };
    let value = fresh
        .and_then(|arc| arc.downcast::<T>().ok())
        .and_then(|arc| Arc::try_unwrap(arc).ok());
    match value {
        Some(value) => Ok(value),
        None => Err(inner),
    }
}

/// Deserializes a JSON text into a fresh value of the consumer's declared
/// input type. Used by the string-converter link as a fallback after
/// direct adaptation.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, AdaptError> {
    serde_json::from_str(text).map_err(|e| {
        AdaptError::incompatible_because("json text", short_type_name::<T>(), e.to_string())
    })
}

/// Conversion from a [`Payload`] into a link's declared input type.
///
/// Implemented for the primitive shapes, their sequences,
/// `serde_json::Value`, and `Payload` itself (the accept-anything input).
/// User structs opt in with [`payload_struct!`](crate::payload_struct);
/// trait-object handles opt in with
/// [`payload_handle!`](crate::payload_handle).
pub trait FromPayload: Sized + Send + 'static {
    /// Adapts a payload into `Self`.
    fn from_payload(payload: Payload) -> Result<Self, AdaptError>;
}

impl FromPayload for Payload {
    fn from_payload(payload: Payload) -> Result<Self, AdaptError> {
        if payload.is_null() {
            return Err(absent_error::<Payload>());
        }
        Ok(payload)
    }
}

macro_rules! from_payload_data {
    ($($ty:ty),+ $(,)?) => {$(
        impl FromPayload for $ty {
            fn from_payload(payload: Payload) -> Result<Self, AdaptError> {
                payload.adapt()
            }
        }
    )+};
}

from_payload_data!(
    String,
    bool,
    i32,
    i64,
    u32,
    u64,
    f32,
    f64,
    usize,
    serde_json::Value,
    Vec<String>,
    Vec<i64>,
    Vec<f64>,
    Vec<bool>,
);

/// Implements [`FromPayload`] for data structs via structural adaptation.
///
/// The type must be `Serialize + DeserializeOwned + Clone + Send + Sync`.
#[macro_export]
macro_rules! payload_struct {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::payload::FromPayload for $ty {
            fn from_payload(
                payload: $crate::payload::Payload,
            ) -> ::std::result::Result<Self, $crate::errors::AdaptError> {
                payload.adapt()
            }
        }
    )+};
}

/// Implements [`FromPayload`] for handle types (for example boxed trait
/// objects) via identity and registered casts only.
#[macro_export]
macro_rules! payload_handle {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::payload::FromPayload for $ty {
            fn from_payload(
                payload: $crate::payload::Payload,
            ) -> ::std::result::Result<Self, $crate::errors::AdaptError> {
                payload.adapt_handle()
            }
        }
    )+};
}
