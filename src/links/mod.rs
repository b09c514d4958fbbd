//! General-purpose links: ad-hoc closures, string conversion, counting,
//! and throttling.

pub mod adhoc;
pub mod convert;
pub mod count;
pub mod throttle;

pub use adhoc::{from_transformer, from_wrapper, wrapper_constructor, TransformerLink, WrapperLink};
pub use convert::JsonDecoder;
pub use count::Count;
pub use throttle::Throttle;
