//! Source checkout and package environment materialization, and the
//! entry-point model declared inside a source tree.

mod entrypoint;
mod error;
mod gc;
mod lock;
mod materializer;
mod source;

pub use entrypoint::{ArgumentSpec, ArgumentType, EntryPoint, ObserverKind, ObserverSpec};
pub use error::{Error, Result};
pub use gc::{gc, CacheEntry, GcReport};
pub use lock::{is_acquirable, FileLock};
pub use materializer::{poll_until, Environment};
pub use source::{ResolvedSource, SourceRef};
