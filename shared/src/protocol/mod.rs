//! Message contract and broker envelope

pub mod envelope;

pub use envelope::Envelope;

use serde::{de::DeserializeOwned, Serialize};

/// A bus message: a command or an event.
///
/// `NAME` is the stable, fully-qualified, case-sensitive identifier matched
/// exactly between producing and consuming processes. Handlers are looked up
/// by this name, and every handler registered under one name shares the
/// payload shape, so the name alone decides how a broker payload is decoded.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}
