//! Handler identifiers.
//!
//! Every dispatched request gets a [`HandlerId`] that doubles as the registry key
//! and as the correlation token handed to the spawned process. Ids are ULIDs drawn
//! from a monotonic generator, so two ids issued by the same process never collide
//! even when minted within the same millisecond.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

static SHARED: Lazy<Arc<UlidGenerator>> = Lazy::new(|| Arc::new(UlidGenerator::new()));

/// Strongly typed handler identifier backed by ULID.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct HandlerId(pub ulid::Ulid);

impl HandlerId {
    #[must_use]
    pub fn from_ulid(id: ulid::Ulid) -> Self {
        Self(id)
    }
}

impl Display for HandlerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HandlerId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = ulid::Ulid::from_string(s)?;
        Ok(HandlerId(id))
    }
}

impl Serialize for HandlerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HandlerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<HandlerId>()
            .map_err(|_| serde::de::Error::custom("invalid handler id"))
    }
}

/// Failure to allocate a handler id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The monotonic sequence for the current millisecond is used up.
    Exhausted,
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            IdError::Exhausted => write!(
                f,
                "handler id generation failed: monotonic sequence exhausted for this millisecond"
            ),
        }
    }
}

impl std::error::Error for IdError {}

impl From<ulid::MonotonicError> for IdError {
    fn from(_: ulid::MonotonicError) -> Self {
        IdError::Exhausted
    }
}

/// Source of handler ids.
///
/// Implementations must be callable from many requests at once.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<HandlerId, IdError>;
}

impl<F> IdGenerator for F
where
    F: Fn() -> Result<HandlerId, IdError> + Send + Sync,
{
    fn generate(&self) -> Result<HandlerId, IdError> {
        self()
    }
}

/// Monotonic ULID generator shared by all requests of a process.
pub struct UlidGenerator {
    inner: Mutex<ulid::Generator>,
}

impl UlidGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ulid::Generator::new()),
        }
    }

    /// The process-wide generator. Dispatchers sharing a registry should share
    /// this too, so ids stay monotonic across them.
    #[must_use]
    pub fn shared() -> Arc<UlidGenerator> {
        Arc::clone(&SHARED)
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> Result<HandlerId, IdError> {
        let id = self.inner.lock().generate()?;
        Ok(HandlerId(id))
    }
}
