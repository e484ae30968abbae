//! The message envelope: a reference-counted carrier of a payload, its type
//! tag, and its mutability flag.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Runtime-stable identity of a payload type, used for chain-independent
/// subscription/dispatch lookups. A chain itself never filters by tag — it
/// carries a heterogeneous sequence of `(TypeTag, Envelope)` pairs; tags are
/// only consulted by `receive`/`select` handler dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        TypeTag {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn matches<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

/// Whether a payload may be read by many handlers or must be consumed by
/// exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Many concurrent readers are allowed; storage is a shared `Arc`.
    Immutable,
    /// Exactly one consumer may take the payload; the chain that carries it
    /// must be single-consumer (checked at runtime, see `Chain::push`).
    Mutable,
}

enum Payload {
    Immutable(Arc<dyn Any + Send + Sync>),
    /// `None` once taken — extraction of a mutable payload consumes it.
    Mutable(Mutex<Option<Box<dyn Any + Send + Sync>>>),
}

/// A single message in transit: payload plus type tag plus mutability flag.
///
/// Destroyed when the last reference drops. A chain closed with
/// `close(drop = true)` drops any still-queued envelopes immediately; one
/// closed with `close(drop = false)` (retain) leaves them in the queue for a
/// later `extract` to hand out.
pub struct Envelope {
    tag: TypeTag,
    mutability: Mutability,
    payload: Payload,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("tag", &self.tag)
            .field("mutability", &self.mutability)
            .finish_non_exhaustive()
    }
}

impl Envelope {
    /// Build an envelope around an immutable, shareable payload.
    pub fn immutable<T: Send + Sync + 'static>(value: T) -> Self {
        Envelope {
            tag: TypeTag::of::<T>(),
            mutability: Mutability::Immutable,
            payload: Payload::Immutable(Arc::new(value)),
        }
    }

    /// Build an envelope around a payload only one consumer may ever see.
    pub fn mutable<T: Send + 'static>(value: T) -> Self {
        Envelope {
            tag: TypeTag::of::<T>(),
            mutability: Mutability::Mutable,
            payload: Payload::Mutable(Mutex::new(Some(Box::new(value)))),
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    /// Borrow the payload as `T`. Valid for both immutable and (not-yet-taken)
    /// mutable payloads; handlers for mutable messages should prefer
    /// [`Envelope::take`] since a borrow does not consume the single-use
    /// payload.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Immutable(arc) => arc.downcast_ref::<T>(),
            // SAFETY-free: we only ever read through the mutex guard's
            // lifetime would be required for a true `&T`; mutable payloads
            // are read through `with_ref` instead.
            Payload::Mutable(_) => None,
        }
    }

    /// Run `f` with a borrowed reference to a mutable payload without
    /// consuming it. Returns `None` if the payload was already taken or the
    /// type does not match.
    pub fn with_ref<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &self.payload {
            Payload::Immutable(arc) => arc.downcast_ref::<T>().map(f),
            Payload::Mutable(slot) => {
                let guard = slot.lock();
                guard.as_deref().and_then(|b| b.downcast_ref::<T>()).map(f)
            }
        }
    }

    /// Take ownership of a mutable payload. Returns `None` if the type does
    /// not match or the payload was already taken (a mutable payload may be
    /// taken exactly once, enforced here rather than by the chain).
    pub fn take<T: 'static>(&self) -> Option<Box<T>> {
        match &self.payload {
            Payload::Immutable(_) => None,
            Payload::Mutable(slot) => {
                let mut guard = slot.lock();
                let boxed = guard.take()?;
                match boxed.downcast::<T>() {
                    Ok(value) => Some(value),
                    Err(original) => {
                        *guard = Some(original);
                        None
                    }
                }
            }
        }
    }

    /// Share a clone of an immutable payload's handle. Panics if called on a
    /// mutable envelope — callers must check `mutability()` first; this
    /// mirrors the "must not be cloned to multiple handlers" invariant from
    /// the data model.
    pub fn share(&self) -> Envelope {
        match &self.payload {
            Payload::Immutable(arc) => Envelope {
                tag: self.tag,
                mutability: Mutability::Immutable,
                payload: Payload::Immutable(arc.clone()),
            },
            Payload::Mutable(_) => {
                panic!("a mutable envelope cannot be shared across handlers")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_round_trips_by_ref() {
        let env = Envelope::immutable(42i32);
        assert_eq!(env.downcast_ref::<i32>(), Some(&42));
        assert_eq!(env.mutability(), Mutability::Immutable);
    }

    #[test]
    fn mutable_take_consumes_once() {
        let env = Envelope::mutable(String::from("hi"));
        assert_eq!(env.with_ref::<String, _>(|s| s.clone()), Some("hi".to_string()));
        let taken = env.take::<String>();
        assert_eq!(taken.as_deref(), Some("hi"));
        assert!(env.take::<String>().is_none());
        assert!(env.with_ref::<String, _>(|s| s.clone()).is_none());
    }

    #[test]
    fn tag_matches_type() {
        let env = Envelope::immutable(1u64);
        assert!(env.tag().matches::<u64>());
        assert!(!env.tag().matches::<i32>());
    }
}
