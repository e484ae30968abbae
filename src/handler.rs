//! The handler bundle: a small static-dispatch match table keyed by type
//! tag, as used by both `receive` and `select` (spec §9: "a small
//! static-dispatch match table keyed by type tag, or a `dyn FnMut` bundle").

use crate::envelope::{Envelope, TypeTag};

/// Borrowed handle to an immutable message, handed to handlers registered
/// with [`on`].
pub struct Mhood<'a, T>(&'a T);

impl<'a, T> Mhood<'a, T> {
    pub fn get(&self) -> &T {
        self.0
    }
}

impl<'a, T> std::ops::Deref for Mhood<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.0
    }
}

/// Owning handle to a mutable message, handed to handlers registered with
/// [`on_mut`]. Exists because a mutable payload is single-use: the handler
/// takes ownership rather than borrowing it (spec §9: "two distinct shapes:
/// an owning handle for mutable messages, a borrowed reference for
/// immutable messages").
pub struct MutableMhood<T>(Box<T>);

impl<T> MutableMhood<T> {
    pub fn into_inner(self) -> Box<T> {
        self.0
    }
}

impl<T> std::ops::Deref for MutableMhood<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for MutableMhood<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// A type-erased entry in a handler bundle. Exactly one handler runs per
/// extracted message — the first whose tag matches (spec §4.3).
pub struct BoxHandler {
    tag: TypeTag,
    call: Box<dyn FnMut(&Envelope) + Send>,
}

impl BoxHandler {
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub(crate) fn invoke(&mut self, envelope: &Envelope) {
        (self.call)(envelope)
    }
}

/// Register a handler for an immutable message of type `T`.
pub fn on<T, F>(mut f: F) -> BoxHandler
where
    T: 'static,
    F: FnMut(Mhood<'_, T>) + Send + 'static,
{
    BoxHandler {
        tag: TypeTag::of::<T>(),
        call: Box::new(move |envelope| {
            if let Some(value) = envelope.downcast_ref::<T>() {
                f(Mhood(value));
            }
        }),
    }
}

/// Register a handler for a mutable, single-use message of type `T`.
pub fn on_mut<T, F>(mut f: F) -> BoxHandler
where
    T: 'static,
    F: FnMut(MutableMhood<T>) + Send + 'static,
{
    BoxHandler {
        tag: TypeTag::of::<T>(),
        call: Box::new(move |envelope| {
            if let Some(value) = envelope.take::<T>() {
                f(MutableMhood(value));
            }
        }),
    }
}

/// Find the first handler in `handlers` whose tag matches `envelope`'s tag
/// and invoke it. Returns `true` if a handler ran.
pub(crate) fn dispatch(handlers: &mut [BoxHandler], tag: TypeTag, envelope: &Envelope) -> bool {
    for handler in handlers.iter_mut() {
        if handler.tag() == tag {
            handler.invoke(envelope);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn immutable_handler_receives_borrowed_value() {
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        let mut handlers = vec![on::<i32, _>(move |m| seen2.store(*m.get(), Ordering::SeqCst))];
        let envelope = Envelope::immutable(99i32);
        assert!(dispatch(&mut handlers, TypeTag::of::<i32>(), &envelope));
        assert_eq!(seen.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn unmatched_tag_does_not_dispatch() {
        let mut handlers = vec![on::<i32, _>(|_m| panic!("should not run"))];
        let envelope = Envelope::immutable("hello".to_string());
        assert!(!dispatch(&mut handlers, TypeTag::of::<String>(), &envelope));
    }

    #[test]
    fn mutable_handler_takes_ownership() {
        let mut handlers = vec![on_mut::<String, _>(|m| {
            assert_eq!(&*m, "owned");
        })];
        let envelope = Envelope::mutable(String::from("owned"));
        assert!(dispatch(&mut handlers, TypeTag::of::<String>(), &envelope));
    }
}
