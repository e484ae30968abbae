//! RAII guards that close one or several chains on scope exit, with a
//! chosen retention mode (spec §4.6). They do not reference-count chains
//! beyond their own scope: a `Chain` handle is cheap to clone (`Arc`
//! internally), so the guard simply holds its own clones and calls `close`
//! on each exactly once, in construction order, on drop.

use crate::chain::Chain;

/// Whether queued-but-unconsumed messages survive a guard-triggered close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Drop,
    Retain,
}

/// Closes every held chain, in construction order, when dropped. Calling
/// `close` explicitly on a chain beforehand is harmless — close is
/// idempotent (spec §8), so the guard's own close-on-drop is a no-op in
/// that case.
pub struct AutoClose {
    chains: Vec<Chain>,
    retention: Retention,
}

impl AutoClose {
    fn new(chains: Vec<Chain>, retention: Retention) -> Self {
        AutoClose { chains, retention }
    }

    /// Add another chain to be closed by this guard, in addition to the
    /// ones it was built with.
    pub fn and_also(mut self, chain: Chain) -> Self {
        self.chains.push(chain);
        self
    }
}

impl Drop for AutoClose {
    fn drop(&mut self) {
        let retain = matches!(self.retention, Retention::Retain);
        for chain in &self.chains {
            chain.close(retain);
        }
    }
}

/// Build a guard that drops queued content from every held chain on scope
/// exit.
pub fn auto_close_drop_content(chains: impl IntoIterator<Item = Chain>) -> AutoClose {
    AutoClose::new(chains.into_iter().collect(), Retention::Drop)
}

/// Build a guard that retains queued content (lets it drain before
/// `chain_closed`) on every held chain on scope exit.
pub fn auto_close_retain_content(chains: impl IntoIterator<Item = Chain>) -> AutoClose {
    AutoClose::new(chains.into_iter().collect(), Retention::Retain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainParams, ExtractionStatus, PushMode};
    use crate::envelope::{Envelope, TypeTag};

    fn unbounded() -> Chain {
        Chain::new(ChainParams::unbounded())
    }

    #[test]
    fn drop_content_guard_closes_and_empties_on_scope_exit() {
        let ch = unbounded();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        {
            let _guard = auto_close_drop_content(vec![ch.clone()]);
        }
        assert!(ch.is_closed());
        assert_eq!(ch.len(), 0);
    }

    #[test]
    fn retain_content_guard_lets_queued_messages_drain_first() {
        let ch = unbounded();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        {
            let _guard = auto_close_retain_content(vec![ch.clone()]);
        }
        assert!(ch.is_closed());
        let (status, _) = ch.extract();
        assert_eq!(status, ExtractionStatus::MsgExtracted);
    }

    #[test]
    fn guard_is_idempotent_with_explicit_close() {
        let ch = unbounded();
        ch.close(true);
        let guard = auto_close_drop_content(vec![ch.clone()]);
        drop(guard);
        assert!(ch.is_closed());
    }

    #[test]
    fn guard_closes_multiple_chains_in_construction_order() {
        let a = unbounded();
        let b = unbounded();
        {
            let _guard = auto_close_drop_content(vec![a.clone()]).and_also(b.clone());
        }
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
