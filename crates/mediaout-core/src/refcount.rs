// crates/mediaout-core/src/refcount.rs
//
// Strong/weak handle semantics for externally held output references (spec
// §3, §9's "Reference counting" redesign note). The spec describes a
// hand-rolled `{strong, weak, target_ptr}` control block with CAS-increment
// upgrade; `std::sync::Arc`/`Weak` already implement exactly that protocol
// (destruction of `T` at strong→0, of the control block at weak→0, and
// `Weak::upgrade` is the CAS-increment-iff-strong>0 the spec asks for), so
// this module is a thin named wrapper rather than a reimplementation — see
// DESIGN.md.

use std::sync::{Arc, Weak};

/// A strong handle to a shared `Output` (or any other control-block-style
/// value). Cloning bumps the strong count; the target is dropped when the
/// last `StrongRef` is.
#[derive(Debug)]
pub struct StrongRef<T>(Arc<T>);

impl<T> StrongRef<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef(Arc::downgrade(&self.0))
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn weak_count(&self) -> usize {
        Arc::weak_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &StrongRef<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for StrongRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> std::ops::Deref for StrongRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// A weak handle. `upgrade` resolves to a live `StrongRef` only if the
/// strong count is still above zero (spec §3: "A weak reference resolves
/// to a live strong reference only if strong count > 0").
#[derive(Debug)]
pub struct WeakRef<T>(Weak<T>);

impl<T> WeakRef<T> {
    pub fn upgrade(&self) -> Option<StrongRef<T>> {
        self.0.upgrade().map(StrongRef)
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_upgrades_while_strong_survives() {
        let strong = StrongRef::new(42u32);
        let weak = strong.downgrade();
        assert_eq!(*weak.upgrade().unwrap(), 42);
    }

    #[test]
    fn weak_fails_to_upgrade_after_last_strong_dropped() {
        let strong = StrongRef::new("output".to_string());
        let weak = strong.downgrade();
        drop(strong);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn clone_bumps_strong_count() {
        let a = StrongRef::new(1u8);
        assert_eq!(a.strong_count(), 1);
        let _b = a.clone();
        assert_eq!(a.strong_count(), 2);
    }
}
