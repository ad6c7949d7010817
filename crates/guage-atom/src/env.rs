//! Evaluation environments.
//!
//! An environment is an ordered vector of atoms indexed from the innermost
//! binding. Entering a lambda prepends its argument vector to the closed
//! over environment; leaving restores the previous handle. Frames are
//! immutable once built, so environments behave like values and sharing is
//! a reference-count bump.

use crate::Atom;
use std::rc::Rc;

/// Backing storage of one environment frame. Native code receives a
/// `*const EnvData` and reads slots through the runtime helpers.
#[derive(Default)]
pub struct EnvData {
    slots: Vec<Atom>,
}

impl EnvData {
    #[inline]
    pub fn slots(&self) -> &[Atom] {
        &self.slots
    }
}

/// A shared environment frame.
///
/// # Examples
///
/// ```
/// use guage_atom::{Atom, Env};
///
/// let outer = Env::from_slots(vec![Atom::number(10.0)]);
/// let inner = Env::extend(vec![Atom::number(1.0), Atom::number(2.0)], &outer);
///
/// // Arguments occupy the low indices, captures follow.
/// assert_eq!(inner.get(0).unwrap().as_number(), Some(1.0));
/// assert_eq!(inner.get(2).unwrap().as_number(), Some(10.0));
/// ```
#[derive(Clone, Default)]
pub struct Env(Rc<EnvData>);

impl Env {
    /// The empty top-level environment.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Atom>) -> Self {
        Self(Rc::new(EnvData { slots }))
    }

    /// New frame with `args` prepended to `outer`'s slots.
    pub fn extend(args: Vec<Atom>, outer: &Env) -> Self {
        let mut slots = args;
        slots.extend(outer.0.slots.iter().cloned());
        Self::from_slots(slots)
    }

    /// Indexed fetch; index 0 is the innermost binding.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Atom> {
        self.0.slots.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.slots.is_empty()
    }

    #[inline]
    pub fn slots(&self) -> &[Atom] {
        &self.0.slots
    }

    /// Stable address of the frame, for handing to native code.
    #[inline]
    pub fn as_ptr(&self) -> *const EnvData {
        Rc::as_ptr(&self.0)
    }

    /// Move the slot vector out when this handle is the only owner. Used by
    /// the iterative teardown in `Atom`'s drop.
    pub(crate) fn take_slots_if_unique(mut self) -> Option<Vec<Atom>> {
        Rc::get_mut(&mut self.0).map(|data| std::mem::take(&mut data.slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env() {
        let env = Env::empty();
        assert_eq!(env.len(), 0);
        assert!(env.get(0).is_none());
    }

    #[test]
    fn extend_prepends() {
        let outer = Env::from_slots(vec![Atom::number(7.0), Atom::number(8.0)]);
        let inner = Env::extend(vec![Atom::number(1.0)], &outer);
        assert_eq!(inner.len(), 3);
        assert_eq!(inner.get(0).unwrap().as_number(), Some(1.0));
        assert_eq!(inner.get(1).unwrap().as_number(), Some(7.0));
        assert_eq!(inner.get(2).unwrap().as_number(), Some(8.0));
        // The outer frame is untouched.
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.get(0).unwrap().as_number(), Some(7.0));
    }

    #[test]
    fn clone_shares_frame() {
        let env = Env::from_slots(vec![Atom::number(1.0)]);
        let other = env.clone();
        assert_eq!(env.as_ptr(), other.as_ptr());
    }

    #[test]
    fn shared_frame_keeps_slots_on_teardown() {
        let env = Env::from_slots(vec![Atom::number(1.0)]);
        let keep = env.clone();
        assert!(env.take_slots_if_unique().is_none());
        assert_eq!(keep.len(), 1);
    }
}
