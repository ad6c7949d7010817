//! Helpers called from generated code, and the deopt latch.
//!
//! Native traces cannot raise errors; when a helper meets an input it
//! cannot handle (a non-numeric environment slot, an out-of-range index) it
//! sets a thread-local flag and returns a placeholder. The dispatcher
//! checks the flag after every native call and re-evaluates the trace's
//! root through the interpreter when it is set, so a deopt never loses a
//! result.

use guage_atom::{Atom, AtomData, EnvData};
use std::cell::Cell;

thread_local! {
    static DEOPT_REQUESTED: Cell<bool> = const { Cell::new(false) };
}

/// Reset the latch before entering native code.
#[inline]
pub fn clear_deopt() {
    DEOPT_REQUESTED.with(|flag| flag.set(false));
}

/// Read and clear the latch after native code returns.
#[inline]
pub fn take_deopt() -> bool {
    DEOPT_REQUESTED.with(|flag| flag.replace(false))
}

/// Load a numeric environment slot as a double.
///
/// Called from generated code with the environment pointer the trace was
/// entered with. Integer slots widen; any other payload (or a bad index)
/// raises the deopt latch and yields 0.0, which the dispatcher discards.
///
/// # Safety
///
/// `env` must point to a live [`EnvData`] for the duration of the call. The
/// dispatcher guarantees this by holding the environment across the native
/// call.
pub unsafe extern "C" fn load_env_double(env: *const EnvData, index: u32) -> f64 {
    if env.is_null() {
        DEOPT_REQUESTED.with(|flag| flag.set(true));
        return 0.0;
    }
    let env = &*env;
    match env.slots().get(index as usize).and_then(Atom::as_f64_lossy) {
        Some(value) => value,
        None => {
            DEOPT_REQUESTED.with(|flag| flag.set(true));
            0.0
        }
    }
}

/// Box a double into a fresh number atom, leaking one strong reference.
///
/// Generated code returns this pointer; the dispatcher reclaims it with
/// `Atom::from_raw`.
pub extern "C" fn atom_from_double(value: f64) -> *mut AtomData {
    Atom::number(value).into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use guage_atom::Env;

    #[test]
    fn load_numeric_slots() {
        let env = Env::from_slots(vec![Atom::number(2.5), Atom::integer(7)]);
        clear_deopt();
        let a = unsafe { load_env_double(env.as_ptr(), 0) };
        let b = unsafe { load_env_double(env.as_ptr(), 1) };
        assert_eq!(a, 2.5);
        assert_eq!(b, 7.0);
        assert!(!take_deopt());
    }

    #[test]
    fn non_numeric_slot_latches_deopt() {
        let env = Env::from_slots(vec![Atom::string("not a number")]);
        clear_deopt();
        let v = unsafe { load_env_double(env.as_ptr(), 0) };
        assert_eq!(v, 0.0);
        assert!(take_deopt());
        // The latch clears on read.
        assert!(!take_deopt());
    }

    #[test]
    fn out_of_range_index_latches_deopt() {
        let env = Env::from_slots(vec![Atom::number(1.0)]);
        clear_deopt();
        unsafe { load_env_double(env.as_ptr(), 5) };
        assert!(take_deopt());
    }

    #[test]
    fn boxing_roundtrip() {
        let raw = atom_from_double(1.25);
        let atom = unsafe { Atom::from_raw(raw) };
        assert_eq!(atom.as_number(), Some(1.25));
    }
}
