//! Per-expression heat tracking.
//!
//! Each evaluated expression is keyed by cell identity in an
//! insertion-ordered array. Crossing the threshold triggers one compile
//! attempt; a refusal is remembered so lowering never reruns for that
//! expression.
//!
//! State machine:
//!
//! | state    | entry                 | exits                               |
//! |----------|-----------------------|-------------------------------------|
//! | Cold     | first sighting        | Warming after first call            |
//! | Warming  | 1 <= count < T        | Compiled at T, or Refused (sticky)  |
//! | Compiled | native code exists    | Deopted on any fallback             |
//! | Deopted  | fallback occurred     | terminal; no automatic recompile    |

use crate::ir::Trace;
use guage_atom::{Atom, AtomData};

/// Compilation state of one hot expression.
pub enum HotState {
    /// Seen, not yet at threshold.
    Warming,
    /// Codegen refused once; never retried.
    Refused,
    /// Native code exists. `deopted` is sticky once a fallback occurs.
    Compiled { trace: Trace, deopted: bool },
}

/// One tracked expression.
pub struct HotEntry {
    /// Retained so the key pointer stays valid.
    expr: Atom,
    pub count: u32,
    pub state: HotState,
}

impl HotEntry {
    pub fn expr(&self) -> &Atom {
        &self.expr
    }
}

/// Insertion-ordered map keyed by expression identity.
#[derive(Default)]
pub struct HotMap {
    entries: Vec<HotEntry>,
}

/// Cap on tracked expressions; beyond this new expressions stay cold.
const MAX_HOT: usize = 1024;

impl HotMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: *const AtomData) -> Option<usize> {
        self.entries.iter().position(|e| e.expr.ptr_id() == key)
    }

    /// Record one call. Returns the entry, inserting at count 1 on first
    /// sighting (or `None` once the map is full).
    pub fn record(&mut self, expr: &Atom) -> Option<&mut HotEntry> {
        if let Some(idx) = self.position(expr.ptr_id()) {
            let entry = &mut self.entries[idx];
            entry.count += 1;
            return Some(entry);
        }
        if self.entries.len() >= MAX_HOT {
            return None;
        }
        self.entries.push(HotEntry {
            expr: expr.clone(),
            count: 1,
            state: HotState::Warming,
        });
        self.entries.last_mut()
    }

    pub fn get(&self, expr: &Atom) -> Option<&HotEntry> {
        self.position(expr.ptr_id()).map(|i| &self.entries[i])
    }

    pub fn get_mut(&mut self, expr: &Atom) -> Option<&mut HotEntry> {
        let idx = self.position(expr.ptr_id())?;
        Some(&mut self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of traces holding native code.
    pub fn compiled_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, HotState::Compiled { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_starts_warming() {
        let mut map = HotMap::new();
        let expr = Atom::number(1.0);
        let entry = map.record(&expr).unwrap();
        assert_eq!(entry.count, 1);
        assert!(matches!(entry.state, HotState::Warming));
    }

    #[test]
    fn counts_accumulate_per_identity() {
        let mut map = HotMap::new();
        let a = Atom::number(1.0);
        let b = Atom::number(1.0);
        for _ in 0..5 {
            map.record(&a);
        }
        map.record(&b);
        assert_eq!(map.get(&a).unwrap().count, 5);
        // Structurally equal but a different cell.
        assert_eq!(map.get(&b).unwrap().count, 1);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn entry_retains_expression() {
        let mut map = HotMap::new();
        let key;
        {
            let expr = Atom::list([Atom::symbol_from("⊕")]);
            key = expr.ptr_id();
            map.record(&expr);
        }
        // The entry's clone keeps the cell alive and the key stable.
        assert_eq!(map.entries[0].expr().ptr_id(), key);
    }

    #[test]
    fn refused_is_sticky() {
        let mut map = HotMap::new();
        let expr = Atom::number(1.0);
        map.record(&expr).unwrap().state = HotState::Refused;
        let entry = map.record(&expr).unwrap();
        assert!(matches!(entry.state, HotState::Refused));
        assert_eq!(entry.count, 2);
    }
}
