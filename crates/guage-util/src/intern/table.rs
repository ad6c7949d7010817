//! The shared intern table.
//!
//! Open addressing with linear probing, group-at-a-time over swiss control
//! bytes. Entries store the hash, the canonical leaked string, the id, the
//! byte length, and an inline copy of short names so the usual probe never
//! leaves the entry's cache lines.
//!
//! A slot matches only when the byte length is equal, the stored hash is
//! equal, and the bytes compare equal, in that order. Length-first
//! rejection keeps hash-equal prefixes of different lengths from ever
//! reaching the byte compare.

use parking_lot::RwLock;
use std::cell::RefCell;

use super::{Symbol, MAX_SYMBOLS, RESERVED_FORMS};
use crate::group::{self, DefaultGroup, GroupOps};
use crate::siphash;

/// Power of two, fits in L1.
const INITIAL_CAP: usize = 512;
/// Names up to this many bytes are stored inline in the entry.
const INLINE_LEN: usize = 15;
/// Direct-mapped slots in the per-thread address cache.
const ADDR_CACHE_SIZE: usize = 256;

#[derive(Clone, Copy)]
struct Slot {
    hash: u64,
    canonical: &'static str,
    id: u16,
    len: u8,
    inline: [u8; INLINE_LEN],
}

impl Slot {
    const VACANT: Slot = Slot {
        hash: 0,
        canonical: "",
        id: 0,
        len: 0,
        inline: [0; INLINE_LEN],
    };

    /// Length first, then hash, then bytes.
    #[inline]
    fn matches(&self, text: &[u8], len: u8, hash: u64) -> bool {
        if self.len != len || self.hash != hash {
            return false;
        }
        let stored = if text.len() <= INLINE_LEN {
            &self.inline[..text.len()]
        } else {
            self.canonical.as_bytes()
        };
        stored == text
    }
}

struct TableInner {
    /// cap + GROUP width bytes; the first GROUP bytes are mirrored at the
    /// tail so a group load never wraps.
    ctrl: Box<[u8]>,
    slots: Box<[Slot]>,
    mask: usize,
    len: usize,
    /// Parallel arrays indexed by id, for O(1) reverse lookup.
    by_id: Vec<(&'static str, u64)>,
}

impl TableInner {
    fn with_capacity(cap: usize) -> Self {
        debug_assert!(cap.is_power_of_two());
        Self {
            ctrl: vec![group::CTRL_EMPTY; cap + DefaultGroup::WIDTH].into_boxed_slice(),
            slots: vec![Slot::VACANT; cap].into_boxed_slice(),
            mask: cap - 1,
            len: 0,
            by_id: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn set_ctrl(&mut self, index: usize, value: u8) {
        self.ctrl[index] = value;
        // Mirror the head of the array past the end.
        let mirrored =
            ((index.wrapping_sub(DefaultGroup::WIDTH)) & self.mask) + DefaultGroup::WIDTH;
        self.ctrl[mirrored] = value;
    }

    fn probe(&self, text: &[u8], len: u8, hash: u64) -> Option<Symbol> {
        let tag = group::h2(hash);
        let mut idx = (hash as usize) & self.mask;
        loop {
            let ctrl_group = &self.ctrl[idx..idx + DefaultGroup::WIDTH];
            for off in DefaultGroup::match_tag(ctrl_group, tag) {
                let slot = &self.slots[(idx + off) & self.mask];
                if slot.matches(text, len, hash) {
                    return Some(Symbol::from_parts(slot.canonical, slot.id, slot.hash));
                }
            }
            if DefaultGroup::match_empty(ctrl_group).any() {
                return None;
            }
            idx = (idx + DefaultGroup::WIDTH) & self.mask;
        }
    }

    /// Place an entry, assuming the key is absent and there is room.
    fn insert_slot(&mut self, slot: Slot) {
        let tag = group::h2(slot.hash);
        let mut idx = (slot.hash as usize) & self.mask;
        loop {
            let ctrl_group = &self.ctrl[idx..idx + DefaultGroup::WIDTH];
            if let Some(off) = DefaultGroup::match_empty_or_deleted(ctrl_group).next() {
                let slot_idx = (idx + off) & self.mask;
                self.slots[slot_idx] = slot;
                self.set_ctrl(slot_idx, tag);
                self.len += 1;
                return;
            }
            idx = (idx + DefaultGroup::WIDTH) & self.mask;
        }
    }

    /// Double the capacity and rehash every occupied slot.
    fn grow(&mut self) {
        let mut bigger = TableInner::with_capacity(self.capacity() * 2);
        for i in 0..self.capacity() {
            if self.ctrl[i] & 0x80 == 0 {
                bigger.insert_slot(self.slots[i]);
            }
        }
        bigger.by_id = std::mem::take(&mut self.by_id);
        *self = bigger;
    }
}

#[derive(Clone, Copy)]
struct CacheEntry {
    table: *const (),
    ptr: *const u8,
    sym: Option<Symbol>,
}

thread_local! {
    /// Direct-mapped by the caller's pointer. Zero synchronization; entries
    /// are validated against the owning table and the canonical text before
    /// use, so a reused allocation at the same address cannot alias a stale
    /// hit.
    static ADDR_CACHE: RefCell<[CacheEntry; ADDR_CACHE_SIZE]> = RefCell::new(
        [CacheEntry { table: std::ptr::null(), ptr: std::ptr::null(), sym: None };
            ADDR_CACHE_SIZE],
    );
}

#[inline]
fn cache_index(ptr: *const u8) -> usize {
    ((ptr as usize) >> 4) & (ADDR_CACHE_SIZE - 1)
}

/// The shared string table.
///
/// The probe path takes the read lock; insertion takes the write lock and
/// re-probes to resolve races. Growth happens under the write lock at load
/// factor 3/4.
pub struct InternTable {
    inner: RwLock<TableInner>,
}

impl InternTable {
    /// An empty table. The process-global instance additionally runs
    /// [`preload`](Self::preload).
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner::with_capacity(INITIAL_CAP)),
        }
    }

    /// Intern the reserved special forms so their ids match the `sym`
    /// constants. Must run before any other interning on this table.
    pub(crate) fn preload(&self) {
        for (expect, text) in RESERVED_FORMS.iter().enumerate() {
            let s = self.intern(text);
            assert_eq!(
                s.id() as usize,
                expect,
                "reserved form {:?} interned out of order",
                text
            );
        }
    }

    /// Intern `text`, returning its symbol.
    ///
    /// Panics when the id space is exhausted; running out of intern ids is
    /// fatal to the process.
    pub fn intern(&self, text: &str) -> Symbol {
        match self.try_intern(text) {
            Ok(sym) => sym,
            Err(e) => panic!("{}", e),
        }
    }

    /// Fallible interning, for callers that want to surface exhaustion as a
    /// diagnostic instead of a panic.
    pub fn try_intern(&self, text: &str) -> crate::error::InternResult<Symbol> {
        let cache_idx = cache_index(text.as_ptr());
        let table_tag = self as *const Self as *const ();

        // 1. Thread-local address cache. A hit needs the identical pointer
        //    and equal canonical text.
        let cached = ADDR_CACHE.with(|cache| {
            let cache = cache.borrow();
            let entry = &cache[cache_idx];
            match entry.sym {
                Some(sym)
                    if entry.table == table_tag
                        && entry.ptr == text.as_ptr()
                        && sym.as_str() == text =>
                {
                    Some(sym)
                }
                _ => None,
            }
        });
        if let Some(sym) = cached {
            return Ok(sym);
        }

        // 2. Hash outside any lock, then probe under the read lock.
        let len = text.len().min(255) as u8;
        let hash = siphash::hash_bytes(text.as_bytes());

        let found = self.inner.read().probe(text.as_bytes(), len, hash);
        if let Some(sym) = found {
            Self::remember(table_tag, cache_idx, text, sym);
            return Ok(sym);
        }

        // 3. Write-locked insert. Re-probe first: another thread may have
        //    inserted while we waited.
        let mut inner = self.inner.write();
        if let Some(sym) = inner.probe(text.as_bytes(), len, hash) {
            drop(inner);
            Self::remember(table_tag, cache_idx, text, sym);
            return Ok(sym);
        }

        if inner.len * 4 >= inner.capacity() * 3 {
            inner.grow();
        }

        if inner.by_id.len() >= MAX_SYMBOLS as usize {
            return Err(crate::error::InternError::IdSpaceExhausted(
                MAX_SYMBOLS as u32,
            ));
        }
        let id = inner.by_id.len() as u16;
        let canonical: &'static str = Box::leak(text.to_owned().into_boxed_str());

        let mut inline = [0u8; INLINE_LEN];
        if text.len() <= INLINE_LEN {
            inline[..text.len()].copy_from_slice(text.as_bytes());
        }
        inner.insert_slot(Slot {
            hash,
            canonical,
            id,
            len,
            inline,
        });
        inner.by_id.push((canonical, hash));
        drop(inner);

        let sym = Symbol::from_parts(canonical, id, hash);
        Self::remember(table_tag, cache_idx, text, sym);
        Ok(sym)
    }

    #[inline]
    fn remember(table_tag: *const (), cache_idx: usize, text: &str, sym: Symbol) {
        ADDR_CACHE.with(|cache| {
            cache.borrow_mut()[cache_idx] = CacheEntry {
                table: table_tag,
                ptr: text.as_ptr(),
                sym: Some(sym),
            };
        });
    }

    /// Reverse lookup by id.
    pub fn lookup_id(&self, id: u16) -> Option<Symbol> {
        let inner = self.inner.read();
        inner
            .by_id
            .get(id as usize)
            .map(|&(canonical, hash)| Symbol::from_parts(canonical, id, hash))
    }

    /// Precomputed hash for an already-assigned id.
    pub fn hash_by_id(&self, id: u16) -> Option<u64> {
        self.inner.read().by_id.get(id as usize).map(|&(_, h)| h)
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new()
    }
}
