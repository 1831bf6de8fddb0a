//! Replay descriptors and the per-party beaver cache.
//!
//! The multiplication engine opens `x - a` once per operand identity when
//! caching is enabled; subsequent multiplications against the same operand
//! replay the stored opening and ask the beaver source to re-derive the same
//! mask instead of consuming fresh randomness.

use std::collections::HashMap;

use crate::ring::{OperandId, RingArray};

/// Whether a replay descriptor has been bound to an opening yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayStatus {
    /// No opening cached; the beaver source draws fresh randomness and binds
    /// the descriptor to it.
    Init,
    /// Bound; the source must re-derive the identical mask share from `seed`.
    Replayed,
}

/// Descriptor tying a beaver mask to a previously opened value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayDescriptor {
    pub status: ReplayStatus,
    pub seed: u64,
}

impl Default for ReplayDescriptor {
    fn default() -> Self {
        ReplayDescriptor {
            status: ReplayStatus::Init,
            seed: 0,
        }
    }
}

/// Multiplication flavor a cached opening belongs to. An opening made for an
/// elementwise multiply cannot serve a dot product of the same operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MulKind {
    Elementwise,
    Dot,
}

/// Snapshot of one operand's cache entry, consulted by the engine.
#[derive(Clone, Debug)]
pub struct CacheState {
    pub enabled: bool,
    pub desc: ReplayDescriptor,
    pub open: Option<RingArray>,
}

impl CacheState {
    /// The stored opening can be replayed instead of a communication round.
    pub fn hit(&self) -> bool {
        self.enabled && self.desc.status == ReplayStatus::Replayed
    }
}

#[derive(Debug)]
struct Slot {
    // Pins the backing allocation so the operand identity cannot be recycled
    // while an entry for it is alive.
    _owner: RingArray,
    entries: HashMap<MulKind, (ReplayDescriptor, RingArray)>,
}

/// Per-party map from operand identity to replayable openings.
#[derive(Debug, Default)]
pub struct BeaverCache {
    slots: HashMap<OperandId, Slot>,
}

impl BeaverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt the operand in to replay caching. Idempotent.
    pub fn enable(&mut self, x: &RingArray) {
        self.slots.entry(x.id()).or_insert_with(|| Slot {
            _owner: x.clone(),
            entries: HashMap::new(),
        });
    }

    /// Drop the operand's entries and stop caching it.
    pub fn disable(&mut self, x: &RingArray) {
        self.slots.remove(&x.id());
    }

    pub fn lookup(&self, x: &RingArray, kind: MulKind) -> CacheState {
        match self.slots.get(&x.id()) {
            None => CacheState {
                enabled: false,
                desc: ReplayDescriptor::default(),
                open: None,
            },
            Some(slot) => match slot.entries.get(&kind) {
                None => CacheState {
                    enabled: true,
                    desc: ReplayDescriptor::default(),
                    open: None,
                },
                Some((desc, open)) => CacheState {
                    enabled: true,
                    desc: desc.clone(),
                    open: Some(open.clone()),
                },
            },
        }
    }

    /// Record a freshly opened masking. No-op if caching was disabled for the
    /// operand in the meantime.
    pub fn store(&mut self, x: &RingArray, kind: MulKind, desc: ReplayDescriptor, open: RingArray) {
        if let Some(slot) = self.slots.get_mut(&x.id()) {
            slot.entries.insert(kind, (desc, open));
        }
    }
}
