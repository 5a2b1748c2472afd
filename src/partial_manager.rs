//! Partial manager: a fixed pool of partials with priority-based stealing
//! across the nine parts.

use crate::partial::{Partial, PartialOwner};

/// Outcome of an allocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationResult {
    /// All requested partials were granted; lists the pool indices.
    Granted(Vec<usize>),
    /// Not enough partials were free or stealable; the caller's note-on
    /// should be dropped and a `PartialPoolExhausted` event reported.
    Failed,
}

/// A candidate for stealing, ranked per §4.3.
struct StealCandidate {
    index: usize,
    part_priority: f32,
    age: u64,
    owning_part: usize,
}

/// Fixed-size pool of partials, shared across all nine parts.
pub struct PartialManager {
    partials: Vec<Partial>,
}

impl PartialManager {
    /// Construct a pool of `count` free partials.
    pub fn new(count: usize) -> Self {
        Self {
            partials: (0..count).map(Partial::new).collect(),
        }
    }

    /// Total pool size.
    pub fn capacity(&self) -> usize {
        self.partials.len()
    }

    /// Number of currently free partials.
    pub fn free_count(&self) -> usize {
        self.partials.iter().filter(|p| p.is_free()).count()
    }

    /// Borrow a partial by pool index.
    pub fn partial(&self, index: usize) -> Option<&Partial> {
        self.partials.get(index)
    }

    /// Mutably borrow a partial by pool index.
    pub fn partial_mut(&mut self, index: usize) -> Option<&mut Partial> {
        self.partials.get_mut(index)
    }

    /// Iterate all partials (used by the renderer to mix every active
    /// voice each frame).
    pub fn iter(&self) -> impl Iterator<Item = &Partial> {
        self.partials.iter()
    }

    /// Iterate all partials mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Partial> {
        self.partials.iter_mut()
    }

    /// Attempt to allocate `count` partials for a requesting part.
    /// `part_priorities` holds each part's *stealing* priority, 0..=1: 0
    /// means fully protected (its partials are reclaimed only as a last
    /// resort), 1 means fully eligible for reclamation regardless of age.
    /// Free partials are used first; if insufficient, active partials are
    /// ranked by stealing priority (highest first — a fully protected
    /// part's partials are never taken ahead of a more eligible one,
    /// regardless of age) and, among partials belonging to equally
    /// eligible parts, by age (oldest first, then lowest owning-part
    /// number) — the classic "reclaim the longest-held voice" rule a
    /// saturated part falls back to once priority alone doesn't decide.
    ///
    /// Per §4.3's "provided the caller's score exceeds them" gate, a
    /// candidate is only stealable when `requester_priority` is at least
    /// its owning part's priority — a requester may not bump a partial
    /// whose part is *more* protected than itself. A fully protected
    /// requester (`requester_priority == 0.0`) can never win that
    /// comparison against another fully protected candidate, so such a
    /// request never steals at all; it may still be granted from the free
    /// pool above.
    pub fn allocate(
        &mut self,
        count: usize,
        requester_priority: f32,
        part_priorities: &[f32],
        now: u64,
    ) -> AllocationResult {
        if count == 0 {
            return AllocationResult::Granted(Vec::new());
        }
        if count > self.partials.len() {
            return AllocationResult::Failed;
        }

        let mut chosen: Vec<usize> = self
            .partials
            .iter()
            .filter(|p| p.is_free())
            .map(|p| p.index())
            .take(count)
            .collect();

        if chosen.len() == count {
            return AllocationResult::Granted(chosen);
        }

        let still_needed = count - chosen.len();

        // A fully protected requester never outweighs anyone else's claim
        // on a partial, per §4.3 — it may only take free partials.
        if requester_priority <= 0.0 {
            return AllocationResult::Failed;
        }

        let mut candidates: Vec<StealCandidate> = self
            .partials
            .iter()
            .filter(|p| !p.is_free())
            .filter_map(|p| {
                let owner = p.owner()?;
                let part_priority = part_priorities.get(owner.part_index).copied().unwrap_or(0.0);
                if part_priority > requester_priority {
                    // The victim's claim outweighs the requester's.
                    return None;
                }
                let age = now.saturating_sub(p.age());
                Some(StealCandidate {
                    index: p.index(),
                    part_priority,
                    age,
                    owning_part: owner.part_index,
                })
            })
            .collect();

        // Highest stealing priority first; ties broken by oldest first,
        // then lowest owning-part number, per §4.3.
        candidates.sort_by(|a, b| {
            b.part_priority
                .partial_cmp(&a.part_priority)
                .unwrap()
                .then(b.age.cmp(&a.age))
                .then(a.owning_part.cmp(&b.owning_part))
        });

        let stealable: Vec<usize> = candidates
            .into_iter()
            .take(still_needed)
            .map(|c| c.index)
            .collect();

        if stealable.len() < still_needed {
            return AllocationResult::Failed;
        }

        for &index in &stealable {
            if let Some(partial) = self.partial_mut(index) {
                partial.free();
            }
        }
        chosen.extend(stealable);
        AllocationResult::Granted(chosen)
    }

    /// Reclaim every partial owned by `owner` back to the free pool
    /// (used when a poly is killed outright by "all sound off").
    pub fn release_owned_by(&mut self, owner: PartialOwner) {
        for p in self.partials.iter_mut() {
            if p.owner() == Some(owner) {
                p.free();
            }
        }
    }

    /// Scan for partials whose TVA has finished and return them to the
    /// free pool. Returns the indices that were freed this call, so the
    /// caller can update the owning polys' partial lists.
    pub fn reap_finished(&mut self) -> Vec<usize> {
        let mut freed = Vec::new();
        for p in self.partials.iter_mut() {
            if !p.is_free() && p.is_finished() {
                freed.push(p.index());
                p.free();
            }
        }
        freed
    }
}
