//! The Robin Hood engine: probing, push-down displacement, and the resize
//! controller that keeps the load factor inside its watermarks.
//!
//! This is a from-scratch port of `pascal_robin_hood.c`'s `PRHH*` family,
//! generalized from a runtime `valsize` to a `V: Copy` type parameter and
//! from a raw pointer-packed key token to the [`KeyStore`] trait.

use std::fmt::Debug;

use crate::bucket::{try_new_slab, Slot};
use crate::capacity::{Capacity, PROBE_STATS_SIZE};
use crate::config::{TableConfig, MIN_SHRINK_OBJCNT};
use crate::error::{Result, TableError};
use crate::hint::{likely, unlikely};
use crate::token::{ArenaKeyStore, KeyStore, KeyToken};

/// Depth of the cycle-break cache consulted during push-down cascades.
const VISIT_IDX_CACHE: usize = 8;

/// A borrowed handle into a just-inserted-or-found slot, returned by
/// [`RobinHoodTable::upsert`].
///
/// Tying the handle's lifetime to the table's `&mut self` borrow is what
/// lets this replace the original's raw `void*` into the bucket slab: the
/// borrow checker, not the caller, guarantees the pointer doesn't outlive a
/// resize that would invalidate it.
pub struct UpsertSlot<'a, V> {
    value: &'a mut V,
}

impl<'a, V> std::ops::Deref for UpsertSlot<'a, V> {
    type Target = V;
    fn deref(&self) -> &V {
        self.value
    }
}

impl<'a, V> std::ops::DerefMut for UpsertSlot<'a, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.value
    }
}

enum UpsertOutcome {
    /// Landed in an empty or tombstoned bucket.
    Empty(usize),
    /// The key was already present at this bucket.
    Dup(usize),
    /// Displaces the richer record at this bucket; the evicted record must
    /// restart its own search at the given probe depth.
    PushDown(usize, usize),
}

/// An open-addressed, Robin-Hood-balanced hash table from byte-string keys
/// to `V`, with a pluggable key-storage back-end.
///
/// See the crate root for the invariants this type upholds across
/// insert/upsert/get/delete and resize.
pub struct RobinHoodTable<V, K = ArenaKeyStore> {
    capacity: Capacity,
    buckets: Vec<Slot<V>>,
    key_store: K,
    objcnt: u64,
    objcnt_high: u64,
    objcnt_low: u64,
    large_data_threshold: usize,
    longest_probes: usize,
    stats: [u32; PROBE_STATS_SIZE],
}

impl<V: Copy + Default> RobinHoodTable<V, ArenaKeyStore> {
    /// Builds a table sized for `config.num_objects_hint` records at
    /// `config.load`, backed by the default [`ArenaKeyStore`].
    pub fn new(config: TableConfig) -> Self {
        let capacity = Capacity::for_load(config.num_objects_hint, config.load);
        let buckets = try_new_slab(capacity.capacity() as usize).unwrap_or_else(|_| {
            panic!(
                "failed to allocate initial bucket slab of {} buckets",
                capacity.capacity()
            )
        });
        Self {
            capacity,
            buckets,
            key_store: ArenaKeyStore::new(),
            objcnt: 0,
            objcnt_high: (capacity.capacity() as f64 * config.load) as u64,
            objcnt_low: capacity.capacity() * 2 / 10,
            large_data_threshold: config.large_data_threshold,
            longest_probes: 0,
            stats: [0; PROBE_STATS_SIZE],
        }
    }
}

impl<V: Copy + Default, K: KeyStore> RobinHoodTable<V, K> {
    /// Number of live records.
    #[inline]
    pub fn len(&self) -> u64 {
        self.objcnt
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objcnt == 0
    }

    /// Current bucket count (not the number of live records).
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity.capacity()
    }

    /// Looks up `key`, hashed with `hasher`.
    pub fn get<H: Fn(&[u8]) -> u64>(&self, hasher: H, key: &[u8]) -> Option<&V> {
        self.get_dyn(&hasher, key)
    }

    fn get_dyn(&self, hasher: &dyn Fn(&[u8]) -> u64, key: &[u8]) -> Option<&V> {
        let idx = self.search_idx(hasher, key)?;
        Some(&self.buckets[idx].value)
    }

    /// Inserts `value` under `key`, overwriting any existing value for that
    /// key. May trigger a resize-up if the table has crossed its high
    /// watermark or a probe has grown unreasonably long.
    pub fn insert<H: Fn(&[u8]) -> u64>(&mut self, hasher: H, key: &[u8], value: V) -> Result<()> {
        self.insert_dyn(&hasher, key, value)
    }

    fn insert_dyn(&mut self, hasher: &dyn Fn(&[u8]) -> u64, key: &[u8], value: V) -> Result<()> {
        if self.objcnt > self.objcnt_high {
            self.size_up(hasher)?;
        }
        let hashed_key = hasher(key);
        match self.upsert_new_key(hasher, key, hashed_key)? {
            UpsertOutcome::Empty(idx) => {
                let token = self.key_store.allocate(key);
                self.buckets[idx] = Slot { token, value };
            }
            UpsertOutcome::Dup(idx) => {
                self.buckets[idx].value = value;
            }
            UpsertOutcome::PushDown(idx, probe) => {
                let displaced = self.buckets[idx];
                let token = self.key_store.allocate(key);
                self.buckets[idx] = Slot { token, value };
                self.upsert_push_down(hasher, displaced, probe, Some(idx), false)?;
            }
        }
        Ok(())
    }

    /// Finds or creates the slot for `key`, returning a mutable handle to its
    /// value plus whether the key was already present. The caller fills in
    /// the value on a fresh slot (it is default-initialized until then).
    pub fn upsert<H: Fn(&[u8]) -> u64>(
        &mut self,
        hasher: H,
        key: &[u8],
    ) -> Result<(UpsertSlot<'_, V>, bool)> {
        let (idx, is_dup) = self.upsert_dyn(&hasher, key)?;
        Ok((
            UpsertSlot {
                value: &mut self.buckets[idx].value,
            },
            is_dup,
        ))
    }

    fn upsert_dyn(&mut self, hasher: &dyn Fn(&[u8]) -> u64, key: &[u8]) -> Result<(usize, bool)> {
        if self.objcnt > self.objcnt_high {
            self.size_up(hasher)?;
        }
        let hashed_key = hasher(key);
        match self.upsert_new_key(hasher, key, hashed_key)? {
            UpsertOutcome::Dup(idx) => Ok((idx, true)),
            UpsertOutcome::Empty(idx) => {
                let token = self.key_store.allocate(key);
                self.buckets[idx] = Slot {
                    token,
                    value: V::default(),
                };
                Ok((idx, false))
            }
            UpsertOutcome::PushDown(idx, probe) => {
                let displaced = self.buckets[idx];
                let token = self.key_store.allocate(key);
                self.buckets[idx] = Slot {
                    token,
                    value: V::default(),
                };
                let resized = self.upsert_push_down(hasher, displaced, probe, Some(idx), false)?;
                if resized {
                    // A mid-cascade resize rebuilt the slab; the slot we just
                    // wrote has moved, so re-find it by key instead of index.
                    let idx = self
                        .search_idx(hasher, key)
                        .expect("key just inserted must be found");
                    return Ok((idx, false));
                }
                Ok((idx, false))
            }
        }
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// May trigger a resize-down first if the table has dropped below its
    /// low watermark; if that resize fails to allocate, this returns `None`
    /// even if `key` is present, mirroring the original's behavior of
    /// surfacing an allocation failure as a lookup miss rather than a
    /// separate error channel on the delete path.
    pub fn delete<H: Fn(&[u8]) -> u64>(&mut self, hasher: H, key: &[u8]) -> Option<V> {
        self.delete_dyn(&hasher, key)
    }

    fn delete_dyn(&mut self, hasher: &dyn Fn(&[u8]) -> u64, key: &[u8]) -> Option<V> {
        if self.objcnt < self.objcnt_low && self.objcnt > MIN_SHRINK_OBJCNT {
            if self.size_down(hasher).is_err() {
                return None;
            }
        }
        let mut idx = self.search_idx(hasher, key)?;
        self.objcnt -= 1;

        let mut record_probe = self.findprobe(hasher, idx);
        self.release_probe_stat(record_probe);

        loop {
            if record_probe == 0 {
                break;
            }
            let premod = self.capacity.premod(idx as u64);
            let mask = self.capacity.mask();
            let ms4b = self.capacity.ms4b() as u64;
            let two_candidates = (((premod + 1) & mask) * ms4b) >> 4 == idx as u64;

            let mut advanced = false;
            'probes: for probe in (1..self.longest_probes).rev() {
                let delta = 2 * ((probe as u64 + 1) * (probe as u64 + 1) - (probe as u64) * (probe as u64));
                let candidate_count = if two_candidates { 2 } else { 1 };
                for candidate in 0..candidate_count {
                    let candidate_idx =
                        (((premod + candidate as u64 + delta) & mask) * ms4b >> 4) as usize;
                    let token = self.buckets[candidate_idx].token;
                    if !token.is_live() {
                        continue;
                    }
                    let hashed_rec = hasher(self.key_store.resolve(token));
                    if self.capacity.index_of(hashed_rec, probe + 1) == candidate_idx
                        && self.capacity.index_of(hashed_rec, probe) == idx
                    {
                        self.release_probe_stat(probe + 1);
                        self.claim_probe_stat(probe);
                        self.buckets.swap(idx, candidate_idx);
                        idx = candidate_idx;
                        record_probe -= 1;
                        advanced = true;
                        break 'probes;
                    }
                }
            }
            if !advanced {
                break;
            }
        }

        let token = self.buckets[idx].token;
        let value = self.buckets[idx].value;
        self.key_store.deallocate(token);
        self.buckets[idx].token = KeyToken::TOMBSTONE;
        Some(value)
    }

    /// Iterates over all live `(key, value)` pairs in bucket order (no
    /// ordering guarantee is made beyond "some order consistent with a
    /// single pass over the slab").
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.buckets
            .iter()
            .filter(|slot| slot.token.is_live())
            .map(move |slot| (self.key_store.resolve(slot.token), &slot.value))
    }

    /// Prefetches the probe-0 bucket for `hash`, for callers (the funnel)
    /// batching lookups ahead of when they're actually performed. A no-op on
    /// targets without a prefetch intrinsic.
    pub(crate) fn prefetch_probe0(&self, hash: u64) {
        let idx = self.capacity.index_of(hash, 0);
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
                unsafe {
                    let ptr = self.buckets.as_ptr().add(idx) as *const i8;
                    _mm_prefetch(ptr, _MM_HINT_T0);
                }
            } else {
                let _ = idx;
            }
        }
    }

    /// Prints the per-probe-depth occupancy histogram to stdout.
    pub fn print_stat(&self) {
        println!(
            "{} objects, capacity {}, longest probe {}",
            self.objcnt,
            self.capacity,
            self.longest_probes
        );
        for (probe, count) in self.stats.iter().enumerate() {
            if *count > 0 {
                println!("  probe {:>2}: {}", probe, count);
            }
        }
    }

    // -- internals ----------------------------------------------------

    fn claim_probe_stat(&mut self, probe: usize) {
        self.objcnt_bump_longest(probe);
        if probe < PROBE_STATS_SIZE {
            self.stats[probe] += 1;
        } else {
            log::warn!("record landed at probe depth {probe}, beyond the tracked histogram");
        }
    }

    fn objcnt_bump_longest(&mut self, probe: usize) {
        if probe > self.longest_probes {
            self.longest_probes = probe;
        }
    }

    fn increase_probe_stat(&mut self, probe: usize) {
        self.objcnt += 1;
        self.claim_probe_stat(probe);
    }

    /// Releases one count at `probe`, clamping `longest_probes` down if that
    /// was the last record at the current maximum depth.
    fn release_probe_stat(&mut self, probe: usize) {
        if probe < PROBE_STATS_SIZE {
            self.stats[probe] -= 1;
            if probe == self.longest_probes && self.stats[probe] == 0 && self.longest_probes > 0 {
                self.longest_probes -= 1;
            }
        } else {
            log::warn!("released a record at probe depth {probe}, beyond the tracked histogram");
        }
    }

    fn search_idx(&self, hasher: &dyn Fn(&[u8]) -> u64, key: &[u8]) -> Option<usize> {
        let hashed = hasher(key);
        for probe in 0..=self.longest_probes {
            let idx = self.capacity.index_of(hashed, probe);
            let token = self.buckets[idx].token;
            if token.is_empty() {
                return None;
            }
            if unlikely(token.is_tombstone()) {
                continue;
            }
            if likely(self.key_store.resolve(token) == key) {
                return Some(idx);
            }
        }
        None
    }

    /// Recovers the probe depth at which the record currently in bucket
    /// `idx` was placed, by recomputing its hash and replaying `index_of`
    /// until it matches. Used whenever a displaced record's original probe
    /// depth has to be compared against a new arrival's.
    fn findprobe(&self, hasher: &dyn Fn(&[u8]) -> u64, idx: usize) -> usize {
        let token = self.buckets[idx].token;
        let hashed = hasher(self.key_store.resolve(token));
        for probe in 0..=self.longest_probes {
            if self.capacity.index_of(hashed, probe) == idx {
                return probe;
            }
        }
        panic!("findprobe: bucket {idx} has no matching probe depth, corrupted table");
    }

    /// Phase 1 of insert/upsert: probes for `key`, returning whether it
    /// landed in an empty slot, found a duplicate, or must displace a
    /// poorer (lower-probe-depth) record at the matched bucket.
    fn upsert_new_key(
        &mut self,
        hasher: &dyn Fn(&[u8]) -> u64,
        key: &[u8],
        hashed_key: u64,
    ) -> Result<UpsertOutcome> {
        let mut probe = 0usize;
        loop {
            if unlikely(probe > PROBE_STATS_SIZE) {
                self.size_up(hasher)?;
                probe = 0;
                continue;
            }
            let idx = self.capacity.index_of(hashed_key, probe);
            let token = self.buckets[idx].token;

            if token.is_empty() {
                self.increase_probe_stat(probe);
                return Ok(UpsertOutcome::Empty(idx));
            }

            if token.is_tombstone() {
                // A tombstone doesn't end the probe sequence for lookups, so
                // a live duplicate could still sit further down it.
                for p in (probe + 1)..=self.longest_probes {
                    let cand_idx = self.capacity.index_of(hashed_key, p);
                    let cand_token = self.buckets[cand_idx].token;
                    if !cand_token.is_live() {
                        continue;
                    }
                    if self.key_store.resolve(cand_token) == key {
                        return Ok(UpsertOutcome::Dup(cand_idx));
                    }
                }
                self.increase_probe_stat(probe);
                return Ok(UpsertOutcome::Empty(idx));
            }

            if likely(self.key_store.resolve(token) == key) {
                return Ok(UpsertOutcome::Dup(idx));
            }

            let old_probe = self.findprobe(hasher, idx);
            if probe > old_probe {
                self.objcnt += 1;
                self.objcnt_bump_longest(probe);
                self.release_probe_stat_no_clamp(old_probe);
                self.claim_probe_stat_no_count(probe);
                return Ok(UpsertOutcome::PushDown(idx, old_probe + 1));
            }
            probe += 1;
        }
    }

    /// Like [`Self::release_probe_stat`] but never touches `objcnt` (the
    /// record isn't leaving the table, just moving bucket).
    fn release_probe_stat_no_clamp(&mut self, probe: usize) {
        if probe < PROBE_STATS_SIZE {
            self.stats[probe] -= 1;
        }
    }

    fn claim_probe_stat_no_count(&mut self, probe: usize) {
        if probe < PROBE_STATS_SIZE {
            self.stats[probe] += 1;
        } else {
            log::warn!("record landed at probe depth {probe}, beyond the tracked histogram");
        }
    }

    /// Phase 2: cascades the evicted `bucket_cpy` forward until it lands in
    /// an empty or tombstoned bucket, displacing any record it's richer than
    /// along the way. Returns whether a mid-cascade resize occurred.
    ///
    /// `credit_landing` controls whether the final landing bumps `objcnt`:
    /// callers cascading a record displaced by a brand-new key (whose
    /// arrival was already credited by [`Self::upsert_new_key`]) pass
    /// `false`, while [`Self::resize_to`] (which zeroes `objcnt` before
    /// re-landing every live bucket) passes `true`. A resize triggered
    /// partway through a cascade already re-credits everything *currently*
    /// in the slab, so `bucket_cpy` (held outside it) always needs crediting
    /// from that point on regardless of the caller's original intent.
    fn upsert_push_down(
        &mut self,
        hasher: &dyn Fn(&[u8]) -> u64,
        mut bucket_cpy: Slot<V>,
        mut probe: usize,
        avoid_bucket: Option<usize>,
        mut credit_landing: bool,
    ) -> Result<bool> {
        let mut resized = false;
        let mut visited_idx = [0usize; VISIT_IDX_CACHE];
        let mut visit = 0usize;
        let mut hashed_key = hasher(self.key_store.resolve(bucket_cpy.token));

        loop {
            if unlikely(probe > PROBE_STATS_SIZE) {
                self.size_up(hasher)?;
                probe = 0;
                resized = true;
                credit_landing = true;
                continue;
            }

            let idx = self.capacity.index_of(hashed_key, probe);

            if Some(idx) == avoid_bucket {
                probe += 1;
                continue;
            }

            if visit > 2 {
                let seen = if visit < VISIT_IDX_CACHE {
                    visited_idx[..visit].contains(&idx)
                } else {
                    (visit + 1..visit + VISIT_IDX_CACHE)
                        .any(|i| visited_idx[i % VISIT_IDX_CACHE] == idx)
                };
                if seen {
                    probe += 1;
                    continue;
                }
            }
            visited_idx[visit % VISIT_IDX_CACHE] = idx;
            visit += 1;

            let existing_token = self.buckets[idx].token;
            if !existing_token.is_live() {
                if credit_landing {
                    self.increase_probe_stat(probe);
                } else {
                    self.claim_probe_stat(probe);
                }
                self.buckets[idx] = bucket_cpy;
                return Ok(resized);
            }

            let old_probe = self.findprobe(hasher, idx);
            if probe > old_probe {
                self.objcnt_bump_longest(probe);
                self.release_probe_stat_no_clamp(old_probe);
                self.claim_probe_stat_no_count(probe);
                let displaced = self.buckets[idx];
                self.buckets[idx] = bucket_cpy;
                bucket_cpy = displaced;
                probe = old_probe + 1;
                hashed_key = hasher(self.key_store.resolve(bucket_cpy.token));
                continue;
            }
            probe += 1;
        }
    }

    fn grow_policy(&self) -> Capacity {
        let bucket_bytes = self.capacity.capacity() as usize * std::mem::size_of::<Slot<V>>();
        let ms4b = self.capacity.ms4b();
        let clz = self.capacity.clz();
        if bucket_bytes >= self.large_data_threshold {
            // Past the large-data threshold, double-on-resize wastes too
            // much memory; step through the ms4b ladder for ~20-33% growth
            // instead of 100%.
            let (new_ms4b, new_clz) = match ms4b {
                8 => (10, clz),
                9 | 10 => (12, clz),
                11 | 12 => (14, clz),
                13 | 14 => (8, clz - 1),
                15 => (10, clz - 1),
                other => panic!("unknown capacity_ms4b {other}"),
            };
            Capacity::from_parts(new_clz, new_ms4b)
        } else {
            let new_clz = if ms4b == 8 { clz - 1 } else { clz - 2 };
            Capacity::from_parts(new_clz, 8)
        }
    }

    fn shrink_policy(&self) -> Capacity {
        let ms4b = self.capacity.ms4b();
        let clz = self.capacity.clz();
        let (new_ms4b, new_clz) = match ms4b {
            8..=11 => (8, clz + 1),
            12..=15 => (12, clz + 1),
            other => panic!("unknown capacity_ms4b {other}"),
        };
        Capacity::from_parts(new_clz, new_ms4b)
    }

    fn size_up(&mut self, hasher: &dyn Fn(&[u8]) -> u64) -> Result<()> {
        let new_capacity = self.grow_policy();
        self.resize_to(hasher, new_capacity)
    }

    fn size_down(&mut self, hasher: &dyn Fn(&[u8]) -> u64) -> Result<()> {
        let new_capacity = self.shrink_policy();
        self.resize_to(hasher, new_capacity)
    }

    fn resize_to(&mut self, hasher: &dyn Fn(&[u8]) -> u64, new_capacity: Capacity) -> Result<()> {
        log::info!("resizing table from {} to {new_capacity}", self.capacity);
        let new_slab = try_new_slab(new_capacity.capacity() as usize).map_err(|_| {
            TableError::AllocationFailure {
                requested_capacity: new_capacity.capacity() as usize,
            }
        })?;
        let old_buckets = std::mem::replace(&mut self.buckets, new_slab);
        self.capacity = new_capacity;
        self.objcnt = 0;
        self.objcnt_high = new_capacity.capacity() * 8 / 10;
        self.objcnt_low = new_capacity.capacity() * 2 / 10;
        self.longest_probes = 0;
        self.stats = [0; PROBE_STATS_SIZE];

        for slot in old_buckets {
            if slot.token.is_live() {
                self.upsert_push_down(hasher, slot, 0, None, true)?;
            }
        }
        Ok(())
    }
}

impl<V: Copy + Default + Debug, K: KeyStore> Debug for RobinHoodTable<V, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobinHoodTable")
            .field("capacity", &self.capacity)
            .field("objcnt", &self.objcnt)
            .field("longest_probes", &self.longest_probes)
            .finish()
    }
}
