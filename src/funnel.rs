//! The bulk batching layer: partitions keys by hash prefix, accumulates
//! per-partition queues, and prefetches each queue's target buckets before
//! draining it into the engine.
//!
//! Grounded in the same prefetch-then-drain shape as a software
//! transposition-table's bucket access pattern: touch the cache line you're
//! about to need before you need it, across a batch, rather than one random
//! access at a time.

use crate::table::RobinHoodTable;
use crate::token::KeyStore;
use crate::error::Result;

type UpsertCallback<V> = Box<dyn FnOnce(&mut V, bool)>;
type GetCallback<V> = Box<dyn FnOnce(Option<&V>)>;
type DeleteCallback<V> = Box<dyn FnOnce(Option<V>)>;

enum Entry<V> {
    Insert {
        key: Box<[u8]>,
        value: V,
    },
    Upsert {
        key: Box<[u8]>,
        callback: Option<UpsertCallback<V>>,
    },
    Get {
        key: Box<[u8]>,
        callback: GetCallback<V>,
    },
    Delete {
        key: Box<[u8]>,
        callback: Option<DeleteCallback<V>>,
    },
}

impl<V> Entry<V> {
    fn key(&self) -> &[u8] {
        match self {
            Entry::Insert { key, .. }
            | Entry::Upsert { key, .. }
            | Entry::Get { key, .. }
            | Entry::Delete { key, .. } => key,
        }
    }

    /// A rough per-entry byte cost used to trigger a flush, matching the
    /// original's accounting of queued entries by key length rather than an
    /// exact allocator tally.
    fn byte_cost(&self) -> usize {
        self.key().len() + std::mem::size_of::<V>() + std::mem::size_of::<usize>()
    }
}

struct Partition<V> {
    entries: Vec<Entry<V>>,
    bytes: usize,
}

impl<V> Default for Partition<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            bytes: 0,
        }
    }
}

/// A partitioned batching façade over a [`RobinHoodTable`].
///
/// Every enqueue method takes the same `hasher` contract as the table's own
/// point operations: the same function must be supplied consistently.
pub struct Funnel<'t, V, K, H> {
    table: &'t mut RobinHoodTable<V, K>,
    hasher: H,
    partitions: Vec<Partition<V>>,
    partition_cap_bytes: usize,
}

impl<'t, V, K, H> Funnel<'t, V, K, H>
where
    V: Copy + Default,
    K: KeyStore,
    H: Fn(&[u8]) -> u64,
{
    /// Builds a funnel over `table` with `partition_count` partitions, each
    /// flushed automatically once its queued entries exceed
    /// `partition_cap_bytes`.
    pub fn new(
        table: &'t mut RobinHoodTable<V, K>,
        hasher: H,
        partition_count: usize,
        partition_cap_bytes: usize,
    ) -> Self {
        assert!(partition_count > 0, "a funnel needs at least one partition");
        let mut partitions = Vec::with_capacity(partition_count);
        partitions.resize_with(partition_count, Partition::default);
        Self {
            table,
            hasher,
            partitions,
            partition_cap_bytes,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Selects a partition from the top bits of the key's hash, so that keys
    /// destined for nearby buckets tend to batch together.
    fn partition_of(&self, key: &[u8]) -> usize {
        let hash = (self.hasher)(key);
        ((hash >> 48) as usize) % self.partitions.len()
    }

    fn enqueue(&mut self, partition: usize, entry: Entry<V>) -> Result<()> {
        let cost = entry.byte_cost();
        let part = &mut self.partitions[partition];
        part.entries.push(entry);
        part.bytes += cost;
        if part.bytes >= self.partition_cap_bytes {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

    /// Queues an insert, possibly triggering a flush of its partition.
    pub fn insert(&mut self, key: &[u8], value: V) -> Result<()> {
        let partition = self.partition_of(key);
        self.enqueue(
            partition,
            Entry::Insert {
                key: key.into(),
                value,
            },
        )
    }

    /// Queues an upsert. `callback`, if given, runs during flush with the
    /// resulting mutable value and the `is_duplicate` flag.
    pub fn upsert(
        &mut self,
        key: &[u8],
        callback: Option<UpsertCallback<V>>,
    ) -> Result<()> {
        let partition = self.partition_of(key);
        self.enqueue(
            partition,
            Entry::Upsert {
                key: key.into(),
                callback,
            },
        )
    }

    /// Queues a lookup. `callback` runs during flush with the lookup result.
    pub fn get(&mut self, key: &[u8], callback: GetCallback<V>) -> Result<()> {
        let partition = self.partition_of(key);
        self.enqueue(
            partition,
            Entry::Get {
                key: key.into(),
                callback,
            },
        )
    }

    /// Queues a delete. `callback`, if given, runs during flush with the
    /// removed value, or `None` if the key was absent.
    pub fn delete(
        &mut self,
        key: &[u8],
        callback: Option<DeleteCallback<V>>,
    ) -> Result<()> {
        let partition = self.partition_of(key);
        self.enqueue(
            partition,
            Entry::Delete {
                key: key.into(),
                callback,
            },
        )
    }

    /// Drains partition `p`: prefetches every queued key's first-probe
    /// bucket, then replays the queue against the table in enqueue order.
    pub fn flush_partition(&mut self, p: usize) -> Result<()> {
        let entries = std::mem::take(&mut self.partitions[p].entries);
        self.partitions[p].bytes = 0;

        for entry in &entries {
            let hash = (self.hasher)(entry.key());
            self.table.prefetch_probe0(hash);
        }

        for entry in entries {
            match entry {
                Entry::Insert { key, value } => {
                    self.table.insert(&self.hasher, &key, value)?;
                }
                Entry::Upsert { key, callback } => {
                    let (mut slot, is_dup) = self.table.upsert(&self.hasher, &key)?;
                    if let Some(callback) = callback {
                        callback(&mut *slot, is_dup);
                    }
                }
                Entry::Get { key, callback } => {
                    let found = self.table.get(&self.hasher, &key);
                    callback(found);
                }
                Entry::Delete { key, callback } => {
                    let removed = self.table.delete(&self.hasher, &key);
                    if let Some(callback) = callback {
                        callback(removed);
                    }
                }
            }
        }
        Ok(())
    }

    /// Flushes every partition, in partition order.
    pub fn flush_all(&mut self) -> Result<()> {
        for p in 0..self.partitions.len() {
            self.flush_partition(p)?;
        }
        Ok(())
    }
}

impl<'t, V, K, H> Drop for Funnel<'t, V, K, H>
where
    V: Copy + Default,
    K: KeyStore,
    H: Fn(&[u8]) -> u64,
{
    fn drop(&mut self) {
        if let Err(err) = self.flush_all() {
            log::error!("funnel drop: final flush failed: {err}");
        }
    }
}
