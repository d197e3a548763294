//! End-to-end scenarios exercising the table and funnel together, as
//! opposed to the per-module unit tests colocated with the engine itself.

use robin_hash::{Funnel, RobinHoodTable, TableConfig};

fn fx(bytes: &[u8]) -> u64 {
    fxhash::hash64(bytes)
}

/// Forces every key onto the same home bucket, so collision chains are
/// deterministic regardless of what a real hash function would do.
fn constant_hash(_: &[u8]) -> u64 {
    42
}

#[test]
fn s1_basic_insert() {
    let mut table: RobinHoodTable<()> = RobinHoodTable::new(TableConfig::new(20, 0.80));
    for i in 0u32..32_768 {
        table.insert(fx, &i.to_le_bytes(), ()).unwrap();
    }
    assert_eq!(table.len(), 32_768);
    for i in 0u32..32_768 {
        assert!(table.get(fx, &i.to_le_bytes()).is_some());
    }
    for i in 32_768u32..65_536 {
        assert!(table.get(fx, &i.to_le_bytes()).is_none());
    }
}

#[test]
fn s2_basic_delete() {
    let mut table: RobinHoodTable<()> = RobinHoodTable::new(TableConfig::new(20, 0.80));
    for i in 0u32..32_768 {
        table.insert(fx, &i.to_le_bytes(), ()).unwrap();
    }
    for i in 0u32..32_768 {
        assert!(table.delete(fx, &i.to_le_bytes()).is_some());
    }
    assert_eq!(table.len(), 0);
    assert_eq!(table.iter().count(), 0);
}

#[test]
fn s3_churn_distribution_for_update() {
    let mut table: RobinHoodTable<u32> = RobinHoodTable::new(TableConfig::new(32_768, 0.70));
    for i in 0u32..32_768 {
        table.insert(fx, &i.to_le_bytes(), i).unwrap();
    }
    for i in 32_768u32..327_680 {
        let old = i - 32_768;
        table.delete(fx, &old.to_le_bytes());
        table.insert(fx, &i.to_le_bytes(), i).unwrap();
        assert!((table.capacity() as usize) < 1 << 40, "sanity bound on runaway growth");
    }

    assert_eq!(table.len(), 32_768);
    for i in (32_768 * 9)..(32_768 * 10) {
        let i = i as u32;
        assert_eq!(table.get(fx, &i.to_le_bytes()), Some(&i));
    }
    for i in 0u32..(32_768 * 9) {
        assert_eq!(table.get(fx, &i.to_le_bytes()), None);
    }
}

#[test]
fn s4_upsert_duplicate() {
    let mut table: RobinHoodTable<u32> = RobinHoodTable::new(TableConfig::new(40_000, 0.70));
    for i in 0u32..32_768 {
        let (mut slot, is_dup) = table.upsert(fx, &i.to_le_bytes()).unwrap();
        assert!(!is_dup);
        *slot = i;
    }
    for i in 0u32..32_768 {
        let (slot, is_dup) = table.upsert(fx, &i.to_le_bytes()).unwrap();
        assert!(is_dup);
        assert_eq!(*slot, i);
    }
    assert_eq!(table.len(), 32_768);
}

#[test]
fn s5_funnel_insert_parity() {
    let mut funnel_table: RobinHoodTable<u32> = RobinHoodTable::new(TableConfig::new(40_000, 0.70));
    {
        let mut funnel = Funnel::new(&mut funnel_table, fx, 2, 2048);
        for i in 0u32..32_768 {
            funnel.insert(&i.to_le_bytes(), i).unwrap();
        }
        funnel.flush_all().unwrap();
    }

    let mut point_table: RobinHoodTable<u32> = RobinHoodTable::new(TableConfig::new(40_000, 0.70));
    for i in 0u32..32_768 {
        point_table.insert(fx, &i.to_le_bytes(), i).unwrap();
    }

    assert_eq!(funnel_table.len(), point_table.len());
    let mut funnel_keys: Vec<u32> = funnel_table.iter().map(|(_, v)| *v).collect();
    let mut point_keys: Vec<u32> = point_table.iter().map(|(_, v)| *v).collect();
    funnel_keys.sort_unstable();
    point_keys.sort_unstable();
    assert_eq!(funnel_keys, point_keys);
}

#[test]
fn s6_tombstone_lookup_through_duplicate() {
    let mut table: RobinHoodTable<u32> = RobinHoodTable::new(TableConfig::new(16, 0.70));
    table.insert(constant_hash, b"k1", 1).unwrap();
    table.insert(constant_hash, b"k2", 2).unwrap();
    table.insert(constant_hash, b"k3", 3).unwrap();

    assert_eq!(table.delete(constant_hash, b"k2"), Some(2));
    assert_eq!(table.get(constant_hash, b"k1"), Some(&1));
    assert_eq!(table.get(constant_hash, b"k3"), Some(&3));

    // Re-inserting k3 must find the live duplicate past k2's tombstone, not
    // create a second copy.
    table.insert(constant_hash, b"k3", 30).unwrap();
    assert_eq!(table.get(constant_hash, b"k3"), Some(&30));
    assert_eq!(table.len(), 2);
}
