//! 行/列哈希索引
//!
//! 开链哈希：`buckets[hash % bucket_count]` 为条目链，条目只记录
//! (缓存的哈希, 序号)，键本身由表的列表/单元格持有，查找时通过回调取回。
//!
//! 桶数在构建时确定，之后不再扩容或重哈希（表定义后不可变）：
//! - key_count <= 3 ：bucket_count = key_count
//! - 否则          ：ceil(key_count × 1.25) 向上取到素数，负载因子约 0.8

use crate::key::IndexKey;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    hash:    u64,
    ordinal: u32,
}

/// 计算给定键数对应的桶数
pub fn bucket_count_for(key_count: usize) -> usize {
    if key_count <= 3 {
        return key_count;
    }
    next_prime((key_count * 5 + 3) / 4)
}

/// >= n 的最小素数
fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 2 { return false; }
    if n % 2 == 0 { return n == 2; }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 { return false; }
        d += 2;
    }
    true
}

#[derive(Debug, Default, Clone)]
pub struct HashIndex {
    buckets: Vec<Vec<IndexEntry>>,
    len:     usize,
}

impl HashIndex {
    /// 按键数分配桶
    pub fn with_key_count(key_count: usize) -> Self {
        Self::with_bucket_count(bucket_count_for(key_count))
    }

    /// 按指定桶数分配（快照重载时使用保存下来的桶数）
    pub fn with_bucket_count(bucket_count: usize) -> Self {
        Self { buckets: vec![Vec::new(); bucket_count], len: 0 }
    }

    pub fn bucket_count(&self) -> usize { self.buckets.len() }
    pub fn len(&self)          -> usize { self.len }
    pub fn is_empty(&self)     -> bool  { self.len == 0 }

    fn bucket_of(&self, hash: u64) -> Option<usize> {
        if self.buckets.is_empty() {
            None
        } else {
            Some((hash % self.buckets.len() as u64) as usize)
        }
    }

    /// 追加到 `hash % bucket_count` 桶的链尾（不做重复检查）
    pub fn insert(&mut self, hash: u64, ordinal: u32) {
        if self.buckets.is_empty() {
            // 0 键索引首次插入时补一个桶
            self.buckets.push(Vec::new());
        }
        let bucket = (hash % self.buckets.len() as u64) as usize;
        self.buckets[bucket].push(IndexEntry { hash, ordinal });
        self.len += 1;
    }

    /// 先查找再插入；已存在匹配键时返回其序号
    pub fn insert_unique<'k, K, F>(
        &mut self,
        probe:   &Value,
        ordinal: u32,
        key_at:  F,
    ) -> std::result::Result<(), u32>
    where
        K: IndexKey + ?Sized + 'k,
        F: Fn(u32) -> &'k K,
    {
        if let Some(existing) = self.lookup(probe, key_at) {
            return Err(existing);
        }
        self.insert(probe.key_hash(), ordinal);
        Ok(())
    }

    /// 沿目标桶的链查找第一个匹配 `probe` 的条目
    pub fn lookup<'k, K, F>(&self, probe: &Value, key_at: F) -> Option<u32>
    where
        K: IndexKey + ?Sized + 'k,
        F: Fn(u32) -> &'k K,
    {
        let hash   = probe.key_hash();
        let bucket = self.bucket_of(hash)?;
        self.buckets[bucket]
            .iter()
            .filter(|e| e.hash == hash)
            .find(|e| key_at(e.ordinal).key_matches(probe))
            .map(|e| e.ordinal)
    }

    /// 每个桶的链长（诊断用）
    pub fn chain_lengths(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Atom;
    use proptest::prelude::*;

    #[test]
    fn bucket_sizing() {
        assert_eq!(bucket_count_for(0), 0);
        assert_eq!(bucket_count_for(1), 1);
        assert_eq!(bucket_count_for(3), 3);
        // ceil(4 × 1.25) = 5，已是素数
        assert_eq!(bucket_count_for(4), 5);
        // ceil(6 × 1.25) = 8 → 11
        assert_eq!(bucket_count_for(6), 11);
        // ceil(100 × 1.25) = 125 → 127
        assert_eq!(bucket_count_for(100), 127);
    }

    #[test]
    fn insert_unique_reports_existing_ordinal() {
        let keys = vec![Value::symbol("a"), Value::symbol("b"), Value::symbol("a")];
        let mut idx = HashIndex::with_key_count(keys.len());
        assert!(idx.insert_unique(&keys[0], 0, |i| &keys[i as usize]).is_ok());
        assert!(idx.insert_unique(&keys[1], 1, |i| &keys[i as usize]).is_ok());
        assert_eq!(idx.insert_unique(&keys[2], 2, |i| &keys[i as usize]), Err(0));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn lookup_on_empty_index_is_none() {
        let keys: Vec<Value> = vec![];
        let idx = HashIndex::with_key_count(0);
        assert_eq!(idx.lookup(&Value::integer(1), |i| &keys[i as usize]), None);
    }

    #[test]
    fn permuted_composites_collide_but_resolve_separately() {
        let ab = Value::Multifield(vec![Atom::symbol("a"), Atom::symbol("b")]);
        let ba = Value::Multifield(vec![Atom::symbol("b"), Atom::symbol("a")]);
        let keys = vec![ab.clone(), ba.clone()];
        let mut idx = HashIndex::with_key_count(2);
        idx.insert_unique(&keys[0], 0, |i| &keys[i as usize]).unwrap();
        idx.insert_unique(&keys[1], 1, |i| &keys[i as usize]).unwrap();

        // 同桶
        assert_eq!(idx.chain_lengths().iter().filter(|&&n| n == 2).count(), 1);
        assert_eq!(idx.lookup(&ab, |i| &keys[i as usize]), Some(0));
        assert_eq!(idx.lookup(&ba, |i| &keys[i as usize]), Some(1));
    }

    proptest! {
        #[test]
        fn every_distinct_key_is_found_at_its_ordinal(
            raw in proptest::collection::hash_set(any::<i64>(), 0..200),
        ) {
            let keys: Vec<Value> = raw.into_iter().map(Value::integer).collect();
            let mut idx = HashIndex::with_key_count(keys.len());
            for (i, k) in keys.iter().enumerate() {
                prop_assert!(idx.insert_unique(k, i as u32, |o| &keys[o as usize]).is_ok());
            }
            prop_assert_eq!(idx.bucket_count(), bucket_count_for(keys.len()));
            for (i, k) in keys.iter().enumerate() {
                prop_assert_eq!(idx.lookup(k, |o| &keys[o as usize]), Some(i as u32));
            }
        }
    }
}
