//! 键哈希与匹配
//!
//! - 标量键：FNV-1a 64-bit（类型标签 + 值字节）
//! - 复合键（multifield）：各元素哈希之**和**，与顺序无关
//! - 匹配：标量比较类型 + 值；复合键先比长度，再逐元素按序比较
//!
//! 置换后的复合键落在同一桶，但不相等。

use crate::value::{Atom, Value};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME:  u64 = 0x100000001b3;

fn fnv1a(mut h: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// 原子哈希（宿主值哈希原语）
pub fn hash_atom(atom: &Atom) -> u64 {
    match atom {
        Atom::Symbol(s)  => fnv1a(fnv1a(FNV_OFFSET, &[1]), s.as_bytes()),
        Atom::Str(s)     => fnv1a(fnv1a(FNV_OFFSET, &[2]), s.as_bytes()),
        Atom::Integer(v) => fnv1a(fnv1a(FNV_OFFSET, &[3]), &v.to_le_bytes()),
        Atom::Float(v)   => fnv1a(fnv1a(FNV_OFFSET, &[4]), &v.to_bits().to_le_bytes()),
    }
}

pub fn hash_value(value: &Value) -> u64 {
    match value {
        Value::Atom(a) => hash_atom(a),
        Value::Multifield(xs) => xs.iter()
            .fold(0u64, |acc, a| acc.wrapping_add(hash_atom(a))),
    }
}

/// 可被行/列索引收录的键
pub trait IndexKey {
    fn key_hash(&self) -> u64;
    /// `probe` 为运行时值（类型 + 值）
    fn key_matches(&self, probe: &Value) -> bool;
}

impl IndexKey for Atom {
    fn key_hash(&self) -> u64 { hash_atom(self) }

    fn key_matches(&self, probe: &Value) -> bool {
        matches!(probe, Value::Atom(p) if p == self)
    }
}

impl IndexKey for Value {
    fn key_hash(&self) -> u64 { hash_value(self) }

    fn key_matches(&self, probe: &Value) -> bool {
        match (self, probe) {
            (Value::Atom(k), Value::Atom(p)) => k == p,
            (Value::Multifield(k), Value::Multifield(p)) => {
                k.len() == p.len() && k.iter().zip(p).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}
