//! 表快照（二进制保存 / 重载）
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC   (8 bytes) "IDXTBL\0\0"    │
//! │  Version (u32 LE) = 1              │
//! │  Codec   (u8)  0=None 1=LZ4        │
//! │  RawLen  (u32 LE) 解压后负载长度    │
//! │  DataLen (u32 LE) 负载长度          │
//! ├────────────────────────────────────┤
//! │  PAYLOAD                           │
//! │    current module (str)            │
//! │    module count (u32)              │
//! │      name (str) + imports (str)*   │
//! │    table count (u32)               │
//! │      module ordinal, name, comment │
//! │      auto_keys, columns, rows      │
//! │      column/row bucket count       │
//! │      column atoms, cell values     │
//! ├────────────────────────────────────┤
//! │  CRC32 of PAYLOAD (u32 LE)         │
//! └────────────────────────────────────┘
//! ```
//!
//! 哈希桶本身不落盘：重载时按保存的桶数重新分配并逐条插入。

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::catalog::Catalog;
use crate::common::{Result, TableError};
use crate::config::SnapshotCompression;
use crate::environment::Environment;
use crate::index::bucket_count_for;
use crate::table::{Table, TableParts};
use crate::value::{Atom, Value};

const MAGIC: &[u8; 8] = b"IDXTBL\0\0";
const VERSION: u32     = 1;
const HEADER_LEN: usize = 8 + 4 + 1 + 4 + 4;

const TAG_SYMBOL:     u8 = 0;
const TAG_STRING:     u8 = 1;
const TAG_INTEGER:    u8 = 2;
const TAG_FLOAT:      u8 = 3;
const TAG_MULTIFIELD: u8 = 4;

fn io_err(e: std::io::Error) -> TableError {
    TableError::Snapshot(e.to_string())
}

// ── 编码 ──────────────────────────────────────────────────────────────────────

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32).map_err(io_err)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_atom(out: &mut Vec<u8>, a: &Atom) -> Result<()> {
    match a {
        Atom::Symbol(s)  => { out.push(TAG_SYMBOL); write_str(out, s) }
        Atom::Str(s)     => { out.push(TAG_STRING); write_str(out, s) }
        Atom::Integer(v) => { out.push(TAG_INTEGER); out.write_i64::<LittleEndian>(*v).map_err(io_err) }
        Atom::Float(v)   => { out.push(TAG_FLOAT); out.write_f64::<LittleEndian>(*v).map_err(io_err) }
    }
}

fn write_value(out: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Atom(a) => write_atom(out, a),
        Value::Multifield(xs) => {
            out.push(TAG_MULTIFIELD);
            out.write_u32::<LittleEndian>(xs.len() as u32).map_err(io_err)?;
            xs.iter().try_for_each(|a| write_atom(out, a))
        }
    }
}

fn encode_catalog(catalog: &Catalog) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_str(&mut out, catalog.current_module())?;

    let modules = catalog.module_names();
    out.write_u32::<LittleEndian>(modules.len() as u32).map_err(io_err)?;
    for m in &modules {
        write_str(&mut out, m)?;
        let imports = catalog.module_imports(m).unwrap_or_default();
        out.write_u32::<LittleEndian>(imports.len() as u32).map_err(io_err)?;
        for i in imports {
            write_str(&mut out, i)?;
        }
    }

    let tables = catalog.tables();
    out.write_u32::<LittleEndian>(tables.len() as u32).map_err(io_err)?;
    for t in &tables {
        // 指针字段换成序号：表所属模块记为模块列表下标
        let module_ordinal = modules.iter().position(|m| m == t.module())
            .ok_or_else(|| TableError::UnknownModule(t.module().into()))?;
        out.write_u32::<LittleEndian>(module_ordinal as u32).map_err(io_err)?;
        write_str(&mut out, t.name())?;
        match t.comment() {
            Some(c) => { out.push(1); write_str(&mut out, c)?; }
            None    => out.push(0),
        }
        out.push(u8::from(t.auto_keys()));
        out.write_u32::<LittleEndian>(t.column_count() as u32).map_err(io_err)?;
        out.write_u32::<LittleEndian>(t.row_count() as u32).map_err(io_err)?;
        out.write_u32::<LittleEndian>(t.column_bucket_count() as u32).map_err(io_err)?;
        out.write_u32::<LittleEndian>(t.row_bucket_count() as u32).map_err(io_err)?;
        for c in t.columns() {
            write_atom(&mut out, c)?;
        }
        for v in t.cells() {
            write_value(&mut out, v)?;
        }
    }
    Ok(out)
}

// ── 解码 ──────────────────────────────────────────────────────────────────────

struct PayloadReader<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    fn remaining(&self) -> usize {
        let len = self.cur.get_ref().len() as u64;
        len.saturating_sub(self.cur.position()) as usize
    }

    fn u8(&mut self)  -> Result<u8>  { self.cur.read_u8().map_err(io_err) }
    fn u32(&mut self) -> Result<u32> { self.cur.read_u32::<LittleEndian>().map_err(io_err) }

    /// 读取计数并确认剩余字节至少能容纳 `min_item` × 计数
    fn count(&mut self, min_item: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_item) > self.remaining() {
            return Err(TableError::Snapshot(format!("count {n} exceeds remaining payload")));
        }
        Ok(n)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.count(1)?;
        let mut buf = vec![0u8; len];
        self.cur.read_exact(&mut buf).map_err(io_err)?;
        String::from_utf8(buf).map_err(|e| TableError::Snapshot(e.to_string()))
    }

    fn atom_with_tag(&mut self, tag: u8) -> Result<Atom> {
        Ok(match tag {
            TAG_SYMBOL  => Atom::Symbol(self.string()?),
            TAG_STRING  => Atom::Str(self.string()?),
            TAG_INTEGER => Atom::Integer(self.cur.read_i64::<LittleEndian>().map_err(io_err)?),
            TAG_FLOAT   => Atom::Float(self.cur.read_f64::<LittleEndian>().map_err(io_err)?),
            other => return Err(TableError::Snapshot(format!("unknown atom tag {other}"))),
        })
    }

    fn atom(&mut self) -> Result<Atom> {
        let tag = self.u8()?;
        self.atom_with_tag(tag)
    }

    fn value(&mut self) -> Result<Value> {
        match self.u8()? {
            TAG_MULTIFIELD => {
                let n = self.count(1)?;
                (0..n).map(|_| self.atom()).collect::<Result<Vec<_>>>().map(Value::Multifield)
            }
            tag => self.atom_with_tag(tag).map(Value::Atom),
        }
    }
}

/// 桶数上限 bucket_count_for(n) + n，先于分配检查
fn check_bucket_count(table: &str, what: &str, buckets: usize, keys: usize) -> Result<()> {
    let limit = bucket_count_for(keys) + keys;
    if buckets > limit {
        return Err(TableError::Snapshot(format!(
            "table {table}: {what} bucket count {buckets} exceeds {limit} for {keys} keys"
        )));
    }
    Ok(())
}

fn decode_catalog(payload: &[u8]) -> Result<Catalog> {
    let mut r = PayloadReader { cur: Cursor::new(payload) };
    let mut catalog = Catalog::new();
    let current = r.string()?;

    let module_count = r.count(4)?;
    let mut records = Vec::with_capacity(module_count);
    for _ in 0..module_count {
        let name = r.string()?;
        let import_count = r.count(4)?;
        let imports = (0..import_count).map(|_| r.string()).collect::<Result<Vec<_>>>()?;
        records.push((name, imports));
    }
    // 导入可能指向后定义的模块：先建全部模块，再挂导入
    for (name, _) in &records {
        catalog.define_module(name, Vec::new())?;
    }
    let mut modules = Vec::with_capacity(module_count);
    for (name, imports) in records {
        catalog.define_module(&name, imports)?;
        modules.push(name);
    }

    let table_count = r.count(4)?;
    for _ in 0..table_count {
        let module_ordinal = r.u32()? as usize;
        let module = modules.get(module_ordinal).cloned().ok_or_else(|| {
            TableError::Snapshot(format!("module ordinal {module_ordinal} out of range"))
        })?;
        let name = r.string()?;
        let comment = match r.u8()? {
            0 => None,
            _ => Some(r.string()?),
        };
        let auto_keys      = r.u8()? != 0;
        let column_count   = r.count(1)?;
        let row_count      = r.u32()? as usize;
        let column_buckets = r.u32()? as usize;
        let row_buckets    = r.u32()? as usize;
        if column_count == 0 {
            return Err(TableError::Snapshot(format!("table {name}: no columns")));
        }
        if row_count.saturating_mul(column_count) > r.remaining() {
            return Err(TableError::Snapshot(format!("table {name}: cell count exceeds payload")));
        }
        check_bucket_count(&name, "column", column_buckets, column_count)?;
        check_bucket_count(&name, "row", row_buckets, row_count)?;

        let columns = (0..column_count).map(|_| r.atom()).collect::<Result<Vec<_>>>()?;
        let cells = (0..row_count * column_count).map(|_| r.value()).collect::<Result<Vec<_>>>()?;

        let parts = TableParts { name, module, comment, auto_keys, columns, cells };
        catalog.install(Table::build_with_buckets(parts, column_buckets, row_buckets)?)?;
    }

    if r.remaining() != 0 {
        return Err(TableError::Snapshot(format!("{} trailing bytes", r.remaining())));
    }
    catalog.set_current_module(&current)?;
    Ok(catalog)
}

// ── Environment 接口 ──────────────────────────────────────────────────────────

impl Environment {
    /// 序列化全部模块与表
    pub fn save_snapshot(&self) -> Result<Vec<u8>> {
        let raw = encode_catalog(&self.catalog)?;
        let codec = self.config.snapshot_compression;
        let payload = match codec {
            SnapshotCompression::None => raw.clone(),
            SnapshotCompression::Lz4 => lz4::block::compress(&raw, None, false)
                .map_err(|e| TableError::Compression(e.to_string()))?,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
        out.extend_from_slice(MAGIC);
        out.write_u32::<LittleEndian>(VERSION).map_err(io_err)?;
        out.push(codec.tag());
        out.write_u32::<LittleEndian>(raw.len() as u32).map_err(io_err)?;
        out.write_u32::<LittleEndian>(payload.len() as u32).map_err(io_err)?;
        out.extend_from_slice(&payload);
        out.write_u32::<LittleEndian>(crc32fast::hash(&payload)).map_err(io_err)?;

        debug!(tables = self.catalog.table_count(), bytes = out.len(), ?codec, "snapshot saved");
        Ok(out)
    }

    /// 用快照内容替换当前全部表；有表被查询固定时拒绝，失败时保持原状
    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<()> {
        if let Some(busy) = self.catalog.first_busy() {
            return Err(TableError::TableInUse { table: busy.qualified_name(), busy: busy.busy_count() });
        }
        if data.len() < HEADER_LEN + 4 || &data[..8] != MAGIC {
            return Err(TableError::Snapshot("invalid snapshot magic".into()));
        }

        let mut header = Cursor::new(&data[8..HEADER_LEN]);
        let version = header.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != VERSION {
            return Err(TableError::Snapshot(format!("unsupported snapshot version {version}")));
        }
        let codec = SnapshotCompression::from_tag(header.read_u8().map_err(io_err)?)
            .ok_or_else(|| TableError::Snapshot("unknown compression codec".into()))?;
        let raw_len  = header.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        if raw_len > i32::MAX as usize {
            return Err(TableError::Snapshot(format!("raw length {raw_len} too large")));
        }
        let data_len = header.read_u32::<LittleEndian>().map_err(io_err)? as usize;

        if data.len() != HEADER_LEN + data_len + 4 {
            return Err(TableError::Snapshot("snapshot length mismatch".into()));
        }
        let payload = &data[HEADER_LEN..HEADER_LEN + data_len];
        let mut crc = Cursor::new(&data[HEADER_LEN + data_len..]);
        if crc.read_u32::<LittleEndian>().map_err(io_err)? != crc32fast::hash(payload) {
            return Err(TableError::ChecksumMismatch);
        }

        let raw = match codec {
            SnapshotCompression::None => payload.to_vec(),
            SnapshotCompression::Lz4 => lz4::block::decompress(payload, Some(raw_len as i32))
                .map_err(|e| TableError::Compression(e.to_string()))?,
        };
        if raw.len() != raw_len {
            return Err(TableError::Snapshot("decompressed length mismatch".into()));
        }

        let catalog = decode_catalog(&raw)?;
        debug!(tables = catalog.table_count(), "snapshot loaded");
        self.catalog = catalog;
        Ok(())
    }
}
