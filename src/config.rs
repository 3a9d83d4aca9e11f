//! 引擎配置

/// 快照负载的压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCompression {
    None,
    Lz4,
}

impl SnapshotCompression {
    pub fn tag(self) -> u8 {
        match self { Self::None => 0, Self::Lz4 => 1 }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag { 0 => Some(Self::None), 1 => Some(Self::Lz4), _ => None }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// auto-keys 表合成的第 0 列列名
    pub auto_key_column:      String,
    /// 同时活跃的查询帧上限
    pub max_query_depth:      usize,
    pub snapshot_compression: SnapshotCompression,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_key_column:      "key".into(),
            max_query_depth:      64,
            snapshot_compression: SnapshotCompression::Lz4,
        }
    }
}

impl EngineConfig {
    pub fn with_auto_key_column(mut self, name: &str) -> Self {
        self.auto_key_column = name.into(); self
    }
    pub fn with_max_query_depth(mut self, depth: usize) -> Self {
        self.max_query_depth = depth; self
    }
    pub fn with_snapshot_compression(mut self, c: SnapshotCompression) -> Self {
        self.snapshot_compression = c; self
    }
}
