//! 通用工具：将一次读取范围按 chunk 拆分（按对象总长度截断）。

use super::chunk::ChunkLayout;

/// 读取范围落在某个 chunk 内的一段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub len: usize,
}

/// 将 [offset, offset+len) 截断到对象总长度后，拆分为若干 chunk 局部范围。
pub fn split_read_range(layout: ChunkLayout, total: u64, offset: u64, len: usize) -> Vec<ChunkSpan> {
    let mut out = Vec::new();
    if offset >= total {
        return out;
    }
    let mut remaining = (len as u64).min(total - offset);
    let mut cursor = offset;
    while remaining > 0 {
        let chunk_index = layout.chunk_index_of(cursor);
        let offset_in_chunk = layout.within_chunk_offset(cursor);
        let cap = layout.chunk_len(chunk_index, total) - offset_in_chunk;
        let take = cap.min(remaining);
        out.push(ChunkSpan {
            chunk_index,
            offset_in_chunk,
            len: take as usize,
        });
        cursor += take;
        remaining -= take;
    }
    out
}
