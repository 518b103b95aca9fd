// 文件分片管理
//
// 分片规则：
// - 按固定分片大小从偏移 0 开始顺序切分，索引从 0 连续递增
// - 最后一个分片允许小于分片大小
// - 分片边界由 (文件大小, 分片大小) 唯一确定，内容不提前读入内存

use anyhow::{Context, Result};
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 文件分片信息
///
/// 只持有字节范围，实际数据通过 `read_data` 惰性读取
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// 分片索引（文件内唯一，从 0 连续递增）
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl FileChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    ///
    /// # 返回
    /// 分片数据字节数组
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        // 定位到分片起始位置
        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        let chunk_size = self.size() as usize;
        let mut buffer = vec![0u8; chunk_size];
        file.read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.index,
            self.range.start,
            self.range.end.saturating_sub(1),
            chunk_size
        );

        Ok(buffer)
    }
}

/// 按固定分片大小切分文件
///
/// 相同的 (total_size, chunk_size) 总是得到相同的分片边界。
/// chunk_size 为 0 视为非法输入，返回空列表（配置校验层会提前拦截）
pub fn split_file(total_size: u64, chunk_size: u64) -> Vec<FileChunk> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut index = 0;

    while offset < total_size {
        let end = std::cmp::min(offset + chunk_size, total_size);
        chunks.push(FileChunk::new(index, offset..end));
        offset = end;
        index += 1;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_chunk_creation() {
        let chunk = FileChunk::new(0, 0..1024);
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.range, 0..1024);
        assert_eq!(chunk.size(), 1024);
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunks = split_file(16 * 1024, 4 * 1024);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].range, 0..(4 * 1024));
        assert_eq!(chunks[3].range, (12 * 1024)..(16 * 1024));
    }

    #[test]
    fn test_split_with_tail_chunk() {
        let chunks = split_file(17 * 1024, 4 * 1024);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[4].range, (16 * 1024)..(17 * 1024));
        assert_eq!(chunks[4].size(), 1024);
    }

    #[test]
    fn test_split_small_file_single_chunk() {
        let chunks = split_file(100, 4 * 1024);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].range, 0..100);
    }

    #[test]
    fn test_split_empty_file() {
        assert!(split_file(0, 4 * 1024).is_empty());
    }

    #[test]
    fn test_split_zero_chunk_size() {
        assert!(split_file(1024, 0).is_empty());
    }

    #[tokio::test]
    async fn test_read_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello chunked world").unwrap();

        let chunks = split_file(19, 5);
        assert_eq!(chunks.len(), 4);

        let data = chunks[1].read_data(file.path()).await.unwrap();
        assert_eq!(data, b" chun");

        let tail = chunks[3].read_data(file.path()).await.unwrap();
        assert_eq!(tail, b"orld");
    }

    proptest! {
        // 分片边界必须连续无空洞，且除末片外均为固定大小
        #[test]
        fn prop_split_is_contiguous(total_size in 0u64..100_000, chunk_size in 1u64..4096) {
            let chunks = split_file(total_size, chunk_size);

            let mut expected_offset = 0u64;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(chunk.range.start, expected_offset);
                if i + 1 < chunks.len() {
                    prop_assert_eq!(chunk.size(), chunk_size);
                }
                expected_offset = chunk.range.end;
            }
            prop_assert_eq!(expected_offset, total_size);
        }

        // 相同输入得到相同边界
        #[test]
        fn prop_split_is_deterministic(total_size in 0u64..100_000, chunk_size in 1u64..4096) {
            prop_assert_eq!(
                split_file(total_size, chunk_size),
                split_file(total_size, chunk_size)
            );
        }
    }
}
