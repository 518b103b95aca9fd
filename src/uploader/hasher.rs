// 内容哈希计算器
//
// 按分片顺序增量计算整个文件的 MD5，十六进制摘要作为：
// - 去重键（内容相同的文件哈希必然相同）
// - 存储命名空间的根目录名
//
// 哈希算法跨分片累积内部状态，必须严格顺序执行，不能并行化

use crate::uploader::FileChunk;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info};

/// 分片内容哈希计算器
///
/// 结果带记忆化：`calc` 只会真正计算一次，并发调用共享同一次
/// 进行中的计算，不会触发重复读盘
pub struct ChunksHashCalculator {
    /// 本地文件路径
    file_path: PathBuf,
    /// 分片列表（索引序）
    chunks: Vec<FileChunk>,
    /// 进度发布端（0-100）
    progress_tx: watch::Sender<f64>,
    /// 记忆化的计算结果
    result: OnceCell<String>,
}

impl ChunksHashCalculator {
    pub fn new(file_path: PathBuf, chunks: Vec<FileChunk>) -> Self {
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            file_path,
            chunks,
            progress_tx,
            result: OnceCell::new(),
        }
    }

    /// 订阅哈希进度（新订阅者立即收到当前值）
    pub fn progress_rx(&self) -> watch::Receiver<f64> {
        self.progress_tx.subscribe()
    }

    /// 计算内容哈希（十六进制字符串）
    ///
    /// 多次调用返回同一结果，不会重复计算
    pub async fn calc(&self) -> Result<String> {
        self.result
            .get_or_try_init(|| self.compute())
            .await
            .cloned()
    }

    async fn compute(&self) -> Result<String> {
        let total = self.chunks.len();
        let mut context = md5::Context::new();

        if total == 0 {
            // 空文件：没有分片可读，直接给出空内容摘要
            let _ = self.progress_tx.send(100.0);
            return Ok(format!("{:x}", context.compute()));
        }

        for (i, chunk) in self.chunks.iter().enumerate() {
            let _ = self
                .progress_tx
                .send(((i + 1) as f64 / total as f64) * 100.0);

            let data = chunk
                .read_data(&self.file_path)
                .await
                .context("计算哈希时读取分片失败")?;
            context.consume(&data);

            debug!("哈希进度: {}/{}", i + 1, total);
        }

        let hash = format!("{:x}", context.compute());
        info!("内容哈希计算完成: hash={}, 分片数={}", hash, total);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::split_file;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    fn calculator(file: &NamedTempFile, size: u64, chunk_size: u64) -> ChunksHashCalculator {
        let chunks = split_file(size, chunk_size);
        ChunksHashCalculator::new(file.path().to_path_buf(), chunks)
    }

    #[tokio::test]
    async fn test_known_digest() {
        let file = write_temp(b"hello world");
        let hasher = calculator(&file, 11, 4);

        // MD5("hello world")
        assert_eq!(
            hasher.calc().await.unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[tokio::test]
    async fn test_identical_content_identical_hash() {
        let file_a = write_temp(b"same bytes here");
        let file_b = write_temp(b"same bytes here");

        let hash_a = calculator(&file_a, 15, 4).calc().await.unwrap();
        let hash_b = calculator(&file_b, 15, 4).calc().await.unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[tokio::test]
    async fn test_different_content_different_hash() {
        let file_a = write_temp(b"content one");
        let file_b = write_temp(b"content two");

        let hash_a = calculator(&file_a, 11, 4).calc().await.unwrap();
        let hash_b = calculator(&file_b, 11, 4).calc().await.unwrap();
        assert_ne!(hash_a, hash_b);
    }

    #[tokio::test]
    async fn test_progress_reaches_100() {
        let file = write_temp(b"0123456789abcdef");
        let hasher = calculator(&file, 16, 4);
        let progress = hasher.progress_rx();

        assert_eq!(*progress.borrow(), 0.0);
        hasher.calc().await.unwrap();
        assert_eq!(*progress.borrow(), 100.0);
    }

    #[tokio::test]
    async fn test_memoized_result() {
        let file = write_temp(b"memoize me");
        let hasher = calculator(&file, 10, 3);

        let first = hasher.calc().await.unwrap();
        // 删除底层文件后再次调用仍然成功，说明没有重新读盘
        drop(file);
        let second = hasher.calc().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let file = write_temp(b"");
        let hasher = calculator(&file, 0, 4);

        // MD5("")
        assert_eq!(
            hasher.calc().await.unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(*hasher.progress_rx().borrow(), 100.0);
    }
}
