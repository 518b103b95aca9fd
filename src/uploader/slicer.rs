// 分片存储与合并协议
//
// 以内容哈希为根的存储布局：
// - <hash>/chunks/<index>  每个已上传分片一个条目（十进制索引命名）
// - <hash>/combined        合并后的最终产物
//
// combined 的存在与否是"该内容已完整上传"的唯一判定依据（秒传信号）。
// 合并前校验分片序列必须从 0 开始连续无空洞，按索引序拼接后删除分片目录

use crate::storage::Storage;
use crate::uploader::UploadError;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// 分片子目录名
pub const CHUNKS_DIR: &str = "chunks";

/// 合并产物条目名
pub const COMBINED_FILE_NAME: &str = "combined";

/// 分片切片器：单个内容哈希命名空间内的分片读写与合并
pub struct UploadSlicer {
    /// 内容哈希（存储命名空间）
    hash: String,
    /// 字节存储后端
    storage: Arc<dyn Storage>,
}

impl UploadSlicer {
    /// 创建切片器
    ///
    /// 空哈希非法，返回 [`UploadError::InvalidHash`]
    pub fn new(hash: impl Into<String>, storage: Arc<dyn Storage>) -> Result<Self, UploadError> {
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(UploadError::InvalidHash);
        }
        Ok(Self { hash, storage })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// 分片目录键
    pub fn chunk_dir(&self) -> String {
        format!("{}/{}", self.hash, CHUNKS_DIR)
    }

    /// 单个分片的存储键
    pub fn chunk_path(&self, index: usize) -> String {
        format!("{}/{}/{}", self.hash, CHUNKS_DIR, index)
    }

    /// 合并产物的存储键
    pub fn file_path(&self) -> String {
        format!("{}/{}", self.hash, COMBINED_FILE_NAME)
    }

    /// 合并产物是否已存在（秒传判定）
    pub async fn file_exists(&self) -> Result<bool> {
        self.storage.exists(&self.file_path()).await
    }

    /// 指定索引的分片是否已存在
    pub async fn chunk_exists(&self, index: usize) -> Result<bool> {
        self.storage.exists(&self.chunk_path(index)).await
    }

    /// 写入一个分片
    ///
    /// 幂等：相同索引重复写入覆盖为相同内容。
    /// 合并产物已存在时写入是无害的空操作，避免迟到的并发会话污染布局
    pub async fn write_chunk(&self, index: usize, content: &[u8]) -> Result<()> {
        if self.file_exists().await? {
            debug!("合并产物已存在，忽略分片写入: hash={}, index={}", self.hash, index);
            return Ok(());
        }
        self.storage
            .write(&self.chunk_path(index), content)
            .await
            .with_context(|| format!("写入分片失败: index={index}"))
    }

    /// 已上传分片的最大索引，无任何分片时返回 -1
    ///
    /// 客户端以此为续传水位线，跳过小于等于该索引的重复上传
    pub async fn get_last_existed_chunk_index(&self) -> Result<i64> {
        let indices = self.list_chunk_indices().await?;
        Ok(indices.last().map(|i| *i as i64).unwrap_or(-1))
    }

    /// 合并全部分片为最终产物
    ///
    /// 序列校验失败时返回可区分的具体错误（见 [`check_chunk_sequence`]），
    /// 成功后删除分片目录回收存储空间
    pub async fn merge(&self) -> Result<()> {
        let indices = self.list_chunk_indices().await?;
        check_chunk_sequence(&indices, &self.hash)?;

        let sources: Vec<String> = indices.iter().map(|i| self.chunk_path(*i)).collect();
        self.storage
            .combine(&sources, &self.file_path())
            .await
            .context("拼接分片失败")?;

        // 合并完成后分片不再有用，及时清理避免浪费存储空间
        self.storage
            .remove_dir(&self.chunk_dir())
            .await
            .context("清理分片目录失败")?;

        info!("合并完成: hash={}, 分片数={}", self.hash, sources.len());
        Ok(())
    }

    /// 列出已存在的分片索引（数值升序）
    async fn list_chunk_indices(&self) -> Result<Vec<usize>> {
        let entries = self.storage.list(&self.chunk_dir()).await?;
        let mut indices: Vec<usize> = entries
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }
}

/// 校验分片索引序列完整且从 0 连续
///
/// 入参必须已升序排序
pub fn check_chunk_sequence(indices: &[usize], hash: &str) -> Result<(), UploadError> {
    let Some(&first) = indices.first() else {
        return Err(UploadError::NoChunksFound {
            hash: hash.to_string(),
        });
    };
    if first != 0 {
        return Err(UploadError::InvalidFirstChunk { first });
    }
    for window in indices.windows(2) {
        if window[0] + 1 != window[1] {
            return Err(UploadError::InvalidChunkSequence {
                expected: window[0] + 1,
                found: window[1],
            });
        }
    }
    Ok(())
}
