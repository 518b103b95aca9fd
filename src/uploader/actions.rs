// 上传动作接口
//
// 客户端与服务端之间与传输方式无关的动作面。
// HTTP/WebSocket 等具体传输只是这个 trait 的薄封装，不属于核心；
// StorageActions 是服务端的本地实现，每次调用基于共享存储构造切片器

use crate::storage::Storage;
use crate::uploader::UploadSlicer;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// 单个分片的传输信封（客户端 -> 服务端）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// 内容哈希
    pub hash: String,
    /// 分片索引
    pub index: usize,
    /// 分片原始字节
    pub chunk: Vec<u8>,
}

/// 上传编排器消费的外部动作
#[async_trait]
pub trait UploadActions: Send + Sync {
    /// 合并产物是否已持久化（秒传判定）
    async fn file_exists(&self, hash: &str) -> Result<bool>;

    /// 指定分片是否已持久化
    async fn chunk_exists(&self, hash: &str, index: usize) -> Result<bool>;

    /// 已存在分片的最大索引，无分片时 -1（续传水位线）
    async fn get_last_existed_chunk_index(&self, hash: &str) -> Result<i64>;

    /// 将分片字节持久化到规范路径（幂等）
    async fn upload_chunk(&self, payload: ChunkPayload) -> Result<()>;

    /// 合并全部分片，失败时携带可区分的序列校验错误
    async fn merge(&self, hash: &str) -> Result<()>;
}

/// 基于存储后端的服务端动作实现
pub struct StorageActions {
    storage: Arc<dyn Storage>,
}

impl StorageActions {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn slicer(&self, hash: &str) -> Result<UploadSlicer> {
        Ok(UploadSlicer::new(hash, Arc::clone(&self.storage))?)
    }
}

#[async_trait]
impl UploadActions for StorageActions {
    async fn file_exists(&self, hash: &str) -> Result<bool> {
        self.slicer(hash)?.file_exists().await
    }

    async fn chunk_exists(&self, hash: &str, index: usize) -> Result<bool> {
        self.slicer(hash)?.chunk_exists(index).await
    }

    async fn get_last_existed_chunk_index(&self, hash: &str) -> Result<i64> {
        self.slicer(hash)?.get_last_existed_chunk_index().await
    }

    async fn upload_chunk(&self, payload: ChunkPayload) -> Result<()> {
        debug!(
            "接收分片: hash={}, index={}, 大小={} bytes",
            payload.hash,
            payload.index,
            payload.chunk.len()
        );
        self.slicer(&payload.hash)?
            .write_chunk(payload.index, &payload.chunk)
            .await
    }

    async fn merge(&self, hash: &str) -> Result<()> {
        self.slicer(hash)?.merge().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn new_actions() -> (Arc<MemoryStorage>, StorageActions) {
        let storage = Arc::new(MemoryStorage::new());
        let actions = StorageActions::new(Arc::clone(&storage) as Arc<dyn Storage>);
        (storage, actions)
    }

    #[tokio::test]
    async fn test_upload_then_merge_roundtrip() {
        let (storage, actions) = new_actions();
        let hash = "abc123";

        assert!(!actions.file_exists(hash).await.unwrap());
        assert_eq!(actions.get_last_existed_chunk_index(hash).await.unwrap(), -1);

        for (index, data) in [b"aa".as_slice(), b"bb", b"c"].iter().enumerate() {
            actions
                .upload_chunk(ChunkPayload {
                    hash: hash.to_string(),
                    index,
                    chunk: data.to_vec(),
                })
                .await
                .unwrap();
        }

        assert!(actions.chunk_exists(hash, 1).await.unwrap());
        assert_eq!(actions.get_last_existed_chunk_index(hash).await.unwrap(), 2);

        actions.merge(hash).await.unwrap();
        assert!(actions.file_exists(hash).await.unwrap());
        assert_eq!(
            storage.read("abc123/combined").await.unwrap(),
            b"aabbc".to_vec()
        );
    }

    #[tokio::test]
    async fn test_payload_serialization() {
        let payload = ChunkPayload {
            hash: "h".to_string(),
            index: 3,
            chunk: vec![1, 2, 3],
        };

        let json = serde_json::to_string(&payload).unwrap();
        let decoded: ChunkPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.hash, "h");
        assert_eq!(decoded.index, 3);
        assert_eq!(decoded.chunk, vec![1, 2, 3]);
    }
}
