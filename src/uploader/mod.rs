// 上传引擎模块
//
// 可续传的分片上传：内容哈希寻址、秒传检测、断点续传、并发分片传输

// 上传动作接口
pub mod actions;
// 文件分片
pub mod chunk;
// 上传客户端（编排状态机）
pub mod client;
// 错误定义
pub mod error;
// 内容哈希计算
pub mod hasher;
// 并发任务池
pub mod pool;
// 分片存储与合并
pub mod slicer;

pub use actions::{ChunkPayload, StorageActions, UploadActions};
pub use chunk::{split_file, FileChunk};
pub use client::{UploadClient, UploadEvent, UploadSessionInfo, UploadState};
pub use error::UploadError;
pub use hasher::ChunksHashCalculator;
pub use pool::{PoolEvent, PoolOptions, PoolState, TaskPool};
pub use slicer::{check_chunk_sequence, UploadSlicer, CHUNKS_DIR, COMBINED_FILE_NAME};
