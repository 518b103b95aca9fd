// Chunk Upload Rust Library
// 可续传分片上传核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 字节存储后端模块
pub mod storage;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, LogConfig, UploadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY};
pub use storage::{FileSystemStorage, MemoryStorage, Storage};
pub use uploader::{
    split_file, ChunkPayload, ChunksHashCalculator, FileChunk, PoolEvent, PoolOptions, PoolState,
    StorageActions, TaskPool, UploadActions, UploadClient, UploadError, UploadEvent,
    UploadSessionInfo, UploadSlicer, UploadState,
};
