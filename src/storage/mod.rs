// 存储后端模块
//
// 以键寻址的字节存储抽象，上传核心只依赖本 trait：
// - FileSystemStorage: 文件系统持久化后端（流式拼接，不整体物化）
// - MemoryStorage: 内存易失后端（测试与无盘部署）
//
// 键为相对路径风格的字符串（以 '/' 分隔），由各后端自行映射

pub mod filesystem;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use filesystem::FileSystemStorage;
pub use memory::MemoryStorage;

/// 键寻址字节存储
#[async_trait]
pub trait Storage: Send + Sync {
    /// 条目是否存在
    async fn exists(&self, key: &str) -> Result<bool>;

    /// 读取条目全部内容
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// 写入条目（覆盖写，自动创建父级目录）
    async fn write(&self, key: &str, content: &[u8]) -> Result<()>;

    /// 浅层列出目录下的条目名
    ///
    /// 目录不存在时返回空列表而非错误，调用方以"没有条目"处理
    async fn list(&self, key: &str) -> Result<Vec<String>>;

    /// 递归删除目录（不存在时静默成功）
    async fn remove_dir(&self, key: &str) -> Result<()>;

    /// 按给定顺序把若干源条目的字节拼接到目标条目
    ///
    /// 必须保持严格的字节顺序，不做任何编解码
    async fn combine(&self, sources: &[String], dest: &str) -> Result<()>;
}
