// 文件系统存储后端
//
// 键映射为存储根目录下的相对路径。
// 拼接使用流式拷贝，大文件合并不会整体读入内存

use crate::storage::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// 文件系统持久化存储
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    /// 存储根目录
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建父级目录失败")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    async fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.resolve(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("读取条目元信息失败"),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(key))
            .await
            .with_context(|| format!("读取条目失败: {key}"))
    }

    async fn write(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(key);
        Self::ensure_parent(&path).await?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("写入条目失败: {key}"))
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let path = self.resolve(key);
        let mut reader = match fs::read_dir(&path).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("读取目录失败"),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.context("遍历目录失败")? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(entries)
    }

    async fn remove_dir(&self, key: &str) -> Result<()> {
        match fs::remove_dir_all(self.resolve(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("删除目录失败: {key}")),
        }
    }

    async fn combine(&self, sources: &[String], dest: &str) -> Result<()> {
        let dest_path = self.resolve(dest);
        Self::ensure_parent(&dest_path).await?;

        let file = File::create(&dest_path)
            .await
            .with_context(|| format!("创建目标条目失败: {dest}"))?;
        let mut writer = BufWriter::new(file);

        for source in sources {
            let mut reader = File::open(self.resolve(source))
                .await
                .with_context(|| format!("打开源条目失败: {source}"))?;
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .with_context(|| format!("拼接条目失败: {source}"))?;
        }

        writer.flush().await.context("落盘目标条目失败")?;
        debug!("拼接完成: {} 个条目 -> {}", sources.len(), dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_storage() -> (tempfile::TempDir, FileSystemStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_write_read_exists() {
        let (_dir, storage) = new_storage();

        assert!(!storage.exists("a/b/c").await.unwrap());
        storage.write("a/b/c", b"data").await.unwrap();
        assert!(storage.exists("a/b/c").await.unwrap());
        assert_eq!(storage.read("a/b/c").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let (_dir, storage) = new_storage();
        assert!(storage.list("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_entries() {
        let (_dir, storage) = new_storage();
        storage.write("dir/0", b"x").await.unwrap();
        storage.write("dir/1", b"y").await.unwrap();

        let mut entries = storage.list("dir").await.unwrap();
        entries.sort();
        assert_eq!(entries, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_remove_dir() {
        let (_dir, storage) = new_storage();
        storage.write("dir/0", b"x").await.unwrap();

        storage.remove_dir("dir").await.unwrap();
        assert!(!storage.exists("dir/0").await.unwrap());

        // 不存在的目录静默成功
        storage.remove_dir("dir").await.unwrap();
    }

    #[tokio::test]
    async fn test_combine_preserves_byte_order() {
        let (_dir, storage) = new_storage();
        storage.write("src/0", b"hello ").await.unwrap();
        storage.write("src/1", b"chunked ").await.unwrap();
        storage.write("src/2", b"world").await.unwrap();

        let sources = vec!["src/0".into(), "src/1".into(), "src/2".into()];
        storage.combine(&sources, "combined").await.unwrap();

        assert_eq!(storage.read("combined").await.unwrap(), b"hello chunked world");
    }
}
