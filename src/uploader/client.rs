// 上传客户端（编排状态机）
//
// 驱动端到端上传序列：
//   Default -> CalculatingHash -> CheckingFileExists
//     -> FastUploaded（秒传命中，终态）
//     -> WaitForUpload -> Uploading <-> UploadStopped -> Merging -> UploadSuccessfully
//   任一阶段失败 -> Error（可通过 restart 恢复）
//
// 约定（多个历史变体中选定的统一契约）：
// - start 幂等，整个生命周期只真正启动一次；restart 总是从 Default 重新计算哈希
// - 续传水位线以下的分片直接跳过，其余分片上传前仍做一次 chunk_exists 防御性确认
// - 暂停严格协作式：在途分片跑完，不再准入新分片

use crate::config::UploadConfig;
use crate::uploader::{
    split_file, ChunkPayload, ChunksHashCalculator, FileChunk, PoolOptions, TaskPool,
    UploadActions, UploadError,
};
use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 上传生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// 初始状态
    Default,
    /// 哈希计算中
    CalculatingHash,
    /// 秒传检查中
    CheckingFileExists,
    /// 秒传命中（终态）
    FastUploaded,
    /// 等待手动开始分片传输
    WaitForUpload,
    /// 分片上传中
    Uploading,
    /// 分片上传已暂停
    UploadStopped,
    /// 合并中
    Merging,
    /// 上传成功（终态）
    UploadSuccessfully,
    /// 出错（可 restart 恢复）
    Error,
}

/// 上传客户端事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 状态迁移
    State(UploadState),
    /// 进度（0-100；哈希阶段与传输阶段各自从 0 走到 100）
    Progress(f64),
    /// 阶段失败
    Failed(Arc<UploadError>),
}

/// 会话快照：当前状态、进度与最近错误
#[derive(Debug, Clone, Serialize)]
pub struct UploadSessionInfo {
    /// 生命周期状态
    pub state: UploadState,
    /// 进度百分比
    pub progress: f64,
    /// 最近一次阶段错误
    pub error: Option<String>,
}

/// 可观测端：状态/进度的当前值缓存 + 事件广播
///
/// destroy 时关闭事件流并停止一切发布
struct ClientObserver {
    state_tx: watch::Sender<UploadState>,
    progress_tx: watch::Sender<f64>,
    events: Mutex<Option<broadcast::Sender<UploadEvent>>>,
    closed: AtomicBool,
}

impl ClientObserver {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(UploadState::Default);
        let (progress_tx, _) = watch::channel(0.0);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state_tx,
            progress_tx,
            events: Mutex::new(Some(events_tx)),
            closed: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: UploadState) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        debug!("状态迁移: {:?}", state);
        self.state_tx.send_replace(state);
        self.emit(UploadEvent::State(state));
    }

    fn set_progress(&self, progress: f64) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.progress_tx.send_replace(progress);
        self.emit(UploadEvent::Progress(progress));
    }

    fn emit(&self, event: UploadEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().take();
    }
}

/// 上传客户端
///
/// 一个实例绑定一个 (文件, 内容哈希) 会话；
/// 方法全部取 `&self`，可包在 `Arc` 里跨任务并发调用
pub struct UploadClient {
    /// 本地文件路径
    file_path: PathBuf,
    /// 分片大小与并发数配置
    config: UploadConfig,
    /// 外部动作面
    actions: Arc<dyn UploadActions>,
    /// 可观测端
    observer: Arc<ClientObserver>,
    /// 当前会话的哈希计算器（记忆化；restart 时置换）
    hasher: Mutex<Option<Arc<ChunksHashCalculator>>>,
    /// 活跃的分片任务池
    pool: Mutex<Option<TaskPool>>,
    /// 最近一次阶段错误
    last_error: Mutex<Option<Arc<UploadError>>>,
    /// 是否已启动过
    started: AtomicBool,
    /// 是否已销毁
    destroyed: AtomicBool,
}

impl UploadClient {
    /// 创建上传客户端，配置非法时构造失败
    pub fn new(
        file_path: impl Into<PathBuf>,
        actions: Arc<dyn UploadActions>,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            file_path: file_path.into(),
            config,
            actions,
            observer: Arc::new(ClientObserver::new()),
            hasher: Mutex::new(None),
            pool: Mutex::new(None),
            last_error: Mutex::new(None),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    /// 启动上传序列
    ///
    /// 幂等：生命周期内只真正启动一次，重复调用为空操作。
    /// `auto_upload` 为 false 时停在 `WaitForUpload`，直到 `start_pool` 被调用；
    /// 本方法总是等到会话抵达终态（或出错）才返回
    pub async fn start(&self, auto_upload: bool) -> Result<(), Arc<UploadError>> {
        self.ensure_alive()?;
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("客户端已启动，忽略重复 start");
            return Ok(());
        }
        self.run(auto_upload).await
    }

    /// 恢复分片传输（暂停后继续）；没有活跃任务池时为空操作
    pub fn start_pool(&self) -> Result<(), Arc<UploadError>> {
        self.ensure_alive()?;
        if let Some(pool) = self.pool.lock().clone() {
            pool.start();
            self.observer.set_state(UploadState::Uploading);
        }
        Ok(())
    }

    /// 暂停分片传输（协作式）；没有活跃任务池时为空操作
    pub fn stop_pool(&self) -> Result<(), Arc<UploadError>> {
        self.ensure_alive()?;
        if let Some(pool) = self.pool.lock().clone() {
            self.observer.set_state(UploadState::UploadStopped);
            pool.stop();
        }
        Ok(())
    }

    /// 重置并重新执行完整序列（进度归零、状态回 Default、哈希重新计算）
    ///
    /// 用于 Error 之后的重试
    pub async fn restart(&self, auto_upload: bool) -> Result<(), Arc<UploadError>> {
        self.ensure_alive()?;
        info!("重新开始上传会话");

        if let Some(pool) = self.pool.lock().take() {
            pool.destroy();
        }
        *self.hasher.lock() = None;
        *self.last_error.lock() = None;
        self.started.store(true, Ordering::SeqCst);
        self.observer.set_progress(0.0);

        self.run(auto_upload).await
    }

    /// 销毁客户端：释放任务池、关闭所有可观测流
    ///
    /// 销毁后的任何操作返回 [`UploadError::ClientDestroyed`]
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pool) = self.pool.lock().take() {
            pool.destroy();
        }
        self.observer.close();
        info!("上传客户端已销毁");
    }

    /// 订阅生命周期状态（新订阅者立即收到当前值）
    pub fn state_rx(&self) -> watch::Receiver<UploadState> {
        self.observer.state_tx.subscribe()
    }

    /// 订阅进度
    pub fn progress_rx(&self) -> watch::Receiver<f64> {
        self.observer.progress_tx.subscribe()
    }

    /// 订阅事件流（销毁后返回已关闭的接收端）
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        match self.observer.events.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// 最近一次阶段错误
    pub fn last_error(&self) -> Option<Arc<UploadError>> {
        self.last_error.lock().clone()
    }

    /// 会话快照
    pub fn session(&self) -> UploadSessionInfo {
        UploadSessionInfo {
            state: *self.observer.state_tx.borrow(),
            progress: *self.observer.progress_tx.borrow(),
            error: self.last_error().map(|e| e.to_string()),
        }
    }

    fn ensure_alive(&self) -> Result<(), Arc<UploadError>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Arc::new(UploadError::ClientDestroyed));
        }
        Ok(())
    }

    async fn run(&self, auto_upload: bool) -> Result<(), Arc<UploadError>> {
        match self.drive(auto_upload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = Arc::new(e);
                warn!("上传阶段失败: {}", err);

                // 暂停在途分片，不再浪费带宽，等调用方决定是否 restart
                if let Some(pool) = self.pool.lock().clone() {
                    pool.stop();
                }
                *self.last_error.lock() = Some(Arc::clone(&err));
                self.observer.emit(UploadEvent::Failed(Arc::clone(&err)));
                self.observer.set_state(UploadState::Error);
                Err(err)
            }
        }
    }

    /// 端到端序列：哈希 -> 秒传检查 -> 分片传输 -> 合并
    async fn drive(&self, auto_upload: bool) -> Result<(), UploadError> {
        self.observer.set_state(UploadState::Default);
        self.observer.set_progress(0.0);

        // ---- 哈希阶段 ----
        self.observer.set_state(UploadState::CalculatingHash);

        let metadata = tokio::fs::metadata(&self.file_path)
            .await
            .context("读取上传文件元信息失败")
            .map_err(UploadError::Action)?;
        let chunks = split_file(metadata.len(), self.config.chunk_size);
        info!(
            "文件切分完成: 大小={} bytes, 分片数={}",
            metadata.len(),
            chunks.len()
        );

        let hasher = self.obtain_hasher(&chunks);
        let hash = {
            let mut hash_progress = hasher.progress_rx();
            let observer = Arc::clone(&self.observer);
            let forward = tokio::spawn(async move {
                while hash_progress.changed().await.is_ok() {
                    let progress = *hash_progress.borrow_and_update();
                    observer.set_progress(progress);
                }
            });
            let result = hasher.calc().await;
            forward.abort();
            result.map_err(UploadError::Action)?
        };

        // ---- 秒传检查 ----
        self.observer.set_state(UploadState::CheckingFileExists);
        if self
            .actions
            .file_exists(&hash)
            .await
            .map_err(UploadError::Action)?
        {
            info!("秒传命中: hash={}", hash);
            self.observer.set_progress(100.0);
            self.observer.set_state(UploadState::FastUploaded);
            return Ok(());
        }

        // ---- 分片传输阶段 ----
        let watermark = self
            .actions
            .get_last_existed_chunk_index(&hash)
            .await
            .map_err(UploadError::Action)?;
        if watermark >= 0 {
            info!("检测到续传水位线: {}", watermark);
        }

        let pool = self.build_pool(&hash, &chunks, watermark)?;

        let mut pool_progress = pool.progress_rx();
        let observer = Arc::clone(&self.observer);
        let forward = tokio::spawn(async move {
            while pool_progress.changed().await.is_ok() {
                let progress = *pool_progress.borrow_and_update();
                observer.set_progress(progress);
            }
        });

        let result = self.transfer_and_merge(&pool, &hash, auto_upload).await;
        forward.abort();
        result
    }

    async fn transfer_and_merge(
        &self,
        pool: &TaskPool,
        hash: &str,
        auto_upload: bool,
    ) -> Result<(), UploadError> {
        *self.pool.lock() = Some(pool.clone());

        if auto_upload {
            self.observer.set_state(UploadState::Uploading);
            pool.start();
        } else {
            self.observer.set_state(UploadState::WaitForUpload);
        }

        // 合并只允许在全部分片任务抵达终态之后发生
        pool.wait_complete().await.map_err(UploadError::Action)?;

        let failures = pool.failures();
        if !failures.is_empty() {
            return Err(UploadError::ChunksIncomplete {
                failed: failures.len(),
            });
        }

        self.observer.set_state(UploadState::Merging);
        self.actions
            .merge(hash)
            .await
            .map_err(UploadError::Action)?;

        self.pool.lock().take();
        pool.destroy();

        self.observer.set_progress(100.0);
        self.observer.set_state(UploadState::UploadSuccessfully);
        info!("上传完成: hash={}", hash);
        Ok(())
    }

    /// 为每个分片构造一个上传任务
    fn build_pool(
        &self,
        hash: &str,
        chunks: &[FileChunk],
        watermark: i64,
    ) -> Result<TaskPool, UploadError> {
        let pool = TaskPool::new(PoolOptions {
            concurrency: self.config.concurrency,
        })?;

        for chunk in chunks {
            let actions = Arc::clone(&self.actions);
            let hash = hash.to_string();
            let file_path = self.file_path.clone();
            let chunk = chunk.clone();

            pool.append(move || async move {
                // 水位线以下的分片已确认存在于服务端
                if (chunk.index as i64) <= watermark {
                    debug!("分片 #{} 低于续传水位线，跳过", chunk.index);
                    return Ok(());
                }
                // 水位线之上仍做一次存在性确认，断点续传时避免重复传输
                if actions.chunk_exists(&hash, chunk.index).await? {
                    debug!("分片 #{} 已存在，跳过", chunk.index);
                    return Ok(());
                }

                let data = chunk.read_data(&file_path).await?;
                actions
                    .upload_chunk(ChunkPayload {
                        hash,
                        index: chunk.index,
                        chunk: data,
                    })
                    .await
            });
        }

        Ok(pool)
    }

    fn obtain_hasher(&self, chunks: &[FileChunk]) -> Arc<ChunksHashCalculator> {
        let mut guard = self.hasher.lock();
        match guard.as_ref() {
            Some(hasher) => Arc::clone(hasher),
            None => {
                let hasher = Arc::new(ChunksHashCalculator::new(
                    self.file_path.clone(),
                    chunks.to_vec(),
                ));
                *guard = Some(Arc::clone(&hasher));
                hasher
            }
        }
    }
}
