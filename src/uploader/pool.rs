// 并发任务池
//
// 以固定并发上限执行一批独立可失败的异步任务：
// - Semaphore 控制同时在途的任务数，绝不超过配置的并发上限
// - 按追加顺序（索引序）准入，完成顺序不做保证
// - watch 门控实现协作式暂停/恢复（在途任务跑完，不再准入新任务）
// - broadcast 事件流对外发布进度、单任务失败与整批完成
// - 单任务失败只记录并上报，不中断兄弟任务；整批完成信号只触发一次

use crate::uploader::UploadError;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 事件通道容量（进度 + 每任务两个事件 + 完成信号，留足余量）
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// 池任务：无参异步工作单元，成功或携带错误结束
type BoxedTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// 任务池配置
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// 最大并发任务数（必须为正）
    pub concurrency: usize,
}

/// 任务池运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// 尚未启动
    Idle,
    /// 准入循环运行中
    Running,
    /// 已暂停（在途任务继续，不再准入）
    Stopped,
    /// 全部任务结束（成功或失败）
    Complete,
}

/// 任务池事件
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// 进度（0-100，按已准入任务数 / 总数计算，单次运行内单调不减）
    Progress(f64),
    /// 单个任务失败（批次继续执行）
    TaskFailed { index: usize, message: String },
    /// 单个任务结束（成功或失败）
    TaskFinished { index: usize },
    /// 整批任务全部结束，仅触发一次
    Complete,
}

/// 并发任务池
///
/// 克隆共享同一内部状态，可安全跨任务传递
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// 任务列表（准入时取出，槽位置空表示已运行）
    tasks: Mutex<Vec<Option<BoxedTask>>>,
    /// 并发槽位
    semaphore: Arc<Semaphore>,
    /// 暂停门控（true = 暂停准入）
    paused_tx: watch::Sender<bool>,
    /// 运行状态
    state_tx: watch::Sender<PoolState>,
    /// 进度（当前值缓存，新订阅者立即拿到最新进度）
    progress_tx: watch::Sender<f64>,
    /// 事件发布端（destroy 时取出并丢弃，关闭所有订阅者）
    events: Mutex<Option<broadcast::Sender<PoolEvent>>>,
    /// 已准入的任务索引
    activated: Mutex<HashSet<usize>>,
    /// 已结束的任务索引
    finished: Mutex<HashSet<usize>>,
    /// 失败记录（索引 + 错误信息）
    failed: Mutex<Vec<(usize, String)>>,
    /// 已结束任务计数
    finished_count: AtomicUsize,
    /// 完成信号只触发一次的防重入闸
    complete_fired: AtomicBool,
    /// 是否已启动过
    started: AtomicBool,
    /// 是否已销毁
    destroyed: AtomicBool,
    /// 销毁取消令牌
    cancel: CancellationToken,
}

impl TaskPool {
    /// 创建任务池
    ///
    /// 并发数必须为正整数，否则返回 [`UploadError::InvalidConcurrency`]
    pub fn new(options: PoolOptions) -> Result<Self, UploadError> {
        if options.concurrency == 0 {
            return Err(UploadError::InvalidConcurrency);
        }

        let (paused_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(PoolState::Idle);
        let (progress_tx, _) = watch::channel(0.0);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        debug!("创建任务池: 并发数={}", options.concurrency);

        Ok(Self {
            inner: Arc::new(PoolInner {
                tasks: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(options.concurrency)),
                paused_tx,
                state_tx,
                progress_tx,
                events: Mutex::new(Some(events_tx)),
                activated: Mutex::new(HashSet::new()),
                finished: Mutex::new(HashSet::new()),
                failed: Mutex::new(Vec::new()),
                finished_count: AtomicUsize::new(0),
                complete_fired: AtomicBool::new(false),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// 追加一个任务，索引按追加顺序隐式分配且在池的生命周期内稳定
    ///
    /// 仅在 `start` 之前有效，启动后追加会被忽略
    pub fn append<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.inner.started.load(Ordering::SeqCst) {
            warn!("任务池已启动，忽略追加的任务");
            return;
        }
        self.inner
            .tasks
            .lock()
            .push(Some(Box::new(move || task().boxed())));
    }

    /// 启动（或从暂停点恢复）批次执行
    ///
    /// - 首次调用：发布初始进度 0 并启动准入循环
    /// - 暂停后调用：从第一个未准入的任务继续，已结束的任务绝不重跑
    /// - 已在运行或已完成时调用：空操作
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }

        if inner.started.swap(true, Ordering::SeqCst) {
            // 已启动过：只处理暂停恢复
            if *inner.paused_tx.borrow() && !inner.complete_fired.load(Ordering::SeqCst) {
                debug!("任务池从暂停点恢复");
                let _ = inner.paused_tx.send(false);
                inner.set_state(PoolState::Running);
            }
            return;
        }

        // 启动前的 stop() 调用不阻止首次启动
        let _ = inner.paused_tx.send(false);
        inner.set_state(PoolState::Running);
        inner.emit(PoolEvent::Progress(0.0));
        info!("🚀 任务池准入循环启动: 总任务数={}", self.total());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.dispatch().await;
        });
    }

    /// 协作式暂停：在途任务跑完，新任务不再准入，直到再次 `start`
    ///
    /// 重复调用与启动前调用均安全
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) || inner.complete_fired.load(Ordering::SeqCst) {
            return;
        }
        if !*inner.paused_tx.borrow() {
            debug!("任务池暂停准入");
            let _ = inner.paused_tx.send(true);
        }
        if inner.started.load(Ordering::SeqCst) {
            inner.set_state(PoolState::Stopped);
        }
    }

    /// 销毁任务池：取消准入循环与未开始的任务，关闭事件流，清空任务队列
    ///
    /// 销毁后不再发布任何事件
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.cancel.cancel();
        inner.events.lock().take();
        inner.tasks.lock().clear();
        debug!("任务池已销毁");
    }

    /// 等待整批任务结束
    pub async fn wait_complete(&self) -> Result<()> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            if *state_rx.borrow_and_update() == PoolState::Complete {
                return Ok(());
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => anyhow::bail!("任务池已销毁"),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        anyhow::bail!("任务池已销毁");
                    }
                }
            }
        }
    }

    /// 订阅事件流（销毁后返回已关闭的接收端）
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        match self.inner.events.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// 订阅运行状态
    pub fn state_rx(&self) -> watch::Receiver<PoolState> {
        self.inner.state_tx.subscribe()
    }

    /// 订阅进度（0-100）
    pub fn progress_rx(&self) -> watch::Receiver<f64> {
        self.inner.progress_tx.subscribe()
    }

    /// 总任务数
    pub fn total(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// 已准入任务数
    pub fn activated_count(&self) -> usize {
        self.inner.activated.lock().len()
    }

    /// 已结束任务数
    pub fn finished_count(&self) -> usize {
        self.inner.finished_count.load(Ordering::SeqCst)
    }

    /// 是否已全部结束
    pub fn is_complete(&self) -> bool {
        self.inner.complete_fired.load(Ordering::SeqCst)
    }

    /// 失败记录（索引 + 错误信息）
    pub fn failures(&self) -> Vec<(usize, String)> {
        self.inner.failed.lock().clone()
    }
}

impl PoolInner {
    /// 准入循环：按索引序逐个准入任务
    ///
    /// 每个任务必须先拿到并发槽位再开始执行，这是并发上限的唯一保证点；
    /// 暂停门控在槽位获取之前，保证暂停期间不会有新任务占用槽位
    async fn dispatch(self: Arc<Self>) {
        let total = self.tasks.lock().len();
        if total == 0 {
            // 空批次：finished == total 立即成立
            self.fire_complete();
            return;
        }

        let mut paused_rx = self.paused_tx.subscribe();

        for index in 0..total {
            // 占用并发槽位且暂停门放行后才算准入。
            // 等槽位期间可能收到暂停请求，拿到槽位后必须重查暂停门，
            // 否则在途任务释放槽位的瞬间会漏放一个新任务
            let permit = loop {
                // 暂停门：挂起直到恢复或销毁
                loop {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    if !*paused_rx.borrow_and_update() {
                        break;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        changed = paused_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }

                let permit = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                };

                if *paused_rx.borrow_and_update() {
                    // 等槽位期间被暂停：归还槽位回到暂停门
                    drop(permit);
                    continue;
                }
                break permit;
            };

            let task = {
                let mut tasks = self.tasks.lock();
                tasks.get_mut(index).and_then(Option::take)
            };
            let Some(task) = task else {
                // 槽位已空：任务被取出过或队列已被销毁清空
                drop(permit);
                continue;
            };

            self.activated.lock().insert(index);
            self.emit_progress(((index + 1) as f64 / total as f64) * 100.0);
            debug!("准入任务 #{} ({}/{})", index, index + 1, total);

            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    result = task() => result,
                };
                drop(permit);
                inner.on_task_finished(index, total, result);
            });
        }
    }

    fn on_task_finished(&self, index: usize, total: usize, result: Result<()>) {
        self.finished.lock().insert(index);
        let finished = self.finished_count.fetch_add(1, Ordering::SeqCst) + 1;

        match result {
            Ok(()) => debug!("任务 #{} 完成 ({}/{})", index, finished, total),
            Err(e) => {
                let message = format!("{e:#}");
                warn!("任务 #{} 失败: {}", index, message);
                self.failed.lock().push((index, message.clone()));
                self.emit(PoolEvent::TaskFailed { index, message });
            }
        }

        self.emit(PoolEvent::TaskFinished { index });

        // finished == total 是整批完成的唯一判定条件
        if finished == total {
            self.fire_complete();
        }
    }

    fn fire_complete(&self) {
        if self.complete_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("任务池全部完成: 失败数={}", self.failed.lock().len());
        self.set_state(PoolState::Complete);
        self.emit(PoolEvent::Complete);
    }

    fn set_state(&self, state: PoolState) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.state_tx.send(state);
    }

    fn emit_progress(&self, progress: f64) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.progress_tx.send(progress);
        self.emit(PoolEvent::Progress(progress));
    }

    fn emit(&self, event: PoolEvent) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}
