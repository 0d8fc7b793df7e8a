/// 后台定时器
///
/// 用于 PFC 稳定、太阳能调节器归零之类的等待：步骤启动定时器后继续做别的事，
/// 之后再 `wait`。定时器是独立的 tokio 任务，`cancel` 或 Devices 关闭时停止。

use log::{debug, trace};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BackgroundTimer {
    name: String,
    done_rx: watch::Receiver<bool>,
    cancel_token: CancellationToken,
}

impl BackgroundTimer {
    /// 单次定时器：`delay` 后执行一次 `action`
    pub fn one_shot<F, Fut>(name: impl Into<String>, delay: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done_rx) = watch::channel(false);
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let task_name = name.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("[BackgroundTimer] {} 已取消", task_name);
                }
                _ = tokio::time::sleep(delay) => {
                    action().await;
                    trace!("[BackgroundTimer] {} 完成", task_name);
                }
            }
            let _ = done_tx.send(true);
        });

        Self { name, done_rx, cancel_token }
    }

    /// 纯延时：`delay` 后完成
    pub fn delay(name: impl Into<String>, delay: Duration) -> Self {
        Self::one_shot(name, delay, || async {})
    }

    /// 重复定时器：每隔 `interval` 执行一次 `action`，执行 `count` 次后完成；
    /// `count` 为 None 时一直执行到取消
    pub fn repeating<F, Fut>(
        name: impl Into<String>,
        interval: Duration,
        count: Option<usize>,
        mut action: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done_rx) = watch::channel(false);
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let task_name = name.clone();

        tokio::spawn(async move {
            let mut fired = 0usize;
            loop {
                if count.map_or(false, |c| fired >= c) {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("[BackgroundTimer] {} 已取消（执行 {} 次）", task_name, fired);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        action().await;
                        fired += 1;
                    }
                }
            }
            let _ = done_tx.send(true);
        });

        Self { name, done_rx, cancel_token }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否已经结束（完成或被取消）
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// 等待结束，超时返回 false
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.done_rx.clone();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|done| *done))
            .await
            .map(|r| r.is_ok());
        match outcome {
            Ok(true) => true,
            // 发送端已释放：任务没有正常结束（动作 panic）
            Ok(false) => *rx.borrow(),
            Err(_) => false,
        }
    }

    /// 取消定时器
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_one_shot_runs_action() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let timer = BackgroundTimer::one_shot("pfc_settle", Duration::from_millis(20), move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!timer.is_done());
        assert!(timer.wait(Duration::from_secs(1)).await);
        assert!(timer.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let timer = BackgroundTimer::delay("long", Duration::from_secs(10));
        assert!(!timer.wait(Duration::from_millis(20)).await);
        timer.cancel();
        assert!(timer.wait(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_returns_when_action_panics() {
        let broken = Arc::new(AtomicUsize::new(1));
        let timer = BackgroundTimer::one_shot("broken", Duration::from_millis(5), move || async move {
            if broken.load(Ordering::SeqCst) > 0 {
                panic!("动作失败");
            }
        });
        // 任务异常退出：不会卡满超时，也不算完成
        let started = tokio::time::Instant::now();
        assert!(!timer.wait(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!timer.is_done());
    }

    #[tokio::test]
    async fn test_repeating_count() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let timer = BackgroundTimer::repeating("zero", Duration::from_millis(5), Some(3), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(timer.wait(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
