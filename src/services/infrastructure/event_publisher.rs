/// 序列信号总线
///
/// 测试序列在步骤边界发布 `SigStep`，运行结束发布 `SigResult`。
/// 订阅者在 run 之前订阅、close 时统一退订；投递是串行的，
/// 发布返回时所有订阅者都已处理完该信号。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::{MeasurementResult, ResultCode, StepPhase};
use crate::utils::error::{AppError, AppResult};

/// 步骤边界信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigStep {
    /// 步骤名称（可能重名，用 index 区分）
    pub name: String,
    /// 步骤在序列中的下标
    pub index: usize,
    pub phase: StepPhase,
    /// END 时为本步骤的结果；步骤没有读数时为 None
    pub result: Option<ResultCode>,
    pub timestamp: DateTime<Utc>,
}

impl SigStep {
    pub fn start(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            phase: StepPhase::Start,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn end(name: impl Into<String>, index: usize, result: Option<ResultCode>) -> Self {
        Self {
            name: name.into(),
            index,
            phase: StepPhase::End,
            result,
            timestamp: Utc::now(),
        }
    }
}

/// 运行结果信号，携带全部读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigResult {
    pub result: MeasurementResult,
    pub timestamp: DateTime<Utc>,
}

impl SigResult {
    pub fn new(result: MeasurementResult) -> Self {
        Self {
            result,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "payload")]
pub enum SequenceSignal {
    Step(SigStep),
    Result(SigResult),
}

/// 订阅句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
}

/// 信号订阅者
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ISignalSubscriber: Send + Sync {
    /// 订阅者ID，用于日志
    fn subscriber_id(&self) -> String;

    /// 处理信号；返回的错误只记录日志，不影响运行
    async fn handle_signal(&self, signal: &SequenceSignal) -> AppResult<()>;
}

/// 信号总线
#[derive(Default)]
pub struct SignalBus {
    subscribers: RwLock<Vec<(SubscriptionHandle, Arc<dyn ISignalSubscriber>)>>,
    published: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn ISignalSubscriber>) -> SubscriptionHandle {
        let handle = SubscriptionHandle { id: Uuid::new_v4() };
        debug!("[SignalBus] 订阅者 {} 已订阅", subscriber.subscriber_id());
        self.subscribers.write().await.push((handle, subscriber));
        handle
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> AppResult<()> {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|(h, _)| *h != handle);
        if subscribers.len() == before {
            return Err(AppError::not_found_error("Subscription", handle.id.to_string()));
        }
        Ok(())
    }

    /// 串行投递信号
    pub async fn publish(&self, signal: SequenceSignal) {
        let subscribers: Vec<Arc<dyn ISignalSubscriber>> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        self.published.fetch_add(1, Ordering::Relaxed);
        for subscriber in subscribers {
            if let Err(e) = subscriber.handle_signal(&signal).await {
                error!(
                    "[SignalBus] 订阅者 {} 处理信号失败: {}",
                    subscriber.subscriber_id(),
                    e
                );
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// 已发布的信号数
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 退订所有订阅者
    pub async fn close(&self) {
        let mut subscribers = self.subscribers.write().await;
        if !subscribers.is_empty() {
            debug!("[SignalBus] 退订 {} 个订阅者", subscribers.len());
        }
        subscribers.clear();
    }
}

/// 把信号写入日志
pub struct LogSignalSubscriber;

#[async_trait]
impl ISignalSubscriber for LogSignalSubscriber {
    fn subscriber_id(&self) -> String {
        "log".to_string()
    }

    async fn handle_signal(&self, signal: &SequenceSignal) -> AppResult<()> {
        match signal {
            SequenceSignal::Step(step) => match step.phase {
                StepPhase::Start => info!("[步骤] #{} {} 开始", step.index, step.name),
                StepPhase::End => info!(
                    "[步骤] #{} {} 结束: {}",
                    step.index,
                    step.name,
                    step.result.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
                ),
            },
            SequenceSignal::Result(result) => {
                let code = result
                    .result
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    "[结果] {} 读数 {} 个，失败 {} 个",
                    code,
                    result.result.readings.len(),
                    result.result.failed_count()
                );
                if let Some(err) = &result.result.error {
                    warn!("[结果] 运行出错: {}", err);
                }
            }
        }
        Ok(())
    }
}

/// 把信号转发到通道，供加载器或上传程序消费
pub struct ChannelSignalSubscriber {
    id: String,
    sender: mpsc::UnboundedSender<SequenceSignal>,
}

impl ChannelSignalSubscriber {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<SequenceSignal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { id: id.into(), sender }, receiver)
    }
}

#[async_trait]
impl ISignalSubscriber for ChannelSignalSubscriber {
    fn subscriber_id(&self) -> String {
        self.id.clone()
    }

    async fn handle_signal(&self, signal: &SequenceSignal) -> AppResult<()> {
        self.sender
            .send(signal.clone())
            .map_err(|_| AppError::generic(format!("订阅者 {} 的接收端已关闭", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let bus = SignalBus::new();
        let (subscriber, mut rx) = ChannelSignalSubscriber::new("loader");
        bus.subscribe(Arc::new(subscriber)).await;

        bus.publish(SequenceSignal::Step(SigStep::start("PowerUp", 0))).await;
        bus.publish(SequenceSignal::Step(SigStep::end("PowerUp", 0, Some(ResultCode::Pass)))).await;

        match rx.recv().await.unwrap() {
            SequenceSignal::Step(step) => assert_eq!(step.phase, StepPhase::Start),
            other => panic!("意外的信号: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SequenceSignal::Step(step) => assert_eq!(step.result, Some(ResultCode::Pass)),
            other => panic!("意外的信号: {:?}", other),
        }
        assert_eq!(bus.published_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = SignalBus::new();
        let mut failing = MockISignalSubscriber::new();
        failing.expect_subscriber_id().return_const("broken".to_string());
        failing
            .expect_handle_signal()
            .times(1)
            .returning(|_| Err(AppError::generic("上传失败")));
        bus.subscribe(Arc::new(failing)).await;

        let (subscriber, mut rx) = ChannelSignalSubscriber::new("loader");
        bus.subscribe(Arc::new(subscriber)).await;

        bus.publish(SequenceSignal::Result(SigResult::new(MeasurementResult::new()))).await;
        assert!(matches!(rx.recv().await, Some(SequenceSignal::Result(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let bus = SignalBus::new();
        let handle = bus.subscribe(Arc::new(LogSignalSubscriber)).await;
        bus.subscribe(Arc::new(LogSignalSubscriber)).await;
        bus.unsubscribe(handle).await.unwrap();
        assert_eq!(bus.subscriber_count().await, 1);
        assert!(bus.unsubscribe(handle).await.is_err());
        bus.close().await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(SequenceSignal::Step(SigStep::start("Check", 1))).unwrap();
        assert_eq!(json["signal"], "Step");
        assert_eq!(json["payload"]["name"], "Check");
    }
}
