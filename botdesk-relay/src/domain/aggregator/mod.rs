//! 媒体组聚合器
//!
//! Bot 平台会把用户一次选中的多张图片（视频、语音、动图）拆成多条消息
//! 独立投递，它们共享同一个媒体组 ID。聚合器负责：
//! - 按媒体组 ID 缓冲分片（保持到达顺序）
//! - 最后一个分片之后静默 `quiet_interval` 再合并为一条记录写出
//! - 周期性回收长时间无更新的媒体组（直接丢弃，不写出）
//!
//! 合并与回收对同一媒体组互斥：每个媒体组至多被移除一次，
//! 合并记录至多写出一次。

mod store;

pub use store::{AppendOutcome, GroupStore};

use std::sync::Arc;
use std::time::Duration;

use botdesk_core::metrics::MediaGroupMetrics;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::model::{ConsolidatedRecord, MediaGroup, MediaKind};
use crate::domain::repository::MessageSinkRef;
use crate::error::AppendRejected;

/// 聚合器时间参数
///
/// 回收只在扫描时发生，且要求空闲时长严格大于回收上限：停滞的媒体组在最后
/// 一个分片之后 `reap_ceiling` 到 `reap_ceiling + sweep_period` 之间被丢弃
/// （默认参数下最迟 30 秒）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    /// 静默间隔
    pub quiet_interval: Duration,
    /// 回收上限（按最后更新时间计算）
    pub reap_ceiling: Duration,
    /// 回收扫描周期，同时决定回收的最大延迟
    pub sweep_period: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_millis(1500),
            reap_ceiling: Duration::from_secs(20),
            sweep_period: Duration::from_secs(10),
        }
    }
}

pub struct MediaGroupAggregator {
    store: GroupStore,
    settings: AggregatorSettings,
    sink: MessageSinkRef,
    metrics: MediaGroupMetrics,
}

impl MediaGroupAggregator {
    pub fn new(settings: AggregatorSettings, sink: MessageSinkRef, metrics: MediaGroupMetrics) -> Self {
        Self {
            store: GroupStore::new(),
            settings,
            sink,
            metrics,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// 当前在途媒体组数量
    pub fn in_flight(&self) -> usize {
        self.store.len()
    }

    /// 追加一个分片并安排完成检查
    ///
    /// 返回追加后的分片数。被拒绝的分片不会改变媒体组，也不会安排检查。
    pub fn append(
        self: &Arc<Self>,
        group_id: &str,
        owner_id: i64,
        kind: MediaKind,
        item: String,
    ) -> Result<usize, AppendRejected> {
        let outcome = match self.store.append(group_id, owner_id, kind, item, Instant::now()) {
            Ok(outcome) => outcome,
            Err(rejected) => {
                self.metrics
                    .fragments_rejected_total
                    .with_label_values(&[rejected.reason()])
                    .inc();
                warn!(
                    group_id = %group_id,
                    owner_id,
                    kind = %kind,
                    reason = rejected.reason(),
                    error = %rejected,
                    "Media group fragment rejected"
                );
                return Err(rejected);
            }
        };

        self.metrics.fragments_appended_total.inc();
        if outcome.opened {
            self.metrics.groups_opened_total.inc();
        }
        self.metrics.in_flight_groups.set(self.store.len() as i64);

        debug!(
            group_id = %group_id,
            owner_id,
            kind = %kind,
            observed_count = outcome.observed_count,
            "Media group fragment appended"
        );

        self.schedule_completion_check(group_id.to_string(), outcome.observed_count);
        Ok(outcome.observed_count)
    }

    /// 静默间隔后执行一次完成检查
    ///
    /// 检查不会被取消：新的分片到达后，旧的检查因分片数不匹配而空转。
    fn schedule_completion_check(self: &Arc<Self>, group_id: String, observed_count: usize) {
        let aggregator = Arc::clone(self);
        let quiet_interval = self.settings.quiet_interval;

        tokio::spawn(async move {
            tokio::time::sleep(quiet_interval).await;
            aggregator.check_completion(&group_id, observed_count).await;
        });
    }

    /// 完成检查：分片数仍为 `observed_count` 时合并并写出
    ///
    /// 返回本次调用是否取走了媒体组。
    pub async fn check_completion(&self, group_id: &str, observed_count: usize) -> bool {
        match self.store.take_if_settled(group_id, observed_count) {
            Some(group) => {
                self.flush(group).await;
                true
            }
            None => {
                debug!(
                    group_id = %group_id,
                    observed_count,
                    "Completion check superseded or group already gone"
                );
                false
            }
        }
    }

    async fn flush(&self, group: MediaGroup) {
        self.metrics.in_flight_groups.set(self.store.len() as i64);
        self.metrics.groups_flushed_total.inc();
        self.metrics.flushed_group_size.observe(group.len() as f64);

        let record = ConsolidatedRecord::from_group(&group);
        info!(
            group_id = %group.group_id,
            owner_id = group.owner_id,
            kind = %group.kind,
            items = group.len(),
            "Media group consolidated"
        );

        // 媒体组已移除，写出失败时不会重试
        if let Err(err) = self
            .sink
            .persist_and_broadcast(record.owner_id, record.sender, &record.text)
            .await
        {
            self.metrics.sink_failures_total.inc();
            error!(
                group_id = %group.group_id,
                owner_id = group.owner_id,
                error = %err,
                "Failed to write consolidated media group"
            );
        }
    }

    /// 回收扫描：丢弃空闲超过回收上限的媒体组，返回回收数量
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let reaped = self.store.take_expired(self.settings.reap_ceiling, now);
        if reaped.is_empty() {
            return 0;
        }

        for group in &reaped {
            self.metrics.groups_reaped_total.inc();
            info!(
                group_id = %group.group_id,
                owner_id = group.owner_id,
                kind = %group.kind,
                items = group.len(),
                idle_ms = group.idle_for(now).as_millis() as u64,
                lifetime_ms = group.lifetime(now).as_millis() as u64,
                "Dropping stalled media group"
            );
        }
        self.metrics.in_flight_groups.set(self.store.len() as i64);

        reaped.len()
    }

    /// 启动回收任务
    pub fn start_reaper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.sweep_period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let reaped = self.sweep();
                if reaped > 0 {
                    debug!(reaped, in_flight = self.in_flight(), "Media group sweep finished");
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &GroupStore {
        &self.store
    }
}
