//! # Prometheus 指标收集模块
//!
//! 为各个服务模块提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 媒体组聚合指标
#[derive(Clone)]
pub struct MediaGroupMetrics {
    /// 新建媒体组总数
    pub groups_opened_total: IntCounter,
    /// 完成合并并落库的媒体组总数
    pub groups_flushed_total: IntCounter,
    /// 因超时被回收（丢弃）的媒体组总数
    pub groups_reaped_total: IntCounter,
    /// 追加成功的分片总数
    pub fragments_appended_total: IntCounter,
    /// 被拒绝的分片总数（按原因）
    pub fragments_rejected_total: IntCounterVec,
    /// 合并记录写入失败次数
    pub sink_failures_total: IntCounter,
    /// 当前在途媒体组数量
    pub in_flight_groups: IntGauge,
    /// 合并时的媒体组大小
    pub flushed_group_size: Histogram,
}

impl MediaGroupMetrics {
    /// 创建并注册媒体组聚合指标
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let groups_opened_total = IntCounter::new(
            "media_group_opened_total",
            "Total number of media groups opened",
        )?;

        let groups_flushed_total = IntCounter::new(
            "media_group_flushed_total",
            "Total number of media groups consolidated and flushed",
        )?;

        let groups_reaped_total = IntCounter::new(
            "media_group_reaped_total",
            "Total number of stalled media groups dropped by the reaper",
        )?;

        let fragments_appended_total = IntCounter::new(
            "media_group_fragments_appended_total",
            "Total number of fragments appended to media groups",
        )?;

        let fragments_rejected_total = IntCounterVec::new(
            Opts::new(
                "media_group_fragments_rejected_total",
                "Total number of fragments rejected by the aggregator",
            ),
            &["reason"],
        )?;

        let sink_failures_total = IntCounter::new(
            "media_group_sink_failures_total",
            "Total number of failed consolidated record writes",
        )?;

        let in_flight_groups = IntGauge::new(
            "media_group_in_flight",
            "Number of media groups currently buffered",
        )?;

        let flushed_group_size = Histogram::with_opts(
            HistogramOpts::new(
                "media_group_flushed_size",
                "Number of items in a flushed media group",
            )
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0]),
        )?;

        registry.register(Box::new(groups_opened_total.clone()))?;
        registry.register(Box::new(groups_flushed_total.clone()))?;
        registry.register(Box::new(groups_reaped_total.clone()))?;
        registry.register(Box::new(fragments_appended_total.clone()))?;
        registry.register(Box::new(fragments_rejected_total.clone()))?;
        registry.register(Box::new(sink_failures_total.clone()))?;
        registry.register(Box::new(in_flight_groups.clone()))?;
        registry.register(Box::new(flushed_group_size.clone()))?;

        Ok(Self {
            groups_opened_total,
            groups_flushed_total,
            groups_reaped_total,
            fragments_appended_total,
            fragments_rejected_total,
            sink_failures_total,
            in_flight_groups,
            flushed_group_size,
        })
    }
}

/// 消息中继服务指标
#[derive(Clone)]
pub struct RelayMetrics {
    /// 落库消息总数（按发送方角色）
    pub messages_persisted_total: IntCounterVec,
    /// 推送到看板的事件总数
    pub events_broadcast_total: IntCounter,
    /// 收到的 Bot 更新总数（按内容类型）
    pub updates_received_total: IntCounterVec,
    /// 文件地址解析失败次数
    pub file_resolution_failures_total: IntCounter,
    /// Bot 主动发出的消息数（按结果）
    pub outbound_messages_total: IntCounterVec,
}

impl RelayMetrics {
    /// 创建并注册消息中继指标
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let messages_persisted_total = IntCounterVec::new(
            Opts::new(
                "relay_messages_persisted_total",
                "Total number of chat messages persisted",
            ),
            &["sender"],
        )?;

        let events_broadcast_total = IntCounter::new(
            "relay_events_broadcast_total",
            "Total number of new-message events broadcast to dashboards",
        )?;

        let updates_received_total = IntCounterVec::new(
            Opts::new(
                "relay_updates_received_total",
                "Total number of bot updates received",
            ),
            &["content"],
        )?;

        let file_resolution_failures_total = IntCounter::new(
            "relay_file_resolution_failures_total",
            "Total number of failed file reference resolutions",
        )?;

        let outbound_messages_total = IntCounterVec::new(
            Opts::new(
                "relay_outbound_messages_total",
                "Total number of messages sent by the bot",
            ),
            &["result"],
        )?;

        registry.register(Box::new(messages_persisted_total.clone()))?;
        registry.register(Box::new(events_broadcast_total.clone()))?;
        registry.register(Box::new(updates_received_total.clone()))?;
        registry.register(Box::new(file_resolution_failures_total.clone()))?;
        registry.register(Box::new(outbound_messages_total.clone()))?;

        Ok(Self {
            messages_persisted_total,
            events_broadcast_total,
            updates_received_total,
            file_resolution_failures_total,
            outbound_messages_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_on_isolated_registry() {
        let registry = Registry::new();
        let groups = MediaGroupMetrics::new(&registry).unwrap();
        let relay = RelayMetrics::new(&registry).unwrap();

        groups.groups_opened_total.inc();
        groups.fragments_rejected_total.with_label_values(&["kind_mismatch"]).inc();
        relay.messages_persisted_total.with_label_values(&["user"]).inc();

        assert_eq!(groups.groups_opened_total.get(), 1);
        assert_eq!(
            relay.messages_persisted_total.with_label_values(&["user"]).get(),
            1
        );
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let registry = Registry::new();
        assert!(MediaGroupMetrics::new(&registry).is_ok());
        assert!(MediaGroupMetrics::new(&registry).is_err());
    }
}
