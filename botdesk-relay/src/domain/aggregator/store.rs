//! 在途媒体组存储
//!
//! 以媒体组 ID 为键的分片并发映射：同一媒体组的追加、合并取出和回收取出
//! 在同一分片锁内串行执行，不同媒体组之间互不阻塞。

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::domain::model::{MediaGroup, MediaKind};
use crate::error::AppendRejected;

/// 追加结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// 追加后媒体组内的分片数
    pub observed_count: usize,
    /// 是否新建了媒体组
    pub opened: bool,
}

#[derive(Debug, Default)]
pub struct GroupStore {
    groups: DashMap<String, MediaGroup>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加分片；未见过的媒体组 ID 会新建媒体组
    pub fn append(
        &self,
        group_id: &str,
        owner_id: i64,
        kind: MediaKind,
        item: String,
        now: Instant,
    ) -> Result<AppendOutcome, AppendRejected> {
        if !kind.is_groupable() {
            return Err(AppendRejected::NotGroupable(kind));
        }

        match self.groups.entry(group_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                if group.kind != kind {
                    return Err(AppendRejected::KindMismatch {
                        group_id: group_id.to_string(),
                        established: group.kind,
                        received: kind,
                    });
                }
                if group.owner_id != owner_id {
                    return Err(AppendRejected::OwnerMismatch {
                        group_id: group_id.to_string(),
                        established: group.owner_id,
                        received: owner_id,
                    });
                }

                Ok(AppendOutcome {
                    observed_count: group.push(item, now),
                    opened: false,
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(MediaGroup::open(
                    group_id.to_string(),
                    owner_id,
                    kind,
                    item,
                    now,
                ));
                Ok(AppendOutcome {
                    observed_count: 1,
                    opened: true,
                })
            }
        }
    }

    /// 分片数仍等于 `observed_count` 时取出媒体组
    ///
    /// 判断与移除在同一次加锁内完成，过期的完成检查只会看到媒体组已不存在
    /// 或分片数已变化。
    pub fn take_if_settled(&self, group_id: &str, observed_count: usize) -> Option<MediaGroup> {
        self.groups
            .remove_if(group_id, |_, group| group.len() == observed_count)
            .map(|(_, group)| group)
    }

    /// 取出所有空闲时长超过 `ceiling` 的媒体组
    pub fn take_expired(&self, ceiling: Duration, now: Instant) -> Vec<MediaGroup> {
        // 先收集候选键并释放迭代器持有的读锁，再逐个按条件移除
        let candidates: Vec<String> = self
            .groups
            .iter()
            .filter(|entry| entry.value().idle_for(now) > ceiling)
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|group_id| {
                self.groups
                    .remove_if(&group_id, |_, group| group.idle_for(now) > ceiling)
                    .map(|(_, group)| group)
            })
            .collect()
    }

    /// 当前媒体组的快照
    #[cfg(test)]
    pub fn snapshot(&self, group_id: &str) -> Option<MediaGroup> {
        self.groups.get(group_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
