//! 中继服务错误类型

use thiserror::Error;

use crate::domain::model::MediaKind;

/// 媒体组聚合器拒绝分片的原因
///
/// 被拒绝的分片不会修改已有媒体组的状态，也不会触发完成检查。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppendRejected {
    /// 同一媒体组内出现了不同的媒体类型
    #[error("media group {group_id} is {established}, got {received}")]
    KindMismatch {
        group_id: String,
        established: MediaKind,
        received: MediaKind,
    },

    /// 同一媒体组内出现了不同的发送者
    #[error("media group {group_id} belongs to user {established}, got user {received}")]
    OwnerMismatch {
        group_id: String,
        established: i64,
        received: i64,
    },

    /// 该媒体类型不参与聚合
    #[error("media kind {0} cannot be grouped")]
    NotGroupable(MediaKind),
}

impl AppendRejected {
    /// 指标标签
    pub fn reason(&self) -> &'static str {
        match self {
            AppendRejected::KindMismatch { .. } => "kind_mismatch",
            AppendRejected::OwnerMismatch { .. } => "owner_mismatch",
            AppendRejected::NotGroupable(_) => "not_groupable",
        }
    }
}
