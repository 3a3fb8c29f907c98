//! 工具函数模块
//!
//! 提供看板时间格式化与显示名称拼接

use chrono::Local;

/// 看板使用的时间格式（与历史数据保持一致）
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 当前本地时间，格式化为看板时间格式
pub fn local_display_time() -> String {
    Local::now().format(DISPLAY_TIME_FORMAT).to_string()
}

/// 拼接用户显示名称：名与姓以空格连接并去除首尾空白
pub fn join_full_name(first_name: Option<&str>, last_name: Option<&str>) -> String {
    format!(
        "{} {}",
        first_name.unwrap_or_default(),
        last_name.unwrap_or_default()
    )
    .trim()
    .to_string()
}
