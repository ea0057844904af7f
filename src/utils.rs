// Goldfish - 工具函数模块
// 提供修改时间取整、文件夹命名、格式化等辅助功能

use filetime::FileTime;
use std::cmp::Ordering;
use std::fs::Metadata;
use std::path::Path;

/// 取得四舍五入到秒的修改时间
///
/// 快速路径和哈希路径都以秒为粒度比较修改时间。
pub fn rounded_mtime(meta: &Metadata) -> i64 {
    round_file_time(FileTime::from_last_modification_time(meta))
}

/// 将 `FileTime` 取整到最近的秒
///
/// 恰好半秒时取偶数秒（银行家舍入），与旧版本写入的元数据保持一致。
pub fn round_file_time(time: FileTime) -> i64 {
    let secs = time.unix_seconds();
    match time.nanoseconds().cmp(&500_000_000) {
        Ordering::Less => secs,
        Ordering::Greater => secs + 1,
        Ordering::Equal if secs % 2 == 0 => secs,
        Ordering::Equal => secs + 1,
    }
}

/// 源目录在备份代中使用的文件夹名
///
/// 使用路径的最后一部分；根目录没有名称时退回 `Root_Backup`。
pub fn folder_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => "Root_Backup".to_string(),
    }
}

/// 格式化字节数为人类可读的单位
///
/// # 示例
/// ```
/// use goldfish::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// 格式化秒数为 "Xh Ym Zs" / "Xm Ys" / "Xs"
pub fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
