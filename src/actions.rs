// Goldfish - 链接决策与统计数据结构
// 定义每个文件的处理结果，以及每个源目录的字节统计

use std::path::PathBuf;

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 快速路径：大小和修改时间与上一备份代相同，直接硬链接
    Linked { target: PathBuf },

    /// 哈希路径：内容与历史中的某个文件相同，硬链接过去
    HashLinked {
        target: PathBuf,
        /// 候选文件的修改时间与当前文件不一致（需启用 `link_mtime_mismatch`）
        mtime_mismatch: bool,
    },

    /// 复制路径：没有可用的匹配
    Copied {
        /// 存在内容相同但修改时间不同的候选，只是不允许链接（仅用于诊断）
        possible_match: Option<PathBuf>,
    },
}

/// 文件任务结构体
/// 表示单个文件的备份任务，包含所有必要的路径信息
#[derive(Debug, Clone)]
pub struct FileTask {
    /// 相对于源目录的路径
    pub rel_path: PathBuf,

    /// 源文件的完整路径
    pub src_path: PathBuf,

    /// 当前备份代中的目标路径
    pub dest_path: PathBuf,

    /// 上一备份代中同一相对路径的文件
    pub old_path: Option<PathBuf>,
}

impl FileTask {
    pub fn new(
        rel_path: PathBuf,
        src_path: PathBuf,
        dest_path: PathBuf,
        old_path: Option<PathBuf>,
    ) -> Self {
        Self {
            rel_path,
            src_path,
            dest_path,
            old_path,
        }
    }

    /// 元数据库中使用的相对路径字符串
    pub fn key(&self) -> String {
        self.rel_path.to_string_lossy().into_owned()
    }
}

/// 哈希链接记录：目标路径链接到了哪个已有文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub dest: PathBuf,
    pub target: PathBuf,
    pub mtime_mismatch: bool,
}

/// 单个源目录的备份统计
#[derive(Debug, Default, Clone)]
pub struct SourceStats {
    /// 源目录在备份代中的文件夹名
    pub folder: String,

    /// 成功处理的文件数
    pub files: u64,

    /// 完整复制的字节数
    pub bytes_copied: u64,

    /// 经快速路径链接的字节数
    pub bytes_linked: u64,

    /// 经哈希路径链接的字节数
    pub bytes_hash_linked: u64,

    /// 处理失败的文件数
    pub failed: u64,

    /// 有内容匹配但因修改时间不同而被复制的文件数
    pub possible_matches: u64,

    /// 哈希链接明细
    pub links: Vec<LinkRecord>,
}

impl SourceStats {
    pub fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            ..Self::default()
        }
    }

    /// 记录一个文件的处理结果
    pub fn record(&mut self, task: &FileTask, outcome: &Outcome, size: u64) {
        self.files += 1;
        match outcome {
            Outcome::Linked { .. } => self.bytes_linked += size,
            Outcome::HashLinked {
                target,
                mtime_mismatch,
            } => {
                self.bytes_hash_linked += size;
                self.links.push(LinkRecord {
                    dest: task.dest_path.clone(),
                    target: target.clone(),
                    mtime_mismatch: *mtime_mismatch,
                });
            }
            Outcome::Copied { possible_match } => {
                self.bytes_copied += size;
                if possible_match.is_some() {
                    self.possible_matches += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> FileTask {
        FileTask::new("a".into(), "/src/a".into(), "/dst/a".into(), None)
    }

    #[test]
    fn bytes_are_attributed_per_branch() {
        let mut stats = SourceStats::new("docs");
        stats.record(&task(), &Outcome::Linked { target: "/old/a".into() }, 3);
        stats.record(
            &task(),
            &Outcome::HashLinked {
                target: "/old/b".into(),
                mtime_mismatch: false,
            },
            5,
        );
        stats.record(
            &task(),
            &Outcome::Copied {
                possible_match: Some("/old/c".into()),
            },
            7,
        );

        assert_eq!(stats.files, 3);
        assert_eq!(stats.bytes_linked, 3);
        assert_eq!(stats.bytes_hash_linked, 5);
        assert_eq!(stats.bytes_copied, 7);
        assert_eq!(stats.possible_matches, 1);
        assert_eq!(stats.links.len(), 1);
        assert_eq!(stats.links[0].target, PathBuf::from("/old/b"));
    }
}
