// Goldfish - 进度报告模块
// 引擎通过 Reporter 接口报告进度，自身不负责任何输出

use crate::actions::{FileTask, Outcome, SourceStats};
use crate::error::BackupError;
use crate::generation::GenerationId;
use crate::utils::format_bytes;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// 进度报告接口
///
/// 所有方法都有空实现，调用方只需覆盖关心的事件。
pub trait Reporter {
    /// 开始处理一个源目录
    fn source_started(&mut self, _folder: &str, _source: &Path, _previous: Option<&GenerationId>) {}

    /// 一个文件处理完成
    fn file_done(&mut self, _task: &FileTask, _outcome: &Outcome, _size: u64) {}

    /// 一个文件处理失败（运行继续）
    fn file_failed(&mut self, _rel_path: &Path, _error: &BackupError) {}

    /// 源目录处理完成
    fn source_finished(&mut self, _stats: &SourceStats) {}
}

/// 不输出任何内容的报告器
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// 终端报告器：旋转进度条 + 彩色摘要
pub struct ConsoleReporter {
    pb: Option<ProgressBar>,
    verbose: bool,
}

impl ConsoleReporter {
    /// # 参数
    /// * `verbose` - 是否逐个列出被复制和哈希链接的文件
    pub fn new(verbose: bool) -> Self {
        Self { pb: None, verbose }
    }

    fn println(&self, line: String) {
        match &self.pb {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn source_started(&mut self, folder: &str, source: &Path, previous: Option<&GenerationId>) {
        println!();
        println!("{}", style(folder).cyan().bold());
        println!("  From: {:?}", style(source).blue());
        match previous {
            Some(g) => println!("  Previous backup found from: {}", style(g).green()),
            None => println!("  {}", style("No previous backup found.").yellow()),
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(s) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} files processed {msg}")
        {
            pb.set_style(s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        self.pb = Some(pb);
    }

    fn file_done(&mut self, task: &FileTask, outcome: &Outcome, _size: u64) {
        if self.verbose {
            match outcome {
                Outcome::Copied { possible_match } => {
                    self.println(format!("    {}", task.rel_path.display()));
                    if let Some(candidate) = possible_match {
                        self.println(format!(
                            "      {} {}",
                            style("possible match:").dim(),
                            candidate.display()
                        ));
                    }
                }
                Outcome::HashLinked {
                    target,
                    mtime_mismatch,
                } => {
                    let label = if *mtime_mismatch { "~>" } else { "=>" };
                    self.println(format!(
                        "    {} {} {}",
                        task.rel_path.display(),
                        style(label).dim(),
                        target.display()
                    ));
                }
                Outcome::Linked { .. } => {}
            }
        }
        if let Some(pb) = &self.pb {
            pb.inc(1);
        }
    }

    fn file_failed(&mut self, rel_path: &Path, error: &BackupError) {
        self.println(format!(
            "  {} {:?} - {}",
            style("Failed:").red(),
            rel_path,
            error
        ));
    }

    fn source_finished(&mut self, stats: &SourceStats) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
        println!("  Files:       {}", stats.files);
        println!("  Copied:      {}", style(format_bytes(stats.bytes_copied)).yellow());
        println!("  Linked:      {}", style(format_bytes(stats.bytes_linked)).dim());
        println!("  Hash linked: {}", style(format_bytes(stats.bytes_hash_linked)).green());
        if stats.possible_matches > 0 {
            println!(
                "  Possible matches copied (mtime differs): {}",
                stats.possible_matches
            );
        }
        if stats.failed > 0 {
            println!("  Failed:      {}", style(stats.failed).red().bold());
        }
    }
}
