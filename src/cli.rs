// Goldfish - 命令行交互界面模块
// 备份代列表的表格输出、清理确认提示和运行摘要

use crate::error::{BackupError, Result};
use crate::generation::{GenerationId, Inventory};
use crate::scanner::RunSummary;
use crate::utils::{format_bytes, format_duration};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::time::Duration;

/// 打印程序标题
pub fn print_headline() {
    println!(
        "{}",
        style(format!("Goldfish Backup Tool v{}", env!("CARGO_PKG_VERSION")))
            .cyan()
            .bold()
    );
    println!("{}", style("----------------------------------------").dim());
}

/// 将备份代清单渲染为表格行
///
/// 每个备份代的第一行显示时间，其余行留空；`X` 表示存在。
pub fn inventory_rows(inv: &Inventory) -> Vec<[String; 4]> {
    let mut rows = vec![[
        "Datetime".to_string(),
        "Folder".to_string(),
        "HDD".to_string(),
        "DB".to_string(),
    ]];
    for (generation, folders) in inv.iter().rev() {
        for (i, (folder, presence)) in folders.iter().enumerate() {
            let mark = |present: bool| (if present { "X" } else { "" }).to_string();
            rows.push([
                if i == 0 {
                    generation.to_string()
                } else {
                    String::new()
                },
                folder.clone(),
                mark(presence.on_storage),
                mark(presence.in_metadata),
            ]);
        }
    }
    rows
}

/// 打印备份代清单
pub fn print_inventory(inv: &Inventory) {
    let rows = inventory_rows(inv);
    let mut widths = [0usize; 4];
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    for (i, row) in rows.iter().enumerate() {
        let line = format!(
            "{:<w0$}  {:<w1$}  {:^w2$}  {:^w3$}",
            row[0],
            row[1],
            row[2],
            row[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        );
        if i == 0 {
            println!("{}", style(line).bold());
        } else {
            println!("{}", line);
        }
    }
}

/// 询问是否删除孤立的元数据记录
pub fn confirm_prune(generation: &GenerationId, folder: &str) -> Result<bool> {
    let prompt = format!(
        "Backup {} {} is stored in the database, but not on the drive. Remove it from the database?",
        style(generation).yellow(),
        style(folder).red().bold()
    );
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| BackupError::io("terminal", std::io::Error::other(e)))
}

/// 打印整次运行的摘要
pub fn print_summary(summary: &RunSummary, elapsed: Duration, dry_run: bool) {
    let copied: u64 = summary.sources.iter().map(|s| s.bytes_copied).sum();
    let linked: u64 = summary.sources.iter().map(|s| s.bytes_linked).sum();
    let hash_linked: u64 = summary.sources.iter().map(|s| s.bytes_hash_linked).sum();
    let files: u64 = summary.sources.iter().map(|s| s.files).sum();

    println!();
    println!("{}", style("----------------------------------------").dim());
    if dry_run {
        println!("{}", style("Dry run finished, nothing was written.").yellow().bold());
    } else {
        println!("{}", style("Backup Completed Successfully!").green().bold());
    }
    println!("Generation:       {}", style(&summary.generation).yellow());
    println!("Total Files:      {}", files);
    println!("Copied:           {}", style(format_bytes(copied)).cyan());
    println!("Linked:           {}", style(format_bytes(linked)).dim());
    println!("Hash Linked:      {}", style(format_bytes(hash_linked)).green());
    let failed = summary.total_failed();
    if failed > 0 {
        println!("Failed:           {}", style(failed).red().bold());
    }
    println!(
        "Total Duration:   {}",
        style(format_duration(elapsed.as_secs())).bold()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Presence;
    use std::collections::BTreeMap;

    #[test]
    fn rows_show_newest_generation_first() {
        let mut inv = Inventory::new();
        let old = GenerationId::parse("2024-01-01_00-00-00").unwrap();
        let new = GenerationId::parse("2024-01-02_00-00-00").unwrap();
        let mut folders = BTreeMap::new();
        folders.insert(
            "docs".to_string(),
            Presence {
                on_storage: true,
                in_metadata: true,
            },
        );
        folders.insert(
            "photos".to_string(),
            Presence {
                on_storage: false,
                in_metadata: true,
            },
        );
        inv.insert(new.clone(), folders);
        inv.insert(old.clone(), BTreeMap::new());

        let rows = inventory_rows(&inv);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], new.to_string());
        assert_eq!(rows[1][2], "X");
        assert_eq!(rows[2][0], "");
        assert_eq!(rows[2][1], "photos");
        assert_eq!(rows[2][2], "");
        assert_eq!(rows[2][3], "X");
    }
}
