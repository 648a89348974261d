use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Local};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::session::Notice;
use crate::task::{Address, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// Prints one page of tasks plus a page footer.
    #[tracing::instrument(skip(self, tasks, identity))]
    pub fn print_task_page(
        &mut self,
        tasks: &[Task],
        identity: Option<&Address>,
        page: usize,
        total_pages: usize,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if tasks.is_empty() {
            writeln!(out, "No tasks to show.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "St".to_string(),
            "Vis".to_string(),
            "Created".to_string(),
            "Content".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = short_id(task.id.as_str());
            let id = self.paint(&id, "33");

            let status = if task.completed { "x" } else { "-" }.to_string();
            let status = if task.completed {
                self.paint(&status, "32")
            } else {
                status
            };

            let vis = if task.private { "priv" } else { "pub" }.to_string();

            let created = format_seconds(task.created_at);

            let owned = identity.is_some_and(|addr| task.owner == *addr);
            let content = if owned {
                self.paint(&task.content, "1")
            } else {
                task.content.clone()
            };

            rows.push(vec![id, status, vis, created, content]);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(out, "Page {page}/{total_pages}")?;
        Ok(())
    }

    pub fn print_notice(&mut self, notice: &Notice) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let text = match notice {
            Notice::Cancelled(_) | Notice::Precondition(_) => {
                self.paint(notice.message(), "33")
            }
            Notice::Rejected(_) | Notice::Failure(_) => self.paint(notice.message(), "31"),
        };
        writeln!(out, "{text}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn format_seconds(seconds: i64) -> String {
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
