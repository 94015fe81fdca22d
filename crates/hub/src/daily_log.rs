//! Plain-text lighting history, one line per day:
//!
//! ```text
//! 2024/06/21,一日の実績:95分, 累計:1530分
//! ```
//!
//! This is a separate backend from the SQLite store; nothing here reads or
//! writes the database.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::Date;

use crate::clock;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLine {
    pub date: String,
    /// Minutes lit on `date`.
    pub today: i64,
    /// Minutes lit since the log began.
    pub total: i64,
}

impl DailyLine {
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim().split([',', ':']).collect();
        let [date, _, today, _, total] = fields.as_slice() else {
            return None;
        };
        Some(Self {
            date: date.trim().to_string(),
            today: minutes(today)?,
            total: minutes(total)?,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "{},一日の実績:{}分, 累計:{}分",
            self.date, self.today, self.total
        )
    }
}

fn minutes(field: &str) -> Option<i64> {
    field.trim().strip_suffix('分')?.trim().parse().ok()
}

pub struct DailyLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DailyLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add `minutes` to today's line, starting a new line (carrying the
    /// running total) when the last one is for an earlier day.
    pub fn refresh_last(&self, minutes: i64, today: Date) -> Result<DailyLine> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("daily log lock poisoned"))?;

        let mut lines = self.read_lines()?;
        let last = match lines.last() {
            Some(line) => DailyLine::parse(line).ok_or_else(|| {
                anyhow!("malformed daily log line in {}: {line:?}", self.path.display())
            })?,
            None => DailyLine {
                date: String::new(),
                today: 0,
                total: 0,
            },
        };

        let date = clock::format_date(today);
        let mut current = if last.date == date {
            lines.pop();
            last
        } else {
            DailyLine {
                date,
                today: 0,
                total: last.total,
            }
        };
        current.today += minutes;
        current.total += minutes;
        lines.push(current.render());

        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(&self.path, body)
            .with_context(|| format!("failed to write daily log: {}", self.path.display()))?;

        tracing::info!(
            date = %current.date,
            today = current.today,
            total = current.total,
            "daily log updated"
        );
        Ok(current)
    }

    /// The last `n` lines, oldest first.
    pub fn last_n(&self, n: usize) -> Result<Vec<String>> {
        let lines = self.read_lines()?;
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read daily log: {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn log_in(dir: &tempfile::TempDir) -> DailyLog {
        DailyLog::new(dir.path().join("daily.txt"))
    }

    // -- Line format ------------------------------------------------------

    #[test]
    fn parse_and_render() {
        let line = "2024/06/21,一日の実績:95分, 累計:1530分";
        let parsed = DailyLine::parse(line).unwrap();
        assert_eq!(
            parsed,
            DailyLine {
                date: "2024/06/21".into(),
                today: 95,
                total: 1530
            }
        );
        assert_eq!(parsed.render(), line);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(DailyLine::parse("hello").is_none());
        assert!(DailyLine::parse("2024/06/21,一日の実績:x分, 累計:1分").is_none());
    }

    // -- File operations --------------------------------------------------

    #[test]
    fn first_refresh_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let line = log.refresh_last(30, date!(2024 - 06 - 21)).unwrap();
        assert_eq!((line.today, line.total), (30, 30));
        assert_eq!(
            log.last_n(7).unwrap(),
            vec!["2024/06/21,一日の実績:30分, 累計:30分"]
        );
    }

    #[test]
    fn same_day_accumulates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.refresh_last(30, date!(2024 - 06 - 21)).unwrap();
        let line = log.refresh_last(15, date!(2024 - 06 - 21)).unwrap();
        assert_eq!((line.today, line.total), (45, 45));
        assert_eq!(log.last_n(7).unwrap().len(), 1);
    }

    #[test]
    fn new_day_appends_and_carries_total() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.refresh_last(30, date!(2024 - 06 - 21)).unwrap();
        let line = log.refresh_last(10, date!(2024 - 06 - 22)).unwrap();
        assert_eq!((line.today, line.total), (10, 40));
        assert_eq!(
            log.last_n(7).unwrap(),
            vec![
                "2024/06/21,一日の実績:30分, 累計:30分",
                "2024/06/22,一日の実績:10分, 累計:40分",
            ]
        );
    }

    #[test]
    fn last_n_limits_from_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let mut d = date!(2024 - 06 - 01);
        for _ in 0..10 {
            log.refresh_last(1, d).unwrap();
            d = d.next_day().unwrap();
        }
        let lines = log.last_n(3).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("2024/06/08"));
        assert!(lines[2].ends_with("累計:10分"));
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(log_in(&dir).last_n(7).unwrap().is_empty());
    }

    #[test]
    fn malformed_last_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), "not a log line\n").unwrap();
        let err = log.refresh_last(5, date!(2024 - 06 - 21)).unwrap_err();
        assert!(err.to_string().contains("malformed"), "{err}");
    }
}
