//! Table rendering for job listings

use chrono::{TimeZone, Utc};
use colored::{ColoredString, Colorize};
use queuectl_core::domain::{Job, JobState};
use queuectl_core::port::StateCounts;
use tabled::{Table, Tabled};

const COMMAND_WIDTH: usize = 40;

#[derive(Tabled)]
struct JobLine {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "COMMAND")]
    command: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: String,
    #[tabled(rename = "RUN AT")]
    run_at: String,
    #[tabled(rename = "UPDATED")]
    updated_at: String,
}

#[derive(Tabled)]
struct CountLine {
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "JOBS")]
    count: i64,
}

pub fn jobs_table(jobs: &[Job]) -> String {
    let lines: Vec<JobLine> = jobs
        .iter()
        .map(|job| JobLine {
            id: job.id.clone(),
            command: truncate(&job.command, COMMAND_WIDTH),
            state: job.state.to_string(),
            attempts: format!("{}/{}", job.attempts, job.max_retries.saturating_add(1)),
            run_at: format_millis(job.run_at),
            updated_at: format_millis(job.updated_at),
        })
        .collect();
    Table::new(lines).to_string()
}

pub fn counts_table(counts: &StateCounts) -> String {
    let lines: Vec<CountLine> = counts
        .iter()
        .map(|(state, count)| CountLine {
            state: state.to_string(),
            count: *count,
        })
        .collect();
    Table::new(lines).to_string()
}

pub fn colored_state(state: JobState) -> ColoredString {
    match state {
        JobState::Pending => state.as_str().yellow(),
        JobState::Processing => state.as_str().cyan(),
        JobState::Completed => state.as_str().green(),
        JobState::Failed | JobState::Dead => state.as_str().red(),
    }
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00:00");
        assert_eq!(format_millis(i64::MAX), "never");
    }

    #[test]
    fn test_jobs_table_lists_every_job() {
        let jobs = vec![Job::new("a", "echo a", 2, 0), Job::new("b", "echo b", 2, 0)];
        let table = jobs_table(&jobs);
        assert!(table.contains("echo a"));
        assert!(table.contains("0/3"));
    }
}
