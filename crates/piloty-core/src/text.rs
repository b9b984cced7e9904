//! Text utilities shared by the session surface: ANSI stripping for
//! `strip_ansi` responses and `jobs -l` parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static ANSI_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[mGKHF]").unwrap());
static BRACKETED_PASTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[\?2004[hl]").unwrap());
static ANSI_CURSOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());
static ANSI_MISC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b[>=\[\]()][0-9;]*[A-Za-z]?").unwrap());

/// Strip color, cursor-movement, and mode escape sequences and normalize
/// carriage returns. The result is plain text suitable for an agent that
/// asked for `strip_ansi`.
pub fn strip_ansi(text: &str) -> String {
    let text = ANSI_COLOR.replace_all(text, "");
    let text = BRACKETED_PASTE.replace_all(&text, "");
    let text = ANSI_CURSOR.replace_all(&text, "");
    let text = ANSI_MISC.replace_all(&text, "");
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// One entry from the shell's job table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub job_id: u32,
    pub pid: u32,
    pub status: String,
    pub command: String,
}

static JOB_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d+)\][+-]?\s+(\d+)\s+(\w+)\s+(.+)$").unwrap());

/// Parse `jobs -l` output lines of the form `[1]+ 12345 Running  sleep 10 &`.
/// Lines that do not look like job entries (the command echo, prompts) are
/// skipped.
pub fn parse_jobs(output: &str) -> Vec<JobInfo> {
    output
        .lines()
        .filter_map(|line| {
            let caps = JOB_LINE.captures(line.trim())?;
            Some(JobInfo {
                job_id: caps[1].parse().ok()?,
                pid: caps[2].parse().ok()?,
                status: caps[3].to_string(),
                command: caps[4].trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sgr_and_cursor_sequences() {
        let raw = "\x1b[1;31mred\x1b[0m plain \x1b[2Amoved\x1b[?2004h";
        assert_eq!(strip_ansi(raw), "red plain moved");
    }

    #[test]
    fn normalizes_carriage_returns() {
        assert_eq!(strip_ansi("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn preserves_plain_text() {
        let plain = "nothing to see here\n$ ";
        assert_eq!(strip_ansi(plain), plain);
    }

    #[test]
    fn parses_job_table() {
        let out = "jobs -l\r\n[1]+ 12345 Running   sleep 10 &\n[2]- 12399 Done      true\n";
        let jobs = parse_jobs(out);
        assert_eq!(
            jobs,
            vec![
                JobInfo {
                    job_id: 1,
                    pid: 12345,
                    status: "Running".to_string(),
                    command: "sleep 10 &".to_string(),
                },
                JobInfo {
                    job_id: 2,
                    pid: 12399,
                    status: "Done".to_string(),
                    command: "true".to_string(),
                },
            ]
        );
    }

    #[test]
    fn ignores_non_job_lines() {
        assert!(parse_jobs("bash-5.2$ jobs -l\nno jobs here\n").is_empty());
    }
}
