//! Workload-file parsing.
//!
//! One job per line: `<name> -n<count> <working-dir> <command> <duration>
//! [args...]`, where `<duration>` is the simulated execution time in
//! virtual ticks. Malformed lines are reported to the caller rather than
//! dropped silently.

use std::path::Path;

use crate::error::{MatrixError, Result};
use crate::job::JobSpec;

/// Parse a single workload line into a job spec.
pub fn parse_line(line: &str) -> Result<JobSpec> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(MatrixError::MalformedJob(format!(
            "expected at least 5 fields, got {}: {line:?}",
            fields.len()
        )));
    }

    let node_count = fields[1]
        .strip_prefix("-n")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            MatrixError::MalformedJob(format!("bad node count {:?} in {line:?}", fields[1]))
        })?;

    let duration = fields[4].parse::<u64>().map_err(|_| {
        MatrixError::MalformedJob(format!("bad duration {:?} in {line:?}", fields[4]))
    })?;

    Ok(JobSpec {
        name: fields[0].to_string(),
        node_count,
        working_dir: fields[2].to_string(),
        command: fields[3].to_string(),
        args: fields[4..].iter().map(|s| s.to_string()).collect(),
        duration,
    })
}

/// Parse a workload file, skipping blank lines and `#` comments.
pub fn load_file(path: &Path) -> Result<Vec<JobSpec>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(parse_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let spec = parse_line("sleep -n3 /tmp /bin/sleep 1000 extra").unwrap();
        assert_eq!(spec.name, "sleep");
        assert_eq!(spec.node_count, 3);
        assert_eq!(spec.working_dir, "/tmp");
        assert_eq!(spec.command, "/bin/sleep");
        assert_eq!(spec.duration, 1000);
        assert_eq!(spec.args, vec!["1000", "extra"]);
    }

    #[test]
    fn test_parse_rejects_short_line() {
        assert!(parse_line("sleep -n3 /tmp").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_node_count() {
        assert!(parse_line("sleep -x3 /tmp /bin/sleep 1000").is_err());
        assert!(parse_line("sleep -n0 /tmp /bin/sleep 1000").is_err());
        assert!(parse_line("sleep -nfoo /tmp /bin/sleep 1000").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_duration() {
        assert!(parse_line("sleep -n3 /tmp /bin/sleep soon").is_err());
    }
}
