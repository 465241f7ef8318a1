//! Parses the `key = value` dump format shared by `qstat -f`, `qstat -Qfw`,
//! and `pbsnodes -a`.

use std::collections::BTreeMap;

/// Splits a PBS dump into blank-line-separated chunks, each yielding a
/// `(fields, name)` pair — the name taken from the first line, stripped of
/// a `Job Id:`/`Queue:` label prefix when present.
pub fn parse_multi(text: &str) -> Vec<(BTreeMap<String, String>, String)> {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return Vec::new();
    }

    trimmed
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let first_line = chunk.lines().next().unwrap_or_default().trim();
            let name = first_line
                .strip_prefix("Job Id:")
                .or_else(|| first_line.strip_prefix("Queue:"))
                .map(str::trim)
                .unwrap_or(first_line)
                .to_string();
            (parse_one(chunk), name)
        })
        .collect()
}

fn parse_one(chunk: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for raw_line in chunk.lines() {
        let line = raw_line.trim_end();
        if let Some((key, value)) = line.split_once(" = ") {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_job_id_header() {
        let text = "Job Id: 123.server\n    job_state = R\n    Resource_List.ncpus = 4\n";
        let parsed = parse_multi(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].1, "123.server");
        assert_eq!(parsed[0].0.get("job_state").unwrap(), "R");
    }

    #[test]
    fn splits_multiple_chunks() {
        let text = "Job Id: 1.server\n    job_state = Q\n\nJob Id: 2.server\n    job_state = R\n";
        let parsed = parse_multi(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].1, "2.server");
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(parse_multi("   \n").is_empty());
    }
}
