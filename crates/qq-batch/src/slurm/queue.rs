//! A queue (partition), as reported by `scontrol show partition -o`.

use std::collections::BTreeMap;
use std::process::Command;

use qq_core::Duration;

use crate::queue::BatchQueue;

/// A single partition's metadata plus the job counts by state that
/// [`crate::slurm::SlurmBackend::get_queues`] resolves via a separate
/// `squeue` call and folds in here.
pub struct SlurmQueue {
    name: String,
    fields: BTreeMap<String, String>,
    running_jobs: u32,
    queued_jobs: u32,
    other_jobs: u32,
}

impl SlurmQueue {
    /// Builds a queue from its `scontrol` fields and pre-counted job tallies.
    pub fn from_fields(
        name: String,
        fields: BTreeMap<String, String>,
        running_jobs: u32,
        queued_jobs: u32,
        other_jobs: u32,
    ) -> Self {
        SlurmQueue { name, fields, running_jobs, queued_jobs, other_jobs }
    }

    fn allowed(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.fields.get(key)?;
        if raw.is_empty() || raw == "(null)" || raw == "ALL" {
            return None;
        }
        Some(raw.split(',').map(|s| s.trim().to_string()).collect())
    }

    fn user_groups(user: &str) -> Vec<String> {
        let Ok(output) = Command::new("bash").arg("-c").arg(format!("id -nG {user}")).output() else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }
        String::from_utf8_lossy(&output.stdout).split_whitespace().map(str::to_string).collect()
    }
}

impl BatchQueue for SlurmQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Option<i32> {
        self.fields.get("PriorityTier")?.parse().ok()
    }

    fn total_jobs(&self) -> u32 {
        self.running_jobs + self.queued_jobs + self.other_jobs
    }

    fn running_jobs(&self) -> u32 {
        self.running_jobs
    }

    fn queued_jobs(&self) -> u32 {
        self.queued_jobs
    }

    fn other_jobs(&self) -> u32 {
        self.other_jobs
    }

    fn max_walltime(&self) -> Option<Duration> {
        self.fields.get("MaxTime").and_then(|raw| raw.parse().ok())
    }

    fn comment(&self) -> &str {
        ""
    }

    fn is_available_to_user(&self, user: &str) -> bool {
        let state = self.fields.get("State").map(String::as_str).unwrap_or("DOWN");
        if state != "UP" && state != "DRAIN" {
            return false;
        }

        if let Some(allowed) = self.allowed("AllowAccounts") {
            if !allowed.iter().any(|a| a == user) {
                return false;
            }
        }
        if let Some(denied) = self.allowed("DenyAccounts") {
            if denied.iter().any(|a| a == user) {
                return false;
            }
        }

        let groups = Self::user_groups(user);
        if let Some(allowed) = self.allowed("AllowGroups") {
            if !groups.iter().any(|g| allowed.contains(g)) {
                return false;
            }
        }
        if let Some(denied) = self.allowed("DenyGroups") {
            if groups.iter().any(|g| denied.contains(g)) {
                return false;
            }
        }

        true
    }

    fn destinations(&self) -> &[String] {
        &[]
    }

    fn from_route_only(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(fields: &[(&str, &str)], running: u32, queued: u32, other: u32) -> SlurmQueue {
        let mut map = BTreeMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.to_string());
        }
        SlurmQueue::from_fields("batch".to_string(), map, running, queued, other)
    }

    #[test]
    fn total_jobs_sums_all_categories() {
        let q = queue(&[], 3, 2, 1);
        assert_eq!(q.total_jobs(), 6);
    }

    #[test]
    fn down_state_is_unavailable() {
        let q = queue(&[("State", "DOWN")], 0, 0, 0);
        assert!(!q.is_available_to_user("alice"));
    }

    #[test]
    fn deny_accounts_block_listed_user() {
        let q = queue(&[("State", "UP"), ("DenyAccounts", "alice,bob")], 0, 0, 0);
        assert!(!q.is_available_to_user("alice"));
        assert!(q.is_available_to_user("carol"));
    }
}
