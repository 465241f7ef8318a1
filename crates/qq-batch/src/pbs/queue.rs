//! A scheduler queue, as reported by `qstat -Qfw`.

use std::collections::BTreeMap;
use std::process::Command;

use qq_core::Duration;

use crate::queue::BatchQueue;

/// A single queue's metadata, parsed from a `qstat -Qfw` dump.
pub struct PbsQueue {
    name: String,
    fields: BTreeMap<String, String>,
    job_numbers: BTreeMap<String, u32>,
    acl_users: Vec<String>,
    acl_groups: Vec<String>,
    acl_hosts: Vec<String>,
    destinations: Vec<String>,
    comment: String,
}

impl PbsQueue {
    /// Builds a queue from its parsed `key = value` fields.
    pub fn from_fields(name: String, fields: BTreeMap<String, String>) -> Self {
        let job_numbers = fields
            .get("state_count")
            .map(|raw| {
                raw.split_whitespace()
                    .filter_map(|pair| {
                        let (state, count) = pair.split_once(':')?;
                        Some((state.to_string(), count.parse().ok()?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let split_csv = |key: &str| -> Vec<String> {
            fields
                .get(key)
                .map(|raw| raw.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        };

        let comment = fields
            .get("comment")
            .map(|raw| raw.split('|').next().unwrap_or(raw).to_string())
            .unwrap_or_default();

        let destinations = fields
            .get("route_destinations")
            .map(|raw| raw.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        PbsQueue {
            name,
            acl_users: split_csv("acl_users"),
            acl_groups: split_csv("acl_groups"),
            acl_hosts: split_csv("acl_hosts"),
            destinations,
            comment,
            job_numbers,
            fields,
        }
    }

    fn int_field(&self, key: &str) -> u32 {
        self.fields.get(key).and_then(|raw| raw.parse().ok()).unwrap_or(0)
    }

    fn job_count(&self, state: &str) -> u32 {
        self.job_numbers.get(state).copied().unwrap_or(0)
    }

    fn flag(&self, key: &str) -> bool {
        self.fields.get(key).map(String::as_str) == Some("True")
    }

    /// Shells out to `id -nG <user>` to resolve group memberships, mirroring
    /// the ACL group check the scheduler itself would perform.
    fn user_groups(user: &str) -> Vec<String> {
        let Ok(output) = Command::new("bash").arg("-c").arg(format!("id -nG {user}")).output() else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }
        String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn local_host() -> Option<String> {
        whoami::fallible::hostname().ok()
    }
}

impl BatchQueue for PbsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Option<i32> {
        self.fields.get("Priority").and_then(|raw| raw.parse().ok())
    }

    fn total_jobs(&self) -> u32 {
        self.int_field("total_jobs")
    }

    fn running_jobs(&self) -> u32 {
        self.job_count("Running")
    }

    fn queued_jobs(&self) -> u32 {
        self.job_count("Queued") + self.job_count("Held") + self.job_count("Waiting")
    }

    fn other_jobs(&self) -> u32 {
        self.job_count("Transit") + self.job_count("Exiting") + self.job_count("Begun")
    }

    fn max_walltime(&self) -> Option<Duration> {
        self.fields.get("resources_max.walltime").and_then(|raw| raw.parse().ok())
    }

    fn comment(&self) -> &str {
        &self.comment
    }

    fn is_available_to_user(&self, user: &str) -> bool {
        if !self.flag("enabled") || !self.flag("started") {
            return false;
        }

        if self.flag("acl_user_enable") && !self.acl_users.iter().any(|u| u == user) {
            return false;
        }

        if self.flag("acl_group_enable") {
            let groups = Self::user_groups(user);
            if !groups.iter().any(|g| self.acl_groups.contains(g)) {
                return false;
            }
        }

        if self.flag("acl_host_enable") {
            match Self::local_host() {
                Some(host) if self.acl_hosts.iter().any(|h| h == &host) => {}
                _ => return false,
            }
        }

        true
    }

    fn destinations(&self) -> &[String] {
        &self.destinations
    }

    fn from_route_only(&self) -> bool {
        self.flag("from_route_only")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(fields: &[(&str, &str)]) -> PbsQueue {
        let mut map = BTreeMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.to_string());
        }
        PbsQueue::from_fields("batch".to_string(), map)
    }

    #[test]
    fn job_counts_parse_from_state_count() {
        let q = queue(&[("state_count", "Transit:0 Queued:3 Held:1 Waiting:0 Running:5 Exiting:0 Begun:0")]);
        assert_eq!(q.running_jobs(), 5);
        assert_eq!(q.queued_jobs(), 4);
        assert_eq!(q.other_jobs(), 0);
    }

    #[test]
    fn disabled_queue_is_unavailable() {
        let q = queue(&[("enabled", "False"), ("started", "True")]);
        assert!(!q.is_available_to_user("alice"));
    }

    #[test]
    fn acl_users_restrict_access() {
        let q = queue(&[("enabled", "True"), ("started", "True"), ("acl_user_enable", "True"), ("acl_users", "alice,bob")]);
        assert!(q.is_available_to_user("alice"));
        assert!(!q.is_available_to_user("carol"));
    }

    #[test]
    fn comment_truncates_at_pipe() {
        let q = queue(&[("comment", "closed for maintenance|2026-01-01")]);
        assert_eq!(q.comment(), "closed for maintenance");
    }

    #[test]
    fn destinations_split_on_comma() {
        let q = queue(&[("route_destinations", "short,long")]);
        assert_eq!(q.destinations(), &["short".to_string(), "long".to_string()]);
    }
}
