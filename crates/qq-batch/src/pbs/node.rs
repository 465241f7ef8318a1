//! A compute node, as reported by `pbsnodes -a`.

use std::collections::BTreeMap;

use qq_core::Size;

use crate::node::BatchNode;

/// A single node's metadata, parsed from a `pbsnodes` dump.
pub struct PbsNode {
    name: String,
    fields: BTreeMap<String, String>,
    properties: Vec<String>,
}

impl PbsNode {
    /// Builds a node from its parsed `key = value` fields.
    pub fn from_fields(name: String, fields: BTreeMap<String, String>) -> Self {
        let properties = fields
            .iter()
            .filter(|(key, value)| key.starts_with("resources_available.") && value.as_str() == "True")
            .map(|(key, _)| key.trim_start_matches("resources_available.").to_string())
            .collect();
        PbsNode { name, fields, properties }
    }

    fn int_resource(&self, key: &str) -> u32 {
        self.fields.get(key).and_then(|raw| raw.parse().ok()).unwrap_or(0)
    }

    fn free_int_resource(&self, res: &str) -> u32 {
        let total = self.int_resource(&format!("resources_available.{res}"));
        let assigned = self.int_resource(&format!("resources_assigned.{res}"));
        total.saturating_sub(assigned)
    }

    fn size_resource(&self, key: &str) -> Size {
        self.fields
            .get(key)
            .and_then(|raw| Size::parse(raw).ok())
            .unwrap_or_else(|| Size::from_bytes(0))
    }

    fn free_size_resource(&self, res: &str) -> Size {
        let total = self.size_resource(&format!("resources_available.{res}"));
        let assigned = self.size_resource(&format!("resources_assigned.{res}"));
        if total.as_bytes() >= assigned.as_bytes() {
            Size::from_bytes(total.as_bytes() - assigned.as_bytes())
        } else {
            Size::from_bytes(0)
        }
    }
}

impl BatchNode for PbsNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn ncpus(&self) -> u32 {
        self.int_resource("resources_available.ncpus")
    }

    fn nfree_cpus(&self) -> u32 {
        self.free_int_resource("ncpus")
    }

    fn ngpus(&self) -> u32 {
        self.int_resource("resources_available.ngpus")
    }

    fn nfree_gpus(&self) -> u32 {
        self.free_int_resource("ngpus")
    }

    fn cpu_memory(&self) -> Size {
        self.size_resource("resources_available.mem")
    }

    fn free_cpu_memory(&self) -> Size {
        self.free_size_resource("mem")
    }

    fn gpu_memory(&self) -> Size {
        self.size_resource("resources_available.gpu_mem")
    }

    fn free_gpu_memory(&self) -> Size {
        self.free_size_resource("gpu_mem")
    }

    fn local_scratch(&self) -> Size {
        self.size_resource("resources_available.scratch_local")
    }

    fn free_local_scratch(&self) -> Size {
        self.free_size_resource("scratch_local")
    }

    fn ssd_scratch(&self) -> Size {
        self.size_resource("resources_available.scratch_ssd")
    }

    fn free_ssd_scratch(&self) -> Size {
        self.free_size_resource("scratch_ssd")
    }

    fn shared_scratch(&self) -> Size {
        self.size_resource("resources_available.scratch_shared")
    }

    fn free_shared_scratch(&self) -> Size {
        self.free_size_resource("scratch_shared")
    }

    fn properties(&self) -> &[String] {
        &self.properties
    }

    fn is_available_to_user(&self, _user: &str) -> bool {
        let Some(state) = self.fields.get("state") else {
            return false;
        };
        const DISABLED: [&str; 4] = ["down", "unknown", "unresolvable", "resv-exclusive"];
        !DISABLED.iter().any(|s| state.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(fields: &[(&str, &str)]) -> PbsNode {
        let mut map = BTreeMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.to_string());
        }
        PbsNode::from_fields("node01".to_string(), map)
    }

    #[test]
    fn missing_resources_default_to_zero() {
        let n = node(&[]);
        assert_eq!(n.ncpus(), 0);
        assert_eq!(n.cpu_memory().as_bytes(), 0);
    }

    #[test]
    fn free_cpus_is_available_minus_assigned() {
        let n = node(&[("resources_available.ncpus", "8"), ("resources_assigned.ncpus", "3")]);
        assert_eq!(n.nfree_cpus(), 5);
    }

    #[test]
    fn down_state_is_unavailable() {
        let n = node(&[("state", "down,offline")]);
        assert!(!n.is_available_to_user("alice"));
    }

    #[test]
    fn free_state_is_available() {
        let n = node(&[("state", "free")]);
        assert!(n.is_available_to_user("alice"));
    }

    #[test]
    fn boolean_properties_are_collected() {
        let n = node(&[("resources_available.gpu", "True"), ("resources_available.ngpus", "2")]);
        assert_eq!(n.properties(), &["gpu".to_string()]);
    }
}
