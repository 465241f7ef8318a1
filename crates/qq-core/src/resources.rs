//! Typed resource requests, with merge and validation semantics.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::duration::Duration;
use crate::error::CoreError;
use crate::size::Size;

/// The kind of working directory a job executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkDir {
    /// Execute in place, in the submission directory.
    InputDir,
    /// Node-local scratch storage.
    ScratchLocal,
    /// Node-local SSD scratch storage.
    ScratchSsd,
    /// Scratch storage shared across the allocated nodes.
    ScratchShared,
    /// `/dev/shm`-backed scratch storage.
    ScratchShm,
}

impl WorkDir {
    /// Parses a `work_dir` directive value, normalizing the `job_dir` alias
    /// to `input_dir`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "inputdir" | "jobdir" => Ok(WorkDir::InputDir),
            "scratchlocal" => Ok(WorkDir::ScratchLocal),
            "scratchssd" => Ok(WorkDir::ScratchSsd),
            "scratchshared" => Ok(WorkDir::ScratchShared),
            "scratchshm" => Ok(WorkDir::ScratchShm),
            other => Err(CoreError::InvalidResources(format!(
                "unknown work_dir '{other}'"
            ))),
        }
    }

    /// True for `input_dir`, where no scratch directory is used.
    pub fn is_input_dir(self) -> bool {
        matches!(self, WorkDir::InputDir)
    }
}

/// One of the three mutually-exclusive forms a memory or scratch-size
/// request can take, in descending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// An absolute total size for the whole job.
    Total(Size),
    /// A size per allocated node.
    PerNode(Size),
    /// A size per allocated CPU.
    PerCpu(Size),
}

/// A bundle of computational resource requests.
///
/// Every field is optional; `None` means "not specified here" and is
/// filled in by [`Resources::merge`] from queue/backend defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of compute nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nnodes: Option<u32>,
    /// Total CPU count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncpus: Option<u32>,
    /// Per-node CPU count; overrides `ncpus` when both are given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncpus_per_node: Option<u32>,
    /// Total GPU count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngpus: Option<u32>,
    /// Per-node GPU count; overrides `ngpus` when both are given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngpus_per_node: Option<u32>,
    /// Absolute memory request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<Size>,
    /// Per-node memory request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_per_node: Option<Size>,
    /// Per-CPU memory request; blocks `mem`/`mem_per_node` from later
    /// merge sources once set (§3.3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_per_cpu: Option<Size>,
    /// Maximum walltime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walltime: Option<Duration>,
    /// Kind of working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<WorkDir>,
    /// Absolute scratch size request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_size: Option<Size>,
    /// Per-node scratch size request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_size_per_node: Option<Size>,
    /// Per-CPU scratch size request; blocks `work_size`/`work_size_per_node`
    /// from later merge sources once set (§3.3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_size_per_cpu: Option<Size>,
    /// Node-property requirements/exclusions, each `"true"`, `"false"`, or
    /// a backend-specific value.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub props: BTreeMap<String, String>,
}

impl Resources {
    /// Parses a `key[=value]` property list into a map, where a bare key
    /// means `"true"` and a `^`-prefixed key means `"false"`.
    pub fn parse_props(s: &str) -> Result<BTreeMap<String, String>, CoreError> {
        let mut result = BTreeMap::new();
        for part in s.split([',', ' ', '\t', '\n', ':']).filter(|p| !p.is_empty()) {
            let (key, value) = if let Some((k, v)) = part.split_once('=') {
                (k.to_string(), v.to_string())
            } else if let Some(k) = part.strip_prefix('^') {
                (k.to_string(), "false".to_string())
            } else {
                (part.to_string(), "true".to_string())
            };

            if result.contains_key(&key) {
                return Err(CoreError::InvalidResources(format!(
                    "property '{key}' is defined multiple times"
                )));
            }
            result.insert(key, value);
        }
        Ok(result)
    }

    /// Resolves the effective memory request by precedence
    /// `mem > mem_per_node > mem_per_cpu`.
    pub fn effective_mem(&self) -> Option<SizeSpec> {
        self.mem
            .map(SizeSpec::Total)
            .or(self.mem_per_node.map(SizeSpec::PerNode))
            .or(self.mem_per_cpu.map(SizeSpec::PerCpu))
    }

    /// Resolves the effective scratch-size request by precedence
    /// `work_size > work_size_per_node > work_size_per_cpu`.
    pub fn effective_work_size(&self) -> Option<SizeSpec> {
        self.work_size
            .map(SizeSpec::Total)
            .or(self.work_size_per_node.map(SizeSpec::PerNode))
            .or(self.work_size_per_cpu.map(SizeSpec::PerCpu))
    }

    /// Merges resource bundles in order of precedence: the first
    /// non-`None` value per field wins, except that once any earlier
    /// bundle defines `mem_per_cpu` (resp. `work_size_per_cpu`), later
    /// bundles' `mem`/`mem_per_node` (resp. `work_size`/`work_size_per_node`)
    /// values are ignored (§3.3). `props` maps are unioned, earlier keys
    /// winning on collision.
    pub fn merge<'a>(resources: impl IntoIterator<Item = &'a Resources>) -> Resources {
        let all: Vec<&Resources> = resources.into_iter().collect();

        let mut merged = Resources {
            nnodes: first_some(&all, |r| r.nnodes),
            ncpus: first_some(&all, |r| r.ncpus),
            ncpus_per_node: first_some(&all, |r| r.ncpus_per_node),
            ngpus: first_some(&all, |r| r.ngpus),
            ngpus_per_node: first_some(&all, |r| r.ngpus_per_node),
            walltime: first_some(&all, |r| r.walltime),
            work_dir: first_some(&all, |r| r.work_dir),
            mem: None,
            mem_per_node: None,
            mem_per_cpu: first_some(&all, |r| r.mem_per_cpu),
            work_size: None,
            work_size_per_node: None,
            work_size_per_cpu: first_some(&all, |r| r.work_size_per_cpu),
            props: BTreeMap::new(),
        };

        merged.mem = first_nonblocked(&all, |r| r.mem, |r| r.mem_per_cpu);
        merged.mem_per_node = first_nonblocked(&all, |r| r.mem_per_node, |r| r.mem_per_cpu);
        merged.work_size = first_nonblocked(&all, |r| r.work_size, |r| r.work_size_per_cpu);
        merged.work_size_per_node =
            first_nonblocked(&all, |r| r.work_size_per_node, |r| r.work_size_per_cpu);

        for r in &all {
            for (k, v) in &r.props {
                merged.props.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        merged
    }

    /// Validates cross-field invariants (§3.3). Does not apply backend
    /// defaults; call after merging with queue/backend defaults.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let (Some(nnodes), Some(ncpus)) = (self.nnodes, self.ncpus) {
            if nnodes > 0 && ncpus % nnodes != 0 {
                return Err(CoreError::InvalidResources(format!(
                    "ncpus ({ncpus}) does not divide evenly by nnodes ({nnodes})"
                )));
            }
        }
        if let (Some(nnodes), Some(ngpus)) = (self.nnodes, self.ngpus) {
            if nnodes > 0 && ngpus % nnodes != 0 {
                return Err(CoreError::InvalidResources(format!(
                    "ngpus ({ngpus}) does not divide evenly by nnodes ({nnodes})"
                )));
            }
        }

        if let Some(work_dir) = self.work_dir {
            let forbids_work_size = matches!(work_dir, WorkDir::InputDir | WorkDir::ScratchShm);
            if forbids_work_size && self.effective_work_size().is_some() {
                tracing::warn!(?work_dir, "work_size is not applicable for this work_dir; ignoring");
            }
        }

        Ok(())
    }

    /// Returns a copy with `work_size*` fields dropped when `work_dir`
    /// forbids them (§3.3), matching the "warns and drops" behavior
    /// validated by [`Resources::validate`].
    pub fn normalized(mut self) -> Self {
        if let Some(work_dir) = self.work_dir {
            if matches!(work_dir, WorkDir::InputDir | WorkDir::ScratchShm) {
                self.work_size = None;
                self.work_size_per_node = None;
                self.work_size_per_cpu = None;
            }
        }
        self
    }
}

fn first_some<T: Copy>(resources: &[&Resources], get: impl Fn(&Resources) -> Option<T>) -> Option<T> {
    resources.iter().find_map(|r| get(r))
}

fn first_nonblocked<T: Copy>(
    resources: &[&Resources],
    get: impl Fn(&Resources) -> Option<T>,
    get_blocker: impl Fn(&Resources) -> Option<T>,
) -> Option<T> {
    let mut blocked = false;
    for r in resources {
        if get_blocker(r).is_some() {
            blocked = true;
        }
        if let Some(v) = get(r) {
            if !blocked {
                return Some(v);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(s: &str) -> Size {
        Size::parse(s).unwrap()
    }

    #[test]
    fn merge_is_left_biased() {
        let r1 = Resources {
            nnodes: Some(2),
            ..Default::default()
        };
        let r2 = Resources {
            nnodes: Some(4),
            ncpus: Some(8),
            ..Default::default()
        };
        let merged = Resources::merge([&r1, &r2]);
        assert_eq!(merged.nnodes, Some(2));
        assert_eq!(merged.ncpus, Some(8));
    }

    #[test]
    fn mem_per_cpu_blocks_later_mem() {
        let r1 = Resources {
            mem_per_cpu: Some(size("1gb")),
            ..Default::default()
        };
        let r2 = Resources {
            mem: Some(size("4gb")),
            ..Default::default()
        };
        let merged = Resources::merge([&r1, &r2]);
        assert_eq!(merged.mem, None);
        assert_eq!(merged.mem_per_cpu, Some(size("1gb")));
    }

    #[test]
    fn props_union_first_wins() {
        let mut p1 = BTreeMap::new();
        p1.insert("avx512".to_string(), "true".to_string());
        let mut p2 = BTreeMap::new();
        p2.insert("avx512".to_string(), "false".to_string());
        p2.insert("infiniband".to_string(), "true".to_string());

        let r1 = Resources { props: p1, ..Default::default() };
        let r2 = Resources { props: p2, ..Default::default() };
        let merged = Resources::merge([&r1, &r2]);
        assert_eq!(merged.props.get("avx512").unwrap(), "true");
        assert_eq!(merged.props.get("infiniband").unwrap(), "true");
    }

    #[test]
    fn parse_props_forms() {
        let props = Resources::parse_props("avx512,^hyperthreading,vendor=amd").unwrap();
        assert_eq!(props.get("avx512").unwrap(), "true");
        assert_eq!(props.get("hyperthreading").unwrap(), "false");
        assert_eq!(props.get("vendor").unwrap(), "amd");
    }

    #[test]
    fn parse_props_rejects_duplicate_keys() {
        assert!(Resources::parse_props("avx512,avx512=false").is_err());
    }

    #[test]
    fn validate_rejects_uneven_cpu_division() {
        let r = Resources {
            nnodes: Some(3),
            ncpus: Some(8),
            ..Default::default()
        };
        assert!(r.validate().is_err());
    }

    #[test]
    fn normalized_drops_work_size_for_input_dir() {
        let r = Resources {
            work_dir: Some(WorkDir::InputDir),
            work_size: Some(size("16gb")),
            ..Default::default()
        }
        .normalized();
        assert_eq!(r.work_size, None);
    }

    #[test]
    fn job_dir_alias_normalizes_to_input_dir() {
        assert_eq!(WorkDir::parse("job_dir").unwrap(), WorkDir::InputDir);
        assert_eq!(WorkDir::parse("job-dir").unwrap(), WorkDir::InputDir);
    }
}
