use crate::Error;
use rollouts_controller_core::WeightSplit;
use rollouts_controller_k8s_api::tree::{self, Path};
use serde_json::Value;
use std::collections::BTreeSet;

/// The weight each managed service should receive.
#[derive(Debug)]
pub(crate) struct Desired<'a> {
    pub canary_service: &'a str,
    pub stable_service: &'a str,
    pub split: WeightSplit<'a>,
}

/// What applying a split to a backend list found and did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    pub canary: bool,
    pub stable: bool,
    /// Additional destinations that had a backend.
    pub additional: BTreeSet<String>,
    pub changed: bool,
}

// === impl Desired ===

impl<'a> Desired<'a> {
    pub fn weight_of(&self, service: &str) -> Option<i32> {
        if service == self.canary_service {
            Some(self.split.canary)
        } else if service == self.stable_service {
            Some(self.split.stable)
        } else {
            self.split.additional_weight(service)
        }
    }

    /// Sets the `weight` of each backend in the list at `path` whose
    /// `name_key` field names a managed service. Weights that already match
    /// are left untouched.
    pub fn apply(&self, doc: &mut Value, path: &Path, name_key: &str) -> tree::Result<Applied> {
        let backends = tree::list_mut(doc, path)?;
        let mut applied = Applied::default();
        for (idx, backend) in backends.iter_mut().enumerate() {
            let name = tree::string(backend, [name_key])
                .map_err(|e| e.within(&path.index(idx)))?
                .to_string();
            let Some(weight) = self.weight_of(&name) else {
                continue;
            };
            if name == self.canary_service {
                applied.canary = true;
            } else if name == self.stable_service {
                applied.stable = true;
            } else {
                applied.additional.insert(name);
            }
            if set_weight(backend, weight).map_err(|e| e.within(&path.index(idx)))? {
                applied.changed = true;
            }
        }
        Ok(applied)
    }

    /// Fails unless the canary, the stable, and every additional destination
    /// with a nonzero weight had a backend in the named object.
    pub fn require(
        &self,
        applied: &Applied,
        kind: &'static str,
        name: &str,
    ) -> Result<(), Error> {
        let missing = |role: &'static str, service: &str| Error::ServiceNotFound {
            kind,
            name: name.to_string(),
            role,
            service: service.to_string(),
        };
        if !applied.canary {
            return Err(missing("canary", self.canary_service));
        }
        if !applied.stable {
            return Err(missing("stable", self.stable_service));
        }
        if let Some(dest) = self
            .split
            .additional
            .iter()
            .find(|d| d.weight > 0 && !applied.additional.contains(&d.service_name))
        {
            return Err(missing("additional", &dest.service_name));
        }
        Ok(())
    }
}

// === impl Applied ===

impl Applied {
    pub fn merge(mut self, other: Self) -> Self {
        self.canary |= other.canary;
        self.stable |= other.stable;
        self.additional.extend(other.additional);
        self.changed |= other.changed;
        self
    }
}

/// Sets the `weight` field of a backend, returning whether it changed.
pub(crate) fn set_weight(backend: &mut Value, weight: i32) -> tree::Result<bool> {
    if backend.get("weight").and_then(tree::as_int64) == Some(i64::from(weight)) {
        return Ok(false);
    }
    tree::set(backend, ["weight"], Value::from(weight))?;
    Ok(true)
}
