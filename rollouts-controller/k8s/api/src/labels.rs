use std::collections::BTreeMap;

/// Label added to pods, services and selectors to pin them to one revision of
/// a Rollout's pod template.
pub const POD_TEMPLATE_HASH: &str = "rollouts-pod-template-hash";

/// Annotation naming the Rollout that manages a Service's selector or that a
/// routing object was created for.
pub const MANAGED_BY_ROLLOUT: &str = "argo-rollouts.argoproj.io/managed-by-rollouts";

/// Returns the Rollout that manages the resource, if any.
pub fn managed_by(meta: &kube::api::ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()?
        .get(MANAGED_BY_ROLLOUT)
        .map(String::as_str)
}

/// Annotations marking a resource as managed by the named Rollout.
pub fn managed_by_annotations(rollout: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_ROLLOUT.to_string(), rollout.to_string())])
}
