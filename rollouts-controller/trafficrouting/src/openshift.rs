//! OpenShift Routes send the stable share to `spec.to` and every other
//! destination to `spec.alternateBackends`.

use crate::{Error, RolloutRef};
use anyhow::Result;
use rollouts_controller_core::{
    fanout, TrafficRoutingReconciler, WeightDestination, WeightSplit, WeightVerification,
};
use rollouts_controller_k8s_api::{
    rollout::OpenShiftTrafficRouting, store::api_resource, tree, ApiResource, ResourceStore,
};
use serde_json::{json, Value};
use std::sync::Arc;

const KIND: &str = "Route";

pub struct OpenShift {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    routes: Vec<String>,
    canary_service: String,
    stable_service: String,
}

pub fn resource() -> ApiResource {
    api_resource("route.openshift.io", "v1", KIND, "routes")
}

// === impl OpenShift ===

impl OpenShift {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &OpenShiftTrafficRouting,
    ) -> Result<Self, Error> {
        let (canary_service, stable_service) = target.services()?;
        Ok(Self {
            store,
            namespace: target.namespace.clone(),
            routes: config.routes.clone(),
            canary_service,
            stable_service,
        })
    }

    /// Writes the split into a Route document, returning whether it changed.
    fn apply(&self, name: &str, data: &mut Value, split: &WeightSplit<'_>) -> Result<bool, Error> {
        let invalid = Error::invalid(KIND, name);
        let before = data.clone();

        tree::set(data, ["spec", "to", "kind"], json!("Service")).map_err(invalid)?;
        tree::set(data, ["spec", "to", "name"], json!(self.stable_service)).map_err(invalid)?;
        tree::set(data, ["spec", "to", "weight"], json!(split.stable)).map_err(invalid)?;

        let alternates = std::iter::once((self.canary_service.as_str(), split.canary))
            .chain(
                split
                    .additional
                    .iter()
                    .map(|d| (d.service_name.as_str(), d.weight)),
            )
            .filter(|(_, weight)| *weight > 0)
            .map(|(name, weight)| json!({"kind": "Service", "name": name, "weight": weight}))
            .collect::<Vec<_>>();
        if alternates.is_empty() {
            tree::remove(data, ["spec", "alternateBackends"]).map_err(invalid)?;
        } else {
            tree::set(data, ["spec", "alternateBackends"], Value::Array(alternates))
                .map_err(invalid)?;
        }

        Ok(*data != before)
    }

    async fn reconcile(&self, name: &str, split: &WeightSplit<'_>) -> Result<()> {
        let mut route = self.store.get(&self.namespace, name).await?;
        if self.apply(name, &mut route.data, split)? {
            self.store.update(&route).await?;
            tracing::info!(route = %name, weight = split.canary, "Updated Route");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for OpenShift {
    fn kind(&self) -> &'static str {
        "OpenShift"
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        let split = WeightSplit::new(desired, additional)?;
        fanout::reconcile_all(self.routes.iter().map(String::as_str), |name| {
            self.reconcile(name, &split)
        })
        .await
    }

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification> {
        let split = WeightSplit::new(desired, additional)?;
        let mut verified = WeightVerification::NotApplicable;
        for name in &self.routes {
            let route = self.store.get(&self.namespace, name).await?;
            let mut data = route.data;
            let changed = self.apply(name, &mut data, &split)?;
            verified = verified.and(WeightVerification::from_matched(!changed));
        }
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn alternate_backends_follow_weights() {
        let route = OpenShift {
            store: crate::tests::MemoryStore::new(resource()),
            namespace: "default".to_string(),
            routes: vec!["web".to_string()],
            canary_service: "web-canary".to_string(),
            stable_service: "web-stable".to_string(),
        };
        let mut data = json!({"spec": {"host": "web.example.com", "to": {"kind": "Service", "name": "web-stable"}}});

        let additional = [WeightDestination::new("exp", 10)];
        assert!(route
            .apply("web", &mut data, &WeightSplit::new(20, &additional).unwrap())
            .unwrap());
        assert_eq!(
            data["spec"],
            json!({
                "host": "web.example.com",
                "to": {"kind": "Service", "name": "web-stable", "weight": 70},
                "alternateBackends": [
                    {"kind": "Service", "name": "web-canary", "weight": 20},
                    {"kind": "Service", "name": "exp", "weight": 10},
                ],
            })
        );

        assert!(route
            .apply("web", &mut data, &WeightSplit::new(0, &[]).unwrap())
            .unwrap());
        assert_eq!(
            data["spec"],
            json!({
                "host": "web.example.com",
                "to": {"kind": "Service", "name": "web-stable", "weight": 100},
            })
        );
        assert!(!route
            .apply("web", &mut data, &WeightSplit::new(0, &[]).unwrap())
            .unwrap());
    }
}
