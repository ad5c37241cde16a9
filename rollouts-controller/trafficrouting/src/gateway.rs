use crate::{
    backends::{Applied, Desired},
    Error, RolloutRef,
};
use anyhow::Result;
use rollouts_controller_core::{
    fanout, TrafficRoutingReconciler, WeightDestination, WeightSplit, WeightVerification,
};
use rollouts_controller_k8s_api::{
    rollout::GatewayApiTrafficRouting,
    store::api_resource,
    tree::{self, Path},
    ApiResource, ResourceStore,
};
use serde_json::Value;
use std::sync::Arc;

const KIND: &str = "HTTPRoute";

/// Weights the `backendRefs` of every rule of one or more HTTPRoutes.
pub struct GatewayApi {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    routes: Vec<String>,
    canary_service: String,
    stable_service: String,
}

pub fn resource() -> ApiResource {
    api_resource("gateway.networking.k8s.io", "v1", KIND, "httproutes")
}

// === impl GatewayApi ===

impl GatewayApi {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &GatewayApiTrafficRouting,
    ) -> Result<Self, Error> {
        let (canary_service, stable_service) = target.services()?;
        let routes = config
            .route_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if routes.is_empty() {
            return Err(Error::MissingConfig("trafficRouting.gatewayAPI.httpRoute"));
        }
        Ok(Self {
            store,
            namespace: config
                .namespace
                .clone()
                .unwrap_or_else(|| target.namespace.clone()),
            routes,
            canary_service,
            stable_service,
        })
    }

    fn apply(&self, name: &str, data: &mut Value, split: &WeightSplit<'_>) -> Result<bool, Error> {
        let invalid = Error::invalid(KIND, name);
        let desired = Desired {
            canary_service: &self.canary_service,
            stable_service: &self.stable_service,
            split: split.clone(),
        };
        let rules = tree::list(data, ["spec", "rules"]).map_err(invalid)?.len();
        let mut applied = Applied::default();
        for idx in 0..rules {
            let path = Path::from(["spec", "rules"])
                .index(idx)
                .field("backendRefs");
            let rule = desired.apply(data, &path, "name").map_err(invalid)?;
            applied = applied.merge(rule);
        }

        desired.require(&applied, KIND, name)?;
        Ok(applied.changed)
    }

    async fn reconcile(&self, name: &str, split: &WeightSplit<'_>) -> Result<()> {
        let mut route = self.store.get(&self.namespace, name).await?;
        if self.apply(name, &mut route.data, split)? {
            self.store.update(&route).await?;
            tracing::info!(route = %name, weight = split.canary, "Updated HTTPRoute");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for GatewayApi {
    fn kind(&self) -> &'static str {
        "GatewayAPI"
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
