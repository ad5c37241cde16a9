//! App Mesh splits traffic between VirtualNodes in the routes of the
//! VirtualRouter that provides a VirtualService. Canary and stable pods are
//! told apart by the pod-template hash in each VirtualNode's pod selector.

use crate::{
    backends::{self, Applied, Desired},
    Error, RolloutRef,
};
use anyhow::Result;
use rollouts_controller_core::{
    TrafficRoutingReconciler, WeightDestination, WeightSplit, WeightVerification,
};
use rollouts_controller_k8s_api::{
    labels::POD_TEMPLATE_HASH,
    rollout::AppMeshTrafficRouting,
    store::api_resource,
    tree::{self, Path},
    ApiResource, DynamicObject, ResourceStore,
};
use serde_json::Value;
use std::sync::Arc;

const GROUP: &str = "appmesh.k8s.aws";
const VERSION: &str = "v1beta2";

/// Route types that carry an `action.weightedTargets` list, in precedence
/// order.
pub const ROUTE_TYPES: [&str; 4] = ["httpRoute", "tcpRoute", "http2Route", "grpcRoute"];

const CANARY_HASH_DEFAULT: &str = "canary-hash";
const STABLE_HASH_DEFAULT: &str = "stable-hash";

pub struct AppMesh {
    virtual_services: Arc<dyn ResourceStore>,
    virtual_routers: Arc<dyn ResourceStore>,
    virtual_nodes: Arc<dyn ResourceStore>,
    namespace: String,
    virtual_service: String,
    routes: Vec<String>,
    canary_node: String,
    stable_node: String,
}

pub fn virtual_service_resource() -> ApiResource {
    api_resource(GROUP, VERSION, "VirtualService", "virtualservices")
}

pub fn virtual_router_resource() -> ApiResource {
    api_resource(GROUP, VERSION, "VirtualRouter", "virtualrouters")
}

pub fn virtual_node_resource() -> ApiResource {
    api_resource(GROUP, VERSION, "VirtualNode", "virtualnodes")
}

// === impl AppMesh ===

impl AppMesh {
    pub fn new(
        virtual_services: Arc<dyn ResourceStore>,
        virtual_routers: Arc<dyn ResourceStore>,
        virtual_nodes: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &AppMeshTrafficRouting,
    ) -> Result<Self, Error> {
        let vsvc = config
            .virtual_service
            .as_ref()
            .ok_or(Error::MissingConfig("trafficRouting.appMesh.virtualService"))?;
        let nodes = config
            .virtual_node_group
            .as_ref()
            .ok_or(Error::MissingConfig("trafficRouting.appMesh.virtualNodeGroup"))?;
        Ok(Self {
            virtual_services,
            virtual_routers,
            virtual_nodes,
            namespace: target.namespace.clone(),
            virtual_service: vsvc.name.clone(),
            routes: vsvc.routes.clone().unwrap_or_default(),
            canary_node: nodes.canary_virtual_node_ref.name.clone(),
            stable_node: nodes.stable_virtual_node_ref.name.clone(),
        })
    }

    /// Resolves the VirtualRouter that provides the VirtualService.
    pub async fn virtual_router(&self) -> Result<DynamicObject> {
        let vsvc = self
            .virtual_services
            .get(&self.namespace, &self.virtual_service)
            .await?;
        let invalid = Error::invalid("VirtualService", &self.virtual_service);
        let router_ref = Path::from(["spec", "provider", "virtualRouter", "virtualRouterRef"]);
        let name = tree::string(&vsvc.data, router_ref.field("name")).map_err(invalid)?;
        let namespace = tree::opt_string(&vsvc.data, router_ref.field("namespace"))
            .map_err(invalid)?
            .unwrap_or(&self.namespace);
        let router = self.virtual_routers.get(namespace, name).await?;
        Ok(router)
    }

    /// Sets the weights of the canary, stable and additional targets of every
    /// selected route, returning whether anything changed. Targets without a
    /// namespace are in the Rollout's namespace.
    fn apply(&self, router: &mut DynamicObject, split: WeightSplit<'_>) -> Result<bool, Error> {
        let router_name = router.metadata.name.clone().unwrap_or_default();
        let desired = Desired {
            canary_service: &self.canary_node,
            stable_service: &self.stable_node,
            split,
        };
        let invalid = Error::invalid("VirtualRouter", &router_name);

        let routes_path = Path::from(["spec", "routes"]);
        let routes = tree::list_mut(&mut router.data, &routes_path).map_err(invalid)?;

        let mut seen = Vec::new();
        let mut changed = false;
        for (idx, route) in routes.iter_mut().enumerate() {
            let route_path = routes_path.index(idx);
            let name = tree::string(route, ["name"])
                .map_err(|e| invalid(e.within(&route_path)))?
                .to_string();
            if !self.routes.is_empty() && !self.routes.contains(&name) {
                continue;
            }

            let Some(route_type) = ROUTE_TYPES.into_iter().find(|t| route.get(*t).is_some())
            else {
                return Err(Error::UnsupportedRoute {
                    kind: "VirtualRouter",
                    name: router_name.clone(),
                    route: name,
                });
            };
            let targets_path = Path::from([route_type, "action", "weightedTargets"]);
            let targets = tree::list_mut(route, &targets_path)
                .map_err(|e| invalid(e.within(&route_path)))?;

            let mut applied = Applied::default();
            for (tidx, target) in targets.iter_mut().enumerate() {
                let at = |e: tree::Error| invalid(e.within(&route_path.join(&targets_path).index(tidx)));
                let node = tree::string(target, ["virtualNodeRef", "name"])
                    .map_err(at)?
                    .to_string();
                let node_ns = tree::opt_string(target, ["virtualNodeRef", "namespace"])
                    .map_err(at)?
                    .unwrap_or(&self.namespace);
                if node_ns != self.namespace {
                    continue;
                }
                let Some(weight) = desired.weight_of(&node) else {
                    continue;
                };
                applied.changed |= backends::set_weight(target, weight).map_err(at)?;
                if node == self.canary_node {
                    applied.canary = true;
                } else if node == self.stable_node {
                    applied.stable = true;
                } else {
                    applied.additional.insert(node);
                }
            }
            desired.require(&applied, "VirtualRouter", &router_name)?;
            changed |= applied.changed;
            seen.push(name);
        }

        if let Some(missing) = self.routes.iter().find(|r| !seen.contains(r)) {
            return Err(Error::RouteNotFound {
                kind: "VirtualRouter",
                name: router_name,
                route: missing.clone(),
            });
        }
        Ok(changed)
    }

    async fn update_node_hash(&self, node: &str, hash: &str) -> Result<()> {
        let mut vnode = self.virtual_nodes.get(&self.namespace, node).await?;
        let path = Path::from(["spec", "podSelector", "matchLabels"]).field(POD_TEMPLATE_HASH);
        if tree::opt_string(&vnode.data, &path).ok().flatten() == Some(hash) {
            return Ok(());
        }
        tree::set(&mut vnode.data, &path, Value::from(hash))
            .map_err(Error::invalid("VirtualNode", node))?;
        self.virtual_nodes.update(&vnode).await?;
        tracing::info!(virtual_node = %node, %hash, "Updated VirtualNode pod selector");
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for AppMesh {
    fn kind(&self) -> &'static str {
        "AppMesh"
    }

    async fn update_hash(
        &self,
        canary_hash: &str,
        stable_hash: &str,
        _: &[WeightDestination],
    ) -> Result<()> {
        let canary_hash = if canary_hash.is_empty() {
            CANARY_HASH_DEFAULT
        } else {
            canary_hash
        };
        let stable_hash = if stable_hash.is_empty() {
            STABLE_HASH_DEFAULT
        } else {
            stable_hash
        };
        self.update_node_hash(&self.canary_node, canary_hash).await?;
        self.update_node_hash(&self.stable_node, stable_hash).await
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        let split = WeightSplit::new(desired, additional)?;
        let mut router = self.virtual_router().await?;
        if self.apply(&mut router, split)? {
            self.virtual_routers.update(&router).await?;
            tracing::info!(
                virtual_router = %router.metadata.name.as_deref().unwrap_or_default(),
                weight = desired,
                "Updated VirtualRouter"
            );
        }
        Ok(())
    }

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification> {
        let split = WeightSplit::new(desired, additional)?;
        let mut router = self.virtual_router().await?;
        let changed = self.apply(&mut router, split)?;
        Ok(WeightVerification::from_matched(!changed))
    }
}
