//! APISIX weights the `backends` of the `spec.http` rules of an ApisixRoute.
//! Header routes are separate ApisixRoutes, named after the header route,
//! whose rules match on request headers and send everything to the canary.

use crate::{
    backends::{Applied, Desired},
    Error, RolloutRef,
};
use anyhow::Result;
use rollouts_controller_core::{
    fanout, Capabilities, TrafficRoutingReconciler, WeightDestination, WeightSplit,
    WeightVerification,
};
use rollouts_controller_k8s_api::{
    labels::managed_by_annotations,
    rollout::{ApisixTrafficRouting, HeaderRoutingMatch, SetHeaderRoute, StringMatch},
    store::{api_resource, split_api_version},
    tree::{self, Path},
    ApiResource, DynamicObject, ObjectMeta, ResourceStore,
};
use serde_json::{json, Value};
use std::sync::Arc;

const KIND: &str = "ApisixRoute";

pub struct Apisix {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    rollout: String,
    route: String,
    rules: Vec<String>,
    canary_service: String,
    stable_service: String,
    managed_routes: Vec<String>,
}

pub fn resource(api_version: &str) -> ApiResource {
    let (group, version) = split_api_version(api_version);
    api_resource(group, version, KIND, "apisixroutes")
}

// === impl Apisix ===

impl Apisix {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &ApisixTrafficRouting,
        managed_routes: Vec<String>,
    ) -> Result<Self, Error> {
        let (canary_service, stable_service) = target.services()?;
        let route = config
            .route
            .as_ref()
            .ok_or(Error::MissingConfig("trafficRouting.apisix.route"))?;
        let rules = match &route.rules {
            Some(rules) if !rules.is_empty() => rules.clone(),
            _ => vec![route.name.clone()],
        };
        Ok(Self {
            store,
            namespace: target.namespace.clone(),
            rollout: target.name.clone(),
            route: route.name.clone(),
            rules,
            canary_service,
            stable_service,
            managed_routes,
        })
    }

    /// Returns the index of each managed rule in `spec.http`.
    fn rule_indexes(&self, data: &Value) -> Result<Vec<usize>, Error> {
        let http = tree::list_of_maps(data, ["spec", "http"])
            .map_err(Error::invalid(KIND, &self.route))?;
        self.rules
            .iter()
            .map(|rule| {
                http.iter()
                    .position(|r| r.get("name").and_then(Value::as_str) == Some(rule.as_str()))
                    .ok_or_else(|| Error::RouteNotFound {
                        kind: KIND,
                        name: self.route.clone(),
                        route: rule.clone(),
                    })
            })
            .collect()
    }

    fn apply(&self, data: &mut Value, split: WeightSplit<'_>) -> Result<Applied, Error> {
        let desired = Desired {
            canary_service: &self.canary_service,
            stable_service: &self.stable_service,
            split,
        };
        let mut applied = Applied::default();
        for idx in self.rule_indexes(data)? {
            let path = Path::from(["spec", "http"]).index(idx).field("backends");
            let rule = desired
                .apply(data, &path, "serviceName")
                .map_err(Error::invalid(KIND, &self.route))?;
            desired.require(&rule, KIND, &self.route)?;
            applied = applied.merge(rule);
        }
        Ok(applied)
    }

    /// Builds the header route's rules from the managed rules of the base
    /// route.
    fn header_rules(
        &self,
        base: &Value,
        matches: &[HeaderRoutingMatch],
    ) -> Result<Vec<Value>, Error> {
        let invalid = Error::invalid(KIND, &self.route);
        let exprs = matches.iter().map(header_expr).collect::<Vec<_>>();
        let mut rules = Vec::with_capacity(self.rules.len());
        for idx in self.rule_indexes(base)? {
            let path = Path::from(["spec", "http"]).index(idx);
            let mut rule = tree::get(base, &path).map_err(invalid)?.clone();

            let priority = rule.get("priority").and_then(tree::as_int64).unwrap_or(0);
            let port = tree::list_of_maps(&rule, ["backends"])
                .map_err(|e| invalid(e.within(&path)))?
                .into_iter()
                .find(|b| {
                    b.get("serviceName").and_then(Value::as_str) == Some(self.stable_service.as_str())
                })
                .and_then(|b| b.get("servicePort").cloned());

            let mut backend = json!({"serviceName": self.canary_service, "weight": 100});
            if let Some(port) = port {
                tree::set(&mut backend, ["servicePort"], port).map_err(invalid)?;
            }
            tree::set(&mut rule, ["priority"], Value::from(priority + 1)).map_err(invalid)?;
            tree::set(&mut rule, ["match", "exprs"], Value::Array(exprs.clone()))
                .map_err(|e| invalid(e.within(&path)))?;
            tree::set(&mut rule, ["backends"], json!([backend])).map_err(invalid)?;
            rules.push(rule);
        }
        Ok(rules)
    }

    async fn delete_route(&self, name: &str) -> Result<()> {
        match self.store.delete(&self.namespace, name).await {
            Ok(()) => {
                tracing::info!(route = %name, "Deleted header ApisixRoute");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for Apisix {
    fn kind(&self) -> &'static str {
        "Apisix"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            header_routes: true,
            mirror_routes: false,
        }
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        let split = WeightSplit::new(desired, additional)?;
        let mut route = self.store.get(&self.namespace, &self.route).await?;
        if self.apply(&mut route.data, split)?.changed {
            self.store.update(&route).await?;
            tracing::info!(route = %self.route, weight = desired, "Updated ApisixRoute");
        }
        Ok(())
    }

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification> {
        let split = WeightSplit::new(desired, additional)?;
        let route = self.store.get(&self.namespace, &self.route).await?;
        let mut data = route.data;
        let applied = self.apply(&mut data, split)?;
        Ok(WeightVerification::from_matched(!applied.changed))
    }

    async fn set_header_route(&self, header: &SetHeaderRoute) -> Result<()> {
        let matches = header.matches.as_deref().unwrap_or_default();
        if matches.is_empty() {
            return self.delete_route(&header.name).await;
        }

        let base = self.store.get(&self.namespace, &self.route).await?;
        let rules = self.header_rules(&base.data, matches)?;

        match self.store.get(&self.namespace, &header.name).await {
            Ok(mut existing) => {
                let current = tree::get(&existing.data, ["spec", "http"]).ok();
                if current != Some(&Value::Array(rules.clone())) {
                    tree::set(&mut existing.data, ["spec", "http"], Value::Array(rules))
                        .map_err(Error::invalid(KIND, &header.name))?;
                    self.store.update(&existing).await?;
                    tracing::info!(route = %header.name, "Updated header ApisixRoute");
                }
            }
            Err(error) if error.is_not_found() => {
                let mut data = base.data.clone();
                tree::set(&mut data, ["spec", "http"], Value::Array(rules))
                    .map_err(Error::invalid(KIND, &header.name))?;
                let route = DynamicObject {
                    types: base.types.clone(),
                    metadata: ObjectMeta {
                        name: Some(header.name.clone()),
                        namespace: Some(self.namespace.clone()),
                        annotations: Some(managed_by_annotations(&self.rollout)),
                        ..Default::default()
                    },
                    data,
                };
                self.store.create(&route).await?;
                tracing::info!(route = %header.name, "Created header ApisixRoute");
            }
            Err(error) => return Err(error.into()),
        }
        Ok(())
    }

    async fn remove_managed_routes(&self) -> Result<()> {
        fanout::reconcile_all(self.managed_routes.iter().map(String::as_str), |name| {
            self.delete_route(name)
        })
        .await
    }
}

/// Translates a header match into an APISIX `match.exprs` entry.
fn header_expr(m: &HeaderRoutingMatch) -> Value {
    let StringMatch {
        exact,
        prefix,
        regex,
    } = &m.header_value;
    let (op, value) = match (exact, prefix, regex) {
        (Some(exact), _, _) => ("Equal", exact.clone()),
        (None, Some(prefix), _) => ("RegexMatch", format!("^{prefix}.*")),
        (None, None, Some(regex)) => ("RegexMatch", regex.clone()),
        (None, None, None) => ("Equal", String::new()),
    };
    json!({
        "subject": {"scope": "Header", "name": m.header_name},
        "op": op,
        "value": value,
    })
}
