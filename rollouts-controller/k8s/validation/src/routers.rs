//! Checks on the vendor resources a traffic router manipulates, so that
//! shape problems surface before the first weight change.

use crate::FieldError;
use rollouts_controller_k8s_api::{
    rollout::RolloutTrafficRouting,
    tree::{self, Path},
    DynamicObject, ResourceExt,
};
use serde_json::Value;

const ROUTE_TYPES: [&str; 4] = ["httpRoute", "tcpRoute", "http2Route", "grpcRoute"];

fn routing_field(provider: &str) -> Path {
    Path::from(["spec", "strategy", "canary", "trafficRouting"]).field(provider)
}

pub(crate) fn validate_virtual_router(
    routing: &RolloutTrafficRouting,
    router: &DynamicObject,
) -> Vec<FieldError> {
    let Some(app_mesh) = &routing.app_mesh else {
        return Vec::new();
    };
    let field = routing_field("appMesh").field("virtualService");
    let name = router.name_any();

    let kind = router.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
    if kind != "VirtualRouter" {
        return vec![FieldError::invalid(
            field,
            &name,
            format!("Expected object kind to be VirtualRouter but is {kind}"),
        )];
    }

    let routes = match tree::list_of_maps(&router.data, ["spec", "routes"]) {
        Ok(routes) => routes,
        Err(error) if error.is_not_found() => {
            return vec![FieldError::required(
                field.field("routes"),
                format!("VirtualRouter {name} has no routes"),
            )];
        }
        Err(error) => return vec![FieldError::invalid(field, &name, error.to_string())],
    };

    let filter = app_mesh
        .virtual_service
        .as_ref()
        .and_then(|vsvc| vsvc.routes.as_deref())
        .unwrap_or_default();
    let stable = app_mesh
        .virtual_node_group
        .as_ref()
        .map(|group| group.stable_virtual_node_ref.name.as_str())
        .unwrap_or_default();

    let mut errors = Vec::new();
    for (idx, route) in routes.into_iter().enumerate() {
        let route_name = route.get("name").and_then(Value::as_str).unwrap_or_default();
        if !filter.is_empty() && !filter.iter().any(|r| r == route_name) {
            continue;
        }
        if let Err(detail) = check_route(route, stable) {
            errors.push(FieldError::invalid(
                field.clone(),
                &name,
                format!("spec.routes[{idx}] {route_name}: {detail}"),
            ));
        }
    }
    errors
}

fn check_route(route: &serde_json::Map<String, Value>, stable: &str) -> Result<(), String> {
    let route_type = ROUTE_TYPES
        .into_iter()
        .find(|t| route.contains_key(*t))
        .ok_or_else(|| format!("route must be one of {}", ROUTE_TYPES.join(", ")))?;
    let route = Value::Object(route.clone());
    let targets = tree::list(&route, [route_type, "action", "weightedTargets"])
        .map_err(|e| e.to_string())?;
    if targets.len() != 2 {
        return Err(format!(
            "must have exactly two weighted targets, found {}",
            targets.len()
        ));
    }
    let mut nodes = Vec::with_capacity(2);
    for (idx, target) in targets.iter().enumerate() {
        let node = tree::string(target, ["virtualNodeRef", "name"])
            .map_err(|e| format!("weightedTargets[{idx}]: {e}"))?;
        nodes.push(node);
    }
    if !nodes.contains(&stable) {
        return Err(format!(
            "no weighted target references the stable virtual node {stable}"
        ));
    }
    Ok(())
}

pub(crate) fn validate_mapping(
    routing: &RolloutTrafficRouting,
    stable_service: &str,
    mapping: &DynamicObject,
) -> Vec<FieldError> {
    if routing.ambassador.is_none() {
        return Vec::new();
    }
    let field = routing_field("ambassador").field("mappings");
    let name = mapping.name_any();

    let mut errors = Vec::new();
    if tree::get(&mapping.data, ["spec", "weight"]).is_ok() {
        errors.push(FieldError::invalid(
            field.clone(),
            &name,
            format!("Mapping {name} must not define a weight"),
        ));
    }
    match tree::string(&mapping.data, ["spec", "service"]) {
        Ok(service) if service_host(service) == stable_service => {}
        Ok(service) => errors.push(FieldError::invalid(
            field,
            &name,
            format!("Mapping {name} routes to {service}, not the stable service {stable_service}"),
        )),
        Err(error) => errors.push(FieldError::invalid(field, &name, error.to_string())),
    }
    errors
}

/// Reduces a Mapping's `service` (`[scheme://]name[.namespace][:port]`) to the
/// service name.
fn service_host(service: &str) -> &str {
    let service = service
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(service);
    let host = service.split(':').next().unwrap_or(service);
    host.split('.').next().unwrap_or(host)
}

pub(crate) fn validate_http_route(
    routing: &RolloutTrafficRouting,
    stable_service: &str,
    route: &DynamicObject,
) -> Vec<FieldError> {
    let Some(gateway) = &routing.gateway_api else {
        return Vec::new();
    };
    let field = if gateway.http_routes.is_some() {
        routing_field("gatewayAPI").field("httpRoutes")
    } else {
        routing_field("gatewayAPI").field("httpRoute")
    };
    let name = route.name_any();

    let rules = match tree::list_of_maps(&route.data, ["spec", "rules"]) {
        Ok(rules) => rules,
        Err(error) => return vec![FieldError::invalid(field, &name, error.to_string())],
    };
    let references_stable = rules
        .iter()
        .filter_map(|rule| rule.get("backendRefs").and_then(Value::as_array))
        .flatten()
        .any(|backend| backend.get("name").and_then(Value::as_str) == Some(stable_service));
    if references_stable {
        return Vec::new();
    }
    vec![FieldError::invalid(
        field,
        &name,
        format!("HTTPRoute {name} has no backendRef for the stable service {stable_service}"),
    )]
}
