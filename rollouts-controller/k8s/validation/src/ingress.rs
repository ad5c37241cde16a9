use crate::FieldError;
use rollouts_controller_k8s_api::{
    rollout::RolloutTrafficRouting, tree::Path, Ingress, ResourceExt, Rollout,
};

fn routing_field(provider: &str) -> Path {
    Path::from(["spec", "strategy", "canary", "trafficRouting"]).field(provider)
}

/// Reports providers that don't set exactly one of the single and the list
/// form of a field.
pub(crate) fn validate_exclusive_fields(routing: &RolloutTrafficRouting) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut exclusive = |provider: &str, single: &str, list: &str, set: (bool, bool)| {
        let detail = match set {
            (true, true) => format!("{single} and {list} are mutually exclusive"),
            (false, false) => format!("one of {single} or {list} must be set"),
            _ => return,
        };
        errors.push(FieldError::internal(routing_field(provider), detail));
    };
    if let Some(nginx) = &routing.nginx {
        exclusive(
            "nginx",
            "stableIngress",
            "stableIngresses",
            (
                nginx.stable_ingress.is_some(),
                nginx.stable_ingresses.is_some(),
            ),
        );
    }
    if let Some(alb) = &routing.alb {
        exclusive(
            "alb",
            "ingress",
            "ingresses",
            (alb.ingress.is_some(), alb.ingresses.is_some()),
        );
    }
    if let Some(gateway) = &routing.gateway_api {
        exclusive(
            "gatewayAPI",
            "httpRoute",
            "httpRoutes",
            (
                gateway.http_route.is_some(),
                gateway.http_routes.is_some(),
            ),
        );
    }
    errors
}

/// Checks that an Ingress referenced by the NGINX or ALB configuration routes
/// to the service the Rollout manages.
pub(crate) fn validate(rollout: &Rollout, ingress: &Ingress) -> Vec<FieldError> {
    let Some(canary) = rollout.canary() else {
        return Vec::new();
    };
    let Some(routing) = canary.traffic_routing.as_ref() else {
        return Vec::new();
    };
    let name = ingress.name_any();
    let stable = canary.stable_service.as_deref().unwrap_or_default();

    let mut errors = Vec::new();
    if let Some(nginx) = &routing.nginx {
        let field = if nginx.stable_ingress.as_deref() == Some(name.as_str()) {
            Some(routing_field("nginx").field("stableIngress"))
        } else if contains(&nginx.stable_ingresses, &name) {
            Some(routing_field("nginx").field("stableIngresses"))
        } else {
            None
        };
        if let Some(field) = field {
            errors.extend(check_backend(ingress, &name, stable, field));
        }
    }
    if let Some(alb) = &routing.alb {
        let field = if alb.ingress.as_deref() == Some(name.as_str()) {
            Some(routing_field("alb").field("ingress"))
        } else if contains(&alb.ingresses, &name) {
            Some(routing_field("alb").field("ingresses"))
        } else {
            None
        };
        if let Some(field) = field {
            let service = alb.root_service.as_deref().unwrap_or(stable);
            errors.extend(check_backend(ingress, &name, service, field));
        }
    }
    errors
}

fn contains(names: &Option<Vec<String>>, name: &str) -> bool {
    names.iter().flatten().any(|n| n == name)
}

fn check_backend(ingress: &Ingress, name: &str, service: &str, field: Path) -> Option<FieldError> {
    let routes_service = ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .flat_map(|rule| rule.http.iter())
        .flat_map(|http| http.paths.iter())
        .filter_map(|path| path.backend.service.as_ref())
        .any(|backend| backend.name == service);
    if routes_service {
        return None;
    }
    Some(FieldError::invalid(
        field,
        name,
        format!("ingress `{name}` has no rules using service {service} backend"),
    ))
}
