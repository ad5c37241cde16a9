use super::*;
use crate::{appmesh, AppMesh, RolloutRef};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use rollouts_controller_core::{TrafficRoutingReconciler, WeightDestination, WeightVerification};
use rollouts_controller_k8s_api::rollout::{
    AppMeshTrafficRouting, AppMeshVirtualNodeGroup, AppMeshVirtualNodeReference,
    AppMeshVirtualService,
};
use serde_json::json;

struct Mesh {
    services: Arc<MemoryStore>,
    routers: Arc<MemoryStore>,
    nodes: Arc<MemoryStore>,
}

fn targets(canary: i64, stable: i64) -> serde_json::Value {
    json!({"action": {"weightedTargets": [
        {"virtualNodeRef": {"name": "web-canary"}, "weight": canary},
        {"virtualNodeRef": {"name": "web-stable"}, "weight": stable},
    ]}})
}

fn mesh() -> Mesh {
    let mesh = Mesh {
        services: MemoryStore::new(appmesh::virtual_service_resource()),
        routers: MemoryStore::new(appmesh::virtual_router_resource()),
        nodes: MemoryStore::new(appmesh::virtual_node_resource()),
    };
    mesh.services.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualService",
        "metadata": {"name": "web-vsvc", "namespace": "default"},
        "spec": {"provider": {"virtualRouter": {"virtualRouterRef": {"name": "web-vrouter"}}}},
    }));
    mesh.routers.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualRouter",
        "metadata": {"name": "web-vrouter", "namespace": "default"},
        "spec": {"routes": [
            {"name": "primary", "httpRoute": targets(0, 100)},
            {"name": "secondary", "tcpRoute": targets(0, 100)},
        ]},
    }));
    for name in ["web-canary", "web-stable"] {
        mesh.nodes.insert(json!({
            "apiVersion": "appmesh.k8s.aws/v1beta2",
            "kind": "VirtualNode",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"podSelector": {"matchLabels": {"app": "web"}}},
        }));
    }
    mesh
}

fn reconciler(mesh: &Mesh, routes: &[&str]) -> AppMesh {
    let target = RolloutRef {
        name: "web".to_string(),
        namespace: "default".to_string(),
        ..Default::default()
    };
    let config = AppMeshTrafficRouting {
        virtual_service: Some(AppMeshVirtualService {
            name: "web-vsvc".to_string(),
            routes: Some(routes.iter().map(|r| r.to_string()).collect()),
        }),
        virtual_node_group: Some(AppMeshVirtualNodeGroup {
            canary_virtual_node_ref: AppMeshVirtualNodeReference {
                name: "web-canary".to_string(),
            },
            stable_virtual_node_ref: AppMeshVirtualNodeReference {
                name: "web-stable".to_string(),
            },
        }),
    };
    AppMesh::new(
        mesh.services.clone(),
        mesh.routers.clone(),
        mesh.nodes.clone(),
        &target,
        &config,
    )
    .unwrap()
}

fn routes(mesh: &Mesh) -> serde_json::Value {
    mesh.routers.data("default", "web-vrouter").unwrap()["spec"]["routes"].clone()
}

#[tokio::test]
async fn updates_every_route_without_filter() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &[]);

    app_mesh.set_weight(40, &[]).await.unwrap();
    assert_eq!(
        routes(&mesh),
        json!([
            {"name": "primary", "httpRoute": targets(40, 60)},
            {"name": "secondary", "tcpRoute": targets(40, 60)},
        ])
    );
    assert_eq!(
        app_mesh.verify_weight(40, &[]).await.unwrap(),
        WeightVerification::Verified
    );
}

#[tokio::test]
async fn filter_touches_only_named_routes() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &["primary"]);

    app_mesh.set_weight(40, &[]).await.unwrap();
    assert_eq!(
        routes(&mesh),
        json!([
            {"name": "primary", "httpRoute": targets(40, 60)},
            {"name": "secondary", "tcpRoute": targets(0, 100)},
        ])
    );
}

#[tokio::test]
async fn converged_router_is_not_rewritten() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &[]);

    app_mesh.set_weight(0, &[]).await.unwrap();
    assert_eq!(mesh.routers.writes(), vec![]);
    assert_eq!(
        app_mesh.verify_weight(0, &[]).await.unwrap(),
        WeightVerification::Verified
    );

    app_mesh.set_weight(50, &[]).await.unwrap();
    app_mesh.set_weight(50, &[]).await.unwrap();
    assert_eq!(
        mesh.routers.writes(),
        vec![Write::Update("web-vrouter".to_string())]
    );
}

#[tokio::test]
async fn unknown_route_fails_without_writing() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &["primary", "tertiary"]);

    let err = app_mesh.set_weight(40, &[]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "VirtualRouter web-vrouter has no route named tertiary"
    );
    assert_eq!(mesh.routers.writes(), vec![]);
}

#[tokio::test]
async fn route_without_type_is_rejected() {
    let mesh = mesh();
    mesh.routers.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualRouter",
        "metadata": {"name": "web-vrouter", "namespace": "default"},
        "spec": {"routes": [{"name": "primary", "unknownRoute": targets(0, 100)}]},
    }));
    let err = reconciler(&mesh, &[]).set_weight(40, &[]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "route primary in VirtualRouter web-vrouter has no supported route type"
    );
}

#[tokio::test]
async fn targets_in_other_namespaces_are_ignored() {
    let mesh = mesh();
    mesh.routers.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualRouter",
        "metadata": {"name": "web-vrouter", "namespace": "default"},
        "spec": {"routes": [{"name": "primary", "httpRoute": {"action": {"weightedTargets": [
            {"virtualNodeRef": {"name": "web-canary", "namespace": "other"}, "weight": 0},
            {"virtualNodeRef": {"name": "web-stable"}, "weight": 100},
        ]}}}]},
    }));
    let err = reconciler(&mesh, &[]).set_weight(40, &[]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "canary service web-canary not found in VirtualRouter web-vrouter"
    );
}

#[tokio::test]
async fn hashes_are_written_to_node_selectors() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &[]);

    app_mesh.update_hash("abc123", "", &[]).await.unwrap();
    let labels = |name: &str| {
        serde_json::from_value::<std::collections::BTreeMap<String, String>>(
            mesh.nodes.data("default", name).unwrap()["spec"]["podSelector"]["matchLabels"]
                .clone(),
        )
        .unwrap()
    };
    assert_eq!(
        labels("web-canary"),
        btreemap! {
            "app".to_string() => "web".to_string(),
            "rollouts-pod-template-hash".to_string() => "abc123".to_string(),
        }
    );
    assert_eq!(
        labels("web-stable"),
        btreemap! {
            "app".to_string() => "web".to_string(),
            "rollouts-pod-template-hash".to_string() => "stable-hash".to_string(),
        }
    );

    app_mesh.update_hash("abc123", "", &[]).await.unwrap();
    assert_eq!(mesh.nodes.writes().len(), 2);
}

#[tokio::test]
async fn targets_default_to_the_rollout_namespace() {
    let mesh = mesh();
    mesh.services.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualService",
        "metadata": {"name": "web-vsvc", "namespace": "default"},
        "spec": {"provider": {"virtualRouter": {"virtualRouterRef": {
            "name": "web-vrouter",
            "namespace": "mesh",
        }}}},
    }));
    mesh.routers.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualRouter",
        "metadata": {"name": "web-vrouter", "namespace": "mesh"},
        "spec": {"routes": [{"name": "primary", "httpRoute": targets(0, 100)}]},
    }));

    reconciler(&mesh, &[]).set_weight(40, &[]).await.unwrap();
    assert_eq!(
        mesh.routers.data("mesh", "web-vrouter").unwrap()["spec"]["routes"],
        json!([{"name": "primary", "httpRoute": targets(40, 60)}])
    );
}

#[tokio::test]
async fn additional_targets_are_weighted() {
    let mesh = mesh();
    mesh.routers.insert(json!({
        "apiVersion": "appmesh.k8s.aws/v1beta2",
        "kind": "VirtualRouter",
        "metadata": {"name": "web-vrouter", "namespace": "default"},
        "spec": {"routes": [{"name": "primary", "httpRoute": {"action": {"weightedTargets": [
            {"virtualNodeRef": {"name": "web-canary"}, "weight": 0},
            {"virtualNodeRef": {"name": "web-stable"}, "weight": 100},
            {"virtualNodeRef": {"name": "web-exp"}, "weight": 0},
        ]}}}]},
    }));
    let app_mesh = reconciler(&mesh, &[]);
    let exp = [WeightDestination::new("web-exp", 10)];

    app_mesh.set_weight(20, &exp).await.unwrap();
    assert_eq!(
        routes(&mesh),
        json!([{"name": "primary", "httpRoute": {"action": {"weightedTargets": [
            {"virtualNodeRef": {"name": "web-canary"}, "weight": 20},
            {"virtualNodeRef": {"name": "web-stable"}, "weight": 70},
            {"virtualNodeRef": {"name": "web-exp"}, "weight": 10},
        ]}}}])
    );
}

#[tokio::test]
async fn missing_additional_target_fails_without_writing() {
    let mesh = mesh();
    let app_mesh = reconciler(&mesh, &[]);

    let err = app_mesh
        .set_weight(20, &[WeightDestination::new("web-exp", 10)])
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "additional service web-exp not found in VirtualRouter web-vrouter"
    );
    assert_eq!(mesh.routers.writes(), vec![]);
    assert_eq!(routes(&mesh)[0], json!({"name": "primary", "httpRoute": targets(0, 100)}));
}
