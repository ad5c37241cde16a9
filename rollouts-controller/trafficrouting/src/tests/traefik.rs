use super::*;
use crate::{traefik, RolloutRef, Traefik};
use pretty_assertions::assert_eq;
use rollouts_controller_core::{TrafficRoutingReconciler, WeightDestination, WeightVerification};
use rollouts_controller_k8s_api::rollout::TraefikTrafficRouting;
use serde_json::json;

fn setup() -> (Arc<MemoryStore>, Traefik) {
    let store = MemoryStore::new(traefik::resource("traefik.containo.us"));
    store.insert(json!({
        "apiVersion": "traefik.containo.us/v1alpha1",
        "kind": "TraefikService",
        "metadata": {"name": "web", "namespace": "default"},
        "spec": {"weighted": {"services": [
            {"name": "web-stable", "port": 80, "weight": 100},
            {"name": "web-canary", "port": 80, "weight": 0},
        ]}},
    }));
    let target = RolloutRef {
        name: "web".to_string(),
        namespace: "default".to_string(),
        canary_service: "web-canary".to_string(),
        stable_service: "web-stable".to_string(),
    };
    let config = TraefikTrafficRouting {
        weighted_traefik_service_name: "web".to_string(),
    };
    let traefik = Traefik::new(store.clone(), &target, &config).unwrap();
    (store, traefik)
}

#[tokio::test]
async fn sets_weights() {
    let (store, traefik) = setup();
    assert_eq!(
        traefik.verify_weight(25, &[]).await.unwrap(),
        WeightVerification::Pending
    );

    traefik.set_weight(25, &[]).await.unwrap();
    assert_eq!(
        store.data("default", "web").unwrap(),
        json!({"spec": {"weighted": {"services": [
            {"name": "web-stable", "port": 80, "weight": 75},
            {"name": "web-canary", "port": 80, "weight": 25},
        ]}}})
    );
    assert_eq!(
        traefik.verify_weight(25, &[]).await.unwrap(),
        WeightVerification::Verified
    );
}

#[tokio::test]
async fn idempotent() {
    let (store, traefik) = setup();
    traefik.set_weight(25, &[]).await.unwrap();
    let first = store.data("default", "web");
    traefik.set_weight(25, &[]).await.unwrap();
    assert_eq!(store.data("default", "web"), first);
    assert_eq!(store.writes(), vec![Write::Update("web".to_string())]);
}

#[tokio::test]
async fn rejects_invalid_split_before_io() {
    let (store, traefik) = setup();
    store.fail("web", "must not be called");
    let err = traefik
        .set_weight(90, &[WeightDestination::new("exp", 20)])
        .await
        .unwrap_err();
    assert!(
        err.downcast_ref::<rollouts_controller_core::WeightError>().is_some(),
        "{err}"
    );
}

#[tokio::test]
async fn additional_services_must_be_listed() {
    let (store, traefik) = setup();
    let exp = [WeightDestination::new("web-exp", 10)];

    let err = traefik.set_weight(20, &exp).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "additional service web-exp not found in TraefikService web"
    );
    assert_eq!(store.writes(), vec![]);

    store.insert(json!({
        "apiVersion": "traefik.containo.us/v1alpha1",
        "kind": "TraefikService",
        "metadata": {"name": "web", "namespace": "default"},
        "spec": {"weighted": {"services": [
            {"name": "web-stable", "port": 80, "weight": 100},
            {"name": "web-canary", "port": 80, "weight": 0},
            {"name": "web-exp", "port": 80, "weight": 0},
        ]}},
    }));
    traefik.set_weight(20, &exp).await.unwrap();
    assert_eq!(
        store.data("default", "web").unwrap(),
        json!({"spec": {"weighted": {"services": [
            {"name": "web-stable", "port": 80, "weight": 70},
            {"name": "web-canary", "port": 80, "weight": 20},
            {"name": "web-exp", "port": 80, "weight": 10},
        ]}}})
    );
}
