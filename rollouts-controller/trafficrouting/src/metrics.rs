use anyhow::Result;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use rollouts_controller_core::{
    Capabilities, TrafficRoutingReconciler, WeightDestination, WeightVerification,
};
use rollouts_controller_k8s_api::rollout::{SetHeaderRoute, SetMirrorRoute};

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconcile_calls: Family<ReconcileLabels, Counter>,
    reconcile_errors: Family<ReconcileLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    kind: String,
    op: String,
}

/// Wraps a reconciler to count its calls and failures and to log failures.
pub struct Instrumented {
    inner: Box<dyn TrafficRoutingReconciler>,
    metrics: ReconcileMetrics,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconcile_calls = Family::default();
        prom.register(
            "reconcile_calls",
            "Count of traffic routing reconciler calls",
            reconcile_calls.clone(),
        );

        let reconcile_errors = Family::default();
        prom.register(
            "reconcile_errors",
            "Count of traffic routing reconciler calls that failed",
            reconcile_errors.clone(),
        );

        Self {
            reconcile_calls,
            reconcile_errors,
        }
    }

    pub fn instrument(
        &self,
        inner: Box<dyn TrafficRoutingReconciler>,
    ) -> Box<dyn TrafficRoutingReconciler> {
        Box::new(Instrumented {
            inner,
            metrics: self.clone(),
        })
    }

    fn record<T>(&self, kind: &'static str, op: &'static str, reason: &'static str, res: &Result<T>) {
        let labels = ReconcileLabels {
            kind: kind.to_string(),
            op: op.to_string(),
        };
        self.reconcile_calls.get_or_create(&labels).inc();
        if let Err(error) = res {
            self.reconcile_errors.get_or_create(&labels).inc();
            tracing::warn!(%kind, %reason, error = %format_args!("{error:#}"), "Traffic routing failed");
        }
    }
}

// === impl Instrumented ===

#[async_trait::async_trait]
impl TrafficRoutingReconciler for Instrumented {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn update_hash(
        &self,
        canary_hash: &str,
        stable_hash: &str,
        additional: &[WeightDestination],
    ) -> Result<()> {
        let res = self
            .inner
            .update_hash(canary_hash, stable_hash, additional)
            .await;
        self.metrics
            .record(self.kind(), "update_hash", "HashUpdateFailed", &res);
        res
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        let res = self.inner.set_weight(desired, additional).await;
        self.metrics
            .record(self.kind(), "set_weight", "WeightUpdateFailed", &res);
        res
    }

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification> {
        let res = self.inner.verify_weight(desired, additional).await;
        self.metrics
            .record(self.kind(), "verify_weight", "WeightVerifyFailed", &res);
        res
    }

    async fn set_header_route(&self, route: &SetHeaderRoute) -> Result<()> {
        let res = self.inner.set_header_route(route).await;
        self.metrics
            .record(self.kind(), "set_header_route", "HeaderRouteUpdateFailed", &res);
        res
    }

    async fn set_mirror_route(&self, route: &SetMirrorRoute) -> Result<()> {
        let res = self.inner.set_mirror_route(route).await;
        self.metrics
            .record(self.kind(), "set_mirror_route", "MirrorRouteUpdateFailed", &res);
        res
    }

    async fn remove_managed_routes(&self) -> Result<()> {
        let res = self.inner.remove_managed_routes().await;
        self.metrics.record(
            self.kind(),
            "remove_managed_routes",
            "ManagedRoutesRemoveFailed",
            &res,
        );
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl TrafficRoutingReconciler for Failing {
        fn kind(&self) -> &'static str {
            "Failing"
        }

        async fn set_weight(&self, _: i32, _: &[WeightDestination]) -> Result<()> {
            anyhow::bail!("boom")
        }

        async fn verify_weight(&self, _: i32, _: &[WeightDestination]) -> Result<WeightVerification> {
            Ok(WeightVerification::Verified)
        }
    }

    #[tokio::test]
    async fn counts_calls_and_errors() {
        let metrics = ReconcileMetrics::register(&mut Registry::default());
        let reconciler = metrics.instrument(Box::new(Failing));

        reconciler.set_weight(10, &[]).await.unwrap_err();
        reconciler.set_weight(10, &[]).await.unwrap_err();
        reconciler.verify_weight(10, &[]).await.unwrap();

        let labels = |op: &str| ReconcileLabels {
            kind: "Failing".to_string(),
            op: op.to_string(),
        };
        assert_eq!(metrics.reconcile_calls.get_or_create(&labels("set_weight")).get(), 2);
        assert_eq!(metrics.reconcile_errors.get_or_create(&labels("set_weight")).get(), 2);
        assert_eq!(metrics.reconcile_calls.get_or_create(&labels("verify_weight")).get(), 1);
        assert_eq!(metrics.reconcile_errors.get_or_create(&labels("verify_weight")).get(), 0);
    }
}
