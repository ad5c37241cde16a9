use crate::WeightDestination;
use anyhow::Result;
use rollouts_controller_k8s_api::rollout::{SetHeaderRoute, SetMirrorRoute};

/// The outcome of reading a traffic split back from a provider.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WeightVerification {
    /// The provider reflects the desired split.
    Verified,

    /// The provider does not (yet) reflect the desired split.
    Pending,

    /// The provider can't be queried synchronously. Callers treat this as
    /// success rather than retrying.
    NotApplicable,
}

/// Optional operations a provider actually implements.
///
/// Providers that don't implement an operation still accept calls to it: the
/// default trait methods succeed without mutating anything.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub header_routes: bool,
    pub mirror_routes: bool,
}

/// Converges a provider's routing resources to a desired traffic split.
///
/// Every operation is idempotent and re-reads the resources it mutates; retry
/// policy belongs to the caller.
#[async_trait::async_trait]
pub trait TrafficRoutingReconciler: Send + Sync {
    /// A stable identifier for the provider, used in logs and metrics.
    fn kind(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Propagates revision hashes to providers that select pods by label.
    async fn update_hash(
        &self,
        _canary_hash: &str,
        _stable_hash: &str,
        _additional: &[WeightDestination],
    ) -> Result<()> {
        Ok(())
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()>;

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification>;

    async fn set_header_route(&self, route: &SetHeaderRoute) -> Result<()> {
        tracing::debug!(kind = %self.kind(), route = %route.name, "Header routes are not supported");
        Ok(())
    }

    async fn set_mirror_route(&self, route: &SetMirrorRoute) -> Result<()> {
        tracing::debug!(kind = %self.kind(), route = %route.name, "Mirror routes are not supported");
        Ok(())
    }

    async fn remove_managed_routes(&self) -> Result<()> {
        Ok(())
    }
}

// === impl WeightVerification ===

impl WeightVerification {
    pub fn from_matched(matched: bool) -> Self {
        if matched {
            Self::Verified
        } else {
            Self::Pending
        }
    }

    pub fn is_satisfied(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Combines the verification of several resources: any pending resource
    /// makes the whole split pending.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Pending, _) | (_, Self::Pending) => Self::Pending,
            (Self::Verified, _) | (_, Self::Verified) => Self::Verified,
            _ => Self::NotApplicable,
        }
    }
}

impl std::fmt::Display for WeightVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => "verified".fmt(f),
            Self::Pending => "pending".fmt(f),
            Self::NotApplicable => "not-applicable".fmt(f),
        }
    }
}
