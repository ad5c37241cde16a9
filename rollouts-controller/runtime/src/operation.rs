use crate::{
    core::{WeightDestination, WeightVerification},
    k8s::{rollout, Rollout},
    trafficrouting::Reconcilers,
};
use anyhow::{bail, Context, Result};
use std::str::FromStr;

/// A traffic routing operation applied to every provider configured on a
/// Rollout, in configuration order. The first failure stops the operation.
#[derive(Clone, Debug, clap::Subcommand)]
pub enum Operation {
    /// Shifts a share of traffic to the canary
    SetWeight {
        #[clap(long)]
        weight: i32,

        /// An additional destination, formatted as `name[:port]=weight`
        #[clap(long = "additional-destination")]
        additional: Vec<Destination>,
    },

    /// Checks whether providers reflect a traffic split
    VerifyWeight {
        #[clap(long)]
        weight: i32,

        #[clap(long = "additional-destination")]
        additional: Vec<Destination>,
    },

    /// Points canary and stable targets at pod template hashes
    UpdateHash {
        #[clap(long, default_value = "")]
        canary_hash: String,

        #[clap(long, default_value = "")]
        stable_hash: String,

        #[clap(long = "additional-destination")]
        additional: Vec<Destination>,
    },

    /// Applies the header route set by a canary step
    SetHeaderRoute {
        #[clap(long)]
        name: String,

        /// Removes the route instead of applying the step's matches
        #[clap(long)]
        clear: bool,
    },

    /// Applies the mirror route set by a canary step
    SetMirrorRoute {
        #[clap(long)]
        name: String,

        #[clap(long)]
        clear: bool,
    },

    /// Deletes every route created for the Rollout's managed routes
    RemoveManagedRoutes,
}

/// An additional weighted destination, parsed from `name[:port]=weight`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination(WeightDestination);

// === impl Operation ===

impl Operation {
    pub async fn run(self, rollout: &Rollout, reconcilers: &Reconcilers) -> Result<()> {
        if reconcilers.is_empty() {
            tracing::info!("Rollout has no traffic routing");
            return Ok(());
        }

        match self {
            Self::SetWeight { weight, additional } => {
                let additional = destinations(additional);
                for reconciler in reconcilers {
                    reconciler.set_weight(weight, &additional).await?;
                }
                tracing::info!(weight, "Set traffic weight");
            }

            Self::VerifyWeight { weight, additional } => {
                let additional = destinations(additional);
                let mut verification = WeightVerification::NotApplicable;
                for reconciler in reconcilers {
                    let v = reconciler.verify_weight(weight, &additional).await?;
                    tracing::debug!(kind = %reconciler.kind(), verification = %v, "Verified provider");
                    verification = verification.and(v);
                }
                tracing::info!(weight, %verification, "Verified traffic weight");
                if !verification.is_satisfied() {
                    bail!("traffic routing does not yet reflect weight {weight}");
                }
            }

            Self::UpdateHash {
                canary_hash,
                stable_hash,
                additional,
            } => {
                let additional = destinations(additional);
                for reconciler in reconcilers {
                    reconciler
                        .update_hash(&canary_hash, &stable_hash, &additional)
                        .await?;
                }
                tracing::info!(%canary_hash, %stable_hash, "Updated pod template hashes");
            }

            Self::SetHeaderRoute { name, clear } => {
                let route = if clear {
                    rollout::SetHeaderRoute {
                        name,
                        matches: None,
                    }
                } else {
                    header_route(rollout, &name)?.clone()
                };
                for reconciler in reconcilers {
                    reconciler.set_header_route(&route).await?;
                }
                tracing::info!(route = %route.name, clear, "Set header route");
            }

            Self::SetMirrorRoute { name, clear } => {
                let route = if clear {
                    rollout::SetMirrorRoute {
                        name,
                        ..Default::default()
                    }
                } else {
                    mirror_route(rollout, &name)?.clone()
                };
                for reconciler in reconcilers {
                    reconciler.set_mirror_route(&route).await?;
                }
                tracing::info!(route = %route.name, clear, "Set mirror route");
            }

            Self::RemoveManagedRoutes => {
                for reconciler in reconcilers {
                    reconciler.remove_managed_routes().await?;
                }
                tracing::info!("Removed managed routes");
            }
        }

        Ok(())
    }
}

fn destinations(additional: Vec<Destination>) -> Vec<WeightDestination> {
    additional.into_iter().map(|Destination(d)| d).collect()
}

/// Finds the header route a canary step sets, which must name one of the
/// Rollout's managed routes.
fn header_route<'r>(rollout: &'r Rollout, name: &str) -> Result<&'r rollout::SetHeaderRoute> {
    check_managed(rollout, name)?;
    steps(rollout)
        .filter_map(|step| step.set_header_route.as_ref())
        .find(|route| route.name == name)
        .with_context(|| format!("no canary step sets header route {name}"))
}

fn mirror_route<'r>(rollout: &'r Rollout, name: &str) -> Result<&'r rollout::SetMirrorRoute> {
    check_managed(rollout, name)?;
    steps(rollout)
        .filter_map(|step| step.set_mirror_route.as_ref())
        .find(|route| route.name == name)
        .with_context(|| format!("no canary step sets mirror route {name}"))
}

fn steps(rollout: &Rollout) -> impl Iterator<Item = &rollout::CanaryStep> {
    rollout
        .canary()
        .and_then(|canary| canary.steps.as_ref())
        .into_iter()
        .flatten()
}

fn check_managed(rollout: &Rollout, name: &str) -> Result<()> {
    let managed = rollout
        .traffic_routing()
        .into_iter()
        .flat_map(|routing| routing.managed_route_names())
        .any(|route| route == name);
    if !managed {
        bail!("route {name} is not listed in trafficRouting.managedRoutes");
    }
    Ok(())
}

// === impl Destination ===

impl FromStr for Destination {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (target, weight) = s
            .split_once('=')
            .with_context(|| format!("destination {s:?} must be formatted as name[:port]=weight"))?;
        let weight = weight
            .parse::<i32>()
            .with_context(|| format!("invalid weight in destination {s:?}"))?;
        let dest = match target.split_once(':') {
            Some((name, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in destination {s:?}"))?;
                WeightDestination::new(name, weight).with_port(port)
            }
            None => WeightDestination::new(target, weight),
        };
        if dest.service_name.is_empty() {
            bail!("destination {s:?} has no service name");
        }
        Ok(Self(dest))
    }
}
