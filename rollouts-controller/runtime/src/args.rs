use crate::{
    k8s::{store::ClientStores, Rollout},
    operation::Operation,
    references,
    trafficrouting::{self, Config, ReconcileMetrics},
    validation,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::Api;
use prometheus_client::registry::Registry;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "rollouts-controller",
    about = "Shifts and verifies progressive-delivery traffic for a Rollout"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "rollouts_controller=info,warn",
        env = "ROLLOUTS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace of the Rollout.
    #[clap(long, default_value = "default")]
    namespace: String,

    /// Name of the Rollout.
    #[clap(long)]
    rollout: String,

    #[clap(long, default_value = "getambassador.io/v2")]
    ambassador_api_version: String,

    #[clap(long, default_value = "apisix.apache.org/v2")]
    apisix_api_version: String,

    #[clap(long, default_value = "traefik.containo.us")]
    traefik_api_group: String,

    /// How long a canary Mapping set to zero weight is kept before it is
    /// deleted.
    #[clap(long, default_value = "5")]
    canary_mapping_cleanup_delay_secs: u64,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    #[clap(flatten)]
    Reconcile(Operation),

    /// Checks the Rollout against the resources it references
    Validate,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            namespace,
            rollout,
            ambassador_api_version,
            apisix_api_version,
            traefik_api_group,
            canary_mapping_cleanup_delay_secs,
            command,
        } = self;

        let config = Config {
            ambassador_api_version,
            apisix_api_version,
            traefik_api_group,
            canary_mapping_cleanup_delay: Duration::from_secs(canary_mapping_cleanup_delay_secs),
        };

        let mut prom = <Registry>::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("trafficrouting"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;
        let client = runtime.client();

        let rollout = Api::<Rollout>::namespaced(client.clone(), &namespace)
            .get(&rollout)
            .await?;

        match command {
            Command::Reconcile(operation) => {
                let stores = ClientStores::new(client);
                let reconcilers = trafficrouting::new_reconcilers(&rollout, &stores, &config)?
                    .into_iter()
                    .map(|reconciler| metrics.instrument(reconciler))
                    .collect();
                operation.run(&rollout, &reconcilers).await?;
            }

            Command::Validate => {
                let referenced = references::fetch(&client, &rollout, &config).await?;
                let errors = validation::validate_rollout_referenced_resources(&rollout, &referenced);
                for error in &errors {
                    warn!(%error, "Invalid reference");
                }
                if !errors.is_empty() {
                    bail!("Rollout has {} invalid references", errors.len());
                }
                info!("Rollout references are valid");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_operations() {
        let args = Args::try_parse_from([
            "rollouts-controller",
            "--namespace=shop",
            "--rollout=web",
            "set-weight",
            "--weight=25",
            "--additional-destination=exp:8080=5",
        ])
        .unwrap();
        assert_eq!(args.namespace, "shop");
        assert_eq!(args.canary_mapping_cleanup_delay_secs, 5);
        assert!(matches!(
            args.command,
            Command::Reconcile(Operation::SetWeight { weight: 25, ref additional }) if additional.len() == 1
        ));

        let args = Args::try_parse_from(["rollouts-controller", "--rollout=web", "validate"]).unwrap();
        assert!(matches!(args.command, Command::Validate));

        assert!(Args::try_parse_from(["rollouts-controller", "set-weight", "--weight=25"]).is_err());
    }
}
