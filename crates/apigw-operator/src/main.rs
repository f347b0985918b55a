//! API gateway operator - exposes services declared by APIRules

mod controller_runner;
mod crds;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use apigw_common::config::{
    default_cors_policy, parse_cors_origins, parse_labels, parse_service_blocklist,
};
use apigw_common::{OperatorSettings, CONFIG_MAP_NAME, KYMA_SYSTEM_NAMESPACE};
use apigw_controller::RequeuePeriods;

/// API gateway operator: translates APIRules into Istio and Oathkeeper resources
#[derive(Parser, Debug)]
#[command(name = "apigw-operator", version, about, long_about = None)]
struct Cli {
    /// Log as JSON lines instead of human readable text
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the APIRule controller (default)
    Run(RunArgs),
    /// Print the APIRule CRD as YAML and exit
    Crd,
    /// Install or update the APIRule CRD with server-side apply
    InstallCrd,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Domain appended to hosts without one
    #[arg(long, env = "DEFAULT_DOMAIN_NAME", default_value = "")]
    default_domain_name: String,

    /// Oathkeeper proxy service host
    #[arg(
        long,
        env = "OATHKEEPER_SVC_ADDRESS",
        default_value = "ory-oathkeeper-proxy.kyma-system.svc.cluster.local"
    )]
    oathkeeper_svc_address: String,

    /// Oathkeeper proxy service port
    #[arg(long, env = "OATHKEEPER_SVC_PORT", default_value_t = 4455)]
    oathkeeper_svc_port: u32,

    /// Services that may not be exposed, as <service>.<namespace>
    #[arg(long, env = "SERVICE_BLOCKLIST", value_delimiter = ',', default_value = "kubernetes.default,kube-dns.kube-system")]
    service_blocklist: Vec<String>,

    /// Domains fully qualified hosts must belong to (empty allows any)
    #[arg(long, env = "DOMAIN_ALLOWLIST", value_delimiter = ',')]
    domain_allowlist: Vec<String>,

    /// Hosts that may not be exposed
    #[arg(long, env = "HOST_BLOCKLIST", value_delimiter = ',')]
    host_blocklist: Vec<String>,

    /// Allowed CORS origins, as regex:<re>, prefix:<p> or exact:<s>
    #[arg(long, env = "CORS_ALLOW_ORIGINS", value_delimiter = ',')]
    cors_allow_origins: Vec<String>,

    /// Allowed CORS methods
    #[arg(long, env = "CORS_ALLOW_METHODS", value_delimiter = ',')]
    cors_allow_methods: Vec<String>,

    /// Allowed CORS headers
    #[arg(long, env = "CORS_ALLOW_HEADERS", value_delimiter = ',')]
    cors_allow_headers: Vec<String>,

    /// Labels added to every generated resource, as key=value
    #[arg(long, env = "GENERATED_OBJECTS_LABELS", value_delimiter = ',')]
    generated_objects_labels: Vec<String>,

    /// Namespace of the mode ConfigMap
    #[arg(long, env = "CONFIG_MAP_NAMESPACE", default_value = KYMA_SYSTEM_NAMESPACE)]
    config_map_namespace: String,

    /// Name of the mode ConfigMap
    #[arg(long, env = "CONFIG_MAP_NAME", default_value = CONFIG_MAP_NAME)]
    config_map_name: String,

    /// Seconds between reconciles of a healthy APIRule
    #[arg(long, env = "RECONCILIATION_PERIOD", default_value_t = 1800)]
    reconciliation_period: u64,

    /// Seconds between reconciles of an APIRule in error
    #[arg(long, env = "ERROR_RECONCILIATION_PERIOD", default_value_t = 60)]
    error_reconciliation_period: u64,

    /// Maximum number of APIRules reconciled concurrently
    #[arg(long, env = "RATE_LIMITER_MAX_CONCURRENT_RECONCILES", default_value_t = 1)]
    max_concurrent_reconciles: u16,
}

/// Run arguments alone, for starting without a subcommand
#[derive(Parser, Debug)]
struct RunOnly {
    #[command(flatten)]
    args: RunArgs,
}

impl RunArgs {
    /// Defaults, overridden by the environment
    fn from_env() -> Self {
        RunOnly::parse_from(["apigw-operator"]).args
    }

    /// Operator settings from the flags
    fn settings(&self) -> anyhow::Result<OperatorSettings> {
        let mut cors = default_cors_policy();
        if !self.cors_allow_origins.is_empty() {
            cors.allow_origins = parse_cors_origins(&self.cors_allow_origins)?;
        }
        if !self.cors_allow_methods.is_empty() {
            cors.allow_methods = self.cors_allow_methods.clone();
        }
        if !self.cors_allow_headers.is_empty() {
            cors.allow_headers = self.cors_allow_headers.clone();
        }

        Ok(OperatorSettings {
            default_domain_name: self.default_domain_name.clone(),
            cors,
            oathkeeper_service: self.oathkeeper_svc_address.clone(),
            oathkeeper_port: self.oathkeeper_svc_port,
            service_blocklist: parse_service_blocklist(&self.service_blocklist)?,
            domain_allowlist: self.domain_allowlist.clone(),
            host_blocklist: self.host_blocklist.clone(),
            additional_labels: parse_labels(&self.generated_objects_labels)?,
        })
    }

    fn periods(&self) -> RequeuePeriods {
        RequeuePeriods {
            reconcile: Duration::from_secs(self.reconciliation_period),
            error: Duration::from_secs(self.error_reconciliation_period),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Some(Commands::Crd) => {
            println!("{}", crds::crd_yaml()?);
            Ok(())
        }
        Some(Commands::InstallCrd) => {
            let client = Client::try_default().await?;
            crds::install(&client).await
        }
        Some(Commands::Run(args)) => run(args).await,
        None => run(RunArgs::from_env()).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let settings = args.settings()?;
    tracing::info!(
        default_domain = %settings.default_domain_name,
        oathkeeper = %settings.oathkeeper_service,
        config_map = %format!("{}/{}", args.config_map_namespace, args.config_map_name),
        "starting API gateway operator"
    );

    let client = Client::try_default().await?;
    controller_runner::run_api_rule_controller(
        client,
        settings,
        args.periods(),
        (args.config_map_namespace, args.config_map_name),
        args.max_concurrent_reconciles,
    )
    .await;

    tracing::info!("API gateway operator stopped");
    Ok(())
}
