#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_core::{Annotations, ResourceClient, RetryPolicy};
use keel_kubehub::KubeResourceClient;
use keel_reconcile::{CleanupLedger, Reconciler};
use tokio::signal;
use tracing::{error, info, info_span, warn};

mod bundle;

use bundle::{parse_annotations, Bundle};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel CLI: ensure CRDs and custom resources for an application")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Model namespace (default: current context)
    #[arg(long = "ns", global = true, env = "KEEL_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeconfig path (default: in-cluster or ~/.kube/config)
    #[arg(long = "kubeconfig", global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ensure every definition and custom resource in a bundle; roll back on failure
    Apply {
        /// Owning application
        #[arg(long = "app", env = "KEEL_APP")]
        app: String,
        /// Bundle YAML with customResourceDefinitions and customResources
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Extra annotation stamped on every object (repeatable, key=value)
        #[arg(long = "annotation")]
        annotations: Vec<String>,
        /// Leave created objects in place when the pass fails
        #[arg(long = "no-rollback", action = ArgAction::SetTrue)]
        no_rollback: bool,
    },
    /// Delete the application's custom resources, then its definitions
    Delete {
        #[arg(long = "app", env = "KEEL_APP")]
        app: String,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

async fn engine(cli: &Cli) -> Result<Reconciler> {
    let client = keel_kubehub::connect(cli.kubeconfig.as_deref()).await?;
    let ns = cli.namespace.clone().unwrap_or_else(|| client.default_namespace().to_string());
    let client: Arc<dyn ResourceClient> = Arc::new(KubeResourceClient::new(client));
    let span = info_span!("reconcile", namespace = %ns);
    Ok(Reconciler::new(client, ns, span).with_retry(RetryPolicy::from_env()))
}

async fn apply_pass(
    engine: &Reconciler,
    app: &str,
    annotations: &Annotations,
    bundle: &Bundle,
    ledger: &mut CleanupLedger,
) -> keel_core::Result<()> {
    engine.ensure_definitions(app, annotations, &bundle.custom_resource_definitions, ledger).await?;
    engine
        .ensure_custom_resources(app, annotations, &bundle.custom_resources, engine.definition_getter(), ledger)
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Apply { app, file, annotations, no_rollback } => {
            let bundle = Bundle::from_path(file)?;
            let annotations = parse_annotations(annotations)?;
            let engine = engine(&cli).await?;
            info!(
                app = %app,
                ns = %engine.namespace(),
                definitions = bundle.custom_resource_definitions.len(),
                resources = bundle.resource_count(),
                "apply invoked"
            );
            let mut ledger = CleanupLedger::new();
            let outcome = tokio::select! {
                res = apply_pass(&engine, app, &annotations, &bundle, &mut ledger) => res.map_err(anyhow::Error::from),
                _ = signal::ctrl_c() => Err(anyhow!("interrupted")),
            };
            let created = ledger.describe();
            match outcome {
                Ok(()) => match cli.output {
                    Output::Human => {
                        for (kind, name) in &created {
                            println!("created {kind}/{name}");
                        }
                        println!(
                            "ensured {} definitions, {} resources ({} new)",
                            bundle.custom_resource_definitions.len(),
                            bundle.resource_count(),
                            created.len()
                        );
                    }
                    Output::Json => {
                        let created: Vec<_> =
                            created.iter().map(|(kind, name)| serde_json::json!({ "kind": kind, "name": name })).collect();
                        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "created": created }))?);
                    }
                },
                Err(e) => {
                    error!(error = %e, "apply failed");
                    if *no_rollback {
                        warn!(left = created.len(), "rollback disabled; created objects left in place");
                    } else {
                        let failed = ledger.rollback().await;
                        info!(undone = created.len() - failed, failed, "rolled back");
                    }
                    return Err(e);
                }
            }
        }
        Commands::Delete { app } => {
            let engine = engine(&cli).await?;
            info!(app = %app, ns = %engine.namespace(), "delete invoked");
            engine.delete_resources(app).await?;
            engine.delete_definitions(app).await?;
            match cli.output {
                Output::Human => println!("deleted custom resources and definitions of {app}"),
                Output::Json => println!("{}", serde_json::json!({ "deleted": app })),
            }
        }
    }
    Ok(())
}
