//! inference-graph - SeldonDeployment admission webhook and graph synthesizer

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inference_graph::compiler::GraphCompiler;
use inference_graph::crd::SeldonDeployment;
use inference_graph::initializer::{StorageInitializer, DEFAULT_STORAGE_INITIALIZER_IMAGE};
use inference_graph::webhook::webhook_router;
use inference_graph::workload::{Components, Deployment, Service};

/// inference-graph - lower SeldonDeployment inference graphs into Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "inference-graph", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the SeldonDeployment validating admission webhook
    Webhook(WebhookArgs),

    /// Validate a SeldonDeployment and print the Deployments and Services it lowers to
    Synthesize(SynthesizeArgs),
}

/// Webhook mode arguments
#[derive(Parser, Debug)]
struct WebhookArgs {
    /// Address to listen on
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// PEM certificate; serves HTTPS together with --tls-key
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

/// Synthesize mode arguments
#[derive(Parser, Debug)]
struct SynthesizeArgs {
    /// Path to the SeldonDeployment YAML
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Multi-document YAML of Deployments and Services already live
    ///
    /// Units whose Deployment is listed here are merged into it instead of
    /// starting a new one.
    #[arg(long)]
    existing: Option<PathBuf>,

    /// Image of the init container that downloads model artifacts
    #[arg(
        long,
        env = "STORAGE_INITIALIZER_IMAGE",
        default_value = DEFAULT_STORAGE_INITIALIZER_IMAGE
    )]
    storage_initializer_image: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&SeldonDeployment::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Webhook(args)) => run_webhook(args).await,
        Some(Commands::Synthesize(args)) => run_synthesize(args).await,
        None => {
            warn!("No command given, see --help");
            Ok(())
        }
    }
}

/// Serve the admission webhook until the process is stopped
async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let app = webhook_router();

    match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => {
            if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
                anyhow::bail!("Failed to install crypto provider: {:?}", e);
            }
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load TLS config: {}", e))?;

            info!(addr = %args.addr, "Starting HTTPS admission webhook");
            axum_server::bind_rustls(args.addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow::anyhow!("HTTPS server error: {}", e))
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(args.addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", args.addr, e))?;
            info!(addr = %args.addr, "Starting HTTP admission webhook");
            axum::serve(listener, app)
                .await
                .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
        }
    }
}

/// Validate and synthesize a SeldonDeployment, printing the result as YAML
async fn run_synthesize(args: SynthesizeArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", args.file, e))?;
    let sdep: SeldonDeployment = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse SeldonDeployment: {}", e))?;

    sdep.spec
        .validate()
        .map_err(|e| anyhow::anyhow!("SeldonDeployment rejected: {}", e))?;

    let seed = match &args.existing {
        Some(path) => {
            let existing = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", path, e))?;
            parse_existing(&existing)?
        }
        None => Components::new(),
    };

    let initializer = StorageInitializer::new(args.storage_initializer_image);
    let compiled = GraphCompiler::new(&initializer).compile_all(&sdep, &seed)?;

    info!(
        deployments = compiled.components.deployments.len(),
        services = compiled.components.services.len(),
        resources = compiled.components.resource_count(),
        "Synthesized SeldonDeployment"
    );

    let mut docs = Vec::new();
    for d in &compiled.components.deployments {
        docs.push(serde_yaml::to_string(d)?);
    }
    for s in &compiled.components.services {
        docs.push(serde_yaml::to_string(s)?);
    }
    println!("{}", docs.join("---\n"));
    Ok(())
}

/// Split a multi-document YAML stream into Deployments and Services
fn parse_existing(content: &str) -> anyhow::Result<Components> {
    let mut components = Components::new();

    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(doc)?;
        match value.get("kind").and_then(|k| k.as_str()) {
            Some("Deployment") => components
                .deployments
                .push(serde_yaml::from_value::<Deployment>(value)?),
            Some("Service") => components
                .services
                .push(serde_yaml::from_value::<Service>(value)?),
            Some(other) => warn!(kind = other, "Ignoring existing resource"),
            None => {}
        }
    }

    Ok(components)
}
