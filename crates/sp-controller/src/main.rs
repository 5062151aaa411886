use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sp_controller::{
    telemetry, ControllerConfig, InMemoryStore, RequestManifest, Services, SignalProcessingStore,
};
use sp_enrichment::{ClusterApi, ClusterFixture, InMemoryCluster};
use sp_policy::PolicyBundle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn cli() -> Command {
    Command::new("signal-processing")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signal enrichment and classification controller")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Controller configuration (.toml, .yaml or .yml)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Default log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("process")
                .about("Process one request to completion and print its status")
                .arg(
                    Arg::new("request")
                        .long("request")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Request manifest"),
                )
                .arg(cluster_arg())
                .arg(policies_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of YAML"),
                ),
        )
        .subcommand(
            Command::new("check-policies")
                .about("Compile a policy directory and report what it contains")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Policy directory"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the controller over a directory of request manifests until interrupted")
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory of request manifests"),
                )
                .arg(cluster_arg())
                .arg(policies_arg()),
        )
}

fn cluster_arg() -> Arg {
    Arg::new("cluster")
        .long("cluster")
        .value_parser(value_parser!(PathBuf))
        .help("Cluster fixture; without it the live cluster is used (feature `kube`)")
}

fn policies_arg() -> Arg {
    Arg::new("policies")
        .long("policies")
        .value_parser(value_parser!(PathBuf))
        .help("Policy directory, overriding the configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    telemetry::init(level, matches.get_flag("log-json"))?;

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    match matches.subcommand() {
        Some(("process", args)) => {
            apply_policy_override(&mut config, args);
            process(config, args).await
        }
        Some(("check-policies", args)) => {
            let Some(dir) = args.get_one::<PathBuf>("dir") else {
                bail!("policy directory is required");
            };
            check_policies(dir)
        }
        Some(("run", args)) => {
            apply_policy_override(&mut config, args);
            run(config, args).await
        }
        _ => Ok(()),
    }
}

fn apply_policy_override(config: &mut ControllerConfig, args: &ArgMatches) {
    if let Some(dir) = args.get_one::<PathBuf>("policies") {
        config.policy.directory = Some(dir.clone());
    }
}

async fn cluster(args: &ArgMatches) -> anyhow::Result<Arc<dyn ClusterApi>> {
    if let Some(path) = args.get_one::<PathBuf>("cluster") {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster fixture {}", path.display()))?;
        let fixture = ClusterFixture::from_yaml(&text)
            .with_context(|| format!("parsing cluster fixture {}", path.display()))?;
        return Ok(Arc::new(InMemoryCluster::from_fixture(fixture)));
    }
    live_cluster().await
}

#[cfg(feature = "kube")]
async fn live_cluster() -> anyhow::Result<Arc<dyn ClusterApi>> {
    let cluster = sp_enrichment::KubeCluster::try_default()
        .await
        .context("connecting to the cluster")?;
    Ok(Arc::new(cluster))
}

#[cfg(not(feature = "kube"))]
async fn live_cluster() -> anyhow::Result<Arc<dyn ClusterApi>> {
    bail!("--cluster is required: built without the `kube` feature")
}

async fn process(config: ControllerConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let Some(path) = args.get_one::<PathBuf>("request") else {
        bail!("--request is required");
    };
    let manifest = RequestManifest::load(path)?;
    let store = Arc::new(InMemoryStore::new());
    let created = store.create(manifest.into_object()).await?;

    let mut services = Services::build(config, cluster(args).await?, store.clone());
    services.start().await;
    let cancel = CancellationToken::new();
    let outcome = services
        .reconciler
        .run_to_completion(&created.key, &cancel)
        .await;
    services.shutdown().await;

    let Some(obj) = outcome? else {
        bail!("{} disappeared during processing", created.key);
    };
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&obj)?);
    } else {
        print!("{}", serde_yaml::to_string(&obj)?);
    }
    Ok(())
}

fn check_policies(dir: &Path) -> anyhow::Result<()> {
    let bundle = match PolicyBundle::load_dir(dir) {
        Ok(bundle) => bundle,
        Err(err) => {
            eprintln!("REJECTED {}: {err}", dir.display());
            std::process::exit(1);
        }
    };
    println!("Policy bundle: {}", dir.display());
    println!("  Digest: {}", bundle.digest());
    if bundle.is_empty() {
        println!("  No rule sets; every classifier will use its fallbacks");
    }
    for domain in bundle.domains() {
        if let Some(rules) = bundle.rule_set(domain) {
            println!(
                "  {domain}: {} rules, mode {:?}, default {}",
                rules.len(),
                rules.mode(),
                if rules.has_default() { "yes" } else { "no" }
            );
        }
    }
    Ok(())
}

async fn run(config: ControllerConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let Some(dir) = args.get_one::<PathBuf>("requests") else {
        bail!("--requests is required");
    };
    let manifests = RequestManifest::load_dir(dir)?;
    let store = Arc::new(InMemoryStore::new());
    let mut services = Services::build(config, cluster(args).await?, store.clone());
    services.start().await;

    let events = store.watch();
    let feeder_cancel = CancellationToken::new();
    let feeder = tokio::spawn(Arc::clone(&services.controller).follow(
        store.clone(),
        events,
        feeder_cancel.clone(),
    ));

    for manifest in manifests {
        let key = manifest.key();
        if let Err(err) = store.create(manifest.into_object()).await {
            tracing::warn!(resource = %key, error = %err, "skipping request");
        }
    }
    tracing::info!(objects = store.len(), "requests submitted; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    feeder_cancel.cancel();
    let _ = feeder.await;
    services.shutdown().await;

    for key in store.list().await? {
        if let Some(obj) = store.get(&key).await? {
            let detail = obj
                .status
                .failure
                .as_ref()
                .map(|f| format!(" ({})", f.reason))
                .unwrap_or_default();
            println!("{key}: {}{detail}", obj.phase());
        }
    }
    Ok(())
}
