use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kafkarig::{
    BrokerId, ClusterService, ManifestLoader, PartitionId, ProbeConfig, ReassignmentPlan,
    RetryPolicy, StreamProbe, TopicSpec, telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "kafkarig", version, about = "Drive a broker cluster for system tests")]
struct Cli {
    /// Cluster manifest (JSON or YAML)
    #[arg(long, global = true, default_value = "kafkarig.yaml")]
    manifest: PathBuf,

    /// Default log directives when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every broker, then create the manifest's topics
    Start,
    /// Stop one broker or all of them
    Stop(StopCmd),
    /// Stop a broker, wait, and start it again
    Restart(RestartCmd),
    /// Kill leftovers and remove broker artifacts
    Clean(MemberOpt),
    /// Exit 0 iff the broker has a live process
    Alive(MemberArg),
    /// Create a topic through the coordination service
    CreateTopic(CreateTopicCmd),
    /// Print the coordination service's topic description
    Describe(TopicArg),
    /// Print the current leader of a partition
    Leader(LeaderCmd),
    /// Print the bootstrap server list
    Bootstrap,
    /// Verify (or execute) a partition reassignment plan
    Reassign(ReassignCmd),
    /// Consume a topic with a console consumer and print the messages
    Consume(ConsumeCmd),
}

#[derive(Args, Debug)]
struct MemberArg {
    #[arg(long)]
    member: u32,
}

#[derive(Args, Debug)]
struct MemberOpt {
    /// Restrict to one broker (1-based); all brokers when omitted
    #[arg(long)]
    member: Option<u32>,
}

#[derive(Args, Debug)]
struct StopCmd {
    #[arg(long)]
    member: Option<u32>,
    /// SIGKILL instead of SIGTERM
    #[arg(long)]
    kill: bool,
}

#[derive(Args, Debug)]
struct RestartCmd {
    #[arg(long)]
    member: u32,
    #[arg(long, default_value_t = 0)]
    wait_secs: u64,
    #[arg(long)]
    kill: bool,
}

#[derive(Args, Debug)]
struct CreateTopicCmd {
    #[arg(long)]
    topic: String,
    #[arg(long, default_value_t = 1)]
    partitions: u32,
    #[arg(long, default_value_t = 1)]
    replication_factor: u32,
    /// Topic config KEY=VALUE (repeatable)
    #[arg(long = "config")]
    configs: Vec<String>,
}

#[derive(Args, Debug)]
struct TopicArg {
    #[arg(long)]
    topic: String,
}

#[derive(Args, Debug)]
struct LeaderCmd {
    #[arg(long)]
    topic: String,
    #[arg(long, default_value_t = 0)]
    partition: u32,
    /// Attempts before giving up while leadership propagates
    #[arg(long, default_value_t = 1)]
    retries: u32,
}

#[derive(Args, Debug)]
struct ReassignCmd {
    /// Reassignment plan in the tool's JSON format
    #[arg(long)]
    plan: PathBuf,
    /// Submit the plan instead of verifying it
    #[arg(long)]
    execute: bool,
}

#[derive(Args, Debug)]
struct ConsumeCmd {
    #[arg(long)]
    topic: String,
    #[arg(long)]
    from_beginning: bool,
    /// Stop once nothing arrived for this long
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
    /// Broker node to run the consumer on
    #[arg(long, default_value_t = 1)]
    member: u32,
    /// Upper bound on the whole run
    #[arg(long, default_value_t = 3600)]
    max_wait_secs: u64,
}

fn parse_configs(pairs: &[String]) -> Result<Vec<(String, String)>, String> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("expected KEY=VALUE, got '{pair}'"))
        })
        .collect()
}

fn selected(service: &ClusterService, member: Option<u32>) -> Vec<BrokerId> {
    match member {
        Some(id) => vec![BrokerId(id)],
        None => service.members().iter().map(|m| m.id()).collect(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    telemetry::init_with_default(&cli.log);

    let manifest = ManifestLoader::from_path(&cli.manifest)?;
    let service = ClusterService::from_manifest(&manifest)?;

    match cli.command {
        Commands::Start => {
            service.start().await?;
            println!("{}", service.bootstrap_servers());
        }
        Commands::Stop(args) => {
            for id in selected(&service, args.member) {
                service.stop_member(id, !args.kill).await?;
                service.wait_until_stopped(id).await?;
            }
        }
        Commands::Restart(args) => {
            service
                .restart_member(
                    BrokerId(args.member),
                    Duration::from_secs(args.wait_secs),
                    !args.kill,
                )
                .await?;
        }
        Commands::Clean(args) => {
            for id in selected(&service, args.member) {
                service.clean_member(id).await?;
            }
        }
        Commands::Alive(args) => {
            let id = BrokerId(args.member);
            service.member(id)?;
            let alive = service.is_alive(id).await;
            println!("{alive}");
            if !alive {
                std::process::exit(1);
            }
        }
        Commands::CreateTopic(args) => {
            let mut spec = TopicSpec::new(args.topic, args.partitions, args.replication_factor);
            for (key, value) in parse_configs(&args.configs)? {
                spec = spec.with_config(key, value);
            }
            service.create_topic(&spec).await?;
        }
        Commands::Describe(args) => {
            print!("{}", service.describe_topic(&args.topic).await?);
        }
        Commands::Leader(args) => {
            let policy = RetryPolicy {
                max_attempts: args.retries.max(1),
                ..RetryPolicy::default()
            };
            let leader = service
                .await_leader(&args.topic, PartitionId(args.partition), policy)
                .await?;
            let out = serde_json::json!({
                "broker_id": leader.id().0,
                "hostname": leader.hostname(),
            });
            println!("{out}");
        }
        Commands::Bootstrap => {
            println!("{}", service.bootstrap_servers());
        }
        Commands::Reassign(args) => {
            let plan: ReassignmentPlan = serde_json::from_str(&std::fs::read_to_string(&args.plan)?)?;
            if args.execute {
                print!("{}", service.execute_reassignment(&plan).await?);
            } else {
                let complete = service.verify_reassignment(&plan).await?;
                println!("{}", if complete { "complete" } else { "in progress" });
            }
        }
        Commands::Consume(args) => {
            let node = service.member(BrokerId(args.member))?.node_handle();
            let mut config = ProbeConfig::for_cluster(&service, args.topic)
                .from_beginning(args.from_beginning);
            if let Some(ms) = args.idle_timeout_ms {
                config = config.idle_timeout(Duration::from_millis(ms));
            }

            let mut probe = StreamProbe::with_validator(vec![node], config, |line| {
                Some(line.to_string())
            });
            probe.start(1).await?;

            let finished = tokio::select! {
                result = probe.wait_until_finished(1, Duration::from_secs(args.max_wait_secs)) => Some(result),
                _ = tokio::signal::ctrl_c() => None,
            };
            if let Some(Err(e)) = finished {
                tracing::warn!("Consumer did not finish on its own: {e}");
            }
            probe.stop(1).await?;

            for message in probe.messages(1)? {
                println!("{message}");
            }
        }
    }
    Ok(())
}
