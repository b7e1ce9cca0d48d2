//! sqlha-sim - run an availability-group formation in memory.

use anyhow::{Context, Result, bail};
use clap::Parser;
use sqlha_cluster::simulation::{Simulation, SimulationConfig};
use sqlha_cluster::{DatabaseRequest, HaStatus, RequestOutcome};
use sqlha_core::observability::{TracingConfig, init_tracing};

/// Simulate decentralized availability-group formation.
#[derive(Parser)]
#[command(name = "sqlha-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Nodes present from the start
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Nodes added after the first formation settles
    #[arg(long, default_value = "0")]
    late: usize,

    /// Ready nodes required to create the group
    #[arg(short, long, default_value = "3")]
    quorum: usize,

    /// Availability group name
    #[arg(short, long, default_value = "juju-ag")]
    group: String,

    /// Request a database as `NAME:USER` once the group exists
    #[arg(long)]
    request: Option<String>,

    /// Floating address reported for granted databases
    #[arg(long, default_value = "10.0.0.100")]
    vip: String,

    /// Give up after this many delivery rounds
    #[arg(long, default_value = "500")]
    max_rounds: usize,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // SQLHA_LOG_LEVEL / RUST_LOG win over -v
    let config = TracingConfig::from_env().or_filter(filter);
    init_tracing(&config)
}

fn parse_request(raw: &str) -> Result<DatabaseRequest> {
    let (database, username) = raw
        .split_once(':')
        .context("request must look like NAME:USER")?;
    Ok(DatabaseRequest::new(database, username))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    if cli.nodes == 0 {
        bail!("at least one node is required");
    }

    let mut sim = Simulation::new(SimulationConfig {
        group_name: cli.group.clone(),
        quorum: cli.quorum,
    });
    let mut units = Vec::with_capacity(cli.nodes);
    for _ in 0..cli.nodes {
        units.push(sim.add_node()?);
    }
    sim.elect(&units[0])?;

    let mut report = sim.run_until_quiescent(cli.max_rounds).await?;
    for _ in 0..cli.late {
        sim.add_node()?;
        let late = sim.run_until_quiescent(cli.max_rounds).await?;
        report.rounds += late.rounds;
        report.events += late.events;
        report.failures.extend(late.failures);
    }

    let mut grant = None;
    if let Some(raw) = cli.request.as_deref() {
        let request = parse_request(raw)?;
        let ha = HaStatus {
            clustered: true,
            vip: cli.vip.clone(),
        };
        for unit in sim.units() {
            let Some(node) = sim.node(&unit) else {
                continue;
            };
            if let RequestOutcome::Granted(g) = node.handle_database_request(&request, &ha).await? {
                println!("granted {} to {} via {}", request.database, request.username, g.db_host);
                grant = Some(g.db_host);
            }
        }
        sim.run_until_quiescent(cli.max_rounds).await?;
    }

    let phases = sim.phases();
    let group = sim.fleet().group(&cli.group);
    if cli.json {
        let output = serde_json::json!({
            "rounds": report.rounds,
            "events": report.events,
            "failures": report.failures.iter().map(|(u, e)| format!("{u}: {e}")).collect::<Vec<_>>(),
            "phases": phases.iter().map(|(n, p)| (n.to_string(), format!("{p:?}"))).collect::<std::collections::BTreeMap<_, _>>(),
            "primary": group.as_ref().map(|g| g.primary.to_string()),
            "replicas": group.as_ref().map(|g| g.replicas.iter().map(ToString::to_string).collect::<Vec<_>>()),
            "db_host": grant,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("settled after {} rounds ({} events)", report.rounds, report.events);
    for (name, phase) in &phases {
        println!("  {name:<6} {phase:?}");
    }
    match group {
        Some(g) => println!(
            "group {} primary={} replicas={}",
            cli.group,
            g.primary,
            g.replicas.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
        ),
        None => println!("group {} not created", cli.group),
    }
    for (unit, error) in &report.failures {
        println!("  failure on {unit}: {error}");
    }
    Ok(())
}
