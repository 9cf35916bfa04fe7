//! Run a fleet of relay nodes on a lossy simulated network and report how many messages
//! reached a verified proof on every node.
//!
//! ```bash
//! cargo run --bin relay-simulate -- --powers 100,100,100,100 --quorum 300 --success-rate 0.7
//! ```

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use prometheus_client::{encoding::text::encode, registry::Registry};
use relay_cryptography::KeyType;
use relay_node::{
    fleet::{self, Fleet},
    Config, Error,
};
use relay_p2p::simulated::network::Link;
use relay_utils::Signaler;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    // Create logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse arguments
    let matches = command().get_matches();
    let node = match matches.get_one::<String>("config") {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(?err, path, "failed to load config");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let cfg = fleet_config(&matches, node);
    let messages = matches.get_one::<usize>("messages").copied().unwrap_or(1);
    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(30_000);
    let timeout = Duration::from_millis(timeout);
    let print_metrics = matches.get_flag("metrics");

    // Start runtime
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(?err, "failed to start runtime");
            std::process::exit(1);
        }
    };
    if let Err(err) = runtime.block_on(simulate(cfg, messages, timeout, print_metrics)) {
        error!(?err, "simulation failed");
        std::process::exit(1);
    }
}

fn command() -> Command {
    Command::new("relay-simulate")
        .about("run relay nodes on a simulated network")
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(String))
                .help("Path to a node configuration YAML file"),
        )
        .arg(
            Arg::new("powers")
                .long("powers")
                .value_delimiter(',')
                .value_parser(value_parser!(u64))
                .default_value("100,100,100,100")
                .help("Voting power of each validator (one node each)"),
        )
        .arg(
            Arg::new("quorum")
                .long("quorum")
                .value_parser(value_parser!(u64))
                .default_value("300")
                .help("Voting power required for a proof"),
        )
        .arg(
            Arg::new("aggregators")
                .long("aggregators")
                .value_parser(value_parser!(usize))
                .default_value("1")
                .help("Number of nodes that aggregate"),
        )
        .arg(
            Arg::new("key-type")
                .long("key-type")
                .value_parser(["bn254", "bls12381"])
                .default_value("bn254")
                .help("Signature scheme of the validators"),
        )
        .arg(
            Arg::new("latency")
                .long("latency")
                .value_parser(value_parser!(u64))
                .default_value("10")
                .help("Link latency in milliseconds"),
        )
        .arg(
            Arg::new("success-rate")
                .long("success-rate")
                .value_parser(value_parser!(f64))
                .default_value("0.9")
                .help("Probability that a message crosses a link"),
        )
        .arg(
            Arg::new("messages")
                .long("messages")
                .value_parser(value_parser!(usize))
                .default_value("5")
                .help("Number of messages every node signs"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(u64))
                .default_value("30000")
                .help("Milliseconds to wait for each message's proof"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .default_value("0")
                .help("Seed for keys and link failures"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print metrics on exit"),
        )
}

fn fleet_config(matches: &ArgMatches, node: Config) -> fleet::Config {
    let key_type = match matches.get_one::<String>("key-type").map(String::as_str) {
        Some("bls12381") => KeyType::Bls12381,
        _ => KeyType::BlsBn254,
    };
    let latency = matches.get_one::<u64>("latency").copied().unwrap_or(10);
    let success_rate = matches.get_one::<f64>("success-rate").copied().unwrap_or(1.0);
    fleet::Config {
        key_type,
        powers: matches
            .get_many::<u64>("powers")
            .map(|powers| powers.copied().map(u128::from).collect())
            .unwrap_or_default(),
        quorum_threshold: matches
            .get_one::<u64>("quorum")
            .copied()
            .map_or(0, u128::from),
        aggregators: matches.get_one::<usize>("aggregators").copied().unwrap_or(1),
        node,
        link: Link {
            latency: Duration::from_millis(latency),
            success_rate,
        },
        seed: matches.get_one::<u64>("seed").copied().unwrap_or(0),
    }
}

async fn simulate(
    cfg: fleet::Config,
    messages: usize,
    timeout: Duration,
    print_metrics: bool,
) -> Result<(), Error> {
    if cfg.powers.is_empty() {
        return Err(Error::InvalidConfig("at least one validator is required"));
    }
    let nodes = cfg.powers.len();
    let mut registry = Registry::default();
    let (signaler, stopped) = Signaler::new();
    let mut fleet = Fleet::start(cfg, &mut registry, stopped)?;
    fleet.connect_all()?;

    let attempts = (timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1) as usize;
    let mut verified = 0;
    for sequence in 0..messages {
        let message = format!("validator set header {sequence}");
        let mut request_id = None;
        for index in 0..nodes {
            let signature = fleet.sign(index, message.as_bytes()).await?;
            request_id = Some(signature.request_id);
        }
        let Some(request_id) = request_id else {
            continue;
        };
        if fleet.wait_for_proof(request_id, POLL_INTERVAL, attempts).await {
            info!(sequence, ?request_id, "proof verified by every node");
            verified += 1;
        } else {
            let statuses = fleet.statuses(request_id).await;
            warn!(sequence, ?request_id, ?statuses, "proof not verified by every node");
        }
    }
    info!(verified, messages, "simulation finished");

    let _ = signaler.signal(0);
    fleet.join().await;
    if print_metrics {
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_ok() {
            println!("{buffer}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_config_from_args() {
        let matches = command().get_matches_from([
            "relay-simulate",
            "--powers",
            "100,200,300",
            "--quorum",
            "450",
            "--key-type",
            "bls12381",
            "--success-rate",
            "0.5",
        ]);
        let cfg = fleet_config(&matches, Config::default());
        assert_eq!(cfg.powers, vec![100, 200, 300]);
        assert_eq!(cfg.quorum_threshold, 450);
        assert_eq!(cfg.key_type, KeyType::Bls12381);
        assert_eq!(cfg.link.success_rate, 0.5);
        assert_eq!(cfg.aggregators, 1);
    }
}
