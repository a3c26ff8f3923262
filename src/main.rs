mod cancel;
mod coordinator;
mod dispatcher;
mod driver;
mod error;
mod event_bus;
mod logging;
mod request;
mod sim;
mod subscriber;
mod types;
mod work_queue;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};

use crate::coordinator::{SimulationConfig, Variant};

fn cli() -> Command {
    Command::new("ride_dispatch")
        .about("Single-winner ride claim simulations")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("log at debug level"),
        )
        .subcommand(
            Command::new("demo")
                .about("run one request against a roster of drivers (default)")
                .arg(
                    Arg::new("variant")
                        .long("variant")
                        .value_parser(["polling", "event"])
                        .default_value("polling"),
                )
                .arg(
                    Arg::new("drivers")
                        .long("drivers")
                        .value_delimiter(',')
                        .help("comma-separated driver names"),
                )
                .arg(
                    Arg::new("max-delay-ms")
                        .long("max-delay-ms")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("wait-ms")
                        .long("wait-ms")
                        .value_parser(value_parser!(u64)),
                )
                .arg(Arg::new("seed").long("seed").value_parser(value_parser!(u64)))
                .arg(
                    Arg::new("pool-size")
                        .long("pool-size")
                        .value_parser(value_parser!(usize)),
                )
                .arg(Arg::new("pre-claim").long("pre-claim"))
                .arg(Arg::new("origin").long("origin"))
                .arg(Arg::new("destination").long("destination")),
        )
        .subcommand(
            Command::new("bench")
                .about("race contenders on many fresh requests and print CSV")
                .arg(
                    Arg::new("contenders")
                        .long("contenders")
                        .value_parser(value_parser!(usize))
                        .default_value("50"),
                )
                .arg(
                    Arg::new("trials")
                        .long("trials")
                        .value_parser(value_parser!(usize))
                        .default_value("10000"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("sweep the benchmark over several contender counts")
                .arg(
                    Arg::new("contender-sets")
                        .long("contender-sets")
                        .value_parser(value_parser!(usize))
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("trials")
                        .long("trials")
                        .value_parser(value_parser!(usize))
                        .default_value("2000"),
                ),
        )
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn demo_config(matches: Option<&ArgMatches>) -> (SimulationConfig, Variant) {
    let variant = match matches
        .and_then(|m| m.get_one::<String>("variant"))
        .map(String::as_str)
    {
        Some("event") => Variant::EventDriven,
        _ => Variant::Polling,
    };
    let mut config = SimulationConfig::for_variant(variant);
    config.seed = wall_clock_seed();
    let Some(matches) = matches else {
        return (config, variant);
    };
    if let Some(drivers) = matches.get_many::<String>("drivers") {
        config.drivers = drivers.map(|name| name.trim().to_string()).collect();
    }
    if let Some(ms) = matches.get_one::<u64>("max-delay-ms") {
        config.max_delay = Duration::from_millis(*ms);
    }
    if let Some(ms) = matches.get_one::<u64>("wait-ms") {
        config.wait_bound = Duration::from_millis(*ms);
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.seed = *seed;
    }
    config.pool_size = matches.get_one::<usize>("pool-size").copied();
    config.pre_claim = matches.get_one::<String>("pre-claim").cloned();
    if let Some(origin) = matches.get_one::<String>("origin") {
        config.origin = origin.clone();
    }
    if let Some(destination) = matches.get_one::<String>("destination") {
        config.destination = destination.clone();
    }
    (config, variant)
}

fn main() {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("verbose"));

    let result = match matches.subcommand() {
        Some(("bench", sub)) => {
            let contenders = *sub.get_one::<usize>("contenders").expect("defaulted");
            let trials = *sub.get_one::<usize>("trials").expect("defaulted");
            sim::run_benchmark(contenders, trials)
        }
        Some(("stress", sub)) => {
            let sets: Vec<usize> = match sub.get_many::<usize>("contender-sets") {
                Some(values) => values.copied().collect(),
                None => sim::DEFAULT_STRESS_CONTENDERS.to_vec(),
            };
            let trials = *sub.get_one::<usize>("trials").expect("defaulted");
            sim::run_stress(&sets, trials)
        }
        Some(("demo", sub)) => {
            let (config, variant) = demo_config(Some(sub));
            sim::run_demo(config, variant).map(|_| ())
        }
        _ => {
            let (config, variant) = demo_config(None);
            sim::run_demo(config, variant).map(|_| ())
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}
