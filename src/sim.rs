//! Demo, benchmark, and stress-test runners behind the CLI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use crate::coordinator::{Coordinator, SimulationConfig, SimulationReport, Variant};
use crate::error::ConfigError;
use crate::request::RideRequest;

pub const DEFAULT_STRESS_CONTENDERS: [usize; 5] = [1, 2, 4, 16, 50];

const CSV_HEADER: &str =
    "contenders,trials,elapsed_ms,trials_per_s,cpu_user_s,cpu_sys_s,attempts,violations";

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data and getrusage fully initializes it on success.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Aggregated metrics from one single-winner benchmark.
pub struct BenchResult {
    pub contenders: usize,
    pub trials: usize,
    pub elapsed_ms: f64,
    pub throughput: f64,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
    pub attempts: usize,
    /// Trials where the number of successful claims was not exactly one.
    pub violations: usize,
}

impl BenchResult {
    fn csv_row(&self) -> String {
        let fmt_cpu = |value: Option<f64>| {
            value
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "NA".to_string())
        };
        format!(
            "{},{},{:.2},{:.2},{},{},{},{}",
            self.contenders,
            self.trials,
            self.elapsed_ms,
            self.throughput,
            fmt_cpu(self.cpu_user_s),
            fmt_cpu(self.cpu_sys_s),
            self.attempts,
            self.violations
        )
    }
}

/// Race `contenders` threads on `trials` fresh requests.
///
/// Threads are spawned once and released per trial through a shared barrier,
/// so every trial starts with all contenders hitting `try_claim` together.
pub fn benchmark_once(contenders: usize, trials: usize) -> Result<BenchResult, ConfigError> {
    if contenders == 0 {
        return Err(ConfigError::ZeroContenders);
    }
    if trials == 0 {
        return Err(ConfigError::ZeroTrials);
    }
    let requests: Arc<Vec<RideRequest>> = Arc::new(
        (0..trials)
            .map(|trial| RideRequest::new(format!("bench-{trial}"), "bench"))
            .collect(),
    );
    let wins: Arc<Vec<AtomicUsize>> = Arc::new((0..trials).map(|_| AtomicUsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(contenders));

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let mut handles = Vec::with_capacity(contenders);
    for contender in 0..contenders {
        let requests = Arc::clone(&requests);
        let wins = Arc::clone(&wins);
        let barrier = Arc::clone(&barrier);
        let handle = thread::Builder::new()
            .name(format!("contender-{contender}"))
            .spawn(move || {
                let name = format!("contender-{contender}");
                for (request, won) in requests.iter().zip(wins.iter()) {
                    barrier.wait();
                    if request.try_claim(&name) {
                        won.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .expect("failed to spawn contender thread");
        handles.push(handle);
    }
    for handle in handles {
        handle.join().expect("contender thread panicked");
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let throughput = if elapsed_ms > 0.0 {
        trials as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    let violations = wins
        .iter()
        .filter(|won| won.load(Ordering::SeqCst) != 1)
        .count();
    let attempts = requests.iter().map(RideRequest::attempts).sum();

    Ok(BenchResult {
        contenders,
        trials,
        elapsed_ms,
        throughput,
        cpu_user_s,
        cpu_sys_s,
        attempts,
        violations,
    })
}

/// Print the key=value summary block for one simulation.
pub fn print_summary(config: &SimulationConfig, report: &SimulationReport) {
    println!("RIDE SUMMARY");
    println!("variant={}", report.variant.as_str());
    println!("request={} {} -> {}", report.request_id, report.origin, report.destination);
    println!("drivers={}", config.drivers.join(","));
    println!("outcome={}", report.outcome);
    println!("winners_reported={}", report.winners_reported());
    println!("consistent={}", report.consistent());
    println!("timed_out={}", report.timed_out);
    println!("attempts={}", report.attempts);
    println!("elapsed_ms={}", report.elapsed.as_millis());
    match report.time_to_claim {
        Some(at) => println!("time_to_claim_ms={}", at.as_millis()),
        None => println!("time_to_claim_ms=NA"),
    }
    for driver_report in &report.reports {
        println!("driver:{}={}", driver_report.driver, driver_report.outcome);
    }
    for name in &report.unreported {
        println!("driver:{name}=unreported");
    }
}

/// Run one simulation and print its summary.
pub fn run_demo(config: SimulationConfig, variant: Variant) -> Result<SimulationReport, ConfigError> {
    tracing::debug!(variant = variant.as_str(), seed = config.seed, "demo start");
    let coordinator = Coordinator::new(config)?;
    let report = coordinator.run(variant);
    print_summary(coordinator.config(), &report);
    Ok(report)
}

/// Run a single benchmark and print one CSV row.
pub fn run_benchmark(contenders: usize, trials: usize) -> Result<(), ConfigError> {
    let result = benchmark_once(contenders, trials)?;
    println!("{CSV_HEADER}");
    println!("{}", result.csv_row());
    if result.violations > 0 {
        eprintln!("# violation,single_winner,{}", result.violations);
    }
    Ok(())
}

/// Sweep benchmarks over several contender counts.
pub fn run_stress(contender_sets: &[usize], trials: usize) -> Result<(), ConfigError> {
    if contender_sets.is_empty() || contender_sets.contains(&0) {
        return Err(ConfigError::ZeroContenders);
    }
    println!("{CSV_HEADER}");
    for &contenders in contender_sets {
        let result = benchmark_once(contenders, trials)?;
        println!("{}", result.csv_row());
        if result.violations > 0 {
            eprintln!("# violation,single_winner,contenders={contenders},{}", result.violations);
        }
    }
    Ok(())
}
