//! Viewmaster in-process simulation driver.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{self, LevelFilter};
use rand::Rng;
use tokio::runtime::Builder;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use viewmaster::{
    logger_init, pf_error, pf_info, pf_warn, LocalCluster, Master, View,
    ViewServer, ViewmasterError, WorkerCaller, ME,
};

/// Which service to simulate.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum SimMode {
    /// View service with crashing primary/backup candidates.
    View,

    /// MapReduce master over flaky in-process workers.
    MapReduce,
}

impl SimMode {
    /// Parses a mode name, case-insensitively.
    fn parse_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "view" | "viewservice" => Some(SimMode::View),
            "mapreduce" | "mr" => Some(SimMode::MapReduce),
            _ => None,
        }
    }
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Simulation mode: 'view' or 'mapreduce'.
    #[arg(short, long)]
    mode: String,

    /// Number of simulated primary/backup servers (view mode).
    #[arg(short = 'n', long, default_value_t = 3)]
    servers: u8,

    /// Number of simulated workers (mapreduce mode).
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Number of Map jobs (mapreduce mode).
    #[arg(long, default_value_t = 10)]
    n_map: usize,

    /// Number of Reduce jobs (mapreduce mode).
    #[arg(long, default_value_t = 3)]
    n_reduce: usize,

    /// Per-ping crash probability of a server (view mode), or per-call
    /// failure probability of a worker (mapreduce mode).
    #[arg(short, long, default_value_t = 0.05)]
    fail_prob: f64,

    /// Simulated execution time of one job in millisecs (mapreduce mode).
    #[arg(long, default_value_t = 10)]
    job_delay_ms: u64,

    /// Period in millisecs at which workers whose token got discarded
    /// restart and register again (mapreduce mode).
    #[arg(long, default_value_t = 200)]
    rejoin_ms: u64,

    /// How long to run the view simulation, in seconds.
    #[arg(short, long, default_value_t = 10)]
    duration_secs: u64,

    /// Service config in TOML format, e.g. "dead_pings = 3".
    #[arg(short, long)]
    config: Option<String>,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(ViewmasterError)` on any error.
    fn sanitize(&self) -> Result<SimMode, ViewmasterError> {
        if self.servers < 2 {
            Err(ViewmasterError::msg(format!(
                "invalid number of servers {}",
                self.servers
            )))
        } else if self.workers == 0 {
            Err(ViewmasterError::msg(format!(
                "invalid number of workers {}",
                self.workers
            )))
        } else if !(0.0..1.0).contains(&self.fail_prob) {
            Err(ViewmasterError::msg(format!(
                "invalid fail_prob {}",
                self.fail_prob
            )))
        } else if self.rejoin_ms == 0 {
            Err(ViewmasterError::msg(format!(
                "invalid rejoin_ms {}",
                self.rejoin_ms
            )))
        } else if self.duration_secs == 0 {
            Err(ViewmasterError::msg(format!(
                "invalid duration_secs {}",
                self.duration_secs
            )))
        } else if self.threads < 2 {
            Err(ViewmasterError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            SimMode::parse_name(&self.mode).ok_or(ViewmasterError::msg(
                format!("mode name '{}' unrecognized", self.mode),
            ))
        }
    }
}

/// Decides whether a server crashes now, and if so for how many ticks. The
/// outage always lasts long enough for the view service to notice.
fn roll_crash(crash_prob: f64, dead_pings: u64) -> Option<u64> {
    let mut rng = rand::thread_rng();
    if rng.gen_bool(crash_prob) {
        Some(rng.gen_range(dead_pings..=3 * dead_pings))
    } else {
        None
    }
}

/// One simulated primary/backup server: pings the view service every ping
/// interval, occasionally crashes for a while, and restarts with viewnum 0.
async fn server_thread(
    me: String,
    vs: Arc<ViewServer>,
    crash_prob: f64,
    mut rx_stop: watch::Receiver<bool>,
) {
    let interval = Duration::from_millis(vs.config().ping_interval_ms);
    let dead_pings = vs.config().dead_pings;
    let mut ticker = time::interval(interval);
    let mut viewnum = 0;
    let mut down_ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if down_ticks > 0 {
                    down_ticks -= 1;
                    if down_ticks == 0 {
                        pf_info!("server '{}' restarting", me);
                        viewnum = 0;
                    }
                    continue;
                }

                match vs.heartbeat(&me, viewnum) {
                    Ok(view) => viewnum = view.viewnum,
                    Err(e) => {
                        pf_warn!("server '{}' heartbeat failed: {}", me, e);
                        continue;
                    }
                }

                if let Some(ticks) = roll_crash(crash_prob, dead_pings) {
                    pf_info!("server '{}' crashing for {} ticks", me, ticks);
                    down_ticks = ticks;
                }
            },

            _ = rx_stop.changed() => break,
        }
    }
}

/// Runs the view service simulation until `duration` elapses or a
/// termination signal arrives.
async fn simulate_view(
    args: &CliArgs,
    mut rx_term: watch::Receiver<bool>,
) -> Result<(), ViewmasterError> {
    let vs = ViewServer::new_and_setup("vs", args.config.as_deref()).await?;
    let interval = Duration::from_millis(vs.config().ping_interval_ms);

    let (tx_stop, rx_stop) = watch::channel(false);
    let servers: Vec<JoinHandle<()>> = (0..args.servers)
        .map(|i| {
            tokio::spawn(server_thread(
                format!("s{}", i),
                Arc::clone(&vs),
                args.fail_prob,
                rx_stop.clone(),
            ))
        })
        .collect();

    // watch the view and report every change observed
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut ticker = time::interval(interval);
    let mut last = View::default();
    let mut changes = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let view = vs.query()?;
                if view != last {
                    pf_info!(
                        "view {}: primary '{}' backup '{}'",
                        view.viewnum, view.primary, view.backup
                    );
                    if view.viewnum < last.viewnum {
                        return Err(ViewmasterError::msg(format!(
                            "viewnum went backwards: {} -> {}",
                            last.viewnum, view.viewnum
                        )));
                    }
                    last = view;
                    changes += 1;
                }
                if Instant::now() >= deadline {
                    break;
                }
            },

            _ = rx_term.changed() => {
                pf_warn!("simulation caught termination signal");
                break;
            }
        }
    }

    tx_stop.send(true)?;
    for res in futures::future::join_all(servers).await {
        res?;
    }
    pf_info!(
        "observed {} view changes, final viewnum {}, {} calls served",
        changes,
        last.viewnum,
        vs.rpc_count()
    );
    vs.kill();
    Ok(())
}

/// Every `period`, lets each worker that lost its token restart and
/// register again. Only returns on a registration error.
async fn rejoin_workers(
    master: &Master,
    period: Duration,
) -> Result<(), ViewmasterError> {
    let registrar = master.registrar();
    let mut ticker = time::interval(period);
    loop {
        ticker.tick().await;
        for info in master.workers() {
            if !info.has_token() && registrar.register(&info.endpoint)? {
                pf_info!("worker '{}' restarted and rejoined", info.endpoint);
            }
        }
    }
}

/// Runs one MapReduce job over a pool of in-process workers.
async fn simulate_mapreduce(
    args: &CliArgs,
    mut rx_term: watch::Receiver<bool>,
) -> Result<(), ViewmasterError> {
    let cluster = Arc::new(LocalCluster::new());
    let job_delay = Duration::from_millis(args.job_delay_ms);
    let names: Vec<String> =
        (0..args.workers).map(|i| format!("w{}", i)).collect();
    for name in &names {
        cluster.add_worker(name, args.fail_prob, job_delay)?;
    }

    let master = Master::new_and_setup(
        "sim-input",
        args.n_map,
        args.n_reduce,
        Arc::clone(&cluster) as Arc<dyn WorkerCaller>,
        args.config.as_deref(),
    )
    .await?;
    let registrar = master.registrar();
    for name in &names {
        registrar.register(name)?;
    }
    let rejoin_period = Duration::from_millis(args.rejoin_ms);

    let start = Instant::now();
    tokio::select! {
        njobs = master.run() => {
            let njobs = njobs?;
            pf_info!("run finished in {:?}", start.elapsed());
            for name in &names {
                match njobs.get(name) {
                    Some(n) => pf_info!("worker '{}' completed {} jobs", name, n),
                    None => pf_warn!("worker '{}' did not report", name),
                }
            }
            pf_info!(
                "{} jobs reported in total, {} expected",
                njobs.values().sum::<u64>(),
                args.n_map + args.n_reduce
            );
        },

        res = rejoin_workers(&master, rejoin_period) => res?,

        _ = rx_term.changed() => {
            pf_warn!("simulation caught termination signal");
            for info in master.workers() {
                pf_info!(
                    "worker '{}' completed {} jobs so far",
                    info.endpoint, info.jobs_completed
                );
            }
        }
    }

    Ok(())
}

/// Actual main function of the simulation driver.
fn sim_main() -> Result<(), ViewmasterError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let mode = args.sanitize()?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-sim")
            .build()?;

        runtime.block_on(async move {
            match mode {
                SimMode::View => simulate_view(&args, rx_term).await?,
                SimMode::MapReduce => simulate_mapreduce(&args, rx_term).await?,
            }

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ViewmasterError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the simulation driver.
fn main() -> ExitCode {
    logger_init();
    let _ = ME.set("sim".into());

    if let Err(ref e) = sim_main() {
        pf_error!("sim_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}


#[cfg(test)]
mod sim_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn flaky_workers_finish() -> Result<(), ViewmasterError> {
        let args = CliArgs {
            mode: "mapreduce".into(),
            servers: 3,
            workers: 4,
            n_map: 20,
            n_reduce: 5,
            fail_prob: 0.5,
            job_delay_ms: 1,
            rejoin_ms: 10,
            duration_secs: 10,
            config: None,
            threads: 4,
        };
        let (_tx_term, rx_term) = watch::channel(false);
        time::timeout(
            Duration::from_secs(20),
            simulate_mapreduce(&args, rx_term),
        )
        .await
        .map_err(|e| ViewmasterError::msg(e.to_string()))?
    }
}
