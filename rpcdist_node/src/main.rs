//! rpcdist group member executable.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use log::{self, LevelFilter};

use tokio::runtime::Builder;
use tokio::sync::watch;

use rpcdist::{
    logger_init, pf_error, pf_info, pf_warn, BenchConfig, Coordinator,
    GroupSpec, LocalHub, RpcDistError, RunResult, TcpGroup,
};

mod console;

use crate::console::NodeConsole;

/// Logging prefix of the executable itself.
const ME: &str = "node";

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// My member name in the group file.
    #[arg(short, long)]
    name: Option<String>,

    /// TOML file listing the group members.
    #[arg(short, long)]
    group: Option<PathBuf>,

    /// Initial benchmark configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Run this many in-process members and one benchmark, then exit.
    #[arg(long, default_value_t = 0)]
    local_nodes: usize,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

/// What the executable runs.
#[derive(Debug, PartialEq, Eq)]
enum NodeMode {
    /// In-process cluster of given size, one non-interactive run.
    Local(usize),

    /// One member of a TCP group, driven from the console.
    Tcp { name: String, group: PathBuf },
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(RpcDistError)` on any error.
    fn sanitize(&self) -> Result<NodeMode, RpcDistError> {
        if self.threads < 2 {
            return Err(RpcDistError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        if self.local_nodes > 0 {
            if self.group.is_some() {
                return Err(RpcDistError::msg(
                    "--group cannot be combined with --local-nodes",
                ));
            }
            Ok(NodeMode::Local(self.local_nodes))
        } else {
            match (&self.name, &self.group) {
                (Some(name), Some(group)) if !name.is_empty() => {
                    Ok(NodeMode::Tcp {
                        name: name.clone(),
                        group: group.clone(),
                    })
                }
                _ => Err(RpcDistError::msg(
                    "either --local-nodes or both --name and --group required",
                )),
            }
        }
    }
}

/// Spins up an in-process cluster, runs one benchmark from its first member,
/// and tears it down.
async fn run_local(
    num_nodes: usize,
    config: BenchConfig,
) -> Result<(), RpcDistError> {
    let hub = LocalHub::new();
    let mut coordinators = Vec::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let coordinator = Coordinator::new(
            Arc::new(hub.member(format!("node-{}", i))),
            config.clone(),
        )?;
        coordinator.join().await?;
        coordinators.push(coordinator);
    }

    let results = coordinators[0].start_benchmark().await?;
    let num_failed = results.iter().filter(|(_, r)| r.is_err()).count();
    let total = RunResult::aggregate(
        results.iter().filter_map(|(_, r)| r.as_ref().ok()),
    );
    pf_info!(ME; "cluster total: {}", total);

    for coordinator in &coordinators {
        coordinator.leave().await?;
    }

    if num_failed > 0 {
        return Err(RpcDistError::msg(format!(
            "{} of {} members failed the run",
            num_failed, num_nodes
        )));
    }
    Ok(())
}

/// Joins a TCP group and serves the console until termination.
async fn run_tcp(
    name: String,
    group_file: PathBuf,
    config: BenchConfig,
    rx_term: watch::Receiver<bool>,
) -> Result<(), RpcDistError> {
    let spec_str = fs::read_to_string(&group_file).map_err(|e| {
        RpcDistError::msg(format!(
            "failed to read group file {}: {}",
            group_file.display(),
            e
        ))
    })?;
    let spec = GroupSpec::parse(&spec_str)?;

    let group = TcpGroup::new(name, spec)?;
    let coordinator = Coordinator::new(Arc::new(group), config)?;
    coordinator.join().await?;

    let mut console = NodeConsole::new(coordinator.clone());
    let result = console.run(rx_term).await;
    if let Err(e) = coordinator.leave().await {
        pf_warn!(ME; "error leaving group: {}", e);
    }
    result
}

/// Actual main function of the rpcdist node executable.
fn node_main() -> Result<(), RpcDistError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let mode = args.sanitize()?;

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };
    let config = BenchConfig::parse(config_str)?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!(ME; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-node")
            .build()?;

        runtime.block_on(async move {
            match mode {
                NodeMode::Local(num_nodes) => {
                    run_local(num_nodes, config).await?
                }
                NodeMode::Tcp { name, group } => {
                    run_tcp(name, group, config, rx_term).await?
                }
            }

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), RpcDistError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the rpcdist node executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = node_main() {
        pf_error!(ME; "node_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
