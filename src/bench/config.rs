//! Benchmark run parameters.

use serde::{Deserialize, Serialize};

use crate::utils::RpcDistError;

/// Parameters of a benchmark run. Each run works on one immutable snapshot;
/// changes publish a whole new snapshot.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Whether writes wait for all replies.
    pub synchronous: bool,

    /// Whether method calls are flagged out-of-band.
    pub out_of_band: bool,

    /// Number of concurrent invokers per node.
    pub num_threads: i32,

    /// Total number of calls issued per node.
    pub num_msgs: i32,

    /// Size in bytes of GET replies.
    pub msg_size: i32,

    /// Number of members each write goes to.
    pub anycast_count: i32,

    /// Fraction of iterations taking the read path.
    pub read_percentage: f64,

    /// Timeout in millisecs of synchronous calls on the read and write
    /// paths.
    pub call_timeout_ms: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            synchronous: false,
            out_of_band: false,
            num_threads: 1,
            num_msgs: 50000,
            msg_size: 1000,
            anycast_count: 1,
            read_percentage: 0.8,
            call_timeout_ms: 5000,
        }
    }
}

impl BenchConfig {
    /// Parses initial values from a TOML string, falling back to defaults for
    /// fields not given.
    pub fn parse(config_str: Option<&str>) -> Result<Self, RpcDistError> {
        let config = parsed_config!(config_str => BenchConfig;
                                    synchronous, out_of_band, num_threads,
                                    num_msgs, msg_size, anycast_count,
                                    read_percentage, call_timeout_ms)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field for a value a run can use.
    pub fn validate(&self) -> Result<(), RpcDistError> {
        check_num_threads(self.num_threads)?;
        check_num_msgs(self.num_msgs)?;
        check_msg_size(self.msg_size)?;
        check_anycast_count(self.anycast_count)?;
        if !(0.0..=1.0).contains(&self.read_percentage) {
            return Err(RpcDistError::msg(format!(
                "invalid read_percentage {}",
                self.read_percentage
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(RpcDistError::msg("invalid call_timeout_ms 0"));
        }
        Ok(())
    }

    /// Number of iterations each invoker runs.
    pub fn msgs_per_invoker(&self) -> Result<usize, RpcDistError> {
        split_workload(self.num_msgs, self.num_threads)
    }

    /// Interval of invoker progress logging.
    pub fn print_interval(&self) -> usize {
        (self.num_msgs / 10).max(1) as usize
    }
}

pub(crate) fn check_num_threads(num: i32) -> Result<(), RpcDistError> {
    if num <= 0 {
        return Err(RpcDistError::msg(format!("invalid num_threads {}", num)));
    }
    Ok(())
}

pub(crate) fn check_num_msgs(num: i32) -> Result<(), RpcDistError> {
    if num <= 0 {
        return Err(RpcDistError::msg(format!("invalid num_msgs {}", num)));
    }
    Ok(())
}

pub(crate) fn check_msg_size(size: i32) -> Result<(), RpcDistError> {
    if size < 0 {
        return Err(RpcDistError::msg(format!("invalid msg_size {}", size)));
    }
    Ok(())
}

pub(crate) fn check_anycast_count(count: i32) -> Result<(), RpcDistError> {
    if count <= 0 {
        return Err(RpcDistError::msg(format!(
            "invalid anycast_count {}",
            count
        )));
    }
    Ok(())
}

/// Splits `num_msgs` calls evenly across `num_threads` invokers. With more
/// than one invoker the count must divide evenly.
pub fn split_workload(
    num_msgs: i32,
    num_threads: i32,
) -> Result<usize, RpcDistError> {
    check_num_threads(num_threads)?;
    if num_msgs < 0 {
        return Err(RpcDistError::msg(format!(
            "invalid num_msgs {}",
            num_msgs
        )));
    }
    if num_threads > 1 && num_msgs % num_threads != 0 {
        return Err(RpcDistError::msg(format!(
            "num_msgs ({}) must be divisible by num_threads ({})",
            num_msgs, num_threads
        )));
    }
    Ok((num_msgs / num_threads) as usize)
}
