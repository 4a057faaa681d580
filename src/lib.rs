//! Distributed RPC micro-benchmark over a group communication service.
//!
//! Every group member runs a `Coordinator`, which serves a fixed set of
//! opcode-tagged remote methods and, on request, spawns invokers issuing a
//! weighted mix of reads and writes to other members.

#[macro_use]
mod utils;

pub mod bench;
pub mod codec;
pub mod group;

mod dispatcher;
mod registry;

pub use bench::{split_workload, BenchConfig, Coordinator, RunResult};
pub use codec::{Arg, ArgKind, CodecError, MethodCall, Opcode};
pub use group::{
    Address, CallOptions, GroupService, GroupSpec, LocalGroup, LocalHub,
    MemberSpec, Reply, RequestHandler, ResponseMode, RspList, TcpGroup, View,
};
pub use registry::{handler_fn, OpcodeRegistry, RpcHandler};
pub use utils::{logger_init, RpcDistError};
