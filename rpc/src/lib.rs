//! RPC interfaces to the blockchain daemon and the pool wallet.
//!
//! The pool only depends on the [`DaemonRpc`] and [`WalletRpc`] traits. This
//! crate also provides the production implementations, which speak JSON-RPC
//! 2.0 over HTTP:
//! - [`HttpDaemon`]: peer count, latest block, work payloads, solution
//!   verification and block submission
//! - [`HttpWallet`]: balance, multi-destination transfers, message signing

pub mod client;
pub mod daemon;
pub mod error;
pub mod types;
pub mod wallet;

pub use client::JsonRpcClient;
pub use daemon::{DaemonRpc, HttpDaemon};
pub use error::RpcError;
pub use types::{parse_hex_u64, LatestBlock, SolutionParams, TransferDestination, WorkReply};
pub use wallet::{HttpWallet, WalletRpc};
