use thiserror::Error;

use trawl_rpc::RpcError;
use trawl_store::StoreError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed work payload: {0}")]
    InvalidWork(String),

    #[error("malformed nonce: {0}")]
    InvalidNonce(String),

    #[error("malformed block blob: {0}")]
    InvalidBlob(String),

    #[error("no upstream configured")]
    NoUpstreams,

    #[error("invalid configuration: {0}")]
    Config(String),
}
