//! Blockchain daemon interface.

use async_trait::async_trait;
use std::time::Duration;

use crate::client::{JsonRpcClient, NO_PARAMS};
use crate::types::Quantity;
use crate::{LatestBlock, RpcError, SolutionParams, WorkReply};

const METHOD_PEER_COUNT: &str = "net_peerCount";
const METHOD_LATEST_BLOCK: &str = "eth_getBlockByNumber";
const METHOD_GET_WORK: &str = "eth_getWork";
const METHOD_VERIFY_SOLUTION: &str = "eth_verifySolution";
const METHOD_SUBMIT_BLOCK: &str = "eth_submitBlock";

/// Operations the pool needs from a blockchain node.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Label used in log lines.
    fn name(&self) -> &str;

    async fn peer_count(&self) -> Result<u64, RpcError>;

    async fn latest_block(&self) -> Result<LatestBlock, RpcError>;

    /// Fetch a work payload paying block rewards to `reward_address`.
    async fn get_work(&self, reward_address: &str) -> Result<WorkReply, RpcError>;

    /// Ask the node's verifier whether a solution meets the given difficulty.
    async fn verify_solution(&self, params: &SolutionParams) -> Result<bool, RpcError>;

    /// Submit a fully assembled block blob; `Ok(false)` is a rejection.
    async fn submit_block(&self, blob: &str) -> Result<bool, RpcError>;
}

/// [`DaemonRpc`] over JSON-RPC/HTTP.
pub struct HttpDaemon {
    client: JsonRpcClient,
}

impl HttpDaemon {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        Ok(Self {
            client: JsonRpcClient::new(name, url, timeout)?,
        })
    }
}

#[async_trait]
impl DaemonRpc for HttpDaemon {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn peer_count(&self) -> Result<u64, RpcError> {
        let count: Quantity = self.client.call(METHOD_PEER_COUNT, NO_PARAMS).await?;
        count.into_u64(self.client.name())
    }

    async fn latest_block(&self) -> Result<LatestBlock, RpcError> {
        let block: Option<LatestBlock> = self
            .client
            .call(METHOD_LATEST_BLOCK, ("latest", false))
            .await?;
        block.ok_or_else(|| RpcError::InvalidResponse {
            endpoint: self.client.name().to_string(),
            reason: "no latest block".to_string(),
        })
    }

    async fn get_work(&self, reward_address: &str) -> Result<WorkReply, RpcError> {
        let parts: Vec<String> = self.client.call(METHOD_GET_WORK, [reward_address]).await?;
        WorkReply::from_parts(parts).map_err(|reason| RpcError::InvalidResponse {
            endpoint: self.client.name().to_string(),
            reason,
        })
    }

    async fn verify_solution(&self, params: &SolutionParams) -> Result<bool, RpcError> {
        self.client
            .call(METHOD_VERIFY_SOLUTION, params.to_wire())
            .await
    }

    async fn submit_block(&self, blob: &str) -> Result<bool, RpcError> {
        self.client.call(METHOD_SUBMIT_BLOCK, [blob]).await
    }
}
