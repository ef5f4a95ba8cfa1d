//! Pool wallet interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trawl_types::Atomic;

use crate::client::{JsonRpcClient, NO_PARAMS};
use crate::types::deserialize_atomic;
use crate::{RpcError, TransferDestination};

const METHOD_BALANCE: &str = "getbalance";
const METHOD_TRANSFER: &str = "transfer";
const METHOD_SIGN: &str = "sign_message";

/// Operations the pool needs from its wallet.
#[async_trait]
pub trait WalletRpc: Send + Sync {
    /// Spendable balance.
    async fn balance(&self) -> Result<Atomic, RpcError>;

    /// Send one transaction paying every destination; returns its hash.
    async fn transfer(
        &self,
        destinations: &[TransferDestination],
        fee: Atomic,
        mixin: u64,
    ) -> Result<String, RpcError>;

    /// Sign `message` with the key of `address`. Fails if the wallet is locked.
    async fn sign(&self, address: &str, message: &str) -> Result<String, RpcError>;
}

#[derive(Deserialize)]
struct BalanceReply {
    #[serde(deserialize_with = "deserialize_atomic")]
    unlocked_balance: Atomic,
}

#[derive(Serialize)]
struct TransferParams<'a> {
    destinations: &'a [TransferDestination],
    #[serde(serialize_with = "serialize_fee")]
    fee: Atomic,
    mixin: u64,
}

fn serialize_fee<S: serde::Serializer>(fee: &Atomic, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(fee.raw())
}

#[derive(Deserialize)]
struct TransferReply {
    tx_hash: String,
}

#[derive(Serialize)]
struct SignParams<'a> {
    address: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct SignReply {
    signature: String,
}

/// [`WalletRpc`] over JSON-RPC/HTTP.
pub struct HttpWallet {
    client: JsonRpcClient,
}

impl HttpWallet {
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
impl WalletRpc for HttpWallet {
    async fn balance(&self) -> Result<Atomic, RpcError> {
        let reply: BalanceReply = self.client.call(METHOD_BALANCE, NO_PARAMS).await?;
        Ok(reply.unlocked_balance)
    }

    async fn transfer(
        &self,
        destinations: &[TransferDestination],
        fee: Atomic,
        mixin: u64,
    ) -> Result<String, RpcError> {
        let params = TransferParams {
            destinations,
            fee,
            mixin,
        };
        let reply: TransferReply = self.client.call(METHOD_TRANSFER, params).await?;
        Ok(reply.tx_hash)
    }

    async fn sign(&self, address: &str, message: &str) -> Result<String, RpcError> {
        let reply: SignReply = self
            .client
            .call(METHOD_SIGN, SignParams { address, message })
            .await?;
        Ok(reply.signature)
    }
}
