//! Nullable daemon: a scriptable blockchain node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use trawl_rpc::{parse_hex_u64, DaemonRpc, LatestBlock, RpcError, SolutionParams, WorkReply};

/// How [`NullDaemon::submit_block`] answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitBehavior {
    Accept,
    Reject,
    Error,
}

/// A daemon whose chain tip, work payload and verifier verdicts are set by
/// the test.
///
/// Each solution has a "strength": the largest difficulty it meets. Unknown
/// nonces use the default strength.
pub struct NullDaemon {
    name: String,
    peers: AtomicU64,
    latest_hash: Mutex<String>,
    work: Mutex<WorkReply>,
    strengths: Mutex<HashMap<String, u64>>,
    default_strength: AtomicU64,
    submit: Mutex<SubmitBehavior>,
    unreachable: AtomicBool,
    fail_get_work: AtomicBool,
    fail_latest: AtomicBool,
    fail_verify: AtomicBool,
    work_calls: AtomicUsize,
    latest_calls: AtomicUsize,
    verify_calls: Mutex<Vec<SolutionParams>>,
    submitted: Mutex<Vec<String>>,
}

impl NullDaemon {
    /// Block difficulty of the work payloads this daemon hands out.
    pub const BLOCK_DIFFICULTY: u64 = 1 << 56;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            peers: AtomicU64::new(8),
            latest_hash: Mutex::new("0xtip1".to_string()),
            work: Mutex::new(Self::work_at(100, "0xtip1")),
            strengths: Mutex::new(HashMap::new()),
            default_strength: AtomicU64::new(0),
            submit: Mutex::new(SubmitBehavior::Accept),
            unreachable: AtomicBool::new(false),
            fail_get_work: AtomicBool::new(false),
            fail_latest: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            work_calls: AtomicUsize::new(0),
            latest_calls: AtomicUsize::new(0),
            verify_calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// A work payload for `height` with a header derived from `tip`.
    ///
    /// The target puts block difficulty at 2^56. The blob is 40 bytes of
    /// zeros so nonce splicing can be checked.
    pub fn work_at(height: u64, tip: &str) -> WorkReply {
        WorkReply {
            header: format!("0xheader{height}{}", tip.trim_start_matches("0x")),
            seed: format!("0xseed{height}"),
            target: format!("0x1{}", "0".repeat(50)),
            height_hex: format!("0x{height:x}"),
            blob: "00".repeat(40),
        }
    }

    /// Move the chain tip: new latest hash and a matching work payload.
    pub fn advance(&self, height: u64, tip: &str) {
        *self.latest_hash.lock().unwrap() = tip.to_string();
        *self.work.lock().unwrap() = Self::work_at(height, tip);
    }

    pub fn set_latest_hash(&self, hash: &str) {
        *self.latest_hash.lock().unwrap() = hash.to_string();
    }

    pub fn set_work(&self, work: WorkReply) {
        *self.work.lock().unwrap() = work;
    }

    pub fn set_peers(&self, peers: u64) {
        self.peers.store(peers, Ordering::SeqCst);
    }

    /// Largest difficulty the solution with `nonce` meets.
    pub fn set_strength(&self, nonce: &str, strength: u64) {
        self.strengths
            .lock()
            .unwrap()
            .insert(nonce.to_string(), strength);
    }

    pub fn set_default_strength(&self, strength: u64) {
        self.default_strength.store(strength, Ordering::SeqCst);
    }

    pub fn set_submit_behavior(&self, behavior: SubmitBehavior) {
        *self.submit.lock().unwrap() = behavior;
    }

    /// Every call fails as if the node were down.
    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    pub fn fail_get_work(&self, fail: bool) {
        self.fail_get_work.store(fail, Ordering::SeqCst);
    }

    pub fn fail_latest_block(&self, fail: bool) {
        self.fail_latest.store(fail, Ordering::SeqCst);
    }

    pub fn fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    pub fn work_calls(&self) -> usize {
        self.work_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> Vec<SolutionParams> {
        self.verify_calls.lock().unwrap().clone()
    }

    /// Blobs passed to `submit_block`, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    fn check_up(&self) -> Result<(), RpcError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RpcError::Unreachable {
                endpoint: self.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn remote_error(&self, message: &str) -> RpcError {
        RpcError::Remote {
            endpoint: self.name.clone(),
            code: -32000,
            message: message.to_string(),
        }
    }
}

impl Default for NullDaemon {
    fn default() -> Self {
        Self::new("null-daemon")
    }
}

#[async_trait]
impl DaemonRpc for NullDaemon {
    fn name(&self) -> &str {
        &self.name
    }

    async fn peer_count(&self) -> Result<u64, RpcError> {
        self.check_up()?;
        Ok(self.peers.load(Ordering::SeqCst))
    }

    async fn latest_block(&self) -> Result<LatestBlock, RpcError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if self.fail_latest.load(Ordering::SeqCst) {
            return Err(self.remote_error("latest block unavailable"));
        }
        Ok(LatestBlock {
            hash: self.latest_hash.lock().unwrap().clone(),
        })
    }

    async fn get_work(&self, _reward_address: &str) -> Result<WorkReply, RpcError> {
        self.work_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if self.fail_get_work.load(Ordering::SeqCst) {
            return Err(self.remote_error("no work available"));
        }
        Ok(self.work.lock().unwrap().clone())
    }

    async fn verify_solution(&self, params: &SolutionParams) -> Result<bool, RpcError> {
        self.verify_calls.lock().unwrap().push(params.clone());
        self.check_up()?;
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(self.remote_error("verifier failure"));
        }
        let wanted = parse_hex_u64(&params.difficulty_hex)
            .ok_or_else(|| self.remote_error("bad difficulty"))?;
        let strength = self
            .strengths
            .lock()
            .unwrap()
            .get(&params.nonce)
            .copied()
            .unwrap_or_else(|| self.default_strength.load(Ordering::SeqCst));
        Ok(strength >= wanted)
    }

    async fn submit_block(&self, blob: &str) -> Result<bool, RpcError> {
        self.check_up()?;
        self.submitted.lock().unwrap().push(blob.to_string());
        match *self.submit.lock().unwrap() {
            SubmitBehavior::Accept => Ok(true),
            SubmitBehavior::Reject => Ok(false),
            SubmitBehavior::Error => Err(self.remote_error("submit failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(nonce: &str, difficulty: u64) -> SolutionParams {
        SolutionParams {
            nonce: nonce.to_string(),
            header: "0xaa".to_string(),
            aux_digest: "0xbb".to_string(),
            height: 100,
            difficulty_hex: format!("0x{difficulty:x}"),
        }
    }

    #[tokio::test]
    async fn verifier_compares_strength_to_difficulty() {
        let daemon = NullDaemon::new("d");
        daemon.set_strength("0x1", 500);
        assert!(daemon.verify_solution(&params("0x1", 500)).await.unwrap());
        assert!(!daemon.verify_solution(&params("0x1", 501)).await.unwrap());
        assert!(!daemon.verify_solution(&params("0x2", 1)).await.unwrap());
        assert_eq!(daemon.verify_calls().len(), 3);
    }

    #[tokio::test]
    async fn advance_changes_tip_and_work() {
        let daemon = NullDaemon::new("d");
        daemon.advance(101, "0xtip2");
        assert_eq!(daemon.latest_block().await.unwrap().hash, "0xtip2");
        assert_eq!(daemon.get_work("addr").await.unwrap().height_hex, "0x65");
    }

    #[tokio::test]
    async fn unreachable_daemon_fails_everything() {
        let daemon = NullDaemon::new("d");
        daemon.set_unreachable(true);
        assert!(daemon.peer_count().await.unwrap_err().is_unreachable());
        assert!(daemon.get_work("a").await.is_err());
        assert_eq!(daemon.work_calls(), 1);
    }

    #[tokio::test]
    async fn submit_behavior_is_scriptable() {
        let daemon = NullDaemon::new("d");
        assert!(daemon.submit_block("00").await.unwrap());
        daemon.set_submit_behavior(SubmitBehavior::Reject);
        assert!(!daemon.submit_block("01").await.unwrap());
        daemon.set_submit_behavior(SubmitBehavior::Error);
        assert!(daemon.submit_block("02").await.is_err());
        assert_eq!(daemon.submitted(), vec!["00", "01", "02"]);
    }
}
