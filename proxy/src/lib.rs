//! Job-template and solution-validation pipeline.
//!
//! [`BlockTemplateStore`] keeps the current unit of work and a short backlog of
//! recent job headers, published to readers as an immutable snapshot.
//! [`ShareSubmissionPipeline`] validates a miner's solution against the
//! snapshot the miner worked on and records it as a share or a block.
//! [`UpstreamSet`] picks which daemon serves both.

pub mod config;
pub mod error;
pub mod shares;
pub mod template;
pub mod upstream;
pub mod work;

pub use config::{ProxyConfig, UpstreamConfig};
pub use error::ProxyError;
pub use shares::{ShareSubmissionPipeline, Submission, Verdict, SHARE_COUNTERS};
pub use template::{BlockTemplate, BlockTemplateStore, HeaderRecord, RefreshOutcome};
pub use upstream::UpstreamSet;
