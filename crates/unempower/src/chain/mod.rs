//! Chain access: JSON-RPC client, event ABI, the indexer loop and address normalization.

pub mod abi;
pub mod fallback;
pub mod indexer;
pub mod normalize;
pub mod rpc;

pub use abi::{decode_event, DecodeError, EventTopics};
pub use fallback::worker_proofs_from_chain;
pub use indexer::{ChainIndexer, IndexerConfig, IndexerError, IndexerState, PollReport};
pub use normalize::{checksum_address, normalize_address, NormalizeError};
pub use rpc::{LogFilter, LogSource, RpcClient, RpcConfig, RpcError, RpcLog};
