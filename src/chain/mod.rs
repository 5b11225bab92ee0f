//! Chain adapter module.
//!
//! Each supported chain is served through the uniform `ChainAdapter`
//! capability: address validation, transaction history, UTXO set, and the
//! lookups the SPV proof client needs. `EsploraClient` is the concrete REST
//! implementation; `FallbackAdapter` stacks several providers in order.

/// Per-chain address format validation
mod address;
/// The uniform adapter capability and the ordered provider fallback
mod adapter;
/// Esplora-compatible REST client
mod esplora;
/// Shared chain data types
mod types;

pub use adapter::{ChainAdapter, FallbackAdapter};
pub use esplora::EsploraClient;
pub use types::*;
