mod chain;
mod config;
mod spv;
mod store;
mod sync;
mod telemetry;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chain::{Chain, ChainAdapter, EsploraClient, FallbackAdapter, Network};
use crate::config::Settings;
use crate::spv::SpvClient;
use crate::store::{FileKvStore, KvStore, MemoryKvStore};
use crate::sync::UtxoSyncer;
use crate::telemetry::TracingFailureSink;

const DEFAULT_PROOF_CONFIRMATIONS: u32 = 6;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting utxo state sync service");
	let settings = Settings::from_env();

	let store: Arc<dyn KvStore> = if settings.data_dir == ":memory:" {
		Arc::new(MemoryKvStore::new())
	} else {
		match FileKvStore::new(&settings.data_dir) {
			Ok(store) => Arc::new(store),
			Err(e) => {
				error!("Failed to open data dir {}: {}", settings.data_dir, e);
				return;
			}
		}
	};

	let sink = Arc::new(TracingFailureSink);
	let bitcoin_adapter = build_adapter(
		Chain::Bitcoin,
		settings.network,
		&settings.bitcoin_esplora_urls,
	);
	let dogecoin_adapter = build_adapter(
		Chain::Dogecoin,
		settings.network,
		&settings.dogecoin_esplora_urls,
	);

	let bitcoin_syncer = Arc::new(UtxoSyncer::new(
		bitcoin_adapter.clone(),
		store.clone(),
		sink.clone(),
		settings.syncer_config(),
	));
	let dogecoin_syncer = Arc::new(UtxoSyncer::new(
		dogecoin_adapter,
		store,
		sink,
		settings.syncer_config(),
	));

	info!("Created {} syncers", settings.network);

	// Arguments are sync targets (`bitcoin:<address>` / `dogecoin:<address>`)
	// or proof requests (`proof:<txid>`).
	for arg in std::env::args().skip(1) {
		match arg.split_once(':') {
			Some(("proof", txid)) => {
				let spv_client =
					SpvClient::new(bitcoin_adapter.clone(), &settings.bitcoin_spv_service_url);
				match spv_client.get_tx_proof(txid, DEFAULT_PROOF_CONFIRMATIONS).await {
					Ok(proof) => info!(
						"Proof for {} at index {}: {}",
						txid, proof.spv_client.index, proof.proof
					),
					Err(e) => error!("Failed to retrieve proof for {}: {}", txid, e),
				}
			}
			Some((chain, address)) => match chain.parse::<Chain>() {
				Ok(Chain::Bitcoin) => enqueue(&bitcoin_syncer, address).await,
				Ok(Chain::Dogecoin) => enqueue(&dogecoin_syncer, address).await,
				Err(e) => error!("Skipping argument {}: {}", arg, e),
			},
			None => error!("Skipping malformed argument {}", arg),
		}
	}

	bitcoin_syncer.clone().start_process();
	dogecoin_syncer.clone().start_process();
	info!("Workers running for {:?}", settings.run_duration);

	// Bounded invocation: run for the configured window, then stop pickup
	// and let in-flight work settle.
	tokio::time::sleep(settings.run_duration).await;

	bitcoin_syncer.pause_process();
	dogecoin_syncer.pause_process();
	bitcoin_syncer.close_process().await;
	dogecoin_syncer.close_process().await;
	info!("Shutdown complete");
}

fn build_adapter(chain: Chain, network: Network, urls: &[String]) -> Arc<dyn ChainAdapter> {
	let urls = if urls.is_empty() {
		default_esplora_urls(chain, network)
	} else {
		urls.to_vec()
	};
	if urls.is_empty() {
		warn!("No {} providers configured, chain calls will fail", chain);
	}
	let providers: Vec<Arc<dyn ChainAdapter>> = urls
		.iter()
		.map(|url| Arc::new(EsploraClient::new(chain, network, url.clone())) as Arc<dyn ChainAdapter>)
		.collect();
	Arc::new(FallbackAdapter::new(chain, network, providers))
}

fn default_esplora_urls(chain: Chain, network: Network) -> Vec<String> {
	match (chain, network) {
		(Chain::Bitcoin, Network::Mainnet) => vec!["https://blockstream.info/api".to_string()],
		(Chain::Bitcoin, Network::Testnet) => {
			vec!["https://blockstream.info/testnet/api".to_string()]
		}
		// No public Esplora instance is assumed for Dogecoin; providers
		// must be configured explicitly.
		(Chain::Dogecoin, _) => Vec::new(),
	}
}

async fn enqueue(syncer: &Arc<UtxoSyncer>, address: &str) {
	match syncer.enqueue_sync(address).await {
		Ok(true) => {}
		Ok(false) => info!("Sync request for {} {} throttled", syncer.chain(), address),
		Err(e) => error!("Failed to enqueue {} {}: {}", syncer.chain(), address, e),
	}
}
