//! Per-chain address format validation.
//!
//! Bitcoin accepts bech32/bech32m segwit addresses and base58check legacy
//! addresses; Dogecoin accepts base58check only. Version bytes depend on the
//! configured network.

use bech32::Hrp;
use sha2::{Digest, Sha256};

use super::types::{Chain, Network};

/// Check whether `address` is well-formed for the given chain and network.
pub fn validate_address(chain: Chain, network: Network, address: &str) -> bool {
	match chain {
		Chain::Bitcoin => validate_bitcoin_address(network, address),
		Chain::Dogecoin => validate_dogecoin_address(network, address),
	}
}

fn validate_bitcoin_address(network: Network, address: &str) -> bool {
	if let Ok((hrp, data)) = bech32::decode(address) {
		let expected = match network {
			Network::Mainnet => Hrp::parse_unchecked("bc"),
			Network::Testnet => Hrp::parse_unchecked("tb"),
		};
		return hrp == expected && !data.is_empty();
	}

	let versions: &[u8] = match network {
		// P2PKH and P2SH
		Network::Mainnet => &[0x00, 0x05],
		Network::Testnet => &[0x6f, 0xc4],
	};
	matches!(base58check_version(address), Some(v) if versions.contains(&v))
}

fn validate_dogecoin_address(network: Network, address: &str) -> bool {
	let versions: &[u8] = match network {
		// P2PKH ("D...") and P2SH
		Network::Mainnet => &[0x1e, 0x16],
		Network::Testnet => &[0x71, 0xc4],
	};
	matches!(base58check_version(address), Some(v) if versions.contains(&v))
}

/// Decode a base58check address and return its version byte, or None if the
/// encoding, length, or checksum is invalid.
fn base58check_version(address: &str) -> Option<u8> {
	let bytes = bs58::decode(address).into_vec().ok()?;
	if bytes.len() != 25 {
		return None;
	}
	let (payload, checksum) = bytes.split_at(21);
	let digest = Sha256::digest(Sha256::digest(payload));
	if digest[..4] != *checksum {
		return None;
	}
	Some(payload[0])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_mainnet_bitcoin_addresses() {
		// P2PKH, P2SH, and segwit v0
		assert!(validate_address(
			Chain::Bitcoin,
			Network::Mainnet,
			"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
		));
		assert!(validate_address(
			Chain::Bitcoin,
			Network::Mainnet,
			"3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"
		));
		assert!(validate_address(
			Chain::Bitcoin,
			Network::Mainnet,
			"bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
		));
	}

	#[test]
	fn accepts_testnet_bitcoin_addresses() {
		assert!(validate_address(
			Chain::Bitcoin,
			Network::Testnet,
			"mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn"
		));
		assert!(validate_address(
			Chain::Bitcoin,
			Network::Testnet,
			"tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
		));
		// mainnet address rejected on testnet
		assert!(!validate_address(
			Chain::Bitcoin,
			Network::Testnet,
			"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
		));
	}

	#[test]
	fn accepts_dogecoin_addresses() {
		assert!(validate_address(
			Chain::Dogecoin,
			Network::Mainnet,
			"DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L"
		));
		// bitcoin address is not a dogecoin address
		assert!(!validate_address(
			Chain::Dogecoin,
			Network::Mainnet,
			"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
		));
	}

	#[test]
	fn rejects_malformed_addresses() {
		for address in [
			"not-an-address",
			"",
			// corrupted checksum (last character changed)
			"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb",
			"bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5",
		] {
			assert!(
				!validate_address(Chain::Bitcoin, Network::Mainnet, address),
				"{address} should be rejected"
			);
			assert!(
				!validate_address(Chain::Dogecoin, Network::Mainnet, address),
				"{address} should be rejected"
			);
		}
	}
}
