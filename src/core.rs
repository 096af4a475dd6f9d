pub mod config;
pub mod data_store;
pub mod error;
pub mod node;
pub mod peer;
pub mod ring;

pub use config::*;
pub use error::*;
pub use node::*;

use ring::Digest;
use sha2::{Digest as _, Sha256};

/// Identifier of an address or key: SHA-256 truncated to the ring width.
pub fn digest(data: &str) -> Digest {
	let hash = Sha256::digest(data.as_bytes());
	let mut bytes = [0u8; 8];
	bytes.copy_from_slice(&hash[..8]);
	u64::from_be_bytes(bytes)
}

pub fn construct_node(addr: &str) -> Node {
	Node {
		addr: addr.to_string(),
		id: digest(addr),
	}
}
