#![allow(dead_code)]

use std::time::Duration;

use chord_kv::{
	core::{
		construct_node, digest,
		ring::{within, Digest},
		Config, NodeServer,
	},
	server::ServerManager,
};
use rand::Rng;

pub fn test_config() -> Config {
	Config {
		successor_list_len: 3,
		maintain_interval: 200,
		rpc_timeout: 150,
		ping_timeout: 50,
		max_connections: 32,
	}
}

pub async fn spawn_node(addr: &str, config: &Config) -> anyhow::Result<(NodeServer, ServerManager)> {
	let server = NodeServer::new(construct_node(addr), config.clone());
	let manager = server.start().await?;
	Ok((server, manager))
}

pub async fn wait_rounds(config: &Config, rounds: u64) {
	tokio::time::sleep(Duration::from_millis(config.maintain_interval * rounds)).await;
}

/// Address of the node owning `key`: the first node identifier at or
/// after the key digest, clockwise.
pub fn key_owner<'a>(addrs: &[&'a str], key: &str) -> &'a str {
	let kd = digest(key);
	let mut ids: Vec<(Digest, &str)> = addrs.iter().map(|a| (digest(a), *a)).collect();
	ids.sort();
	for (id, addr) in &ids {
		if *id >= kd {
			return addr;
		}
	}
	ids[0].1
}

/// Address of the node following `addr` on the ring.
pub fn ring_successor(addrs: &[&str], addr: &str) -> String {
	let mut ids: Vec<(Digest, &str)> = addrs.iter().map(|a| (digest(a), *a)).collect();
	ids.sort();
	let pos = ids
		.iter()
		.position(|(_, a)| *a == addr)
		.expect("address not in ring");
	ids[(pos + 1) % ids.len()].1.to_string()
}

/// Generate a key whose digest lands in (start, end].
pub fn generate_key_in_range<T: Rng>(rng: &mut T, start: Digest, end: Digest) -> String {
	loop {
		let raw: u32 = rng.gen();
		let key = format!("key-{:08x}", raw);
		if within(digest(&key), start, end, true) {
			return key;
		}
	}
}

/// Retry a lookup over a few maintenance rounds; repairs may still be
/// in flight right after a failure.
pub async fn get_with_retry(
	server: &NodeServer,
	config: &Config,
	key: &str,
	attempts: u32,
) -> Option<String> {
	for _ in 0..attempts {
		if let Ok(Some(value)) = server.get(key).await {
			return Some(value);
		}
		wait_rounds(config, 1).await;
	}
	None
}

/// Following successor pointers from any node visits every live node
/// exactly once per cycle.
pub fn assert_ring_closed(servers: &[&NodeServer]) {
	let mut current = servers[0];
	let mut seen = vec![servers[0].node().addr.clone()];
	for _ in 1..servers.len() {
		let suc = current.get_successor().expect("successor missing");
		assert!(
			!seen.contains(&suc.addr),
			"successor cycle shorter than the ring: {:?} then {}",
			seen,
			suc.addr
		);
		current = servers
			.iter()
			.find(|s| s.node().addr == suc.addr)
			.unwrap_or_else(|| panic!("successor {} is not a live node", suc.addr));
		seen.push(suc.addr.clone());
	}
	assert_eq!(
		current.get_successor().expect("successor missing").addr,
		servers[0].node().addr,
		"cycle does not close"
	);
}

/// Every node is the successor of its own predecessor.
pub fn assert_predecessors_consistent(servers: &[&NodeServer]) {
	for server in servers {
		let pre = server.get_predecessor().expect("predecessor missing");
		let pre_server = servers
			.iter()
			.find(|s| s.node().addr == pre.addr)
			.unwrap_or_else(|| panic!("predecessor {} is not a live node", pre.addr));
		assert_eq!(
			pre_server.get_successor().expect("successor missing").addr,
			server.node().addr
		);
	}
}
