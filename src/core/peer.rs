use std::{
	collections::HashMap,
	future::Future,
	sync::{Arc, RwLock},
	time::Duration,
};

use log::debug;
use tarpc::{client::RpcError, context};
use tokio::{net::TcpStream, time::timeout};

use super::{
	config::Config,
	data_store::{Key, Value},
	error::{DhtError, DhtResult},
	node::Node,
	ring::Digest,
};
use crate::{client::setup_client, rpc::NodeServiceClient};

/// Best-effort transport to remote peers.
///
/// Connections are cached per address and evicted as soon as a call on
/// them fails, so the next call re-dials. A node may dial itself through
/// the same path as any other peer.
#[derive(Clone)]
pub struct Peers {
	connections: Arc<RwLock<HashMap<String, NodeServiceClient>>>,
	rpc_timeout: Duration,
	ping_timeout: Duration,
}

impl Peers {
	pub fn new(config: &Config) -> Self {
		Peers {
			connections: Arc::new(RwLock::new(HashMap::new())),
			rpc_timeout: Duration::from_millis(config.rpc_timeout),
			ping_timeout: Duration::from_millis(config.ping_timeout),
		}
	}

	/// Liveness probe with a short timeout. A missing peer is never alive.
	pub async fn ping(&self, target: Option<&Node>) -> bool {
		let addr = match target {
			Some(node) if !node.addr.is_empty() => node.addr.as_str(),
			_ => return false,
		};
		matches!(timeout(self.ping_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
	}

	async fn client(&self, peer: &Node) -> DhtResult<NodeServiceClient> {
		{
			let connections = self.connections.read().unwrap();
			if let Some(client) = connections.get(&peer.addr) {
				// clients are cheap handles to a shared connection
				return Ok(client.clone());
			}
		}
		let client = timeout(self.rpc_timeout, setup_client(&peer.addr))
			.await
			.map_err(|_| DhtError::Timeout(peer.addr.clone()))??;
		debug!("connected to {}", peer);
		self.connections
			.write()
			.unwrap()
			.insert(peer.addr.clone(), client.clone());
		Ok(client)
	}

	fn evict(&self, addr: &str) {
		self.connections.write().unwrap().remove(addr);
	}

	/// Drop all cached connections.
	pub fn clear(&self) {
		self.connections.write().unwrap().clear();
	}

	async fn call<T, F>(&self, peer: &Node, call: F) -> DhtResult<T>
	where
		F: Future<Output = Result<T, RpcError>>,
	{
		match call.await {
			Ok(reply) => Ok(reply),
			Err(e) => {
				// a failed connection is re-dialed on the next call
				self.evict(&peer.addr);
				Err(e.into())
			}
		}
	}

	pub async fn find_successor(&self, peer: &Node, k_id: Digest) -> DhtResult<Node> {
		let c = self.client(peer).await?;
		Ok(self
			.call(peer, c.find_successor_rpc(context::current(), k_id))
			.await??)
	}

	pub async fn get_predecessor(&self, peer: &Node) -> DhtResult<Option<Node>> {
		let c = self.client(peer).await?;
		self.call(peer, c.get_predecessor_rpc(context::current())).await
	}

	pub async fn get_successor_list(&self, peer: &Node) -> DhtResult<Vec<Option<Node>>> {
		let c = self.client(peer).await?;
		self.call(peer, c.get_successor_list_rpc(context::current())).await
	}

	pub async fn notify(&self, peer: &Node, candidate: Node) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.notify_rpc(context::current(), candidate)).await
	}

	pub async fn stabilize(&self, peer: &Node) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.stabilize_rpc(context::current())).await
	}

	pub async fn check_predecessor(&self, peer: &Node) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.check_predecessor_rpc(context::current())).await
	}

	pub async fn get_store(&self, peer: &Node) -> DhtResult<HashMap<Key, Value>> {
		let c = self.client(peer).await?;
		self.call(peer, c.get_store_rpc(context::current())).await
	}

	pub async fn transfer_data(&self, peer: &Node, new_pre: Node) -> DhtResult<HashMap<Key, Value>> {
		let c = self.client(peer).await?;
		self.call(peer, c.transfer_data_rpc(context::current(), new_pre)).await
	}

	pub async fn erase_redundant_pre_backup(
		&self,
		peer: &Node,
		moved: HashMap<Key, Value>,
	) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.erase_redundant_pre_backup_rpc(context::current(), moved))
			.await
	}

	pub async fn append_pre_backup(
		&self,
		peer: &Node,
		entries: HashMap<Key, Value>,
	) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.append_pre_backup_rpc(context::current(), entries))
			.await
	}

	pub async fn put_in_store(&self, peer: &Node, key: Key, value: Value) -> DhtResult<()> {
		let c = self.client(peer).await?;
		Ok(self
			.call(peer, c.put_in_store_rpc(context::current(), key, value))
			.await??)
	}

	pub async fn get_in_store(&self, peer: &Node, key: Key) -> DhtResult<Value> {
		let c = self.client(peer).await?;
		Ok(self
			.call(peer, c.get_in_store_rpc(context::current(), key))
			.await??)
	}

	pub async fn delete_in_store(&self, peer: &Node, key: Key) -> DhtResult<()> {
		let c = self.client(peer).await?;
		Ok(self
			.call(peer, c.delete_in_store_rpc(context::current(), key))
			.await??)
	}

	pub async fn put_in_pre_backup(&self, peer: &Node, key: Key, value: Value) -> DhtResult<()> {
		let c = self.client(peer).await?;
		self.call(peer, c.put_in_pre_backup_rpc(context::current(), key, value))
			.await
	}

	pub async fn delete_in_pre_backup(&self, peer: &Node, key: Key) -> DhtResult<()> {
		let c = self.client(peer).await?;
		Ok(self
			.call(peer, c.delete_in_pre_backup_rpc(context::current(), key))
			.await??)
	}
}
