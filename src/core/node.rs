use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, RwLock,
	},
	time::Duration,
};

use futures::{future, prelude::*};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tarpc::{context, server::Channel, tokio_serde::formats::Bincode};
use tokio::{sync::watch, time};

use super::{
	config::Config,
	data_store::{DataStore, Key, Value},
	digest,
	error::{DhtError, DhtResult, ServiceError, ServiceResult},
	peer::Peers,
	ring::{finger_start, within, Digest, NUM_BITS},
};
use crate::{rpc::NodeService, server::ServerManager};

// Wire identity of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	pub id: Digest,
	pub addr: String,
}

impl std::fmt::Display for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Node({}, {})", self.id, self.addr)
	}
}

/// One DHT node: routing state, the owned shard, and the replica of the
/// predecessor's shard. Cloning shares all state through Arc.
#[derive(Clone)]
pub struct NodeServer {
	node: Node,
	config: Config,
	predecessor: Arc<RwLock<Option<Node>>>,
	// Entry 0 is the current best successor; compacted from the left as
	// failures are detected
	successor_list: Arc<RwLock<Vec<Option<Node>>>>,
	finger_table: Arc<RwLock<Vec<Option<Node>>>>,
	next_finger: Arc<AtomicUsize>,
	store: DataStore,
	pre_backup: DataStore,
	online: Arc<AtomicBool>,
	peers: Peers,
	shutdown: Arc<RwLock<Option<watch::Sender<bool>>>>,
}

impl NodeServer {
	pub fn new(node: Node, config: Config) -> Self {
		assert!(config.successor_list_len > 0, "successor list needs at least one slot");
		assert!(
			config.ping_timeout <= config.rpc_timeout,
			"ping timeout must not exceed rpc timeout"
		);

		let successor_list = vec![None; config.successor_list_len];
		let finger_table = vec![None; NUM_BITS];

		NodeServer {
			node,
			peers: Peers::new(&config),
			config,
			predecessor: Arc::new(RwLock::new(None)),
			successor_list: Arc::new(RwLock::new(successor_list)),
			finger_table: Arc::new(RwLock::new(finger_table)),
			next_finger: Arc::new(AtomicUsize::new(0)),
			store: DataStore::new(),
			pre_backup: DataStore::new(),
			online: Arc::new(AtomicBool::new(false)),
			shutdown: Arc::new(RwLock::new(None)),
		}
	}

	pub fn node(&self) -> &Node {
		&self.node
	}

	pub fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}

	pub fn get_successor(&self) -> Option<Node> {
		self.successor_list.read().unwrap()[0].clone()
	}

	pub fn get_successor_list(&self) -> Vec<Option<Node>> {
		self.successor_list.read().unwrap().clone()
	}

	pub fn set_successor_list(&self, mut list: Vec<Option<Node>>) {
		list.resize(self.config.successor_list_len, None);
		*self.successor_list.write().unwrap() = list;
	}

	pub fn get_predecessor(&self) -> Option<Node> {
		self.predecessor.read().unwrap().clone()
	}

	pub fn set_predecessor(&self, node: Option<Node>) {
		*self.predecessor.write().unwrap() = node;
	}

	pub fn store_snapshot(&self) -> HashMap<Key, Value> {
		self.store.snapshot()
	}

	pub fn backup_snapshot(&self) -> HashMap<Key, Value> {
		self.pre_backup.snapshot()
	}

	/// Bind the listener and spawn the maintenance tasks. The node still
	/// answers with empty routing state until `create` or `join` brings
	/// it online.
	pub async fn start(&self) -> DhtResult<ServerManager> {
		// true on the channel means shutdown
		let (tx, rx) = watch::channel(false);

		let mut listener =
			tarpc::serde_transport::tcp::listen(&self.node.addr, Bincode::default).await?;
		listener.config_mut().max_frame_length(usize::MAX);
		info!("{}: listening at {}", self.node, self.node.addr);

		let server = self.clone();
		let mut listener_rx = rx.clone();
		let listener_handle = tokio::spawn(async move {
			let listener_fut = listener
				.filter_map(|r| future::ready(r.ok()))
				.map(tarpc::server::BaseChannel::with_defaults)
				.map(|channel| async {
					// Clone a new server to share the data in Arc
					channel.execute(server.clone().serve()).await;
				})
				.buffer_unordered(server.config.max_connections)
				.for_each(|_| async {});

			tokio::select! {
				_ = listener_fut => {
					warn!("{}: listener terminated", server.node);
				}
				_ = listener_rx.changed() => {
					debug!("{}: listener stopped gracefully", server.node);
				}
			};
		});

		let mut handles = vec![listener_handle];
		if self.config.maintain_interval > 0 {
			let pause = Duration::from_millis(self.config.maintain_interval);

			let server = self.clone();
			let mut task_rx = rx.clone();
			handles.push(tokio::spawn(async move {
				loop {
					if server.is_online() {
						server.stabilize().await;
					}
					tokio::select! {
						_ = time::sleep(pause) => {}
						_ = task_rx.changed() => {
							debug!("{}: stabilize task stopped gracefully", server.node);
							break;
						}
					}
				}
			}));

			let server = self.clone();
			let mut task_rx = rx.clone();
			handles.push(tokio::spawn(async move {
				loop {
					if server.is_online() {
						server.fix_finger().await;
					}
					tokio::select! {
						_ = time::sleep(pause) => {}
						_ = task_rx.changed() => {
							debug!("{}: fix_finger task stopped gracefully", server.node);
							break;
						}
					}
				}
			}));

			let server = self.clone();
			let mut task_rx = rx.clone();
			handles.push(tokio::spawn(async move {
				loop {
					if server.is_online() {
						server.check_predecessor().await;
					}
					tokio::select! {
						_ = time::sleep(pause) => {}
						_ = task_rx.changed() => {
							debug!("{}: check_predecessor task stopped gracefully", server.node);
							break;
						}
					}
				}
			}));
		}

		*self.shutdown.write().unwrap() = Some(tx);
		Ok(ServerManager {
			handle: future::join_all(handles),
			shutdown: self.shutdown.clone(),
		})
	}

	/// Bootstrap a ring of one node.
	pub fn create(&self) {
		info!("{}: creating a new ring", self.node);
		self.online.store(true, Ordering::SeqCst);
		{
			let mut list = self.successor_list.write().unwrap();
			list[0] = Some(self.node.clone());
		}
		self.set_predecessor(Some(self.node.clone()));
		{
			let mut table = self.finger_table.write().unwrap();
			for slot in table.iter_mut() {
				*slot = Some(self.node.clone());
			}
		}
	}

	/// Enter an existing ring through any live member.
	pub async fn join(&self, peer: &Node) -> DhtResult<()> {
		if self.is_online() {
			error!("{}: joining while already part of a ring", self.node);
			return Err(DhtError::AlreadyOnline(self.node.addr.clone()));
		}
		info!("{}: joining the ring via {}", self.node, peer);
		self.set_predecessor(None);

		let suc = self.peers.find_successor(peer, self.node.id).await?;
		debug!("{}: successor resolved to {}", self.node, suc);
		let pulled = self.peers.get_successor_list(&suc).await.unwrap_or_default();
		self.rebuild_successor_list(&suc, pulled).await;

		if suc.addr != self.node.addr {
			match self.peers.transfer_data(&suc, self.node.clone()).await {
				Ok(moved) => {
					debug!("{}: received {} entries from {}", self.node, moved.len(), suc);
					self.store.merge(moved);
				}
				Err(e) => warn!("{}: transfer from {} failed: {}", self.node, suc, e),
			}
		}

		{
			let mut table = self.finger_table.write().unwrap();
			table[0] = Some(suc.clone());
		}
		for i in 1..NUM_BITS {
			let target = finger_start(self.node.id, i);
			let finger = match self.peers.find_successor(&suc, target).await {
				Ok(node) => Some(node),
				Err(e) => {
					warn!("{}: finger {} unresolved: {}", self.node, i, e);
					None
				}
			};
			self.finger_table.write().unwrap()[i] = finger;
		}

		self.online.store(true, Ordering::SeqCst);
		info!("{}: joined the ring via {}", self.node, peer);
		Ok(())
	}

	/// Leave the ring after handing responsibility to the neighbours.
	pub async fn quit(&self) -> DhtResult<()> {
		if !self.is_online() {
			error!("{}: quit on an offline node", self.node);
			return Err(DhtError::Offline(self.node.addr.clone()));
		}
		info!("{}: leaving the ring", self.node);
		self.shut_down_server();

		let pre = self.get_predecessor();
		match self.first_available_successor().await {
			Ok(suc) => {
				// the successor notices us dead and absorbs its replica of
				// our shard; the predecessor then picks a new live successor
				if let Err(e) = self.peers.check_predecessor(&suc).await {
					warn!("{}: quit: check_predecessor on {}: {}", self.node, suc, e);
				}
				if let Some(pre) = pre {
					if pre.addr != self.node.addr {
						if let Err(e) = self.peers.stabilize(&pre).await {
							warn!("{}: quit: stabilize on {}: {}", self.node, pre, e);
						}
					}
				}
			}
			Err(e) => warn!("{}: quit with no reachable successor: {}", self.node, e),
		}
		self.clear();
		Ok(())
	}

	/// Crash simulation: stop serving without informing anyone. The ring
	/// recovers through the periodic tasks of the survivors.
	pub fn force_quit(&self) -> DhtResult<()> {
		if !self.is_online() {
			error!("{}: force quit on an offline node", self.node);
			return Err(DhtError::Offline(self.node.addr.clone()));
		}
		info!("{}: force quitting", self.node);
		self.shut_down_server();
		self.clear();
		Ok(())
	}

	pub async fn put(&self, key: &str, value: &str) -> DhtResult<()> {
		if !self.is_online() {
			error!("{}: put on an offline node", self.node);
			return Err(DhtError::Offline(self.node.addr.clone()));
		}
		let target = self.find_successor(digest(key)).await?;
		debug!("{}: put key [{}] at {}", self.node, key, target);
		self.peers
			.put_in_store(&target, key.to_string(), value.to_string())
			.await
	}

	/// `Ok(None)` means the key does not exist; transport and routing
	/// failures surface as errors instead.
	pub async fn get(&self, key: &str) -> DhtResult<Option<Value>> {
		if !self.is_online() {
			error!("{}: get on an offline node", self.node);
			return Err(DhtError::Offline(self.node.addr.clone()));
		}
		let target = self.find_successor(digest(key)).await?;
		debug!("{}: get key [{}] from {}", self.node, key, target);
		match self.peers.get_in_store(&target, key.to_string()).await {
			Ok(value) => Ok(Some(value)),
			Err(DhtError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// `Ok(false)` means the key was not there.
	pub async fn delete(&self, key: &str) -> DhtResult<bool> {
		if !self.is_online() {
			error!("{}: delete on an offline node", self.node);
			return Err(DhtError::Offline(self.node.addr.clone()));
		}
		let target = self.find_successor(digest(key)).await?;
		debug!("{}: delete key [{}] at {}", self.node, key, target);
		match self.peers.delete_in_store(&target, key.to_string()).await {
			Ok(()) => Ok(true),
			Err(DhtError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	fn shut_down_server(&self) {
		self.online.store(false, Ordering::SeqCst);
		if let Some(tx) = self.shutdown.read().unwrap().as_ref() {
			let _ = tx.send(true);
		}
	}

	fn clear(&self) {
		self.store.take();
		self.pre_backup.take();
		self.peers.clear();
	}

	/// Locate the node owning identifier `k_id`. Fails only when no
	/// successor is reachable.
	async fn find_successor(&self, k_id: Digest) -> DhtResult<Node> {
		let suc = self.first_available_successor().await?;
		if within(k_id, self.node.id, suc.id, true) {
			return Ok(suc);
		}
		let cpf = self.closest_preceding_finger(k_id).await?;
		self.peers.find_successor(&cpf, k_id).await
	}

	/// First live entry of the successor list. Detected failures compact
	/// the list towards the front.
	async fn first_available_successor(&self) -> DhtResult<Node> {
		let head = { self.successor_list.read().unwrap()[0].clone() };
		if let Some(node) = head {
			if self.peers.ping(Some(&node)).await {
				return Ok(node);
			}
		}
		let len = self.config.successor_list_len;
		for i in 1..len {
			let entry = { self.successor_list.read().unwrap()[i].clone() };
			let node = match entry {
				Some(node) => node,
				None => continue,
			};
			if !self.peers.ping(Some(&node)).await {
				continue;
			}
			{
				let mut list = self.successor_list.write().unwrap();
				for j in i..len {
					let entry = list[j].take();
					list[j - i] = entry;
				}
			}
			info!("{}: successor list compacted, new head {}", self.node, node);
			// let the promoted successor finish its own maintenance round
			// before it learns about us
			time::sleep(Duration::from_millis(self.config.maintain_interval * 2)).await;
			let _ = self.peers.notify(&node, self.node.clone()).await;
			return Ok(node);
		}
		Err(DhtError::NoAvailableSuccessor)
	}

	async fn closest_preceding_finger(&self, k_id: Digest) -> DhtResult<Node> {
		for i in (0..NUM_BITS).rev() {
			let entry = { self.finger_table.read().unwrap()[i].clone() };
			if let Some(finger) = entry {
				if within(finger.id, self.node.id, k_id, false)
					&& self.peers.ping(Some(&finger)).await
				{
					return Ok(finger);
				}
			}
		}
		self.first_available_successor().await
	}

	/// One stabilization step: reconcile the best successor with its
	/// predecessor pointer and rebuild the successor list from it.
	pub async fn stabilize(&self) {
		let mut suc = match self.first_available_successor().await {
			Ok(suc) => suc,
			Err(e) => {
				warn!("{}: stabilize: {}", self.node, e);
				return;
			}
		};
		if let Ok(Some(x)) = self.peers.get_predecessor(&suc).await {
			if within(x.id, self.node.id, suc.id, false) && self.peers.ping(Some(&x)).await {
				info!("{}: successor updated from {} to {}", self.node, suc, x);
				suc = x;
			}
		}
		let pulled = self.peers.get_successor_list(&suc).await.unwrap_or_default();
		self.rebuild_successor_list(&suc, pulled).await;
		if let Err(e) = self.peers.notify(&suc, self.node.clone()).await {
			debug!("{}: notify {} failed: {}", self.node, suc, e);
		}
	}

	// Slot 0 becomes `head`; the live entries of `pulled` fill the rest
	// in order, skipping dead peers instead of propagating them.
	async fn rebuild_successor_list(&self, head: &Node, pulled: Vec<Option<Node>>) {
		let len = self.config.successor_list_len;
		let mut fresh = vec![None; len];
		fresh[0] = Some(head.clone());
		let mut cnt = 1;
		for entry in pulled.into_iter().take(len - 1) {
			if cnt >= len {
				break;
			}
			let node = match entry {
				Some(node) => node,
				None => continue,
			};
			if self.peers.ping(Some(&node)).await {
				fresh[cnt] = Some(node);
				cnt += 1;
			}
		}
		self.set_successor_list(fresh);
	}

	/// Resolve one finger per call, rotating through the table.
	pub async fn fix_finger(&self) {
		let next = self.next_finger.load(Ordering::Relaxed);
		let target = finger_start(self.node.id, next);
		let suc = match self.find_successor(target).await {
			Ok(suc) => suc,
			Err(e) => {
				warn!("{}: fix_finger: {}", self.node, e);
				return;
			}
		};
		{
			let mut table = self.finger_table.write().unwrap();
			let slot = &mut table[next];
			if slot.as_ref().map(|n| n.addr.as_str()) != Some(suc.addr.as_str()) {
				debug!("{}: finger {} set to {}", self.node, next, suc);
				*slot = Some(suc);
			}
		}
		self.next_finger.store((next + 1) % NUM_BITS, Ordering::Relaxed);
	}

	/// Drop the predecessor when it stops answering pings and take over
	/// the replica of its shard.
	pub async fn check_predecessor(&self) {
		let pre = match self.get_predecessor() {
			Some(pre) => pre,
			None => return,
		};
		if self.peers.ping(Some(&pre)).await {
			return;
		}
		info!("{}: predecessor {} failed", self.node, pre);
		self.set_predecessor(None);
		let orphaned = self.pre_backup.take();
		self.absorb(orphaned).await;
	}

	async fn notify(&self, candidate: Node) {
		let pre = self.get_predecessor();
		let adopt = match &pre {
			None => true,
			Some(p) => p.addr != candidate.addr && within(candidate.id, p.id, self.node.id, false),
		};
		if !adopt {
			return;
		}
		info!("{}: new predecessor {}", self.node, candidate);
		self.set_predecessor(Some(candidate.clone()));

		// Replica entries that now fall in (candidate, self] have lost
		// their owner and become ours; entries owned by the candidate
		// itself must stay backup, or a later handoff would resurrect them.
		let candidate_id = candidate.id;
		let self_id = self.node.id;
		let orphaned = self
			.pre_backup
			.extract(|k| within(digest(k), candidate_id, self_id, true));
		self.absorb(orphaned).await;

		// fresh replica of the new predecessor's shard
		match self.peers.get_store(&candidate).await {
			Ok(snapshot) => self.pre_backup.replace(snapshot),
			Err(e) => warn!("{}: failed to pull store of {}: {}", self.node, candidate, e),
		}
	}

	/// Move `orphaned` into the owned shard and mirror it to whoever
	/// backs us up. Merging already-present keys is a no-op, so replays
	/// are harmless.
	async fn absorb(&self, orphaned: HashMap<Key, Value>) {
		if orphaned.is_empty() {
			return;
		}
		info!("{}: absorbing {} backed-up entries into own shard", self.node, orphaned.len());
		self.store.merge(orphaned.clone());
		let suc = match self.first_available_successor().await {
			Ok(suc) => suc,
			Err(e) => {
				warn!("{}: cannot forward absorbed entries: {}", self.node, e);
				return;
			}
		};
		if suc.addr == self.node.addr {
			return;
		}
		if let Err(e) = self.peers.append_pre_backup(&suc, orphaned).await {
			warn!("{}: failed to forward absorbed entries to {}: {}", self.node, suc, e);
		}
	}

	/// Donor side of a join: split off everything outside
	/// (new_pre, self], keep it as the replica of the joiner's new shard
	/// and prune it from the old backup holder.
	async fn transfer_data(&self, new_pre: Node) -> HashMap<Key, Value> {
		info!("{}: handing keys over to joining predecessor {}", self.node, new_pre);
		let new_pre_id = new_pre.id;
		let self_id = self.node.id;
		let moved = self
			.store
			.extract(|k| !within(digest(k), new_pre_id, self_id, true));
		self.pre_backup.replace(moved.clone());

		match self.first_available_successor().await {
			Ok(suc) if suc.addr != new_pre.addr && suc.addr != self.node.addr => {
				if let Err(e) = self.peers.erase_redundant_pre_backup(&suc, moved.clone()).await {
					warn!("{}: failed to prune stale backup at {}: {}", self.node, suc, e);
				}
			}
			Ok(_) => {}
			Err(e) => warn!("{}: transfer without reachable successor: {}", self.node, e),
		}
		moved
	}

	async fn put_in_store(&self, key: Key, value: Value) -> ServiceResult<()> {
		debug!("{}: store put [{}]", self.node, key);
		self.store.put(key.clone(), value.clone());
		let suc = self
			.first_available_successor()
			.await
			.map_err(ServiceError::from)?;
		// replication is best-effort; the next backup rotation repairs misses
		if let Err(e) = self.peers.put_in_pre_backup(&suc, key, value).await {
			debug!("{}: backup put at {} failed: {}", self.node, suc, e);
		}
		Ok(())
	}

	async fn delete_in_store(&self, key: Key) -> ServiceResult<()> {
		debug!("{}: store delete [{}]", self.node, key);
		if self.store.remove(&key).is_none() {
			return Err(ServiceError::NotFound);
		}
		let suc = self
			.first_available_successor()
			.await
			.map_err(ServiceError::from)?;
		self.peers
			.delete_in_pre_backup(&suc, key)
			.await
			.map_err(ServiceError::from)
	}
}

#[tarpc::server]
impl NodeService for NodeServer {
	async fn find_successor_rpc(self, _: context::Context, k_id: Digest) -> ServiceResult<Node> {
		self.find_successor(k_id).await.map_err(ServiceError::from)
	}

	async fn first_available_successor_rpc(self, _: context::Context) -> ServiceResult<Node> {
		self.first_available_successor()
			.await
			.map_err(ServiceError::from)
	}

	async fn get_predecessor_rpc(self, _: context::Context) -> Option<Node> {
		self.get_predecessor()
	}

	async fn set_predecessor_rpc(self, _: context::Context, node: Option<Node>) {
		self.set_predecessor(node)
	}

	async fn get_successor_list_rpc(self, _: context::Context) -> Vec<Option<Node>> {
		self.get_successor_list()
	}

	async fn notify_rpc(self, _: context::Context, node: Node) {
		self.notify(node).await
	}

	async fn stabilize_rpc(self, _: context::Context) {
		self.stabilize().await
	}

	async fn check_predecessor_rpc(self, _: context::Context) {
		self.check_predecessor().await
	}

	async fn get_store_rpc(self, _: context::Context) -> HashMap<Key, Value> {
		self.store.snapshot()
	}

	async fn transfer_data_rpc(self, _: context::Context, new_pre: Node) -> HashMap<Key, Value> {
		self.transfer_data(new_pre).await
	}

	async fn erase_redundant_pre_backup_rpc(
		self,
		_: context::Context,
		moved: HashMap<Key, Value>,
	) {
		debug!("{}: erasing {} redundant backup entries", self.node, moved.len());
		self.pre_backup.remove_keys(moved.keys());
	}

	async fn append_pre_backup_rpc(self, _: context::Context, entries: HashMap<Key, Value>) {
		self.pre_backup.merge(entries);
	}

	async fn put_in_store_rpc(self, _: context::Context, key: Key, value: Value) -> ServiceResult<()> {
		self.put_in_store(key, value).await
	}

	async fn get_in_store_rpc(self, _: context::Context, key: Key) -> ServiceResult<Value> {
		self.store.get(&key).ok_or(ServiceError::NotFound)
	}

	async fn delete_in_store_rpc(self, _: context::Context, key: Key) -> ServiceResult<()> {
		self.delete_in_store(key).await
	}

	async fn put_in_pre_backup_rpc(self, _: context::Context, key: Key, value: Value) {
		debug!("{}: backup put [{}]", self.node, key);
		self.pre_backup.put(key, value);
	}

	async fn delete_in_pre_backup_rpc(self, _: context::Context, key: Key) -> ServiceResult<()> {
		debug!("{}: backup delete [{}]", self.node, key);
		match self.pre_backup.remove(&key) {
			Some(_) => Ok(()),
			None => Err(ServiceError::NotFound),
		}
	}
}
