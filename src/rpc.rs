use std::collections::HashMap;

use crate::core::{
	data_store::{Key, Value},
	error::ServiceResult,
	ring::Digest,
	Node,
};

#[tarpc::service]
pub trait NodeService {
	async fn find_successor_rpc(k_id: Digest) -> ServiceResult<Node>;
	async fn first_available_successor_rpc() -> ServiceResult<Node>;
	async fn get_predecessor_rpc() -> Option<Node>;
	async fn set_predecessor_rpc(node: Option<Node>);
	async fn get_successor_list_rpc() -> Vec<Option<Node>>;
	async fn notify_rpc(node: Node);
	async fn stabilize_rpc();
	async fn check_predecessor_rpc();

	// Shard snapshot and handoff
	async fn get_store_rpc() -> HashMap<Key, Value>;
	async fn transfer_data_rpc(new_pre: Node) -> HashMap<Key, Value>;
	async fn erase_redundant_pre_backup_rpc(moved: HashMap<Key, Value>);
	async fn append_pre_backup_rpc(entries: HashMap<Key, Value>);

	// Keyed operations on the local shard and the predecessor replica
	async fn put_in_store_rpc(key: Key, value: Value) -> ServiceResult<()>;
	async fn get_in_store_rpc(key: Key) -> ServiceResult<Value>;
	async fn delete_in_store_rpc(key: Key) -> ServiceResult<()>;
	async fn put_in_pre_backup_rpc(key: Key, value: Value);
	async fn delete_in_pre_backup_rpc(key: Key) -> ServiceResult<()>;
}
