use std::default::Default;

#[derive(Clone)]
pub struct Config {
	/// Number of successors tracked for failure recovery;
	/// tolerates up to (successor_list_len - 1) consecutive failures
	pub successor_list_len: usize,
	/// Interval between maintenance rounds (in ms);
	/// 0 disables the periodic tasks (useful for step-by-step tests)
	pub maintain_interval: u64,
	/// Time limit to establish a connection to a peer (in ms)
	pub rpc_timeout: u64,
	/// Time limit for a liveness probe (in ms);
	/// must not exceed rpc_timeout, which must stay well below maintain_interval
	pub ping_timeout: u64,
	/// Max number of concurrent inbound connections in buffer
	pub max_connections: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			successor_list_len: 5,
			maintain_interval: 1000,
			rpc_timeout: 200,
			ping_timeout: 50,
			max_connections: 16,
		}
	}
}
