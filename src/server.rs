use std::sync::{Arc, RwLock};

use futures::future::JoinAll;
use log::error;
use tokio::{sync::watch, task::JoinHandle};

/// Handle to a running node: the RPC listener plus the maintenance
/// tasks. Dropping it does not stop the node; use `stop` or let the
/// node quit on its own and `wait`.
pub struct ServerManager {
	pub(crate) handle: JoinAll<JoinHandle<()>>,
	pub(crate) shutdown: Arc<RwLock<Option<watch::Sender<bool>>>>,
}

impl ServerManager {
	/// Signal every task to stop and wait for them to finish.
	pub async fn stop(self) {
		let ServerManager { handle, shutdown } = self;
		{
			if let Some(tx) = shutdown.read().unwrap().as_ref() {
				// tasks may have exited already
				let _ = tx.send(true);
			}
		}
		for result in handle.await {
			if let Err(e) = result {
				error!("node task failed: {}", e);
			}
		}
	}

	/// Block until the node shuts down on its own.
	pub async fn wait(self) {
		for result in self.handle.await {
			if let Err(e) = result {
				error!("node task failed: {}", e);
			}
		}
	}
}
