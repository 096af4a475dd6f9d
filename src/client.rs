use crate::core::error::DhtResult;
use crate::rpc::NodeServiceClient;
use log::debug;
use tarpc::tokio_serde::formats::Bincode;

pub async fn setup_client(addr: &str) -> DhtResult<NodeServiceClient> {
	debug!("connecting to {}", addr);
	let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default).await?;
	Ok(NodeServiceClient::new(tarpc::client::Config::default(), transport).spawn())
}
