use serde::{Deserialize, Serialize};
use std::result::Result;
use thiserror::Error;

/// Logical errors crossing the wire between peers.
///
/// Transport failures are not represented here; they surface as
/// `DhtError::Rpc`/`DhtError::Timeout` on the calling side.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
	#[error("not found")]
	NotFound,
	#[error("no available successor")]
	NoAvailableSuccessor,
	#[error("{0}")]
	Other(String),
}

#[derive(Error, Debug)]
pub enum DhtError {
	#[error("key not found")]
	NotFound,
	#[error("no available successor")]
	NoAvailableSuccessor,
	#[error("node {0} is offline")]
	Offline(String),
	#[error("node {0} is already part of a ring")]
	AlreadyOnline(String),
	#[error("timed out connecting to {0}")]
	Timeout(String),
	#[error("remote error: {0}")]
	Remote(String),
	#[error(transparent)]
	Rpc(#[from] tarpc::client::RpcError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl From<ServiceError> for DhtError {
	fn from(e: ServiceError) -> Self {
		match e {
			ServiceError::NotFound => DhtError::NotFound,
			ServiceError::NoAvailableSuccessor => DhtError::NoAvailableSuccessor,
			ServiceError::Other(m) => DhtError::Remote(m),
		}
	}
}

impl From<DhtError> for ServiceError {
	fn from(e: DhtError) -> Self {
		match e {
			DhtError::NotFound => ServiceError::NotFound,
			DhtError::NoAvailableSuccessor => ServiceError::NoAvailableSuccessor,
			e => ServiceError::Other(e.to_string()),
		}
	}
}

pub type DhtResult<T> = Result<T, DhtError>;
pub type ServiceResult<T> = Result<T, ServiceError>;
