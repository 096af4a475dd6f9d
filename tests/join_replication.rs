mod common;
use common::*;

use chord_kv::core::digest;
use rand::{rngs::StdRng, SeedableRng};

const ADDR_A: &str = "127.0.0.1:17110";
const ADDR_B: &str = "127.0.0.1:17111";

/// Two nodes: every key lands in the owner's shard and in the
/// successor's replica; killing the owner leaves the key readable.
#[tokio::test]
async fn test_join_and_replication() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let config = test_config();

	let (a, m_a) = spawn_node(ADDR_A, &config).await?;
	a.create();
	let (b, m_b) = spawn_node(ADDR_B, &config).await?;
	b.join(a.node()).await?;
	wait_rounds(&config, 5).await;

	for i in 0..20 {
		a.put(&format!("k{}", i), &format!("v{}", i)).await?;
	}

	let addrs = [ADDR_A, ADDR_B];
	for i in 0..20 {
		let key = format!("k{}", i);
		let value = format!("v{}", i);
		let (owner, other) = if key_owner(&addrs, &key) == ADDR_A {
			(&a, &b)
		} else {
			(&b, &a)
		};
		assert!(owner.store_snapshot().contains_key(&key), "key {}", key);
		assert!(!other.store_snapshot().contains_key(&key), "key {}", key);
		// the owner's only successor is the other node
		assert!(other.backup_snapshot().contains_key(&key), "key {}", key);
		assert_eq!(a.get(&key).await?, Some(value.clone()));
		assert_eq!(b.get(&key).await?, Some(value));
	}

	// put a key that lands on b, then crash b; a promotes its replica
	let mut rng = StdRng::seed_from_u64(7);
	let doomed_key = generate_key_in_range(&mut rng, digest(ADDR_A), digest(ADDR_B));
	a.put(&doomed_key, "survives").await?;
	assert!(b.store_snapshot().contains_key(&doomed_key));

	b.force_quit()?;
	wait_rounds(&config, 4).await;

	assert_eq!(
		get_with_retry(&a, &config, &doomed_key, 5).await,
		Some("survives".to_string())
	);
	assert!(a.store_snapshot().contains_key(&doomed_key));

	m_a.stop().await;
	m_b.stop().await;
	Ok(())
}
