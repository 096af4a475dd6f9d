mod common;
use common::*;

const ADDR_A: &str = "127.0.0.1:17210";
const ADDR_B: &str = "127.0.0.1:17211";
const ADDR_C: &str = "127.0.0.1:17212";

/// A voluntary leave hands the leaver's shard to its successor without
/// losing keys or leaving duplicate primary copies behind.
#[tokio::test]
async fn test_voluntary_leave() -> anyhow::Result<()> {
	let _ = env_logger::builder().is_test(true).try_init();
	let config = test_config();

	let (a, m_a) = spawn_node(ADDR_A, &config).await?;
	a.create();
	let (b, m_b) = spawn_node(ADDR_B, &config).await?;
	b.join(a.node()).await?;
	wait_rounds(&config, 4).await;
	let (c, m_c) = spawn_node(ADDR_C, &config).await?;
	c.join(a.node()).await?;
	wait_rounds(&config, 6).await;

	let keys: Vec<String> = (0..30).map(|i| format!("k{}", i)).collect();
	for key in &keys {
		a.put(key, "v").await?;
	}
	b.quit().await?;
	assert!(!b.is_online());
	wait_rounds(&config, 5).await;

	// every key now lives on exactly one of the two survivors
	let store_a = a.store_snapshot();
	let store_c = c.store_snapshot();
	let survivors = [ADDR_A, ADDR_C];
	for key in &keys {
		assert!(
			store_a.contains_key(key) ^ store_c.contains_key(key),
			"key {} duplicated or lost",
			key
		);
		let owner = if key_owner(&survivors, key) == ADDR_A { &a } else { &c };
		assert!(owner.store_snapshot().contains_key(key), "key {} misplaced", key);
		assert_eq!(get_with_retry(&a, &config, key, 5).await, Some("v".to_string()));
		assert_eq!(get_with_retry(&c, &config, key, 5).await, Some("v".to_string()));
	}
	assert_eq!(store_a.len() + store_c.len(), keys.len());

	assert_ring_closed(&[&a, &c]);
	assert_predecessors_consistent(&[&a, &c]);

	m_a.stop().await;
	m_b.stop().await;
	m_c.stop().await;
	Ok(())
}
