//! Basic usage
//!
//! Demonstrates:
//! - Opening an environment and a few named databases
//! - Typed handles through coders (text keys, JSON and compressed values)
//! - A read-modify-write unit of work
//! - Hot copy and introspection
//!
//! Run with: cargo run --example basic_usage

use amdb::prelude::*;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("amdb=debug,amdb_lmdb=debug")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let env = Environment::open(EnvConfig::new(temp_dir.path().join("env")).with_max_dbs(4))?;
    println!("LMDB {}", amdb::version());

    // Typed handles
    let users = env
        .open_database("users", DbOptions::new())
        .await?
        .with_coders(StringCoder::new(), JsonCoder::<serde_json::Value>::new());
    users
        .put("alice".into(), json!({"age": 31, "langs": ["rust", "c"]}))
        .await?;
    println!("alice = {:?}", users.get("alice".into()).await?);

    let docs = env
        .open_database("docs", DbOptions::new())
        .await?
        .with_coders(UIntCoder::u32(), CompressedCoder::new(StringCoder::new()));
    docs.put(1, "lorem ipsum ".repeat(100)).await?;
    println!("doc 1 stored as {} entries", docs.stat().await?.entries);

    // Read-modify-write in a single transaction
    let counter = UIntCoder::u64();
    for _ in 0..3 {
        let c = counter;
        let hits = env
            .run(TxnMode::Write, move |txn| {
                let n = txn.get_decoded(b"hits", &c)?.unwrap_or(0) + 1;
                txn.put(b"hits", &c.serialize(&n)?, PutOptions::default())?;
                Ok(n)
            })
            .await?;
        println!("hits = {}", hits);
    }

    // Hot copy
    let copy_dir = temp_dir.path().join("backup");
    std::fs::create_dir(&copy_dir)?;
    env.copy(&copy_dir, true).await?;

    let info = env.info()?;
    println!(
        "map size {} bytes, last txn {}, readers {}/{}",
        info.map_size, info.last_txnid, info.num_readers, info.max_readers
    );

    env.close();
    Ok(())
}
