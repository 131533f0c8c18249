//! Opening, configuration and introspection

use amdb::prelude::*;
use amdb::version;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use tempfile::TempDir;

#[test]
fn test_open_existing_file_as_directory_fails() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("not-a-dir");
    std::fs::write(&file, b"").unwrap();

    let err = Environment::open(EnvConfig::new(&file)).unwrap_err();
    assert!(matches!(err, AmdbError::Config(_)));
}

#[test]
fn test_open_junk_file_fails_without_side_effects() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("junk");
    std::fs::write(&file, vec![b'A'; 8192]).unwrap();

    let err = Environment::open(EnvConfig::new(&file).with_subdir(false)).unwrap_err();
    assert!(matches!(err, AmdbError::Config(_)));

    let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(&file).unwrap(), vec![b'A'; 8192]);
}

#[test]
fn test_missing_store_without_create() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("nested").join("env");

    let err = Environment::open(EnvConfig::new(&target).with_create(false)).unwrap_err();
    assert!(matches!(err, AmdbError::Config(_)));
    assert!(!temp.path().join("nested").exists());

    let err = Environment::open(EnvConfig::new(&target).with_readonly(true)).unwrap_err();
    assert!(matches!(err, AmdbError::Config(_)));
    assert!(!temp.path().join("nested").exists());
}

#[test]
fn test_invalid_arguments_rejected_synchronously() {
    let temp = TempDir::new().unwrap();
    let base = EnvConfig::new(temp.path().join("env"));

    for cfg in [
        base.clone().with_map_size(0),
        base.clone().with_max_readers(0),
        base.clone().with_worker_threads(0),
        base.clone().with_mode(0o1777),
    ] {
        let err = Environment::open(cfg).unwrap_err();
        assert!(matches!(err, AmdbError::Config(_)));
    }
    assert!(!temp.path().join("env").exists());
}

#[test]
fn test_single_file_mode() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("store.mdb");
    let env = Environment::open(EnvConfig::new(&file).with_subdir(false)).unwrap();

    assert!(file.is_file());
    assert!(!env.flags().unwrap().subdir);
    assert_eq!(env.path().unwrap(), file);
}

#[tokio::test]
async fn test_readonly_environment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("env");
    {
        let env = Environment::open(EnvConfig::new(&path).with_max_dbs(2)).unwrap();
        env.default_database()
            .put(b"k".to_vec(), b"v".to_vec())
            .await
            .unwrap();
        env.open_database("named", DbOptions::new()).await.unwrap();
        env.close();
    }

    let env = Environment::open(EnvConfig::new(&path).with_max_dbs(2).with_readonly(true)).unwrap();
    assert!(env.flags().unwrap().readonly);

    let db = env.default_database();
    assert_eq!(db.get(b"k".to_vec()).await.unwrap(), Some(b"v".to_vec()));
    let err = db.put(b"k".to_vec(), b"w".to_vec()).await.unwrap_err();
    assert!(matches!(err, AmdbError::ReadOnly(_)));

    let err = env
        .open_database("named", DbOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AmdbError::ReadOnly(_)));
    let named = env
        .open_database("named", DbOptions::new().with_create(false))
        .await
        .unwrap();
    assert_eq!(named.stat().await.unwrap().entries, 0);

    // Once closed, writes report the closed environment, not its mode.
    env.close();
    assert!(db
        .put(b"k".to_vec(), b"w".to_vec())
        .await
        .unwrap_err()
        .is_closed());
    assert!(named.drop_db(true).await.unwrap_err().is_closed());
    assert!(env
        .open_database("other", DbOptions::new())
        .await
        .unwrap_err()
        .is_closed());
}

#[test]
fn test_junk_data_file_in_existing_directory_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("env");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("data.mdb"), vec![b'A'; 8192]).unwrap();

    let err = Environment::open(EnvConfig::new(&dir)).unwrap_err();
    assert!(matches!(err, AmdbError::Config(_)));
    assert!(!dir.join("lock.mdb").exists());
    assert_eq!(std::fs::read(dir.join("data.mdb")).unwrap(), vec![b'A'; 8192]);
}

#[tokio::test]
async fn test_flags_follow_config() {
    let temp = TempDir::new().unwrap();
    let env = Environment::open(
        EnvConfig::new(temp.path().join("env"))
            .with_metasync(false)
            .with_map_async(true)
            .with_writemap(true)
            .with_meminit(false),
    )
    .unwrap();

    let flags = env.flags().unwrap();
    assert!(flags.subdir);
    assert!(!flags.readonly);
    assert!(!flags.metasync);
    assert!(flags.sync);
    assert!(flags.map_async);
    assert!(flags.writemap);
    assert!(!flags.meminit);
    assert!(flags.readahead);
    assert!(flags.lock);
}

#[tokio::test]
async fn test_info_and_stat_track_writes() {
    let temp = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(temp.path().join("env"))).unwrap();

    let info = env.info().unwrap();
    assert_eq!(info.map_size, 10 * 1024 * 1024);
    assert_eq!(info.last_txnid, 0);
    assert_eq!(info.max_readers, 126);
    assert_eq!(env.max_readers().unwrap(), 126);
    assert!(env.max_key_size().unwrap() >= 511);

    let readers = env.readers().unwrap();
    assert_eq!(readers.max_readers, 126);
    assert_eq!(env.reader_check().unwrap(), 0);

    env.default_database()
        .put(b"a".to_vec(), b"b".to_vec())
        .await
        .unwrap();
    assert_eq!(env.info().unwrap().last_txnid, 1);

    let stat = env.stat().unwrap();
    assert_eq!(stat.entries, 1);
    assert_eq!(stat.depth, 1);
    assert!(stat.page_size >= 4096);
}

#[tokio::test]
async fn test_named_databases_need_max_dbs() {
    let temp = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(temp.path().join("env"))).unwrap();
    let err = env
        .open_database("users", DbOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_capacity());
}

#[tokio::test]
async fn test_copy_to_descriptor_and_sync() {
    let temp = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(temp.path().join("env")).with_sync(false)).unwrap();
    env.default_database()
        .put(b"a".to_vec(), b"b".to_vec())
        .await
        .unwrap();
    env.sync(true).await.unwrap();

    let copy_dir = temp.path().join("fdcopy");
    std::fs::create_dir(&copy_dir).unwrap();
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(copy_dir.join("data.mdb"))
        .unwrap();
    env.copy_to_fd(file.as_raw_fd(), false).await.unwrap();
    drop(file);

    let copied = Environment::open(EnvConfig::new(&copy_dir)).unwrap();
    assert_eq!(
        copied.default_database().get(b"a".to_vec()).await.unwrap(),
        Some(b"b".to_vec())
    );
}

#[test]
fn test_version() {
    let v = version();
    let (major, minor, _) = v.as_tuple();
    assert_eq!(major, 0);
    assert!(minor >= 9);
    assert_eq!(v.to_string(), format!("{}.{}.{}", v.major, v.minor, v.patch));
}

#[test]
fn test_config_roundtrips_through_json() {
    let cfg = EnvConfig::new("/var/lib/amdb")
        .with_map_size(1 << 30)
        .with_max_dbs(16)
        .with_readonly(true);
    let json = serde_json::to_string(&cfg).unwrap();
    let back: EnvConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.map_size, 1 << 30);
    assert_eq!(back.max_dbs, 16);
    assert!(back.readonly);

    // Missing fields fall back to defaults.
    let sparse: EnvConfig = serde_json::from_str(r#"{"path": "/tmp/x"}"#).unwrap();
    assert_eq!(sparse.max_readers, 126);
    assert!(sparse.create);
}
