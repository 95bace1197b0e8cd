use super::*;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{Database, QueryOrder};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use crate::database::entity::blob::{self, BlobState};
use crate::database::entity::chunk::{self, Entity as Chunk};
use crate::database::migration::{Migrator, MigratorTrait};
use crate::database::BalloonDatabase;
use crate::error::InsufficientStorageReason;
use balloon::api::v1::store_file::StoreFileResultKind;
use balloon::hash::Hash;
use balloon::testing::{get_fake_data, get_other_fake_data};

struct TestStorage {
    _dir: TempDir,
    database: DatabaseConnection,
    quota: Arc<DatabaseQuota>,
    storage: BlobStorage,
}

fn storage_config(chunk_size: usize, read_buffer_size: usize) -> StorageConfig {
    StorageConfig {
        chunk_size,
        read_buffer_size,
        read_prefetch: 2,
        max_file_size: None,
    }
}

async fn setup(config: StorageConfig, default_hard_quota: Option<u64>) -> TestStorage {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

    let database = Database::connect(&url).await.unwrap();
    Migrator::up(&database, None).await.unwrap();

    let quota = Arc::new(DatabaseQuota::new(database.clone(), default_hard_quota));
    let storage = BlobStorage::new(database.clone(), quota.clone(), config);

    TestStorage {
        _dir: dir,
        database,
        quota,
        storage,
    }
}

fn file_id(id: &str) -> FileId {
    FileId::new(id.to_string()).unwrap()
}

fn file_ref(id: &str, result: &StoreFileResult) -> FileRef {
    FileRef {
        id: file_id(id),
        owner: "alice".to_string(),
        version: 1,
        storage: Some(result.reference),
        size: result.size,
        history: Vec::new(),
    }
}

impl TestStorage {
    async fn upload(&self, data: &[u8], session: Option<Uuid>) -> ServerResult<Uuid> {
        self.storage.store_temporary(data, "alice", session).await
    }

    async fn upload_file(&self, id: &str, data: &[u8]) -> StoreFileResult {
        let session = self.upload(data, None).await.unwrap();
        self.storage.finalize(session, &file_id(id)).await.unwrap()
    }

    async fn read_blob(&self, blob_id: Uuid) -> Vec<u8> {
        let mut reader = self.storage.open_blob_stream(blob_id).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn chunks(&self, blob_id: Uuid) -> Vec<Vec<u8>> {
        Chunk::find()
            .filter(chunk::Column::BlobId.eq(blob_id))
            .order_by_asc(chunk::Column::Seq)
            .all(&self.database)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.data)
            .collect()
    }

    async fn num_blobs(&self) -> u64 {
        Blob::find().count(&self.database).await.unwrap()
    }

    async fn num_chunks(&self) -> u64 {
        Chunk::find().count(&self.database).await.unwrap()
    }

    async fn used_bytes(&self, user: &str) -> i64 {
        self.quota
            .usage(user)
            .await
            .unwrap()
            .map(|q| q.used_bytes)
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn test_hello_world() {
    let t = setup(storage_config(5, 1024), None).await;

    let session = t.upload(b"hello world", None).await.unwrap();
    assert_eq!(
        vec![b"hello".to_vec(), b" worl".to_vec(), b"d".to_vec()],
        t.chunks(session).await
    );

    let first = t.storage.finalize(session, &file_id("file-a")).await.unwrap();
    assert_eq!(session, first.reference.id);
    assert_eq!(11, first.size);
    assert_eq!(Hash::sha256_from_bytes(b"hello world"), first.hash);
    assert_eq!(StoreFileResultKind::Uploaded, first.kind);

    let second = t.upload_file("file-b", b"hello world").await;
    assert_eq!(first.reference, second.reference);
    assert_eq!(11, second.size);
    assert_eq!(StoreFileResultKind::Deduplicated, second.kind);

    assert_eq!(1, t.num_blobs().await);
    assert_eq!(3, t.num_chunks().await);

    let blob = t.database.find_blob(session).await.unwrap();
    assert_eq!(BlobState::Finalized, blob.state);
    assert_eq!(0, blob.holders_count);
    assert_eq!(
        Some(Hash::sha256_from_bytes(b"hello world").to_typed_base16()),
        blob.content_hash
    );
    assert_eq!(
        vec!["file-a".to_string(), "file-b".to_string()],
        t.database.find_blob_references(session).await.unwrap()
    );

    assert_eq!(b"hello world".to_vec(), t.read_blob(session).await);
}

#[tokio::test]
async fn test_resumed_upload() {
    let t = setup(storage_config(7, 3), None).await;
    let data = get_fake_data(100);

    // Resume at offsets that land everywhere relative to chunk boundaries
    let mut session = None;
    let mut offset = 0;
    for len in [1, 6, 7, 13, 2, 20, 51] {
        let id = t.upload(&data[offset..offset + len], session).await.unwrap();
        session = Some(id);
        offset += len;
    }
    assert_eq!(100, offset);

    let session = session.unwrap();
    let chunks = t.chunks(session).await;
    assert_eq!(15, chunks.len());
    assert!(chunks[..14].iter().all(|c| c.len() == 7));
    assert_eq!(2, chunks[14].len());

    assert_eq!(data, t.read_blob(session).await);

    let result = t.storage.finalize(session, &file_id("file")).await.unwrap();
    assert_eq!(Hash::sha256_from_bytes(&data), result.hash);
    assert_eq!(100, result.size);
}

#[tokio::test]
async fn test_partial_chunk_fill() {
    let t = setup(storage_config(5, 1024), None).await;

    let session = t.upload(b"ab", None).await.unwrap();
    t.upload(b"c", Some(session)).await.unwrap();
    assert_eq!(vec![b"abc".to_vec()], t.chunks(session).await);

    t.upload(b"de", Some(session)).await.unwrap();
    assert_eq!(vec![b"abcde".to_vec()], t.chunks(session).await);

    t.upload(b"fghijkl", Some(session)).await.unwrap();
    assert_eq!(
        vec![b"abcde".to_vec(), b"fghij".to_vec(), b"kl".to_vec()],
        t.chunks(session).await
    );

    let blob = t.database.find_blob(session).await.unwrap();
    assert_eq!(12, blob.size);
    assert!(blob.uploaded_at.is_some());
}

#[tokio::test]
async fn test_append_bytes() {
    let t = setup(storage_config(4, 1024), None).await;

    let session = t.upload(b"", None).await.unwrap();
    assert_eq!(0, t.storage.append_bytes(session, Bytes::new()).await.unwrap());
    assert_eq!(
        6,
        t.storage
            .append_bytes(session, Bytes::from_static(b"abcdef"))
            .await
            .unwrap()
    );
    assert_eq!(
        6,
        t.storage.append_bytes(session, Bytes::new()).await.unwrap()
    );
    assert_eq!(b"abcdef".to_vec(), t.read_blob(session).await);

    assert!(matches!(
        t.storage
            .append_bytes(Uuid::new_v4(), Bytes::from_static(b"x"))
            .await,
        Err(ServerError::NoSuchBlob)
    ));

    // the partial tail chunk has disappeared
    Chunk::delete_many()
        .filter(chunk::Column::BlobId.eq(session))
        .filter(chunk::Column::Seq.eq(1))
        .exec(&t.database)
        .await
        .unwrap();

    assert!(matches!(
        t.storage
            .append_bytes(session, Bytes::from_static(b"x"))
            .await,
        Err(ServerError::MissingChunk { seq: 1, .. })
    ));

    t.storage.finalize(session, &file_id("file")).await.unwrap_err();
}

#[tokio::test]
async fn test_finalized_blob_is_immutable() {
    let t = setup(storage_config(5, 1024), None).await;

    let result = t.upload_file("file", b"content").await;
    let blob_id = result.reference.id;

    assert!(matches!(
        t.storage.finalize(blob_id, &file_id("other")).await,
        Err(ServerError::BlobFinalized)
    ));
    assert!(matches!(
        t.storage
            .append_bytes(blob_id, Bytes::from_static(b"more"))
            .await,
        Err(ServerError::BlobFinalized)
    ));
    assert!(matches!(
        t.upload(b"more", Some(blob_id)).await,
        Err(ServerError::NoSuchSession)
    ));

    assert_eq!(b"content".to_vec(), t.read_blob(blob_id).await);
}

#[tokio::test]
async fn test_sessions() {
    let t = setup(storage_config(5, 1024), None).await;

    assert!(matches!(
        t.upload(b"data", Some(Uuid::new_v4())).await,
        Err(ServerError::NoSuchSession)
    ));

    let session = t.upload(b"data", None).await.unwrap();
    assert!(matches!(
        t.storage
            .store_temporary(&b"more"[..], "mallory", Some(session))
            .await,
        Err(ServerError::NoSuchSession)
    ));

    assert!(matches!(
        t.storage.finalize(Uuid::new_v4(), &file_id("file")).await,
        Err(ServerError::NoSuchBlob)
    ));
}

#[tokio::test]
async fn test_empty_blob() {
    let t = setup(storage_config(5, 1024), None).await;

    let result = t.upload_file("empty", b"").await;
    assert_eq!(0, result.size);
    assert_eq!(Hash::sha256_from_bytes(b""), result.hash);
    assert_eq!(0, t.num_chunks().await);

    assert!(t.read_blob(result.reference.id).await.is_empty());
}

#[tokio::test]
async fn test_reference_counting() {
    let t = setup(storage_config(5, 1024), None).await;
    let data = get_fake_data(23);

    let a = t.upload_file("file-a", &data).await;
    let b = t.upload_file("file-b", &data).await;
    let blob_id = a.reference.id;
    assert_eq!(blob_id, b.reference.id);

    let other = t.upload_file("file-c", &get_other_fake_data(23)).await;
    assert_ne!(blob_id, other.reference.id);

    let released = t
        .storage
        .release_reference(blob_id, &file_id("file-a"))
        .await
        .unwrap();
    assert!(released.removed);
    assert!(!released.blob_gone);
    assert_eq!(data, t.read_blob(blob_id).await);

    let released = t
        .storage
        .release_reference(blob_id, &file_id("file-b"))
        .await
        .unwrap();
    assert!(released.removed);
    assert!(released.blob_gone);
    assert!(t.chunks(blob_id).await.is_empty());
    assert!(matches!(
        t.database.find_blob(blob_id).await,
        Err(ServerError::NoSuchBlob)
    ));

    // idempotent
    let released = t
        .storage
        .release_reference(blob_id, &file_id("file-b"))
        .await
        .unwrap();
    assert_eq!(
        ReleasedReference {
            removed: false,
            blob_gone: true
        },
        released
    );
    let released = t
        .storage
        .release_reference(Uuid::new_v4(), &file_id("file-b"))
        .await
        .unwrap();
    assert!(!released.removed);
    assert!(released.blob_gone);

    assert_eq!(1, t.num_blobs().await);
    assert_eq!(get_other_fake_data(23), t.read_blob(other.reference.id).await);
}

#[tokio::test]
async fn test_held_blob_survives_release() {
    let t = setup(storage_config(5, 1024), None).await;

    let result = t.upload_file("file", b"held").await;
    let blob_id = result.reference.id;

    let guard = t
        .database
        .find_and_lock_blob(&result.hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(1, guard.holders_count);

    let released = t
        .storage
        .release_reference(blob_id, &file_id("file"))
        .await
        .unwrap();
    assert!(released.removed);
    assert!(!released.blob_gone);

    guard.release().await;

    let blob = t.database.find_blob(blob_id).await.unwrap();
    assert_eq!(0, blob.holders_count);
}

#[tokio::test]
async fn test_quota_abort() {
    let t = setup(storage_config(5, 4), Some(10)).await;

    let err = t.upload(&get_fake_data(20), None).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::InsufficientStorage {
            reason: InsufficientStorageReason::UserQuotaFull
        }
    ));

    assert_eq!(0, t.num_blobs().await);
    assert_eq!(0, t.num_chunks().await);
    assert_eq!(0, t.used_bytes("alice").await);

    // still within quota
    let result = t.upload_file("file", &get_fake_data(10)).await;
    assert_eq!(10, result.size);
    assert_eq!(10, t.used_bytes("alice").await);
}

#[tokio::test]
async fn test_quota_charges_resumed_uploads() {
    let t = setup(storage_config(5, 4), None).await;
    t.quota.set_hard_quota("alice", Some(12)).await.unwrap();

    let session = t.upload(&get_fake_data(8), None).await.unwrap();
    assert_eq!(8, t.used_bytes("alice").await);

    let err = t
        .upload(&get_fake_data(8), Some(session))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::InsufficientStorage { .. }));

    assert_eq!(0, t.num_blobs().await);
    assert_eq!(0, t.used_bytes("alice").await);

    // other users aren't limited
    t.storage
        .store_temporary(&get_fake_data(100)[..], "bob", None)
        .await
        .unwrap();
    assert_eq!(100, t.used_bytes("bob").await);
}

#[tokio::test]
async fn test_max_file_size() {
    let mut config = storage_config(5, 4);
    config.max_file_size = Some(6);
    let t = setup(config, None).await;

    let err = t.upload(&get_fake_data(7), None).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::InsufficientStorage {
            reason: InsufficientStorageReason::FileTooLarge
        }
    ));

    assert_eq!(0, t.num_blobs().await);
    assert_eq!(0, t.used_bytes("alice").await);
}

#[tokio::test]
async fn test_unlimited_quota() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let database = Database::connect(&url).await.unwrap();
    Migrator::up(&database, None).await.unwrap();

    let storage = BlobStorage::new(database, Arc::new(Unlimited), storage_config(5, 4));
    let session = storage
        .store_temporary(&get_fake_data(64)[..], "alice", None)
        .await
        .unwrap();
    let result = storage.finalize(session, &file_id("file")).await.unwrap();

    assert_eq!(64, result.size);
}

#[tokio::test]
async fn test_adapter() {
    let t = setup(storage_config(5, 1024), None).await;
    let adapter: &dyn StorageAdapter = &t.storage;

    let mut stream = &b"version one"[..];
    let session = adapter
        .store_temporary_file(&mut stream, "alice", None)
        .await
        .unwrap();

    let mut file = FileRef {
        id: file_id("file"),
        owner: "alice".to_string(),
        version: 1,
        storage: None,
        size: 0,
        history: Vec::new(),
    };
    assert!(!adapter.has_node(&file).await.unwrap());

    let v1 = adapter.store_file(&file, session).await.unwrap();
    file.storage = Some(v1.reference);
    file.size = v1.size;
    assert!(adapter.has_node(&file).await.unwrap());

    let mut stream = &b"version two"[..];
    let session = adapter
        .store_temporary_file(&mut stream, "alice", None)
        .await
        .unwrap();
    let v2 = adapter.store_file(&file, session).await.unwrap();
    file.history.push(FileVersion {
        version: 1,
        storage: file.storage,
        size: file.size,
    });
    file.version = 2;
    file.storage = Some(v2.reference);
    file.size = v2.size;

    let mut reader = adapter.open_read_stream(&file).await.unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).await.unwrap();
    assert_eq!("version two", buf);

    // soft delete keeps everything
    assert_eq!(
        Some(v1.reference),
        adapter.delete_file(&file, Some(1)).await.unwrap()
    );
    assert_eq!(
        Some(v2.reference),
        adapter.delete_file(&file, None).await.unwrap()
    );
    assert_eq!(2, t.num_blobs().await);

    assert!(matches!(
        adapter.delete_file(&file, Some(7)).await,
        Err(ServerError::NoSuchVersion { version: 7 })
    ));
    assert!(matches!(
        adapter.force_delete_file(&file, Some(7)).await,
        Err(ServerError::NoSuchVersion { version: 7 })
    ));

    assert_eq!(22, t.used_bytes("alice").await);

    assert!(adapter.force_delete_file(&file, Some(1)).await.unwrap());
    assert_eq!(1, t.num_blobs().await);
    assert_eq!(11, t.used_bytes("alice").await);

    file.history.clear();
    assert!(adapter.force_delete_file(&file, None).await.unwrap());
    assert_eq!(0, t.num_blobs().await);
    assert_eq!(0, t.used_bytes("alice").await);
    assert!(!adapter.has_node(&file).await.unwrap());

    file.storage = None;
    assert!(!adapter.force_delete_file(&file, None).await.unwrap());
    assert!(matches!(
        adapter.open_read_stream(&file).await,
        Err(ServerError::NoSuchBlob)
    ));
}

#[tokio::test]
async fn test_versions_sharing_a_blob() {
    let t = setup(storage_config(5, 1024), None).await;

    let v1 = t.upload_file("file", b"same").await;
    let v2 = t.upload_file("file", b"same").await;
    assert_eq!(v1.reference, v2.reference);

    let mut file = file_ref("file", &v2);
    file.version = 2;
    file.history.push(FileVersion {
        version: 1,
        storage: Some(v1.reference),
        size: v1.size,
    });

    assert_eq!(8, t.used_bytes("alice").await);

    assert!(t.storage.force_delete_file(&file, Some(1)).await.unwrap());
    assert_eq!(b"same".to_vec(), t.read_blob(v2.reference.id).await);
    assert_eq!(4, t.used_bytes("alice").await);

    file.history.clear();
    assert!(t.storage.force_delete_file(&file, None).await.unwrap());
    assert_eq!(0, t.num_blobs().await);
    assert_eq!(0, t.used_bytes("alice").await);
}

#[tokio::test]
async fn test_repeated_force_delete() {
    let t = setup(storage_config(5, 1024), None).await;

    let a = t.upload_file("file-a", &get_fake_data(10)).await;
    let b = t.upload_file("file-b", &get_other_fake_data(10)).await;
    assert_eq!(20, t.used_bytes("alice").await);

    let file = file_ref("file-a", &a);
    assert!(t.storage.force_delete_file(&file, None).await.unwrap());
    assert_eq!(10, t.used_bytes("alice").await);

    assert!(t.storage.force_delete_file(&file, None).await.unwrap());
    assert_eq!(10, t.used_bytes("alice").await);

    assert_eq!(get_other_fake_data(10), t.read_blob(b.reference.id).await);
}

#[tokio::test]
async fn test_failed_append_is_refunded() {
    let t = setup(storage_config(5, 1024), None).await;

    let session = t.upload(b"ab", None).await.unwrap();
    assert_eq!(2, t.used_bytes("alice").await);

    Chunk::delete_many()
        .filter(chunk::Column::BlobId.eq(session))
        .exec(&t.database)
        .await
        .unwrap();

    let err = t.upload(b"cde", Some(session)).await.unwrap_err();
    assert!(matches!(err, ServerError::MissingChunk { seq: 0, .. }));

    let blob = t.database.find_blob(session).await.unwrap();
    assert_eq!(2, blob.size);
    assert_eq!(blob.size, t.used_bytes("alice").await);
}

#[tokio::test]
async fn test_append_bumps_uploaded_at() {
    let t = setup(storage_config(5, 1024), None).await;

    let session = t.upload(b"ab", None).await.unwrap();

    let long_ago = Utc::now() - ChronoDuration::days(7);
    Blob::update_many()
        .col_expr(blob::Column::UploadedAt, Expr::value(long_ago))
        .filter(blob::Column::Id.eq(session))
        .exec(&t.database)
        .await
        .unwrap();

    t.storage
        .append_bytes(session, Bytes::from_static(b"cd"))
        .await
        .unwrap();

    let blob = t.database.find_blob(session).await.unwrap();
    assert!(blob.uploaded_at.unwrap() > long_ago);
}

#[test]
fn test_resolve_version() {
    let reference = StorageReference { id: Uuid::nil() };
    let file = FileRef {
        id: file_id("file"),
        owner: "alice".to_string(),
        version: 3,
        storage: Some(reference),
        size: 10,
        history: vec![FileVersion {
            version: 2,
            storage: None,
            size: 0,
        }],
    };

    assert_eq!((Some(reference), 10), file.resolve_version(None).unwrap());
    assert_eq!((Some(reference), 10), file.resolve_version(Some(3)).unwrap());
    assert_eq!((None, 0), file.resolve_version(Some(2)).unwrap());
    assert!(matches!(
        file.resolve_version(Some(1)),
        Err(ServerError::NoSuchVersion { version: 1 })
    ));
}
