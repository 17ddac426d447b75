use crate::DeleteObjectInput;
use crate::ReadObjectInput;
use crate::ReadObjectOutput;
use crate::Store;
use crate::StoreError;
use crate::StoreResult;
use crate::WriteObjectInput;
use crate::WriteObjectOutput;
use ahash::HashMap;
use ahash::HashMapExt;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::debug;

#[derive(Default)]
struct MemoryStoreMetrics {
  write_ops: AtomicU64,
  write_bytes: AtomicU64,
  read_ops: AtomicU64,
  delete_ops: AtomicU64,
}

struct StoredObject {
  data: Bytes,
  content_type: Option<String>,
}

/// In-process store. Every call first waits out the configured latency (or yields once if there is none) so that tight benchmark loops still give the runtime a chance to schedule other tasks.
pub struct MemoryStore {
  buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
  latency: Duration,
  metrics: MemoryStoreMetrics,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      buckets: RwLock::new(HashMap::new()),
      latency: Duration::ZERO,
      metrics: MemoryStoreMetrics::default(),
    }
  }

  pub fn with_latency(latency: Duration) -> Self {
    Self {
      latency,
      ..Self::new()
    }
  }

  pub fn object_count(&self, bucket: &str) -> usize {
    self.buckets.read().get(bucket).map_or(0, |b| b.len())
  }

  /// Content type given when `key` was written, if any.
  pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
    self
      .buckets
      .read()
      .get(bucket)?
      .get(key)?
      .content_type
      .clone()
  }

  async fn simulate_round_trip(&self) {
    if self.latency.is_zero() {
      yield_now().await;
    } else {
      sleep(self.latency).await;
    }
  }
}

#[async_trait]
impl Store for MemoryStore {
  fn metrics(&self) -> Vec<(&'static str, u64)> {
    let m = &self.metrics;
    vec![
      ("write_ops", m.write_ops.load(Ordering::Relaxed)),
      ("write_bytes", m.write_bytes.load(Ordering::Relaxed)),
      ("read_ops", m.read_ops.load(Ordering::Relaxed)),
      ("delete_ops", m.delete_ops.load(Ordering::Relaxed)),
    ]
  }

  async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
    self.simulate_round_trip().await;
    let mut buckets = self.buckets.write();
    if !buckets.contains_key(bucket) {
      buckets.insert(bucket.to_string(), BTreeMap::new());
      debug!(bucket, "created bucket");
    };
    Ok(())
  }

  async fn write_object<'a>(&'a self, input: WriteObjectInput<'a>) -> StoreResult<WriteObjectOutput> {
    self.simulate_round_trip().await;
    let mut data = input.data;
    let mut buf = Vec::with_capacity(usize::try_from(input.size).unwrap_or(0));
    data
      .read_to_end(&mut buf)
      .await
      .map_err(StoreError::DataStream)?;
    let bytes_written = buf.len() as u64;
    match self.buckets.write().get_mut(input.bucket) {
      Some(objects) => objects.insert(input.key.to_string(), StoredObject {
        data: Bytes::from(buf),
        content_type: input.opts.content_type,
      }),
      None => return Err(StoreError::BucketNotFound(input.bucket.to_string())),
    };
    self.metrics.write_ops.fetch_add(1, Ordering::Relaxed);
    self
      .metrics
      .write_bytes
      .fetch_add(bytes_written, Ordering::Relaxed);
    Ok(WriteObjectOutput { bytes_written })
  }

  async fn read_object<'a>(&'a self, input: ReadObjectInput<'a>) -> StoreResult<ReadObjectOutput> {
    self.simulate_round_trip().await;
    let data = {
      let buckets = self.buckets.read();
      let objects = buckets
        .get(input.bucket)
        .ok_or_else(|| StoreError::BucketNotFound(input.bucket.to_string()))?;
      objects
        .get(input.key)
        .map(|o| o.data.clone())
        .ok_or_else(|| StoreError::ObjectNotFound(input.key.to_string()))?
    };
    let size = data.len() as u64;
    let start = input.opts.start;
    let end = input.opts.end.unwrap_or(size);
    if start > end || end > size {
      return Err(StoreError::RangeOutOfBounds { start, end, size });
    };
    self.metrics.read_ops.fetch_add(1, Ordering::Relaxed);
    // Both bounds are within `data.len()`, so they fit in usize.
    let data = data.slice(start as usize..end as usize);
    Ok(ReadObjectOutput {
      data: Box::pin(Cursor::new(data)),
    })
  }

  async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<String>> {
    self.simulate_round_trip().await;
    self
      .buckets
      .read()
      .get(bucket)
      .map(|objects| objects.keys().cloned().collect())
      .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
  }

  async fn delete_object<'a>(&'a self, input: DeleteObjectInput<'a>) -> StoreResult<()> {
    self.simulate_round_trip().await;
    let mut buckets = self.buckets.write();
    let objects = buckets
      .get_mut(input.bucket)
      .ok_or_else(|| StoreError::BucketNotFound(input.bucket.to_string()))?;
    objects
      .remove(input.key)
      .ok_or_else(|| StoreError::ObjectNotFound(input.key.to_string()))?;
    self.metrics.delete_ops.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::MemoryStore;
  use crate::DeleteObjectInput;
  use crate::ReadObjectInput;
  use crate::ReadObjectOptions;
  use crate::Store;
  use crate::StoreError;
  use crate::WriteObjectInput;
  use crate::WriteObjectOptions;
  use std::io::Cursor;
  use tokio::io::AsyncReadExt;

  async fn put(store: &MemoryStore, key: &str, data: &'static [u8]) {
    let out = store
      .write_object(WriteObjectInput {
        bucket: "b",
        key,
        size: data.len() as u64,
        data: Box::pin(Cursor::new(data)),
        opts: WriteObjectOptions::default(),
      })
      .await
      .unwrap();
    assert_eq!(out.bytes_written, data.len() as u64);
  }

  async fn get(store: &MemoryStore, key: &str, opts: ReadObjectOptions) -> Result<Vec<u8>, StoreError> {
    let mut res = store
      .read_object(ReadObjectInput {
        bucket: "b",
        key,
        opts,
      })
      .await?;
    let mut out = Vec::new();
    res.data.read_to_end(&mut out).await.unwrap();
    Ok(out)
  }

  #[tokio::test]
  async fn test_write_requires_bucket() {
    let store = MemoryStore::new();
    let err = store
      .write_object(WriteObjectInput {
        bucket: "missing",
        key: "k",
        size: 1,
        data: Box::pin(Cursor::new(b"x")),
        opts: WriteObjectOptions::default(),
      })
      .await
      .err()
      .unwrap();
    assert!(matches!(err, StoreError::BucketNotFound(b) if b == "missing"));
  }

  #[tokio::test]
  async fn test_keeps_content_type() {
    let store = MemoryStore::new();
    store.create_bucket("b").await.unwrap();
    store
      .write_object(WriteObjectInput {
        bucket: "b",
        key: "typed",
        size: 2,
        data: Box::pin(Cursor::new(b"{}")),
        opts: WriteObjectOptions {
          content_type: Some("application/json".to_string()),
        },
      })
      .await
      .unwrap();
    put(&store, "untyped", b"x").await;
    assert_eq!(store.content_type("b", "typed").as_deref(), Some("application/json"));
    assert_eq!(store.content_type("b", "untyped"), None);
    assert_eq!(store.content_type("b", "missing"), None);
  }

  #[tokio::test]
  async fn test_read_ranges() {
    let store = MemoryStore::new();
    store.create_bucket("b").await.unwrap();
    put(&store, "k", b"hello world").await;
    // Creating again is fine and keeps existing content.
    store.create_bucket("b").await.unwrap();

    assert_eq!(get(&store, "k", ReadObjectOptions::default()).await.unwrap(), b"hello world");
    assert_eq!(
      get(&store, "k", ReadObjectOptions { start: 6, end: None }).await.unwrap(),
      b"world"
    );
    assert_eq!(
      get(&store, "k", ReadObjectOptions { start: 0, end: Some(5) }).await.unwrap(),
      b"hello"
    );
    assert!(matches!(
      get(&store, "k", ReadObjectOptions { start: 4, end: Some(20) }).await,
      Err(StoreError::RangeOutOfBounds { size: 11, .. })
    ));
    assert!(matches!(
      get(&store, "nope", ReadObjectOptions::default()).await,
      Err(StoreError::ObjectNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_list_and_delete() {
    let store = MemoryStore::new();
    store.create_bucket("b").await.unwrap();
    put(&store, "b-obj", b"2").await;
    put(&store, "a-obj", b"1").await;
    assert_eq!(store.list_objects("b").await.unwrap(), vec!["a-obj", "b-obj"]);

    store
      .delete_object(DeleteObjectInput { bucket: "b", key: "a-obj" })
      .await
      .unwrap();
    assert_eq!(store.object_count("b"), 1);
    assert!(matches!(
      store
        .delete_object(DeleteObjectInput { bucket: "b", key: "a-obj" })
        .await,
      Err(StoreError::ObjectNotFound(_))
    ));

    let metrics = store.metrics();
    assert!(metrics.contains(&("write_ops", 2)));
    assert!(metrics.contains(&("delete_ops", 1)));
    assert!(matches!(
      store.list_objects("other").await,
      Err(StoreError::BucketNotFound(_))
    ));
  }
}
