use async_trait::async_trait;
use std::error::Error;
use std::fmt::Display;
use std::io;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub mod memory;

pub type BoxErr = Box<dyn Error + Send + Sync>;

/// An owned object body. Writers hand one over per call; readers receive one per call.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
  BucketNotFound(String),
  ObjectNotFound(String),
  RangeOutOfBounds { start: u64, end: u64, size: u64 },
  DataStream(io::Error),
  Backend(BoxErr),
}

impl Display for StoreError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StoreError::BucketNotFound(b) => write!(f, "bucket {b} does not exist"),
      StoreError::ObjectNotFound(k) => write!(f, "object {k} does not exist"),
      StoreError::RangeOutOfBounds { start, end, size } => write!(
        f,
        "requested range {start}..{end} is invalid for object of size {size}"
      ),
      StoreError::DataStream(e) => write!(f, "an error occurred while streaming object data: {e}"),
      StoreError::Backend(e) => write!(f, "store backend error: {e}"),
    }
  }
}

impl Error for StoreError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      StoreError::DataStream(e) => Some(e),
      StoreError::Backend(e) => Some(e.as_ref()),
      _ => None,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct WriteObjectOptions {
  pub content_type: Option<String>,
}

pub struct WriteObjectInput<'a> {
  pub bucket: &'a str,
  pub key: &'a str,
  /// Declared size. Backends may reject a body that doesn't match, or report what they actually stored via `bytes_written`.
  pub size: u64,
  pub data: ObjectReader,
  pub opts: WriteObjectOptions,
}

pub struct WriteObjectOutput {
  pub bytes_written: u64,
}

/// Byte range to read. `end` is exclusive; `None` reads to the end of the object.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadObjectOptions {
  pub start: u64,
  pub end: Option<u64>,
}

pub struct ReadObjectInput<'a> {
  pub bucket: &'a str,
  pub key: &'a str,
  pub opts: ReadObjectOptions,
}

pub struct ReadObjectOutput {
  pub data: ObjectReader,
}

pub struct DeleteObjectInput<'a> {
  pub bucket: &'a str,
  pub key: &'a str,
}

#[async_trait]
pub trait Store: Send + Sync {
  fn metrics(&self) -> Vec<(&'static str, u64)> {
    vec![]
  }

  /// Succeeds if the bucket already exists.
  async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;
  async fn write_object<'a>(&'a self, input: WriteObjectInput<'a>) -> StoreResult<WriteObjectOutput>;
  async fn read_object<'a>(&'a self, input: ReadObjectInput<'a>) -> StoreResult<ReadObjectOutput>;
  async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<String>>;
  async fn delete_object<'a>(&'a self, input: DeleteObjectInput<'a>) -> StoreResult<()>;
}
