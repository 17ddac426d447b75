use crate::source::GeneratorConfig;
use bytesize::ByteSize;
use serde::Deserialize;
use serde::Serialize;
use std::error::Error;
use std::fmt::Display;

fn default_concurrency() -> u16 {
  20
}

fn default_objects() -> usize {
  2500
}

fn default_read_buffer_size() -> ByteSize {
  ByteSize::kib(32)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  /// Bucket holding the dataset. Any existing content is deleted during prepare.
  pub bucket: String,

  /// Workers per phase. Defaults to 20.
  #[serde(default = "default_concurrency")]
  pub concurrency: u16,

  /// Objects to upload before the timed run. Defaults to 2500.
  #[serde(default = "default_objects")]
  pub objects: usize,

  /// Buffer each download worker drains response bodies into. Defaults to 32 KiB.
  #[serde(default = "default_read_buffer_size")]
  pub read_buffer_size: ByteSize,

  #[serde(default)]
  pub generator: GeneratorConfig,
}

impl Config {
  pub fn new(bucket: impl Into<String>) -> Self {
    Self {
      bucket: bucket.into(),
      concurrency: default_concurrency(),
      objects: default_objects(),
      read_buffer_size: default_read_buffer_size(),
      generator: GeneratorConfig::default(),
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.bucket.is_empty() {
      return Err(ConfigError::EmptyBucketName);
    };
    if self.concurrency == 0 {
      return Err(ConfigError::ZeroConcurrency);
    };
    if self.objects == 0 {
      return Err(ConfigError::ZeroObjects);
    };
    if self.generator.object_size.as_u64() == 0 {
      return Err(ConfigError::ZeroObjectSize);
    };
    if usize::try_from(self.generator.object_size.as_u64()).is_err() {
      return Err(ConfigError::ObjectSizeTooLarge(self.generator.object_size));
    };
    if self.read_buffer_size.as_u64() == 0 {
      return Err(ConfigError::ZeroReadBufferSize);
    };
    Ok(())
  }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
  EmptyBucketName,
  ZeroConcurrency,
  ZeroObjects,
  ZeroObjectSize,
  ObjectSizeTooLarge(ByteSize),
  ZeroReadBufferSize,
}

impl Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConfigError::EmptyBucketName => write!(f, "bucket name must not be empty"),
      ConfigError::ZeroConcurrency => write!(f, "concurrency must be at least 1"),
      ConfigError::ZeroObjects => write!(f, "at least one object must be created"),
      ConfigError::ZeroObjectSize => write!(f, "object size must be at least 1 byte"),
      ConfigError::ObjectSizeTooLarge(s) => {
        write!(f, "object size {s} does not fit in memory on this platform")
      }
      ConfigError::ZeroReadBufferSize => write!(f, "read buffer size must be at least 1 byte"),
    }
  }
}

impl Error for ConfigError {}
