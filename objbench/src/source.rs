use bytes::Bytes;
use bytesize::ByteSize;
use objbench_store::ObjectReader;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::thread_rng;
use rand::Rng;
use rand::RngCore;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use std::io::Cursor;
use tracing::info;

/// A synthetic object ready to upload. The body is owned and consumed by the upload.
pub struct Object {
  pub name: String,
  pub size: u64,
  pub content_type: String,
  pub data: ObjectReader,
}

pub trait ObjectSource: Send {
  fn next_object(&mut self) -> Object;
}

pub trait Generator: Send + Sync {
  /// Sources created with the same seed produce the same names and sizes.
  fn source(&self, seed: u64) -> Box<dyn ObjectSource>;
}

fn default_object_size() -> ByteSize {
  ByteSize::mib(10)
}

fn default_content_type() -> String {
  "application/octet-stream".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
  /// Size of each object, or the upper bound if `random_size` is set. Defaults to 10 MiB.
  #[serde(default = "default_object_size")]
  pub object_size: ByteSize,

  /// Pick each object's size uniformly from 1 byte to `object_size`.
  #[serde(default)]
  pub random_size: bool,

  /// Prepended to every object name.
  #[serde(default)]
  pub prefix: String,

  #[serde(default = "default_content_type")]
  pub content_type: String,
}

impl Default for GeneratorConfig {
  fn default() -> Self {
    Self {
      object_size: default_object_size(),
      random_size: false,
      prefix: String::new(),
      content_type: default_content_type(),
    }
  }
}

/// Random-content objects. All sources share one pool of random bytes and hand out zero-copy slices of it.
pub struct RandomGenerator {
  cfg: GeneratorConfig,
  pool: Bytes,
}

impl RandomGenerator {
  pub fn new(cfg: GeneratorConfig) -> Self {
    let pool_size = usize::try_from(cfg.object_size.as_u64()).unwrap_or(usize::MAX);
    info!(pool_size = %ByteSize(pool_size as u64), "initialising random pool");
    let mut pool = vec![0u8; pool_size];
    thread_rng().fill_bytes(&mut pool);
    Self {
      cfg,
      pool: pool.into(),
    }
  }
}

impl Generator for RandomGenerator {
  fn source(&self, seed: u64) -> Box<dyn ObjectSource> {
    Box::new(RandomSource {
      cfg: self.cfg.clone(),
      pool: self.pool.clone(),
      rng: StdRng::seed_from_u64(seed),
      seed,
      counter: 0,
    })
  }
}

struct RandomSource {
  cfg: GeneratorConfig,
  pool: Bytes,
  rng: StdRng,
  seed: u64,
  counter: u64,
}

impl ObjectSource for RandomSource {
  fn next_object(&mut self) -> Object {
    let max = self.pool.len();
    let size = if self.cfg.random_size && max > 1 {
      self.rng.gen_range(1..=max)
    } else {
      max
    };
    let offset = self.rng.gen_range(0..=max - size);
    let suffix: String = (0..8)
      .map(|_| char::from(self.rng.sample(Alphanumeric)))
      .collect();
    // Seed and counter keep names unique across workers and within a source; the suffix spreads them across the key space.
    let name = format!("{}{}/{}.{}", self.cfg.prefix, self.seed, self.counter, suffix);
    self.counter += 1;
    Object {
      name,
      size: size as u64,
      content_type: self.cfg.content_type.clone(),
      data: Box::pin(Cursor::new(self.pool.slice(offset..offset + size))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::Generator;
  use super::GeneratorConfig;
  use super::RandomGenerator;
  use bytesize::ByteSize;
  use tokio::io::AsyncReadExt;

  fn cfg(random_size: bool) -> GeneratorConfig {
    GeneratorConfig {
      object_size: ByteSize::kib(4),
      random_size,
      prefix: "bench/".to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn test_same_seed_same_objects() {
    let gen = RandomGenerator::new(cfg(true));
    let mut a = gen.source(7);
    let mut b = gen.source(7);
    let mut c = gen.source(8);
    for _ in 0..20 {
      let (x, y, z) = (a.next_object(), b.next_object(), c.next_object());
      assert_eq!(x.name, y.name);
      assert_eq!(x.size, y.size);
      assert_ne!(x.name, z.name);
      assert!(x.name.starts_with("bench/7/"));
      assert!((1..=4096).contains(&x.size));
    }
  }

  #[tokio::test]
  async fn test_body_matches_declared_size() {
    let gen = RandomGenerator::new(cfg(false));
    let mut src = gen.source(0);
    for _ in 0..4 {
      let mut obj = src.next_object();
      assert_eq!(obj.size, 4096);
      assert_eq!(obj.content_type, "application/octet-stream");
      let mut body = Vec::new();
      obj.data.read_to_end(&mut body).await.unwrap();
      assert_eq!(body.len() as u64, obj.size);
    }
  }
}
