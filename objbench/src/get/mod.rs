use crate::clock::RunClock;
use crate::collector::Collector;
use crate::collector::OpSender;
use crate::config::Config;
use crate::config::ConfigError;
use crate::first_byte::FirstByteReader;
use crate::gate::StartGate;
use crate::op::OpKind;
use crate::op::Operation;
use crate::source::Generator;
use crate::source::Object;
use cleanup::delete_all_objects;
use objbench_store::ReadObjectInput;
use objbench_store::ReadObjectOptions;
use objbench_store::Store;
use objbench_store::StoreError;
use objbench_store::WriteObjectInput;
use objbench_store::WriteObjectOptions;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use std::error::Error;
use std::fmt::Display;
use std::io;
use std::mem::take;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::select;
use tokio::task::JoinError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

pub mod cleanup;

pub use cleanup::CleanupFailure;
pub use cleanup::CleanupReport;

/*

# GET benchmark

Measures download latency and throughput against a fixed dataset.

- `prepare` empties the bucket and uploads `objects` synthetic objects using `concurrency` workers. Any upload failure aborts the run, as there's nothing meaningful to measure without the full dataset.
- `start` spawns `concurrency` download workers that wait for the start gate, then repeatedly download a random dataset object until cancelled. Download failures are recorded on the operation and the worker moves on.
- `cleanup` deletes everything in the bucket and reports what it couldn't delete.

Each worker seeds its RNG with its index, so the sequence of objects generated and picked is the same across runs with the same config.

*/

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct DatasetEntry {
  pub name: String,
  pub size: u64,
  pub content_type: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, strum::Display)]
pub enum Phase {
  Idle,
  Preparing,
  Prepared,
  Running,
  Done,
  /// `prepare` or `start` failed. Only `cleanup` is possible.
  Aborted,
}

pub type BenchResult<T> = Result<T, BenchError>;

#[derive(Debug)]
pub enum BenchError {
  InvalidConfig(ConfigError),
  InvalidPhase {
    op: &'static str,
    phase: Phase,
  },
  CreateBucket {
    bucket: String,
    source: StoreError,
  },
  ClearBucket {
    object: Option<String>,
    source: StoreError,
  },
  Upload {
    object: String,
    source: StoreError,
  },
  ShortUpload {
    object: String,
    want: u64,
    got: u64,
  },
  Cancelled {
    uploaded: usize,
    wanted: usize,
  },
  Worker(JoinError),
}

impl Display for BenchError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BenchError::InvalidConfig(e) => write!(f, "invalid config: {e}"),
      BenchError::InvalidPhase { op, phase } => {
        write!(f, "cannot {op} while benchmark is {phase}")
      }
      BenchError::CreateBucket { bucket, source } => {
        write!(f, "failed to create bucket {bucket}: {source}")
      }
      BenchError::ClearBucket {
        object: Some(object),
        source,
      } => write!(f, "failed to delete existing object {object}: {source}"),
      BenchError::ClearBucket {
        object: None,
        source,
      } => write!(f, "failed to list existing objects: {source}"),
      BenchError::Upload { object, source } => {
        write!(f, "upload error for {object}: {source}")
      }
      BenchError::ShortUpload { object, want, got } => {
        write!(f, "short upload of {object}. want: {want}, got: {got}")
      }
      BenchError::Cancelled { uploaded, wanted } => write!(
        f,
        "cancelled after uploading {uploaded} of {wanted} objects"
      ),
      BenchError::Worker(e) => write!(f, "worker failed: {e}"),
    }
  }
}

impl Error for BenchError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      BenchError::InvalidConfig(e) => Some(e),
      BenchError::CreateBucket { source, .. }
      | BenchError::ClearBucket { source, .. }
      | BenchError::Upload { source, .. } => Some(source),
      BenchError::Worker(e) => Some(e),
      _ => None,
    }
  }
}

#[derive(Debug)]
struct UploadTask;

/// Everything a phase needs besides the phase itself. Kept apart so a `PhaseGuard` can borrow the phase while the work runs.
struct Ctx {
  cfg: Config,
  bucket: Arc<str>,
  store: Arc<dyn Store>,
  generator: Arc<dyn Generator>,
  clock: RunClock,
}

impl Ctx {
  fn log_store_metrics(&self) {
    for (key, value) in self.store.metrics() {
      info!(key, value, "store metric");
    }
  }

  async fn upload_dataset(
    &self,
    cancel: &CancellationToken,
  ) -> BenchResult<(Vec<DatasetEntry>, Collector)> {
    let bucket = &*self.bucket;
    let concurrency = usize::from(self.cfg.concurrency);
    info!(bucket, "creating bucket");
    self
      .store
      .create_bucket(bucket)
      .await
      .map_err(|source| BenchError::CreateBucket {
        bucket: bucket.to_string(),
        source,
      })?;
    let existing = delete_all_objects(&*self.store, bucket, concurrency, cancel).await;
    if let Some(CleanupFailure { object, error }) = existing.failures.into_iter().next() {
      return Err(BenchError::ClearBucket {
        object,
        source: error,
      });
    };
    if existing.deleted > 0 {
      info!(deleted = existing.deleted, "deleted existing objects");
    };

    let wanted = self.cfg.objects;
    info!(objects = wanted, "uploading objects");
    let collector = Collector::new();
    let (task_tx, task_rx) = crossbeam_channel::bounded(wanted);
    for _ in 0..wanted {
      task_tx
        .send(UploadTask)
        .expect("upload queue has room for every task");
    }
    // Workers drain the queue to exhaustion instead of waiting for more.
    drop(task_tx);

    // Lets the first failing worker stop its siblings without cancelling the caller's token.
    let abort = cancel.child_token();
    let dataset = Arc::new(parking_lot::Mutex::new(Vec::with_capacity(wanted)));
    // Dropping the set aborts the workers, so nothing keeps writing if this future is dropped.
    let mut workers = JoinSet::new();
    for worker in 0..self.cfg.concurrency {
      let w = UploadWorker {
        worker,
        bucket: self.bucket.clone(),
        store: self.store.clone(),
        generator: self.generator.clone(),
        clock: self.clock,
        tasks: task_rx.clone(),
        abort: abort.clone(),
        dataset: dataset.clone(),
        ops: collector.receiver(),
      };
      workers.spawn(w.run());
    }
    drop(task_rx);

    let mut first_err = None;
    while let Some(res) = workers.join_next().await {
      if let Err(err) = res.map_err(BenchError::Worker).and_then(|res| res) {
        first_err.get_or_insert(err);
      };
    }
    if let Some(err) = first_err {
      return Err(err);
    };

    let objects = take(&mut *dataset.lock());
    // Without an error, only the caller's cancellation can stop the workers early.
    if objects.len() < wanted {
      return Err(BenchError::Cancelled {
        uploaded: objects.len(),
        wanted,
      });
    };
    info!(objects = objects.len(), "upload complete");
    Ok((objects, collector))
  }
}

/// Marks the engine as busy for the lifetime of a phase future. If the future is dropped before the phase settles, the engine is left `Aborted` rather than stuck mid-phase.
struct PhaseGuard<'a> {
  phase: &'a mut Phase,
}

impl<'a> PhaseGuard<'a> {
  fn enter(phase: &'a mut Phase, to: Phase) -> Self {
    *phase = to;
    Self { phase }
  }

  fn settle(&mut self, to: Phase) {
    *self.phase = to;
  }
}

impl Drop for PhaseGuard<'_> {
  fn drop(&mut self) {
    if matches!(*self.phase, Phase::Preparing | Phase::Running) {
      warn!(phase = %self.phase, "phase interrupted");
      *self.phase = Phase::Aborted;
    };
  }
}

pub struct GetBenchmark {
  ctx: Ctx,
  phase: Phase,
  collector: Option<Collector>,
  objects: Arc<Vec<DatasetEntry>>,
}

impl GetBenchmark {
  pub fn new(cfg: Config, store: Arc<dyn Store>, generator: Arc<dyn Generator>) -> BenchResult<Self> {
    cfg.validate().map_err(BenchError::InvalidConfig)?;
    Ok(Self {
      ctx: Ctx {
        bucket: cfg.bucket.as_str().into(),
        cfg,
        store,
        generator,
        clock: RunClock::start(),
      },
      phase: Phase::Idle,
      collector: None,
      objects: Arc::new(Vec::new()),
    })
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn config(&self) -> &Config {
    &self.ctx.cfg
  }

  /// The clock all operation timestamps are taken from.
  pub fn clock(&self) -> RunClock {
    self.ctx.clock
  }

  /// The uploaded dataset. Empty until `prepare` succeeds.
  pub fn objects(&self) -> &[DatasetEntry] {
    &self.objects
  }

  fn check_phase(&self, op: &'static str, allowed: &[Phase]) -> BenchResult<()> {
    if allowed.contains(&self.phase) {
      Ok(())
    } else {
      Err(BenchError::InvalidPhase {
        op,
        phase: self.phase,
      })
    }
  }

  /// Creates the bucket, deletes anything already in it, then uploads the dataset.
  ///
  /// Dropping the returned future stops the upload workers and leaves the engine `Aborted`.
  pub async fn prepare(&mut self, cancel: &CancellationToken) -> BenchResult<()> {
    self.check_phase("prepare", &[Phase::Idle])?;
    let mut phase = PhaseGuard::enter(&mut self.phase, Phase::Preparing);
    match self.ctx.upload_dataset(cancel).await {
      Ok((objects, collector)) => {
        self.objects = Arc::new(objects);
        self.collector = Some(collector);
        phase.settle(Phase::Prepared);
        self.ctx.log_store_metrics();
        Ok(())
      }
      Err(err) => {
        error!(%err, "prepare failed");
        phase.settle(Phase::Aborted);
        Err(err)
      }
    }
  }

  /// Runs download workers until `cancel` fires, then returns every operation recorded since `prepare`, uploads included, in arrival order.
  ///
  /// Workers don't issue any request until `gate` opens. Dropping the returned future stops them and leaves the engine `Aborted`.
  pub async fn start(
    &mut self,
    cancel: &CancellationToken,
    gate: &StartGate,
  ) -> BenchResult<Vec<Operation>> {
    self.check_phase("start", &[Phase::Prepared])?;
    let Some(collector) = self.collector.take() else {
      return Err(BenchError::InvalidPhase {
        op: "start",
        phase: self.phase,
      });
    };
    let mut phase = PhaseGuard::enter(&mut self.phase, Phase::Running);
    let ctx = &self.ctx;
    info!(
      concurrency = ctx.cfg.concurrency,
      objects = self.objects.len(),
      "starting download workers"
    );

    let read_buffer_size = usize::try_from(ctx.cfg.read_buffer_size.as_u64()).unwrap_or(usize::MAX);
    let mut workers = JoinSet::new();
    for worker in 0..ctx.cfg.concurrency {
      let w = DownloadWorker {
        worker,
        bucket: ctx.bucket.clone(),
        store: ctx.store.clone(),
        clock: ctx.clock,
        objects: self.objects.clone(),
        ops: collector.receiver(),
        read_buffer_size,
      };
      workers.spawn(w.run(cancel.clone(), gate.clone()));
    }

    let mut failed = None;
    while let Some(res) = workers.join_next().await {
      if let Err(err) = res {
        failed.get_or_insert(err);
      };
    }
    let ops = collector.close().await;
    if let Some(err) = failed {
      phase.settle(Phase::Aborted);
      return Err(BenchError::Worker(err));
    };
    phase.settle(Phase::Done);
    info!(
      ops = ops.len(),
      errors = ops.iter().filter(|op| op.is_err()).count(),
      "benchmark complete"
    );
    ctx.log_store_metrics();
    Ok(ops)
  }

  /// Deletes everything in the bucket. Failures are reported, not returned; the only error is calling this before `prepare`.
  pub async fn cleanup(&mut self, cancel: &CancellationToken) -> BenchResult<CleanupReport> {
    self.check_phase("cleanup", &[Phase::Prepared, Phase::Done, Phase::Aborted])?;
    info!(bucket = &*self.ctx.bucket, "deleting objects");
    let report = delete_all_objects(
      &*self.ctx.store,
      &self.ctx.bucket,
      usize::from(self.ctx.cfg.concurrency),
      cancel,
    )
    .await;
    if report.is_complete() {
      info!(deleted = report.deleted, "cleanup complete");
    } else {
      warn!(
        deleted = report.deleted,
        skipped = report.skipped,
        failed = report.failures.len(),
        "cleanup incomplete"
      );
    };
    Ok(report)
  }
}

struct UploadWorker {
  worker: u16,
  bucket: Arc<str>,
  store: Arc<dyn Store>,
  generator: Arc<dyn Generator>,
  clock: RunClock,
  tasks: crossbeam_channel::Receiver<UploadTask>,
  abort: CancellationToken,
  dataset: Arc<parking_lot::Mutex<Vec<DatasetEntry>>>,
  ops: OpSender,
}

impl UploadWorker {
  async fn run(self) -> BenchResult<()> {
    let mut source = self.generator.source(u64::from(self.worker));
    while self.tasks.try_recv().is_ok() {
      if self.abort.is_cancelled() {
        break;
      };
      let Object {
        name,
        size,
        content_type,
        data,
      } = source.next_object();
      let mut op = Operation::new(OpKind::Write, self.worker, size, name.clone(), self.clock.now());
      let res = self
        .store
        .write_object(WriteObjectInput {
          bucket: &self.bucket,
          key: &name,
          size,
          data,
          opts: WriteObjectOptions {
            content_type: Some(content_type.clone()),
          },
        })
        .await;
      op.end = self.clock.now();
      let written = match res {
        Ok(out) => out.bytes_written,
        Err(source) => {
          self.abort.cancel();
          return Err(BenchError::Upload {
            object: name,
            source,
          });
        }
      };
      if written != size {
        self.abort.cancel();
        return Err(BenchError::ShortUpload {
          object: name,
          want: size,
          got: written,
        });
      };
      self.dataset.lock().push(DatasetEntry {
        name,
        size,
        content_type,
      });
      self.ops.send(op);
    }
    Ok(())
  }
}

struct DownloadWorker {
  worker: u16,
  bucket: Arc<str>,
  store: Arc<dyn Store>,
  clock: RunClock,
  objects: Arc<Vec<DatasetEntry>>,
  ops: OpSender,
  read_buffer_size: usize,
}

impl DownloadWorker {
  async fn run(self, cancel: CancellationToken, gate: StartGate) {
    let mut rng = StdRng::seed_from_u64(u64::from(self.worker));
    let mut buf = vec![0u8; self.read_buffer_size];
    select! {
      biased;
      _ = cancel.cancelled() => return,
      _ = gate.wait() => {}
    };
    while !cancel.is_cancelled() {
      let entry = &self.objects[rng.gen_range(0..self.objects.len())];
      let op = self.download(entry, &mut buf).await;
      self.ops.send(op);
    }
  }

  async fn download(&self, entry: &DatasetEntry, buf: &mut [u8]) -> Operation {
    let mut op = Operation::new(
      OpKind::Read,
      self.worker,
      entry.size,
      entry.name.clone(),
      self.clock.now(),
    );
    let res = self
      .store
      .read_object(ReadObjectInput {
        bucket: &self.bucket,
        key: &entry.name,
        opts: ReadObjectOptions::default(),
      })
      .await;
    let body = match res {
      Ok(res) => res.data,
      Err(err) => {
        op.end = self.clock.now();
        warn!(worker = self.worker, object = %entry.name, error = %err, "download error");
        op.error = Some(err.to_string());
        return op;
      }
    };
    let mut reader = FirstByteReader::new(body, self.clock);
    let (n, err) = drain(&mut reader, buf).await;
    op.first_byte = reader.first_byte();
    op.end = self.clock.now();
    if let Some(err) = err {
      warn!(worker = self.worker, object = %entry.name, error = %err, "download error");
      op.error = Some(err.to_string());
    } else if n != entry.size {
      let msg = format!("unexpected download size. want: {}, got: {}", entry.size, n);
      warn!(worker = self.worker, object = %entry.name, "{msg}");
      op.error = Some(msg);
    };
    op
  }
}

/// Reads to EOF, discarding content. Returns what was read before any error.
async fn drain<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> (u64, Option<io::Error>) {
  let mut total = 0;
  loop {
    match reader.read(buf).await {
      Ok(0) => return (total, None),
      Ok(n) => total += n as u64,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return (total, Some(e)),
    };
  }
}
