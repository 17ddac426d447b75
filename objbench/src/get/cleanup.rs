use futures::stream::iter;
use futures::StreamExt;
use objbench_store::DeleteObjectInput;
use objbench_store::Store;
use objbench_store::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
pub struct CleanupFailure {
  /// `None` if the bucket couldn't be listed.
  pub object: Option<String>,
  pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
  pub deleted: u64,
  /// Objects not attempted because cancellation was requested.
  pub skipped: u64,
  pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
  pub fn is_complete(&self) -> bool {
    self.skipped == 0 && self.failures.is_empty()
  }
}

/// Lists `bucket` and deletes everything in it with up to `concurrency` deletes in flight. Errors are collected, never returned.
pub(crate) async fn delete_all_objects(
  store: &dyn Store,
  bucket: &str,
  concurrency: usize,
  cancel: &CancellationToken,
) -> CleanupReport {
  let keys = match store.list_objects(bucket).await {
    Ok(keys) => keys,
    Err(error) => {
      warn!(bucket, %error, "failed to list objects");
      return CleanupReport {
        failures: vec![CleanupFailure {
          object: None,
          error,
        }],
        ..Default::default()
      };
    }
  };
  let report = parking_lot::Mutex::new(CleanupReport::default());
  iter(keys)
    .for_each_concurrent(concurrency, |key| {
      let report = &report;
      async move {
        if cancel.is_cancelled() {
          report.lock().skipped += 1;
          return;
        };
        let res = store
          .delete_object(DeleteObjectInput { bucket, key: &key })
          .await;
        match res {
          Ok(()) => report.lock().deleted += 1,
          Err(error) => {
            warn!(object = %key, %error, "delete error");
            report.lock().failures.push(CleanupFailure {
              object: Some(key),
              error,
            });
          }
        };
      }
    })
    .await;
  report.into_inner()
}
