use crate::op::Operation;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;

/// Fan-in point for operation records from any number of workers.
pub struct Collector {
  tx: UnboundedSender<Operation>,
  rx: UnboundedReceiver<Operation>,
}

/// A worker's handle into a `Collector`. Dropping it tells the collector this worker is done.
pub struct OpSender {
  tx: UnboundedSender<Operation>,
}

impl OpSender {
  pub fn send(&self, op: Operation) {
    // The receiving side only goes away if the collector was dropped without being closed, in which case nobody wants the record.
    let _ = self.tx.send(op);
  }
}

impl Default for Collector {
  fn default() -> Self {
    Self::new()
  }
}

impl Collector {
  pub fn new() -> Self {
    let (tx, rx) = unbounded_channel();
    Self { tx, rx }
  }

  pub fn receiver(&self) -> OpSender {
    OpSender {
      tx: self.tx.clone(),
    }
  }

  /// Waits until every `OpSender` has been dropped, then returns all records in arrival order. Callers must make sure workers stop and drop their senders, or this never returns.
  pub async fn close(self) -> Vec<Operation> {
    let Collector { tx, mut rx } = self;
    drop(tx);
    let mut ops = Vec::new();
    while let Some(op) = rx.recv().await {
      ops.push(op);
    }
    ops
  }
}

#[cfg(test)]
mod tests {
  use super::Collector;
  use crate::op::OpKind;
  use crate::op::Operation;
  use chrono::Utc;
  use std::collections::HashSet;
  use tokio::spawn;

  const OPS_PER_PRODUCER: usize = 200;

  async fn run_producers(producers: u16) {
    let collector = Collector::new();
    let mut handles = Vec::new();
    for worker in 0..producers {
      let rcv = collector.receiver();
      handles.push(spawn(async move {
        for i in 0..OPS_PER_PRODUCER {
          rcv.send(Operation::new(
            OpKind::Read,
            worker,
            i as u64,
            format!("{worker}/{i}"),
            Utc::now(),
          ));
          if i % 16 == 0 {
            tokio::task::yield_now().await;
          }
        }
      }));
    }
    for h in handles {
      h.await.unwrap();
    }
    let ops = collector.close().await;

    assert_eq!(ops.len(), usize::from(producers) * OPS_PER_PRODUCER);
    let unique: HashSet<_> = ops.iter().map(|op| op.object.as_str()).collect();
    assert_eq!(unique.len(), ops.len());
    // Each worker's own records stay in the order it sent them.
    for worker in 0..producers {
      let seq: Vec<u64> = ops
        .iter()
        .filter(|op| op.worker == worker)
        .map(|op| op.size)
        .collect();
      assert_eq!(seq, (0..OPS_PER_PRODUCER as u64).collect::<Vec<_>>());
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_collects_every_record_single_producer() {
    run_producers(1).await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_collects_every_record_8_producers() {
    run_producers(8).await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_collects_every_record_64_producers() {
    run_producers(64).await;
  }

  #[tokio::test]
  async fn test_close_without_records() {
    let collector = Collector::new();
    drop(collector.receiver());
    assert!(collector.close().await.is_empty());
  }
}
