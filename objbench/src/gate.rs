use std::sync::Arc;
use tokio::sync::watch;

/// One-shot broadcast used to release every worker of a phase at the same moment. Clones share the same gate.
#[derive(Clone)]
pub struct StartGate {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for StartGate {
  fn default() -> Self {
    Self::new()
  }
}

impl StartGate {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(false);
    Self { tx: Arc::new(tx) }
  }

  /// Opening an already open gate does nothing.
  pub fn open(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_open(&self) -> bool {
    *self.tx.borrow()
  }

  /// Resolves once the gate is open, including if it already was.
  pub async fn wait(&self) {
    let mut rx = self.tx.subscribe();
    // The sender lives in `self`, so the channel can't close while we wait.
    let _ = rx.wait_for(|open| *open).await;
  }
}

#[cfg(test)]
mod tests {
  use super::StartGate;
  use std::time::Duration;
  use tokio::spawn;
  use tokio::time::sleep;
  use tokio::time::timeout;

  #[tokio::test]
  async fn test_gate_releases_all_waiters() {
    let gate = StartGate::new();
    let waiters: Vec<_> = (0..8)
      .map(|_| {
        let gate = gate.clone();
        spawn(async move { gate.wait().await })
      })
      .collect();
    sleep(Duration::from_millis(20)).await;
    assert!(waiters.iter().all(|w| !w.is_finished()));
    assert!(!gate.is_open());

    gate.open();
    gate.open();
    for w in waiters {
      timeout(Duration::from_secs(5), w).await.unwrap().unwrap();
    }
    assert!(gate.is_open());
    // Late waiters pass straight through.
    timeout(Duration::from_secs(5), gate.wait()).await.unwrap();
  }
}
