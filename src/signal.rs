//! Cooperative cancellation passed to fetch operations.

use tokio::sync::watch;

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct AbortController {
  tx: watch::Sender<bool>,
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortSignal {
  rx: watch::Receiver<bool>,
}

impl AbortController {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx }
  }

  pub fn signal(&self) -> AbortSignal {
    AbortSignal {
      rx: self.tx.subscribe(),
    }
  }

  /// Abort every signal handed out by this controller. Idempotent.
  pub fn abort(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_aborted(&self) -> bool {
    *self.tx.borrow()
  }
}

impl Default for AbortController {
  fn default() -> Self {
    Self::new()
  }
}

impl AbortSignal {
  pub fn is_aborted(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once the controller aborts. Pends forever if the controller is
  /// dropped without aborting.
  pub async fn aborted(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|aborted| *aborted).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}
