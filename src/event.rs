use std::time::Duration;
use tokio::sync::mpsc;

/// Periodic and external events driving the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick: poll the version endpoint
  CheckUpdates,
  /// Periodic tick: evict expired cache entries
  Sweep,
  /// Termination request (ctrl-c)
  Shutdown,
}

/// Event source that produces update-check and sweep ticks on independent
/// timers, with no ordering guarantee between the two.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given timer periods
  pub fn new(update_interval: Duration, sweep_interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    spawn_timer(tx.clone(), update_interval, Event::CheckUpdates);
    spawn_timer(tx.clone(), sweep_interval, Event::Sweep);

    // Shutdown on ctrl-c
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

fn spawn_timer(tx: mpsc::UnboundedSender<Event>, period: Duration, event: Event) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; skip it so the first event
    // arrives one full period after startup.
    interval.tick().await;
    loop {
      interval.tick().await;
      if tx.send(event).is_err() {
        break;
      }
    }
  });
}
