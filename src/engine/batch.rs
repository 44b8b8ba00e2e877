use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

/// Groups a channel's values into bursts.
///
/// A batch starts with the first value received (however long that takes)
/// and ends when no further value arrives within `quiet`.
pub struct Coalescer<T> {
    receiver: mpsc::Receiver<T>,
    quiet: Duration,
    closed: bool,
}

impl<T> Coalescer<T> {
    pub fn new(receiver: mpsc::Receiver<T>, quiet: Duration) -> Self {
        Self {
            receiver,
            quiet,
            closed: false,
        }
    }

    /// Next burst. Once the channel closes, whatever was collected is
    /// returned (possibly nothing), then `None` forever.
    pub async fn next_batch(&mut self) -> Option<Vec<T>> {
        if self.closed {
            return None;
        }

        let mut batch = Vec::new();
        loop {
            let received = if batch.is_empty() {
                self.receiver.recv().await
            } else {
                match timeout(self.quiet, self.receiver.recv()).await {
                    Ok(received) => received,
                    Err(_) => return Some(batch),
                }
            };

            match received {
                Some(value) => batch.push(value),
                None => {
                    self.closed = true;
                    return Some(batch);
                }
            }
        }
    }
}
