//! Output streams
//!
//! A `ChunkStream` is a finite, non-restartable sequence of chunks fed by a
//! producer task. The producer either drops its sender (clean end) or sends
//! one error, which terminates the stream.

use tokio::sync::mpsc;

use crate::{LanghostError, Result};

pub fn chunk_channel<T>() -> (ChunkSender<T>, ChunkStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChunkSender { tx }, ChunkStream { rx, done: false })
}

/// Producer half. Unbounded, so a producer never waits on its consumer.
pub struct ChunkSender<T> {
    tx: mpsc::UnboundedSender<Result<T>>,
}

impl<T> Clone for ChunkSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ChunkSender<T> {
    /// Send a chunk. Returns false once the consumer has gone away.
    pub fn send(&self, chunk: T) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// Resolves once the consumer has gone away
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Terminate the stream with an error
    pub fn fail(self, err: LanghostError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Consumer half
pub struct ChunkStream<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    done: bool,
}

impl<T> ChunkStream<T> {
    /// A stream that ends with `err` without yielding anything
    pub fn failed(err: LanghostError) -> Self {
        let (tx, stream) = chunk_channel();
        tx.fail(err);
        stream
    }

    /// Next chunk; `None` after a clean end or after the terminal error
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(err)) => {
                self.done = true;
                self.rx.close();
                Some(Err(err))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Drain the stream, failing if it ended with an error
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_send_order_then_ends() {
        let (tx, mut stream) = chunk_channel();
        tx.send(1);
        tx.send(2);
        drop(tx);
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn error_terminates_stream() {
        let (tx, mut stream) = chunk_channel::<u8>();
        let late = tx.clone();
        tx.send(7);
        tx.fail(LanghostError::InstallFailed("exit 1".to_string()));
        late.send(8);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(LanghostError::InstallFailed(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn collect_surfaces_terminal_error() {
        let stream = ChunkStream::<u8>::failed(LanghostError::Cancelled("stop".to_string()));
        assert!(matches!(stream.collect().await, Err(LanghostError::Cancelled(_))));
    }
}
