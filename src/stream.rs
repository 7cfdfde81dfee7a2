// Game Stream Producer - lazy, cancellable, bounded hand-off of game history
//
// A producer thread owns the cursor and pushes games through a bounded
// `sync_channel`; the consumer pulls them as an iterator. A full buffer
// blocks the producer, so it can never run far ahead of a slow consumer.
//
// Cancellation travels out-of-band through a `CancelToken`. It is
// best-effort: a game already sitting in the buffer when the token flips is
// simply dropped with the channel, never reported as an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{EngineError, Result};
use crate::model::{Game, SortOrder};

/// Games buffered between producer and consumer unless configured otherwise
pub const DEFAULT_STREAM_BUFFER: usize = 16;

// ============================================================================
// CANCELLATION
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PRODUCER SIDE
// ============================================================================

/// Handle the producer pushes games into
pub struct GameSink {
    tx: SyncSender<Result<Game>>,
    cancel: CancelToken,
}

impl GameSink {
    /// Blocks while the buffer is full. Returns `false` once the consumer
    /// has cancelled or gone away; the producer should stop scanning then.
    pub fn send(&self, game: Game) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(Ok(game)).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// CONSUMER SIDE
// ============================================================================

/// Lazy sequence of games.
///
/// `None` means the history is exhausted (or the stream was cancelled); a
/// failed scan shows up as one final `Some(Err(..))`.
pub struct GameStream {
    rx: Option<Receiver<Result<Game>>>,
    cancel: CancelToken,
    producer: Option<JoinHandle<()>>,
}

impl GameStream {
    /// Run `produce` on its own thread, feeding a buffer of `buffer` games.
    pub fn spawn<F>(buffer: usize, produce: F) -> Result<Self>
    where
        F: FnOnce(&GameSink) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(buffer.max(1));
        let cancel = CancelToken::new();
        let sink = GameSink {
            tx,
            cancel: cancel.clone(),
        };

        let producer = thread::Builder::new()
            .name("game-stream".to_string())
            .spawn(move || {
                if let Err(err) = produce(&sink) {
                    if sink.is_cancelled() {
                        tracing::debug!(error = %err, "producer failed after cancellation");
                        return;
                    }
                    // consumer may already be gone; nothing left to tell
                    let _ = sink.tx.send(Err(err));
                }
            })
            .map_err(|err| {
                EngineError::Producer(format!("failed to spawn producer thread: {err}"))
            })?;

        Ok(Self {
            rx: Some(rx),
            cancel,
            producer: Some(producer),
        })
    }

    /// Stream over games that are already in memory
    pub fn from_games(buffer: usize, games: Vec<Game>) -> Result<Self> {
        Self::spawn(buffer, move |sink| {
            for game in games {
                if !sink.send(game) {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Token another thread can use to stop this stream
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop delivery and release the producer and its cursor
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(err) = self.shutdown() {
            tracing::debug!(error = %err, "producer failure ignored after cancel");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drop the receiver so a blocked producer wakes up, then join it.
    /// Reports a panicked producer unless the stream was cancelled.
    fn shutdown(&mut self) -> Option<EngineError> {
        self.rx.take();
        let producer = self.producer.take()?;
        match producer.join() {
            Ok(()) => None,
            Err(_) if self.cancel.is_cancelled() => None,
            Err(_) => Some(EngineError::Producer("producer thread panicked".to_string())),
        }
    }
}

impl Iterator for GameStream {
    type Item = Result<Game>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            self.shutdown();
            return None;
        }

        let received = self.rx.as_ref()?.recv();
        match received {
            Ok(item) => Some(item),
            // producer finished and hung up
            Err(_) => self.shutdown().map(Err),
        }
    }
}

impl Drop for GameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shutdown();
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// Anything that can replay game history in creation-time order.
/// Each call opens an independent cursor.
pub trait GameSource {
    fn stream_games(&self, order: SortOrder) -> Result<GameStream>;
}

/// The `limit` most recent games, newest first. Stops the scan early.
pub fn recent_games<S: GameSource + ?Sized>(source: &S, limit: usize) -> Result<Vec<Game>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut stream = source.stream_games(SortOrder::Descending)?;
    let mut games = Vec::with_capacity(limit);
    for game in stream.by_ref() {
        games.push(game?);
        if games.len() >= limit {
            break;
        }
    }
    stream.cancel();
    Ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Team, User, UserId};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn game(id: i64) -> Game {
        let user = |n: i64| User {
            id: UserId(n),
            handle: format!("p{}", n),
            first: "P".to_string(),
            last: n.to_string(),
        };
        Game {
            id,
            teams: [
                Team {
                    front: user(1),
                    back: user(2),
                },
                Team {
                    front: user(3),
                    back: user(4),
                },
            ],
            score: [10, 8],
            created_at: Utc::now(),
        }
    }

    struct VecSource(Vec<Game>);

    impl GameSource for VecSource {
        fn stream_games(&self, order: SortOrder) -> Result<GameStream> {
            let mut games = self.0.clone();
            if order == SortOrder::Descending {
                games.reverse();
            }
            GameStream::from_games(2, games)
        }
    }

    #[test]
    fn test_stream_delivers_everything_in_order() {
        let stream = GameStream::from_games(2, (1..=50).map(game).collect()).unwrap();
        let ids: Vec<i64> = stream.map(|g| g.unwrap().id).collect();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_is_distinct_from_exhaustion() {
        let mut stream = GameStream::spawn(4, |sink| {
            sink.send(game(1));
            Err(EngineError::Producer("disk went away".to_string()))
        })
        .unwrap();

        assert_eq!(stream.next().unwrap().unwrap().id, 1);
        assert!(matches!(stream.next(), Some(Err(EngineError::Producer(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_panicking_producer_is_reported() {
        let mut stream =
            GameStream::spawn(1, |_sink| -> Result<()> { panic!("cursor exploded") }).unwrap();
        assert!(matches!(stream.next(), Some(Err(EngineError::Producer(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_cancel_stops_producer_early() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let mut stream = GameStream::spawn(1, move |sink| {
            for id in 0..10_000 {
                if !sink.send(game(id)) {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        assert!(stream.next().unwrap().is_ok());
        stream.cancel();

        assert!(stream.next().is_none());
        assert!(stream.is_cancelled());
        // producer was joined by cancel(), so the count is final
        assert!(produced.load(Ordering::SeqCst) < 10);
    }

    #[test]
    fn test_cancel_token_from_another_thread() {
        let mut stream = GameStream::from_games(1, (0..1_000).map(game).collect()).unwrap();
        let token = stream.cancel_token();

        assert!(stream.next().is_some());
        std::thread::spawn(move || token.cancel()).join().unwrap();

        // at most the item that raced with the cancel, then nothing
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_buffer_applies_backpressure() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let stream = GameStream::spawn(2, move |sink| {
            for id in 0..100 {
                if !sink.send(game(id)) {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        // two buffered plus at most one blocked in send
        assert!(produced.load(Ordering::SeqCst) <= 3);
        drop(stream);
    }

    #[test]
    fn test_recent_games_takes_newest_first() {
        let source = VecSource((1..=40).map(game).collect());
        let recent = recent_games(&source, 5).unwrap();
        let ids: Vec<i64> = recent.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![40, 39, 38, 37, 36]);

        assert!(recent_games(&source, 0).unwrap().is_empty());
        assert_eq!(recent_games(&source, 100).unwrap().len(), 40);
    }
}
