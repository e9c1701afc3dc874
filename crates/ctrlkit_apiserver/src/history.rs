//! Bounded event history and the watch cursors reading it.

use ctrlkit_api::{ApiError, ApiResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One encoded event at a given revision.
struct Entry {
    revision: u64,
    frame: Arc<[u8]>,
}

struct HistoryState {
    /// Entries in ascending revision order.
    entries: VecDeque<Entry>,
    /// Highest revision evicted from `entries`.
    compacted: u64,
    /// Bumped to drop every open watch.
    generation: u64,
}

/// Event history shared by the server (writer) and its watchers (readers).
pub(crate) struct History {
    state: Mutex<HistoryState>,
    appended: Condvar,
    limit: usize,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState {
                entries: VecDeque::new(),
                compacted: 0,
                generation: 0,
            }),
            appended: Condvar::new(),
            limit,
        }
    }

    /// Appends a frame and wakes every watcher.
    pub(crate) fn append(&self, revision: u64, frame: Vec<u8>) {
        let mut state = self.state.lock();
        state.entries.push_back(Entry {
            revision,
            frame: frame.into(),
        });
        while state.entries.len() > self.limit {
            if let Some(evicted) = state.entries.pop_front() {
                state.compacted = evicted.revision;
            }
        }
        drop(state);
        self.appended.notify_all();
    }

    /// Returns the highest revision no longer available to watchers.
    pub(crate) fn compacted(&self) -> u64 {
        self.state.lock().compacted
    }

    /// Closes every open watch.
    pub(crate) fn reset_watches(&self) {
        self.state.lock().generation += 1;
        self.appended.notify_all();
    }

    /// Opens a cursor positioned just after `from`.
    pub(crate) fn open(self: &Arc<Self>, from: u64, lifetime: Duration) -> ApiResult<FrameStream> {
        let state = self.state.lock();
        if from < state.compacted {
            return Err(ApiError::Expired {
                requested: from,
                oldest: state.compacted,
            });
        }
        Ok(FrameStream {
            history: Arc::clone(self),
            cursor: from,
            generation: state.generation,
            closes_at: Instant::now() + lifetime,
        })
    }
}

/// Outcome of reading one frame from a `FrameStream`.
#[derive(Debug)]
pub enum FramePoll {
    /// The next encoded event.
    Frame(Arc<[u8]>),
    /// No event arrived before the timeout.
    Idle,
    /// The watch has ended; `None` means the server-side timeout elapsed.
    Closed(Option<ApiError>),
}

/// Server-side cursor over the event history.
pub struct FrameStream {
    history: Arc<History>,
    cursor: u64,
    generation: u64,
    closes_at: Instant,
}

impl FrameStream {
    /// Returns the revision of the last frame delivered.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Waits up to `timeout` for the next frame.
    pub fn next_frame(&mut self, timeout: Duration) -> FramePoll {
        let poll_deadline = Instant::now() + timeout;
        let mut state = self.history.state.lock();
        loop {
            if state.generation != self.generation {
                return FramePoll::Closed(Some(ApiError::Unavailable(
                    "watch connection reset".into(),
                )));
            }
            if self.cursor < state.compacted {
                return FramePoll::Closed(Some(ApiError::Expired {
                    requested: self.cursor,
                    oldest: state.compacted,
                }));
            }

            let next = state
                .entries
                .partition_point(|entry| entry.revision <= self.cursor);
            if let Some(entry) = state.entries.get(next) {
                self.cursor = entry.revision;
                return FramePoll::Frame(Arc::clone(&entry.frame));
            }

            let now = Instant::now();
            if now >= self.closes_at {
                return FramePoll::Closed(None);
            }
            if now >= poll_deadline {
                return FramePoll::Idle;
            }
            let wake_at = poll_deadline.min(self.closes_at);
            self.history.appended.wait_until(&mut state, wake_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn history(limit: usize) -> Arc<History> {
        Arc::new(History::new(limit))
    }

    #[test]
    fn reads_frames_in_revision_order() {
        let history = history(10);
        history.append(1, vec![1]);
        history.append(2, vec![2]);

        let mut stream = history.open(0, Duration::from_secs(5)).unwrap();
        for expected in [1u8, 2] {
            match stream.next_frame(Duration::from_millis(10)) {
                FramePoll::Frame(frame) => assert_eq!(&frame[..], &[expected]),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(
            stream.next_frame(Duration::from_millis(10)),
            FramePoll::Idle
        ));
        assert_eq!(stream.cursor(), 2);
    }

    #[test]
    fn resumes_after_cursor() {
        let history = history(10);
        for rev in 1..=5 {
            history.append(rev, vec![rev as u8]);
        }
        let mut stream = history.open(3, Duration::from_secs(5)).unwrap();
        match stream.next_frame(Duration::from_millis(10)) {
            FramePoll::Frame(frame) => assert_eq!(&frame[..], &[4]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compacted_cursor_is_expired() {
        let history = history(2);
        for rev in 1..=5 {
            history.append(rev, vec![]);
        }
        assert_eq!(history.compacted(), 3);
        let err = history.open(1, Duration::from_secs(5)).err().unwrap();
        assert_eq!(
            err,
            ApiError::Expired {
                requested: 1,
                oldest: 3
            }
        );
        assert!(history.open(3, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn lifetime_closes_stream() {
        let history = history(10);
        let mut stream = history.open(0, Duration::from_millis(20)).unwrap();
        let poll = stream.next_frame(Duration::from_secs(5));
        assert!(matches!(poll, FramePoll::Closed(None)));
    }

    #[test]
    fn reset_closes_open_streams() {
        let history = history(10);
        let mut stream = history.open(0, Duration::from_secs(5)).unwrap();
        history.reset_watches();
        assert!(matches!(
            stream.next_frame(Duration::from_millis(10)),
            FramePoll::Closed(Some(ApiError::Unavailable(_)))
        ));
    }

    #[test]
    fn blocked_reader_wakes_on_append() {
        let history = history(10);
        let mut stream = history.open(0, Duration::from_secs(5)).unwrap();

        let writer = Arc::clone(&history);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.append(1, vec![42]);
        });

        match stream.next_frame(Duration::from_secs(2)) {
            FramePoll::Frame(frame) => assert_eq!(&frame[..], &[42]),
            other => panic!("unexpected {other:?}"),
        }
        handle.join().unwrap();
    }
}
