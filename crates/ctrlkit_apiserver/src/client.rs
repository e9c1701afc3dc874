//! `ListWatch` client backed by an in-process `ApiServer`.

use crate::history::{FramePoll, FrameStream};
use crate::server::ApiServer;
use ctrlkit_api::codec::decode_event;
use ctrlkit_api::{ApiResult, ListWatch, ObjectList, Resource, WatchPoll, WatchStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A client that talks to an `ApiServer` in the same process.
///
/// Watch events cross the boundary as encoded frames and are decoded on
/// the client side, exactly as they would be over a network connection.
pub struct LocalClient<K: Resource> {
    server: Arc<ApiServer<K>>,
}

impl<K: Resource> LocalClient<K> {
    /// Creates a client for `server`.
    pub fn new(server: Arc<ApiServer<K>>) -> Self {
        Self { server }
    }

    /// Returns the server this client talks to.
    pub fn server(&self) -> &Arc<ApiServer<K>> {
        &self.server
    }
}

impl<K: Resource> Clone for LocalClient<K> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

impl<K> ListWatch<K> for LocalClient<K>
where
    K: Resource + Serialize + DeserializeOwned,
{
    fn list(&self) -> ApiResult<ObjectList<K>> {
        self.server.list()
    }

    fn watch(&self, resource_version: u64) -> ApiResult<Box<dyn WatchStream<K>>> {
        let frames = self.server.watch_frames(resource_version)?;
        Ok(Box::new(DecodingStream {
            frames,
            _kind: PhantomData,
        }))
    }
}

/// Decodes frames from a `FrameStream` into watch events.
struct DecodingStream<K> {
    frames: FrameStream,
    _kind: PhantomData<fn() -> K>,
}

impl<K: DeserializeOwned> WatchStream<K> for DecodingStream<K> {
    fn poll_next(&mut self, timeout: Duration) -> WatchPoll<K> {
        match self.frames.next_frame(timeout) {
            FramePoll::Frame(frame) => match decode_event(&frame) {
                Ok(event) => WatchPoll::Event(event),
                Err(err) => WatchPoll::Malformed(err),
            },
            FramePoll::Idle => WatchPoll::Idle,
            FramePoll::Closed(reason) => WatchPoll::Closed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use ctrlkit_api::{ApiError, CronTab, CronTabSpec, WatchEvent};

    fn setup() -> (Arc<ApiServer<CronTab>>, LocalClient<CronTab>) {
        let server = Arc::new(ApiServer::new(ServerConfig::default()));
        let client = LocalClient::new(Arc::clone(&server));
        (server, client)
    }

    #[test]
    fn watch_decodes_events() {
        let (server, client) = setup();
        let mut watch = client.watch(0).unwrap();
        server
            .create(CronTab::new("ns", "a", CronTabSpec::default()))
            .unwrap();

        match watch.poll_next(Duration::from_millis(100)) {
            WatchPoll::Event(WatchEvent::Added(obj)) => {
                assert_eq!(obj.resource_version(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_does_not_end_stream() {
        let (server, client) = setup();
        let mut watch = client.watch(0).unwrap();
        server.inject_malformed_frame(b"not cbor at all".to_vec());
        server
            .create(CronTab::new("ns", "b", CronTabSpec::default()))
            .unwrap();

        assert!(matches!(
            watch.poll_next(Duration::from_millis(100)),
            WatchPoll::Malformed(ApiError::Decode(_))
        ));
        assert!(matches!(
            watch.poll_next(Duration::from_millis(100)),
            WatchPoll::Event(WatchEvent::Added(_))
        ));
    }

    #[test]
    fn disconnect_closes_with_reason() {
        let (server, client) = setup();
        let mut watch = client.watch(0).unwrap();
        server.disconnect_watches();
        assert!(matches!(
            watch.poll_next(Duration::from_millis(100)),
            WatchPoll::Closed(Some(ApiError::Unavailable(_)))
        ));
    }

    #[test]
    fn idle_when_nothing_happens() {
        let (_server, client) = setup();
        let mut watch = client.watch(0).unwrap();
        assert!(matches!(
            watch.poll_next(Duration::from_millis(10)),
            WatchPoll::Idle
        ));
    }
}
