//! CBOR framing for watch events.
//!
//! Each watch event travels as one self-contained CBOR frame:
//!
//! ```
//! use ctrlkit_api::codec::{decode_event, encode_event};
//! use ctrlkit_api::{CronTab, CronTabSpec, WatchEvent};
//!
//! let event = WatchEvent::Added(CronTab::new("ns", "a", CronTabSpec::default()));
//! let frame = encode_event(&event).unwrap();
//! let decoded: WatchEvent<CronTab> = decode_event(&frame).unwrap();
//! assert_eq!(decoded, event);
//! ```

use crate::error::{ApiError, ApiResult};
use crate::watch::WatchEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a watch event into a frame.
pub fn encode_event<K: Serialize>(event: &WatchEvent<K>) -> ApiResult<Vec<u8>> {
    let mut frame = Vec::new();
    ciborium::into_writer(event, &mut frame).map_err(|e| ApiError::Encode(e.to_string()))?;
    Ok(frame)
}

/// Decodes a frame into a watch event.
pub fn decode_event<K: DeserializeOwned>(frame: &[u8]) -> ApiResult<WatchEvent<K>> {
    ciborium::from_reader(frame).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CronTab, CronTabSpec, Resource};

    fn crontab(rv: u64) -> CronTab {
        let mut obj = CronTab::new(
            "default",
            "backup",
            CronTabSpec {
                cron_spec: "0 * * * *".into(),
                image: "backup:2".into(),
                replicas: 1,
            },
        );
        obj.meta_mut().resource_version = rv;
        obj
    }

    #[test]
    fn deleted_event_keeps_last_state() {
        let frame = encode_event(&WatchEvent::Deleted(crontab(9))).unwrap();
        match decode_event::<CronTab>(&frame).unwrap() {
            WatchEvent::Deleted(obj) => assert_eq!(obj.resource_version(), 9),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn garbage_frame_is_decode_error() {
        let result = decode_event::<CronTab>(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[test]
    fn truncated_frame_is_decode_error() {
        let frame = encode_event(&WatchEvent::Modified(crontab(2))).unwrap();
        let result = decode_event::<CronTab>(&frame[..frame.len() / 2]);
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }
}
