use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use log::debug;

use pdu_transport::network::connection::Connection;
use pdu_transport::network::framing::{reassemble, Frame, FramingParams, LengthMode};
use pdu_transport::network::policy::Decision;
use pdu_transport::network::process::Process;
use pdu_transport::Error;

/// Wrap a payload into a frame, whose otherwise zeroed header carries the length field.
pub fn build_frame(params: &FramingParams, payload: &[u8]) -> Result<Frame, Error> {
    params.validate()?;

    let frame_len = params.min_header_len + payload.len();
    if frame_len > params.max_frame_len {
        return Err(Error::MalformedFrame(format!(
            "frame length {frame_len} exceeds the maximum of {} bytes",
            params.max_frame_len
        )));
    }

    let declared = match params.length_mode {
        LengthMode::Total => frame_len,
        LengthMode::Payload => payload.len(),
    } as u64;
    let field_len = params.length_field_end - params.length_field_start;
    if field_len < 8 && declared >> (field_len * 8) != 0 {
        return Err(Error::MalformedFrame(format!(
            "length {declared} doesn't fit into a {field_len} byte length field"
        )));
    }

    let mut frame = vec![0; frame_len];
    BigEndian::write_uint(
        &mut frame[params.length_field_start..params.length_field_end],
        declared,
        field_len,
    );
    frame[params.min_header_len..].copy_from_slice(payload);

    Ok(frame)
}

/// Collects the replies of the server.
/// Reading stops as soon as at least one complete frame arrived.
pub struct ReplyCollector {
    framing: FramingParams,
    pub replies: Arc<Mutex<Vec<Frame>>>,
}

impl ReplyCollector {
    pub fn new(framing: FramingParams) -> Self {
        ReplyCollector {
            framing,
            replies: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Process for ReplyCollector {
    async fn on_receive(&self, _connection: &Connection, buffer: Vec<u8>) -> Result<Decision, Error> {
        let (frames, leftover) = reassemble(&buffer, &self.framing)?;
        if frames.is_empty() {
            debug!("Waiting for the rest of the reply");
            return Ok(Decision::keep(leftover));
        }

        let mut replies = self
            .replies
            .lock()
            .map_err(|_| Error::Generic("Reply list is poisoned".into()))?;
        replies.extend(frames);

        Ok(Decision::end_read(leftover))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_build_rtr_style_frame() {
        let params = FramingParams::new(8, 4, 8).unwrap();
        let frame = build_frame(&params, b"hi").unwrap();

        assert_eq!(frame, vec![0, 0, 0, 0, 0, 0, 0, 10, b'h', b'i']);

        let (frames, leftover) = reassemble(&frame, &params).unwrap();
        assert_eq!(frames, vec![frame]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_build_payload_length_frame() {
        let params = FramingParams::new(3, 1, 3)
            .unwrap()
            .with_length_mode(LengthMode::Payload);
        let frame = build_frame(&params, &[7; 4]).unwrap();

        assert_eq!(frame, vec![0, 0, 4, 7, 7, 7, 7]);
    }

    #[test]
    fn test_length_field_too_small() {
        let params = FramingParams::new(2, 1, 2).unwrap();
        let result = build_frame(&params, &[0; 300]);

        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_frame_exceeds_maximum() {
        let params = FramingParams::new(8, 4, 8).unwrap().with_max_frame_len(16);
        let result = build_frame(&params, &[0; 9]);

        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }
}
