use crate::network::framing::FramingParams;

pub(crate) fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(crate) fn default_port() -> String {
    "8282".to_string()
}

/// RTR style header: 8 bytes, the total PDU length lives at bytes 4..8.
pub(crate) fn default_framing() -> FramingParams {
    FramingParams {
        min_header_len: 8,
        length_field_start: 4,
        length_field_end: 8,
        length_mode: Default::default(),
        max_frame_len: crate::network::framing::DEFAULT_MAX_FRAME_LEN,
    }
}

pub(crate) fn default_read_buffer_size() -> usize {
    2048
}

pub(crate) fn default_write_timeout() -> Option<u64> {
    Some(30_000)
}

pub(crate) fn default_connect_timeout() -> Option<u64> {
    Some(10_000)
}

pub(crate) fn default_keepalive() -> Option<u64> {
    Some(60)
}
