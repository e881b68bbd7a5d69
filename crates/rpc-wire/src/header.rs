use thiserror::Error;

/// Size of a frame header on the wire: three little-endian `u32`s.
pub const HEADER_LEN: usize = 3 * size_of::<u32>();

/// Size of the zero-filled status word the server prepends to every
/// response, ahead of the header (see spec §3, "response framing anomaly").
pub const RESPONSE_STATUS_LEN: usize = size_of::<u32>();

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header needs {HEADER_LEN} bytes, got {0}")]
    Short(usize),
}

/// The 12-byte frame header: `[method_index][message_length][request_id]`,
/// little-endian, no padding.
///
/// `request_id` is echoed back by the server on the response frame for the
/// same request; the transport never inspects it for matching purposes —
/// requests on a given connection are strictly serialized (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub method_index: u32,
    pub message_length: u32,
    pub request_id: u32,
}

impl FrameHeader {
    pub fn pack(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..4].copy_from_slice(&self.method_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.message_length.to_le_bytes());
        out[8..12].copy_from_slice(&self.request_id.to_le_bytes());
    }

    pub fn packed(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        self.pack(&mut buf);
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::Short(bytes.len()));
        }
        Ok(Self {
            method_index: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            message_length: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            request_id: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = FrameHeader { method_index: 7, message_length: 1234, request_id: 99 };
        let packed = h.packed();
        assert_eq!(FrameHeader::unpack(&packed).unwrap(), h);
    }

    #[test]
    fn little_endian_on_the_wire() {
        let h = FrameHeader { method_index: 1, message_length: 0, request_id: 0 };
        assert_eq!(&h.packed()[0..4], &[1, 0, 0, 0]);
    }

    #[test]
    fn unpack_rejects_short_buffer() {
        assert!(matches!(FrameHeader::unpack(&[0u8; 4]), Err(HeaderError::Short(4))));
    }

    #[test]
    fn round_trip_max_values() {
        let h = FrameHeader {
            method_index: u32::MAX,
            message_length: u32::MAX,
            request_id: u32::MAX,
        };
        assert_eq!(FrameHeader::unpack(&h.packed()).unwrap(), h);
    }
}
