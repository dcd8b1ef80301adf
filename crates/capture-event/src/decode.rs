//! Fixed-layout record decoding and its inverse

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::event::{CaptureEvent, Direction, TimestampNs};
use crate::{DecodeError, HEADER_LEN, MAX_PAYLOAD_LEN, TASK_COMM_LEN};

/// Decode one raw capture record.
///
/// Fails only when `record` is shorter than [`HEADER_LEN`]. The payload is
/// `min(declared length, bytes remaining, MAX_PAYLOAD_LEN)` bytes long.
pub fn decode_record(record: &[u8]) -> Result<CaptureEvent, DecodeError> {
    if record.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedRecord {
            have: record.len(),
            need: HEADER_LEN,
        });
    }

    let mut buf = record;
    let timestamp_ns = TimestampNs(buf.get_u64_le());
    let pid = buf.get_u32_le();
    let tid = buf.get_u32_le();
    let fd = buf.get_u32_le();
    let direction = Direction::from_tag(buf.get_u8());
    let declared_len = buf.get_u32_le() as usize;

    let comm = decode_comm(&buf[..TASK_COMM_LEN]);
    buf.advance(TASK_COMM_LEN);

    let payload_len = declared_len.min(buf.remaining()).min(MAX_PAYLOAD_LEN);
    let payload = Bytes::copy_from_slice(&buf[..payload_len]);

    Ok(CaptureEvent {
        timestamp_ns,
        pid,
        tid,
        fd,
        direction,
        payload,
        comm,
    })
}

/// Task names stop at the first NUL; a name filling the whole field has none.
fn decode_comm(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl CaptureEvent {
    /// Serialize back into the probe's record layout.
    ///
    /// The name is truncated or NUL-padded to [`TASK_COMM_LEN`] bytes and the
    /// payload is capped at [`MAX_PAYLOAD_LEN`].
    pub fn encode(&self) -> Bytes {
        let payload = &self.payload[..self.payload.len().min(MAX_PAYLOAD_LEN)];
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());

        out.put_u64_le(self.timestamp_ns.0);
        out.put_u32_le(self.pid);
        out.put_u32_le(self.tid);
        out.put_u32_le(self.fd);
        out.put_u8(self.direction.tag());
        out.put_u32_le(payload.len() as u32);

        let name = self.comm.as_bytes();
        let name = &name[..name.len().min(TASK_COMM_LEN)];
        out.put_slice(name);
        out.put_bytes(0, TASK_COMM_LEN - name.len());

        out.put_slice(payload);
        out.freeze()
    }
}
