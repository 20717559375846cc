//! On-the-wire format of a single queue entry.
//!
//! Layout: `length:u32 | dboid:u32 | xid:u64 | pid:i32 | channel\0 | payload\0`,
//! padded to [`crate::position::ENTRY_ALIGN`]. `dboid == 0` marks a padding
//! ("dummy") entry written to fill out the remainder of a page; its bytes
//! past the header are meaningless and must not be parsed.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::NotifyError;
use crate::position::align_up;

/// `length(4) + dboid(4) + xid(8) + pid(4)`.
pub const HEADER_SIZE: usize = 20;

/// A committed-or-pending notification as it will appear in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub dboid: u32,
    pub xid: u64,
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

impl QueueEntry {
    /// Total aligned on-disk length of this entry, including header.
    pub fn encoded_len(&self) -> u32 {
        let raw = HEADER_SIZE + self.channel.len() + 1 + self.payload.len() + 1;
        align_up(raw as u32)
    }

    /// Encode into `buf`, which must be at least [`Self::encoded_len`] bytes.
    /// Bytes beyond the NUL-terminated payload up to the aligned length are
    /// left as whatever `buf` already contained (callers write into a
    /// zeroed page, so this is zero padding in practice).
    pub fn encode(&self, buf: &mut [u8]) {
        let len = self.encoded_len();
        LittleEndian::write_u32(&mut buf[0..4], len);
        LittleEndian::write_u32(&mut buf[4..8], self.dboid);
        LittleEndian::write_u64(&mut buf[8..16], self.xid);
        LittleEndian::write_i32(&mut buf[16..20], self.pid);
        let mut pos = HEADER_SIZE;
        buf[pos..pos + self.channel.len()].copy_from_slice(self.channel.as_bytes());
        pos += self.channel.len();
        buf[pos] = 0;
        pos += 1;
        buf[pos..pos + self.payload.len()].copy_from_slice(self.payload.as_bytes());
        pos += self.payload.len();
        buf[pos] = 0;
    }

    /// Write a padding ("dummy") entry that fills exactly `remaining` bytes
    /// of a page. Per the queue's tiling invariant, `remaining` must equal
    /// the aligned length actually written.
    pub fn encode_dummy(buf: &mut [u8], remaining: u32) {
        debug_assert!(remaining >= HEADER_SIZE as u32);
        LittleEndian::write_u32(&mut buf[0..4], remaining);
        LittleEndian::write_u32(&mut buf[4..8], 0); // dboid = 0 => padding
        LittleEndian::write_u64(&mut buf[8..16], 0);
        LittleEndian::write_i32(&mut buf[16..20], 0);
    }

    /// Decode the entry (or padding marker) starting at `buf[0..]`. Returns
    /// `(dboid, xid, pid, channel, payload, encoded_len)`; for padding
    /// entries (`dboid == 0`) channel/payload are empty and must be
    /// ignored, only `encoded_len` matters to the caller.
    pub fn decode(buf: &[u8]) -> Result<DecodedEntry, NotifyError> {
        if buf.len() < HEADER_SIZE {
            return Err(NotifyError::PagedLogError(anyhow::anyhow!(
                "truncated queue entry header"
            )));
        }
        let length = LittleEndian::read_u32(&buf[0..4]);
        let dboid = LittleEndian::read_u32(&buf[4..8]);
        if length < HEADER_SIZE as u32 || (length as usize) > buf.len() {
            return Err(NotifyError::PagedLogError(anyhow::anyhow!(
                "corrupt queue entry length {length}"
            )));
        }
        if dboid == 0 {
            return Ok(DecodedEntry {
                dboid: 0,
                xid: 0,
                pid: 0,
                channel: String::new(),
                payload: String::new(),
                encoded_len: length,
            });
        }
        let xid = LittleEndian::read_u64(&buf[8..16]);
        let pid = LittleEndian::read_i32(&buf[16..20]);
        let body = &buf[HEADER_SIZE..length as usize];
        let channel_end = body
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| NotifyError::PagedLogError(anyhow::anyhow!("unterminated channel")))?;
        let channel = String::from_utf8_lossy(&body[..channel_end]).into_owned();
        let payload_start = channel_end + 1;
        let payload_body = &body[payload_start..];
        let payload_end = payload_body
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| NotifyError::PagedLogError(anyhow::anyhow!("unterminated payload")))?;
        let payload = String::from_utf8_lossy(&payload_body[..payload_end]).into_owned();
        Ok(DecodedEntry {
            dboid,
            xid,
            pid,
            channel,
            payload,
            encoded_len: length,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub dboid: u32,
    pub xid: u64,
    pub pid: i32,
    pub channel: String,
    pub payload: String,
    pub encoded_len: u32,
}

impl DecodedEntry {
    pub fn is_padding(&self) -> bool {
        self.dboid == 0
    }
}
