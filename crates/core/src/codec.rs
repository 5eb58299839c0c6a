//! Versioned binary encoding for durable jobs.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! u8  version            (must come first so future layouts stay detectable)
//! u32 id length          + that many UTF-8 bytes
//! i64 trigger time       nanoseconds since the Unix epoch
//! i32 priority
//! u64 time-to-run        milliseconds
//! u32 body length        + that many payload bytes
//! ```
//!
//! Decoding an unknown version fails closed: better to skip a record during
//! recovery than to misparse it. Trigger times must fit in epoch
//! nanoseconds (roughly years 1678–2262); encoding rejects anything outside
//! that range instead of truncating.

use std::time::Duration;

use bytes::Bytes;
use chrono::DateTime;

use crate::error::SpindleError;
use crate::job::Job;

/// Current encoding version. Bump on any layout change.
pub const CODEC_VERSION: u8 = 1;

pub fn encode_job(job: &Job) -> Result<Bytes, SpindleError> {
    let trigger_ns = job
        .trigger_at()
        .timestamp_nanos_opt()
        .ok_or_else(|| SpindleError::TriggerOutOfRange(job.trigger_at().to_rfc3339()))?;

    let id = job.id().as_bytes();
    let body = job.body();
    let ttr_ms = job.time_to_run().as_millis() as u64;

    let mut buf = Vec::with_capacity(1 + 4 + id.len() + 8 + 4 + 8 + 4 + body.len());
    buf.push(CODEC_VERSION);
    buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
    buf.extend_from_slice(id);
    buf.extend_from_slice(&trigger_ns.to_le_bytes());
    buf.extend_from_slice(&job.priority().to_le_bytes());
    buf.extend_from_slice(&ttr_ms.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(body);
    Ok(Bytes::from(buf))
}

pub fn decode_job(buf: &[u8]) -> Result<Job, SpindleError> {
    let mut r = FieldReader { buf, pos: 0 };

    let version = r.u8("version")?;
    if version != CODEC_VERSION {
        return Err(SpindleError::UnsupportedCodecVersion(version));
    }

    let id_len = r.u32("id length")? as usize;
    let id = String::from_utf8(r.bytes(id_len, "id")?.to_vec())?;
    let trigger_ns = r.i64("trigger time")?;
    let priority = r.i32("priority")?;
    let ttr_ms = r.u64("time-to-run")?;
    let body_len = r.u32("body length")? as usize;
    let body = Bytes::copy_from_slice(r.bytes(body_len, "body")?);

    if r.pos != buf.len() {
        return Err(SpindleError::TrailingBytes(buf.len() - r.pos));
    }

    Ok(Job::with_options(
        id,
        DateTime::from_timestamp_nanos(trigger_ns),
        body,
        priority,
        Duration::from_millis(ttr_ms),
    ))
}

/// Cursor that names the field it was reading when the buffer ran out.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], SpindleError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(SpindleError::TruncatedEncoding(field))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, SpindleError> {
        Ok(self.bytes(1, field)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, SpindleError> {
        let raw = self.bytes(4, field)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, SpindleError> {
        let raw = self.bytes(4, field)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, SpindleError> {
        let raw = self.bytes(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(raw);
        Ok(u64::from_le_bytes(arr))
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, SpindleError> {
        let raw = self.bytes(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(raw);
        Ok(i64::from_le_bytes(arr))
    }
}
