//! The layout of segment contents.
//!
//! Every segment holds a short list of scalar slots:
//!
//! ```text
//! magic   b"shsl"
//! count   u32 LE
//! slot*   tag u8, len u64 LE, payload[len]
//! ```
//!
//! Value segments hold exactly one slot, the keys segment one slot per key.
use shm_segment::Segment;

use crate::{Error, Result, Scalar};

const MAGIC: [u8; 4] = *b"shsl";

const TAG_NONE: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;

pub(crate) fn encode(slots: &[Scalar]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + slots.len() * 16);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(slots.len() as u32).to_le_bytes());

    for slot in slots {
        match slot {
            Scalar::None => put(&mut out, TAG_NONE, &[]),
            Scalar::Bool(b) => put(&mut out, TAG_BOOL, &[u8::from(*b)]),
            Scalar::Int(i) => put(&mut out, TAG_INT, &i.to_le_bytes()),
            Scalar::Float(f) => put(&mut out, TAG_FLOAT, &f.to_le_bytes()),
            Scalar::Str(s) => put(&mut out, TAG_STR, s.as_bytes()),
            Scalar::Bytes(b) => put(&mut out, TAG_BYTES, b),
        }
    }

    out
}

fn put(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
}

pub(crate) fn decode(segment: &Segment) -> Result<Vec<Scalar>> {
    let mut reader = Reader {
        segment: segment.name(),
        rest: segment.bytes(),
    };

    if reader.take(4)? != MAGIC {
        return Err(reader.corrupt("bad magic"));
    }

    let count = u32::from_le_bytes(reader.array()?);
    // Each slot takes at least nine bytes, do not trust the count for the allocation.
    let mut slots = Vec::with_capacity((count as usize).min(reader.rest.len() / 9));

    for _ in 0..count {
        let [tag] = reader.array::<1>()?;
        let len = u64::from_le_bytes(reader.array()?);
        let len = usize::try_from(len).map_err(|_| reader.corrupt("slot length overflow"))?;
        let payload = reader.take(len)?;

        let slot = match (tag, payload) {
            (TAG_NONE, []) => Scalar::None,
            (TAG_BOOL, [b @ (0 | 1)]) => Scalar::Bool(*b == 1),
            (TAG_INT, bytes) if bytes.len() == 8 => {
                Scalar::Int(i64::from_le_bytes(fixed(bytes)))
            }
            (TAG_FLOAT, bytes) if bytes.len() == 8 => {
                Scalar::Float(f64::from_le_bytes(fixed(bytes)))
            }
            (TAG_STR, bytes) => match core::str::from_utf8(bytes) {
                Ok(s) => Scalar::Str(s.to_owned()),
                Err(_) => return Err(reader.corrupt("string slot is not UTF-8")),
            },
            (TAG_BYTES, bytes) => Scalar::Bytes(bytes.to_vec()),
            _ => return Err(reader.corrupt("unknown slot tag or bad slot length")),
        };

        slots.push(slot);
    }

    if !reader.rest.is_empty() {
        return Err(reader.corrupt("trailing bytes after the last slot"));
    }

    Ok(slots)
}

struct Reader<'lt> {
    segment: &'lt str,
    rest: &'lt [u8],
}

impl<'lt> Reader<'lt> {
    fn take(&mut self, len: usize) -> Result<&'lt [u8]> {
        if self.rest.len() < len {
            return Err(self.corrupt("truncated"));
        }

        let (head, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take(N).map(fixed)
    }

    fn corrupt(&self, reason: &'static str) -> Error {
        Error::Corrupt {
            segment: self.segment.to_owned(),
            reason,
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(bytes);
    out
}
