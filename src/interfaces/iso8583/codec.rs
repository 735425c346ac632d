use super::bitmap::{self, BITMAP_HEX_LEN};
use super::fields::{self, FieldFormat};
use crate::domain::message::{FIELD_MAC, Message, Mti};
use crate::error::CodecError;
use tracing::trace;

const MTI_LEN: usize = 4;
const MAC_LEN: usize = 16;

/// Serializes a message: ASCII MTI, 16 hex digit primary bitmap, then the
/// present fields in ascending order.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    message.validate()?;

    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(message.mti().code().as_bytes());
    out.extend_from_slice(bitmap::to_hex(message.bitmap()).as_bytes());

    for (field, value) in message.fields() {
        let spec = fields::spec(field).ok_or(CodecError::FieldNotAllowed(field))?;
        check_characters(field, value.as_bytes())?;
        let len = value.len();
        match spec.format {
            FieldFormat::Fixed(expected) => {
                if len != expected {
                    return Err(CodecError::FixedLength {
                        field,
                        expected,
                        actual: len,
                    });
                }
            }
            FieldFormat::LlVar(max) => {
                if len > max {
                    return Err(CodecError::Oversize { field, max });
                }
                out.extend_from_slice(format!("{len:02}").as_bytes());
            }
            FieldFormat::LllVar(max) => {
                if len > max {
                    return Err(CodecError::Oversize { field, max });
                }
                out.extend_from_slice(format!("{len:03}").as_bytes());
            }
        }
        out.extend_from_slice(value.as_bytes());
    }

    trace!(mti = %message.mti(), bytes = out.len(), "encoded message");
    Ok(out)
}

/// Parses a message, consuming the buffer exactly.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut reader = Reader::new(bytes);

    let mti_raw = reader.take(MTI_LEN)?;
    let mti = Mti::parse(&String::from_utf8_lossy(mti_raw))?;
    let bitmap = bitmap::parse_hex(reader.take(BITMAP_HEX_LEN)?)?;
    if bitmap::is_set(bitmap, 1) {
        return Err(CodecError::SecondaryBitmap);
    }

    let mut message = Message::new(mti);
    for field in bitmap::present_fields(bitmap) {
        let spec = fields::spec(field).ok_or(CodecError::FieldNotAllowed(field))?;
        let len = match spec.format {
            FieldFormat::Fixed(len) => len,
            FieldFormat::LlVar(max) => reader.length_prefix(field, 2, max)?,
            FieldFormat::LllVar(max) => reader.length_prefix(field, 3, max)?,
        };
        let raw = reader.take(len)?;
        check_characters(field, raw)?;
        // check_characters guarantees ASCII
        let value = String::from_utf8_lossy(raw).into_owned();
        message.set(field, value)?;
    }

    if reader.remaining() > 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }
    message.validate()?;

    trace!(mti = %mti, fields = message.fields().count(), "decoded message");
    Ok(message)
}

/// The bytes covered by the message authentication code.
///
/// The MAC field is always present in the bitmap of a sealed message, so the
/// input is the encoding with field 64 set, minus the field value itself.
pub fn mac_input(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut unsealed = message.clone();
    unsealed.set(FIELD_MAC, "0".repeat(MAC_LEN))?;
    let mut encoded = encode(&unsealed)?;
    encoded.truncate(encoded.len() - MAC_LEN);
    Ok(encoded)
}

fn check_characters(field: u8, raw: &[u8]) -> Result<(), CodecError> {
    if raw.iter().all(|b| (0x20..=0x7e).contains(b)) {
        Ok(())
    } else {
        Err(CodecError::InvalidCharacter { field })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn length_prefix(&mut self, field: u8, digits: usize, max: usize) -> Result<usize, CodecError> {
        let raw = self.take(digits)?;
        if !raw.iter().all(u8::is_ascii_digit) {
            return Err(CodecError::BadLength { field });
        }
        let len = raw
            .iter()
            .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
        if len > max {
            return Err(CodecError::Oversize { field, max });
        }
        Ok(len)
    }
}
