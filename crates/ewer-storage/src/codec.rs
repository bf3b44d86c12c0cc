//! The value codec: a self-describing byte-stream format.
//!
//! A single prefix byte identifies the encoder, followed by the encoder's
//! payload; the whole stream is wrapped in zlib compression. Decoders are
//! probed by the prefix byte after decompression.
//!
//! The reference encoder set:
//! - `N`: multi-dimensional numeric arrays: shape + dtype + raw bytes,
//!   streamed so the payload is never buffered twice;
//! - `B`: opaque binary-file-like payloads (e.g. image bytes), embedded
//!   verbatim;
//! - `J`: the general object-graph encoder (JSON) for everything else.
//!
//! An empty stream decodes to [`Value::Unit`]. Encoding failures on dump
//! are fatal; decoding failures are reported by the stores as corruption
//! of the entry.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use ewer_core::value::{Dtype, NdArray, Value};

use crate::error::CodecError;

/// One entry in the encoder set.
trait Encoder: Sync {
    /// The stream prefix byte claimed by this encoder.
    fn prefix(&self) -> u8;

    /// Whether this encoder handles the value.
    fn can_encode(&self, value: &Value) -> bool;

    /// Writes the payload (without the prefix byte).
    fn write(&self, value: &Value, out: &mut dyn Write) -> Result<(), CodecError>;

    /// Reads the payload (after the prefix byte was consumed).
    fn read(&self, input: &mut dyn Read) -> Result<Value, CodecError>;
}

struct ArrayEncoder;

impl Encoder for ArrayEncoder {
    fn prefix(&self) -> u8 {
        b'N'
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Array(_))
    }

    fn write(&self, value: &Value, out: &mut dyn Write) -> Result<(), CodecError> {
        let array = match value {
            Value::Array(a) => a,
            other => return Err(CodecError::Unencodable(other.kind())),
        };
        out.write_all(&[array.dtype().tag()])?;
        out.write_all(&(array.shape().len() as u32).to_le_bytes())?;
        for dim in array.shape() {
            out.write_all(&dim.to_le_bytes())?;
        }
        out.write_all(array.data())?;
        Ok(())
    }

    fn read(&self, input: &mut dyn Read) -> Result<Value, CodecError> {
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        let dtype = Dtype::from_tag(tag[0])
            .ok_or_else(|| CodecError::CorruptArray(format!("unknown dtype tag {:#04x}", tag[0])))?;

        let mut ndim_bytes = [0u8; 4];
        input.read_exact(&mut ndim_bytes)?;
        let ndim = u32::from_le_bytes(ndim_bytes) as usize;

        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            let mut dim_bytes = [0u8; 8];
            input.read_exact(&mut dim_bytes)?;
            shape.push(u64::from_le_bytes(dim_bytes));
        }

        let count: u64 = shape.iter().product();
        let mut data = vec![0u8; count as usize * dtype.size()];
        input.read_exact(&mut data)?;

        NdArray::new(shape, dtype, data)
            .map(Value::Array)
            .map_err(|e| CodecError::CorruptArray(e.to_string()))
    }
}

struct BlobEncoder;

impl Encoder for BlobEncoder {
    fn prefix(&self) -> u8 {
        b'B'
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Blob(_))
    }

    fn write(&self, value: &Value, out: &mut dyn Write) -> Result<(), CodecError> {
        match value {
            Value::Blob(bytes) => {
                out.write_all(bytes)?;
                Ok(())
            }
            other => Err(CodecError::Unencodable(other.kind())),
        }
    }

    fn read(&self, input: &mut dyn Read) -> Result<Value, CodecError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        Ok(Value::Blob(bytes))
    }
}

struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn prefix(&self) -> u8 {
        b'J'
    }

    fn can_encode(&self, _value: &Value) -> bool {
        true
    }

    fn write(&self, value: &Value, out: &mut dyn Write) -> Result<(), CodecError> {
        serde_json::to_writer(out, value)?;
        Ok(())
    }

    fn read(&self, input: &mut dyn Read) -> Result<Value, CodecError> {
        Ok(serde_json::from_reader(input)?)
    }
}

// Probed in order; the general encoder comes last as the catch-all.
static ENCODERS: [&(dyn Encoder); 3] = [&ArrayEncoder, &BlobEncoder, &JsonEncoder];

/// Encodes a value into a compressed, self-describing byte buffer.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_to(value, &mut out)?;
    Ok(out)
}

/// Encodes a value into `out`, compressed.
pub fn encode_to<W: Write>(value: &Value, out: W) -> Result<(), CodecError> {
    let mut stream = ZlibEncoder::new(out, Compression::default());
    let encoder = ENCODERS
        .iter()
        .find(|e| e.can_encode(value))
        .ok_or(CodecError::Unencodable(value.kind()))?;
    stream.write_all(&[encoder.prefix()])?;
    encoder.write(value, &mut stream)?;
    stream.finish()?;
    Ok(())
}

/// Decodes a value from a byte buffer produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    if bytes.is_empty() {
        return Ok(Value::Unit);
    }
    decode_from(bytes)
}

/// Decodes a value from a compressed stream.
pub fn decode_from<R: Read>(input: R) -> Result<Value, CodecError> {
    let mut stream = ZlibDecoder::new(input);
    let mut prefix = [0u8; 1];
    match stream.read(&mut prefix)? {
        0 => return Ok(Value::Unit),
        _ => {}
    }
    for encoder in &ENCODERS {
        if encoder.prefix() == prefix[0] {
            return encoder.read(&mut stream);
        }
    }
    Err(CodecError::UnknownPrefix(prefix[0]))
}
