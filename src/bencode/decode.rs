use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Read;

const MAX_DEPTH: usize = 64;

/// Decodes exactly one value; bytes left over after it are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;

    if consumed != data.len() {
        return Err(BencodeError::TrailingData { offset: consumed });
    }

    Ok(value)
}

/// Decodes one value from the front of `data` and returns it with the
/// number of bytes it occupied. Whatever follows is left untouched.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, pos))
}

/// Reads at most `limit` bytes from `reader` and decodes them as one value.
///
/// Input longer than `limit` is rejected without being buffered past the
/// limit.
pub fn decode_from<R: Read>(reader: R, limit: usize) -> Result<Value, BencodeError> {
    let mut buf = Vec::new();
    let cap = (limit as u64).saturating_add(1);
    reader.take(cap).read_to_end(&mut buf)?;

    if buf.len() > limit {
        return Err(BencodeError::LimitExceeded { limit });
    }

    decode(&buf)
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep { offset: *pos });
    }

    let Some(&byte) = data.get(*pos) else {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    };

    match byte {
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        b'0'..=b'9' => decode_bytes(data, pos),
        byte => Err(BencodeError::UnexpectedByte {
            offset: *pos,
            byte,
        }),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    let invalid = |reason| BencodeError::InvalidInteger {
        offset: start,
        reason,
    };

    let digits = &data[start..*pos];
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);

    if unsigned.is_empty() {
        return Err(invalid("empty"));
    }
    if !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(invalid("non-digit"));
    }
    if unsigned[0] == b'0' && (unsigned.len() > 1 || unsigned.len() != digits.len()) {
        return Err(invalid("leading zero"));
    }

    let value: i64 = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("out of range"))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos;
    let mut len: usize = 0;

    while *pos < data.len() && data[*pos] != b':' {
        let digit = data[*pos];
        if !digit.is_ascii_digit() {
            return Err(BencodeError::InvalidStringLength { offset: start });
        }
        len = len
            .checked_mul(10)
            .and_then(|l| l.checked_add((digit - b'0') as usize))
            .ok_or(BencodeError::InvalidStringLength { offset: start })?;
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    *pos += 1;

    if len > data.len() - *pos {
        return Err(BencodeError::UnexpectedEof { offset: data.len() });
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;

    Ok(Value::Bytes(bytes))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        if !data[*pos].is_ascii_digit() {
            return Err(BencodeError::NonStringKey { offset: *pos });
        }

        let key = match decode_bytes(data, pos)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::NonStringKey { offset: *pos }),
        };

        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof { offset: *pos });
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}
