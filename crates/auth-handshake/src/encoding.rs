//! Little-endian byte writers shared by the artifact record and the
//! signature preimages

use crate::types::{Address, ScValue};

pub(crate) const TAG_U32: u8 = 1;
pub(crate) const TAG_I128: u8 = 2;
pub(crate) const TAG_BOOL: u8 = 3;
pub(crate) const TAG_ADDRESS: u8 = 4;
pub(crate) const TAG_SYMBOL: u8 = 5;
pub(crate) const TAG_BYTES: u8 = 6;

pub(crate) fn write_address(data: &mut Vec<u8>, address: &Address) {
    data.extend_from_slice(address.as_ref());
}

pub(crate) fn write_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(bytes);
}

pub(crate) fn write_str(data: &mut Vec<u8>, value: &str) {
    write_bytes(data, value.as_bytes());
}

/// Count prefix followed by each tagged value
pub(crate) fn write_values(data: &mut Vec<u8>, values: &[ScValue]) {
    data.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        write_value(data, value);
    }
}

fn write_value(data: &mut Vec<u8>, value: &ScValue) {
    match value {
        ScValue::U32(v) => {
            data.push(TAG_U32);
            write_bytes(data, &v.to_le_bytes());
        }
        ScValue::I128(v) => {
            data.push(TAG_I128);
            write_bytes(data, &v.to_le_bytes());
        }
        ScValue::Bool(v) => {
            data.push(TAG_BOOL);
            write_bytes(data, &[u8::from(*v)]);
        }
        ScValue::Address(v) => {
            data.push(TAG_ADDRESS);
            write_bytes(data, v.as_ref());
        }
        ScValue::Symbol(v) => {
            data.push(TAG_SYMBOL);
            write_str(data, v);
        }
        ScValue::Bytes(v) => {
            data.push(TAG_BYTES);
            write_bytes(data, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_count_prefixed_and_tagged() {
        let mut data = Vec::new();
        write_values(&mut data, &[ScValue::Bool(true), ScValue::Symbol("ab".to_string())]);

        assert_eq!(&data[0..4], &2u32.to_le_bytes());
        assert_eq!(data[4], TAG_BOOL);
        assert_eq!(&data[5..9], &1u32.to_le_bytes());
        assert_eq!(data[9], 1);
        assert_eq!(data[10], TAG_SYMBOL);
        assert_eq!(&data[11..15], &2u32.to_le_bytes());
        assert_eq!(&data[15..], b"ab");
    }
}
