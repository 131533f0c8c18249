use super::Coder;
use crate::error::{AmdbError, Result};
use serde::{Deserialize, Serialize};

/// Character encodings supported by [`StringCoder`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// ISO-8859-1; characters above U+00FF cannot be encoded
    Latin1,
}

/// Text with a fixed character encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringCoder {
    encoding: TextEncoding,
}

impl StringCoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub(crate) fn encode_str(&self, value: &str) -> Result<Vec<u8>> {
        match self.encoding {
            TextEncoding::Utf8 => Ok(value.as_bytes().to_vec()),
            TextEncoding::Utf16Le => Ok(value
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect()),
            TextEncoding::Utf16Be => Ok(value
                .encode_utf16()
                .flat_map(|unit| unit.to_be_bytes())
                .collect()),
            TextEncoding::Latin1 => value
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        AmdbError::Format(format!("character {:?} is not representable in latin-1", c))
                    })
                })
                .collect(),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(AmdbError::Format(format!(
            "utf-16 input has odd length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| AmdbError::Format(e.to_string()))
}

impl Coder for StringCoder {
    type Value = String;

    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        self.encode_str(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        match self.encoding {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| AmdbError::Format(e.to_string())),
            TextEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}
