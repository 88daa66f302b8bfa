//! Reversible payload codec for backend writes
//!
//! Every payload is wrapped immediately before a backend write and unwrapped
//! immediately after a backend read. The wrapped blob is self-describing, so
//! unwrapping needs no external configuration - wrap and unwrap may run in
//! different processes, or years apart.
//!
//! **Format**: `[scheme: u8][block_len: u16 big-endian][padded body]`
//!
//! The codec composes with other transforms (encryption, compression) behind
//! the same wrap/unwrap contract; padding is the only transform implemented
//! here.

use crate::error::{Result, StoreError};

/// Size of the self-describing header in bytes.
pub const HEADER_LEN: usize = 3;

/// Smallest accepted block length.
pub const MIN_BLOCK_LEN: u16 = 16;

/// Padding scheme applied to the payload body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum PadScheme {
    /// PKCS#7: every pad byte carries the pad length
    Pkcs7 = 1,
    /// ANSI X9.23: zero fill, last byte carries the pad length
    AnsiX923 = 2,
    /// ISO/IEC 7816-4: 0x80 marker followed by zero fill
    Iso7816 = 3,
}

impl PadScheme {
    /// Convert from the wire tag
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PadScheme::Pkcs7),
            2 => Some(PadScheme::AnsiX923),
            3 => Some(PadScheme::Iso7816),
            _ => None,
        }
    }

    /// The block length this scheme can actually pad against.
    ///
    /// PKCS#7 and X9.23 store the pad length in a single byte, which caps
    /// their pad run at 255; ISO 7816-4 is marker-based and takes the full
    /// block.
    fn effective_block(&self, block_len: u16) -> usize {
        match self {
            PadScheme::Pkcs7 | PadScheme::AnsiX923 => (block_len as usize).min(255),
            PadScheme::Iso7816 => block_len as usize,
        }
    }
}

/// Wrap a payload for storage.
///
/// Writes the scheme tag and block length, then pads the payload to a
/// multiple of the scheme's effective block. The pad run is always at least
/// one byte, so an exact-multiple payload grows by a full block.
pub fn wrap(payload: &[u8], block_len: u16, scheme: PadScheme) -> Result<Vec<u8>> {
    if block_len < MIN_BLOCK_LEN {
        return Err(StoreError::InvalidBlockLen(block_len as u32));
    }

    let block = scheme.effective_block(block_len);
    let pad = block - payload.len() % block;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + pad);
    out.push(scheme as u8);
    out.extend_from_slice(&block_len.to_be_bytes());
    out.extend_from_slice(payload);

    match scheme {
        PadScheme::Pkcs7 => {
            out.resize(out.len() + pad, pad as u8);
        }
        PadScheme::AnsiX923 => {
            out.resize(out.len() + pad - 1, 0);
            out.push(pad as u8);
        }
        PadScheme::Iso7816 => {
            out.push(0x80);
            out.resize(out.len() + pad - 1, 0);
        }
    }

    Ok(out)
}

/// Unwrap a stored blob back to the original payload.
///
/// Reads the scheme tag and block length from the header and strips the
/// padding. Truncated input, unknown tags, and inconsistent padding all fail
/// with [`StoreError::Unwrap`]; a malformed blob is fatal, there is no
/// partial recovery.
pub fn unwrap(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(StoreError::Unwrap(format!(
            "input too short: {} bytes, need at least {}",
            data.len(),
            HEADER_LEN
        )));
    }

    let scheme = PadScheme::from_u8(data[0])
        .ok_or_else(|| StoreError::Unwrap(format!("unknown scheme tag: {}", data[0])))?;
    let block_len = u16::from_be_bytes([data[1], data[2]]);
    if block_len < MIN_BLOCK_LEN {
        return Err(StoreError::Unwrap(format!(
            "block length {} below minimum {}",
            block_len, MIN_BLOCK_LEN
        )));
    }

    let body = &data[HEADER_LEN..];
    let block = scheme.effective_block(block_len);
    if body.is_empty() || body.len() % block != 0 {
        return Err(StoreError::Unwrap(format!(
            "body length {} is not a positive multiple of block {}",
            body.len(),
            block
        )));
    }

    let pad = match scheme {
        PadScheme::Pkcs7 => {
            let pad = body[body.len() - 1] as usize;
            if pad == 0 || pad > block {
                return Err(StoreError::Unwrap(format!("bad pkcs7 pad length: {}", pad)));
            }
            if body[body.len() - pad..].iter().any(|&b| b != pad as u8) {
                return Err(StoreError::Unwrap("inconsistent pkcs7 padding".into()));
            }
            pad
        }
        PadScheme::AnsiX923 => {
            let pad = body[body.len() - 1] as usize;
            if pad == 0 || pad > block {
                return Err(StoreError::Unwrap(format!("bad x9.23 pad length: {}", pad)));
            }
            if body[body.len() - pad..body.len() - 1].iter().any(|&b| b != 0) {
                return Err(StoreError::Unwrap("inconsistent x9.23 padding".into()));
            }
            pad
        }
        PadScheme::Iso7816 => {
            let zeros = body.iter().rev().take_while(|&&b| b == 0).count();
            if zeros >= block || zeros + 1 > body.len() {
                return Err(StoreError::Unwrap("iso 7816-4 marker not found".into()));
            }
            if body[body.len() - zeros - 1] != 0x80 {
                return Err(StoreError::Unwrap("iso 7816-4 marker not found".into()));
            }
            zeros + 1
        }
    };

    Ok(body[..body.len() - pad].to_vec())
}
