//! Early data carried in the `Sec-WebSocket-Protocol` header.
//!
//! Clients may smuggle the first frame (envelope plus initial payload) into
//! the upgrade request to save a round trip. The value is base64; both the
//! URL-safe and the standard alphabet are accepted, with or without padding.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;

const EARLY_DATA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the early-data header value, if any.
///
/// A missing or blank value yields `Ok(None)`.
pub fn decode_early_data(value: Option<&str>) -> Result<Option<Bytes>, base64::DecodeError> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    let normalized = value.replace('+', "-").replace('/', "_");
    let bytes = EARLY_DATA_ENGINE.decode(normalized)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(Bytes::from(bytes)))
}
