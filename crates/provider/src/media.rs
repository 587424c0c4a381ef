use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

/// An inline-media part split out of a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub base64_payload: String,
}

/// Splits a `data:<mime>;base64,<payload>` URI into its halves. Returns
/// `None` for anything that is not a well-formed base64 data URI.
pub fn split_data_uri(src: &str) -> Option<InlineImage> {
    let rest = src.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;

    if mime_type.is_empty() || payload.is_empty() {
        return None;
    }

    Some(InlineImage {
        mime_type: mime_type.to_string(),
        base64_payload: payload.to_string(),
    })
}

/// Whether an attachment may be forwarded to a remote tier: an image data
/// URI whose payload actually decodes.
pub fn is_forwardable_image(src: &str) -> bool {
    let Some(inline) = split_data_uri(src) else {
        return false;
    };
    inline.mime_type.starts_with("image/")
        && BASE64_STANDARD.decode(inline.base64_payload.as_bytes()).is_ok()
}
