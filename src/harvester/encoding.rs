//! Decoding of delivered text files of unknown encoding

use encoding_rs::GBK;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode `bytes` trying UTF-8, then GBK, then Latin-1
///
/// The GBK decoder accepts the full GB18030 range, so GB2312 and GB18030
/// listings decode through it as well. Latin-1 maps every byte and never fails.
/// Returns the text and the name of the encoding that succeeded.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "UTF-8");
    }

    if let Some(text) = GBK.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), GBK.name());
    }

    (bytes.iter().map(|&b| char::from(b)).collect(), "ISO-8859-1")
}
