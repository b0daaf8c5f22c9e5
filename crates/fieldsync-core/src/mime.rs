//! # MIME Type Derivation
//!
//! Maps the file type declared on a remote document record to a MIME type.
//!
//! The declared type is authoritative. Generic transports often report
//! `application/octet-stream` for PDFs, and a viewer handed that type
//! refuses to open the file.
//!
//! ## Resolution Order
//! ```text
//! declared "application/pdf"  ──► used as-is (already a MIME string)
//! declared "PDF" / ".pdf"     ──► mime_guess ──► application/pdf
//! declared "" / unknown       ──► file name extension ──► mime_guess
//! nothing matched             ──► application/octet-stream
//! ```

/// Fallback when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Looks up the MIME type for a bare extension (`"pdf"`, `".PDF"`).
pub fn from_extension(extension: &str) -> Option<&'static str> {
    let ext = extension.trim().trim_start_matches('.');
    if ext.is_empty() {
        return None;
    }
    mime_guess::from_ext(ext).first_raw()
}

/// Looks up the MIME type from the extension of a file name or path.
pub fn from_file_name(file_name: &str) -> Option<&'static str> {
    mime_guess::from_path(file_name.trim()).first_raw()
}

/// Derives the MIME type for a cached document.
///
/// ## Arguments
/// * `declared_file_type` - Type from the remote document record; either a
///   kind (`"pdf"`) or a full MIME string (`"application/pdf"`)
/// * `file_name` - Used only when the declared type is empty or unknown
pub fn derive(declared_file_type: &str, file_name: &str) -> String {
    let declared = declared_file_type.trim();

    if declared.contains('/') {
        return declared.to_ascii_lowercase();
    }

    from_extension(declared)
        .or_else(|| from_file_name(file_name))
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_kind_wins_over_extension() {
        assert_eq!(derive("pdf", "brochure.bin"), "application/pdf");
        assert_eq!(derive("PDF", "brochure"), "application/pdf");
        assert_eq!(derive(".pdf", ""), "application/pdf");
    }

    #[test]
    fn test_full_mime_string_passes_through() {
        assert_eq!(derive("Application/PDF", "x.docx"), "application/pdf");
    }

    #[test]
    fn test_falls_back_to_file_name() {
        assert_eq!(derive("", "catalog.xlsx"), from_extension("xlsx").unwrap());
        assert_eq!(derive("unknown", "photo.JPG"), "image/jpeg");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(derive("", "README"), OCTET_STREAM);
        assert_eq!(derive("scan", "data.qqqz"), OCTET_STREAM);
    }
}
