//! Document Assembly - HTML Shell And Export Boundary
//!
//! Wraps processed report HTML with a title and inline styles, embeds the
//! logo as a base64 data URI, and normalizes damage-photo markup so the
//! print-dialog and direct-PDF paths render identically. Both export paths
//! must receive byte-identical assembled HTML.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Asset fetch failed: {0}")]
    Fetch(String),

    #[error("Asset decode failed: {0}")]
    Decode(String),
}

/// Resolves an opaque asset reference (photo or logo) to embeddable bytes.
///
/// `Ok(None)` means "use the reference as-is, no embedding". `Err` means the
/// asset could not be resolved; callers degrade per the fail-soft policy.
pub trait AssetResolver {
    fn resolve(&self, reference: &str) -> Result<Option<Vec<u8>>, AssetError>;
}

/// Resolver that never embeds; references pass through untouched.
pub struct PassthroughResolver;

impl AssetResolver for PassthroughResolver {
    fn resolve(&self, _reference: &str) -> Result<Option<Vec<u8>>, AssetError> {
        Ok(None)
    }
}

/// Bytes -> data URI, sniffing the handful of formats photos arrive in.
pub fn data_uri(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "application/octet-stream"
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime, encoded)
}

/// Inline style applied to every damage photo so both export paths lay the
/// image out the same way.
pub const DAMAGE_PHOTO_STYLE: &str = "width: 300px; height: 225px; object-fit: contain; \
border: 1px solid #e2e8f0; border-radius: 4px; background-color: #f8fafc; \
margin: 10px auto; display: block;";

/// Which external rendering path receives the assembled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    /// New browsing context + platform print dialog ("save as PDF").
    Print,
    /// Direct HTML rasterization to a downloadable PDF.
    Pdf,
}

/// Page geometry handed to the export backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSetup {
    pub format: PageFormat,
    pub orientation: Orientation,
    pub margin_mm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    A4,
    Letter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            format: PageFormat::A4,
            orientation: Orientation::Portrait,
            margin_mm: 15.0,
        }
    }
}

/// External rendering collaborator. Failures propagate whole; no partial
/// file is produced.
pub trait DocumentBackend {
    /// Which of the two rendering paths this backend implements.
    fn target(&self) -> ExportTarget;

    fn export(&self, html: &str, setup: &PageSetup) -> Result<Vec<u8>, AssetError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentOptions {
    pub title: String,
    /// Stylesheet rules merged into a single inline <style> block.
    pub styles: String,
    /// Asset reference for the company logo; inlined as base64 when set.
    pub logo_reference: Option<String>,
}

/// Produce the final self-contained HTML document.
///
/// Logo resolution failure leaves the reference untouched and records a
/// warning; the render itself never aborts for a missing logo.
pub fn assemble_document(
    body: &str,
    options: &DocumentOptions,
    resolver: &dyn AssetResolver,
    warnings: &mut Vec<String>,
) -> String {
    let mut body = normalize_damage_photos(body);

    if let Some(logo) = options.logo_reference.as_deref() {
        match resolver.resolve(logo) {
            Ok(Some(bytes)) => {
                let needle = format!(r#"src="{}""#, logo);
                let replacement = format!(r#"src="{}""#, data_uri(&bytes));
                body = body.replace(&needle, &replacement);
            }
            Ok(None) => {}
            Err(e) => warnings.push(format!("logo asset {}: {}", logo, e)),
        }
    }

    format!(
        "<!DOCTYPE html><html><head><title>{}</title>\
<style>@media print{{body{{-webkit-print-color-adjust:exact;}}}}</style>\
<style>{}</style></head><body>{}</body></html>",
        options.title, options.styles, body
    )
}

/// Give bare damage-photo tags the fixed inline style block.
fn normalize_damage_photos(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    loop {
        let Some(start) = rest.find("<img src=\"") else {
            out.push_str(rest);
            return out;
        };
        let tag_rest = &rest[start..];
        // Only rewrite the exact unstyled shape the loop stage emits.
        match tag_rest.find("\" alt=\"Damage Photo\">") {
            Some(end) if !tag_rest[..end].contains('>') => {
                out.push_str(&rest[..start + end + 20]);
                out.push_str(&format!(" style=\"{}\">", DAMAGE_PHOTO_STYLE));
                rest = &tag_rest[end + 21..];
            }
            _ => {
                out.push_str(&rest[..start + 10]);
                rest = &tag_rest[10..];
            }
        }
    }
}
