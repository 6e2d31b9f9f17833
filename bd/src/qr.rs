//! QR render service
//!
//! Pure functions turning a login payload into something a human can scan:
//! an SVG image, a `data:` URL for browser observers, or unicode blocks for
//! a terminal.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use thiserror::Error;
use tracing::debug;

/// Minimum rendered image size in pixels
pub const QR_IMAGE_SIZE: u32 = 300;

/// Errors from QR rendering
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Payload cannot be encoded as a QR code: {0}")]
    Encode(String),
}

fn encode(payload: &str) -> Result<QrCode, RenderError> {
    QrCode::new(payload.as_bytes()).map_err(|e| RenderError::Encode(e.to_string()))
}

/// Render `payload` as a black-on-white SVG image
pub fn render_svg(payload: &str) -> Result<Vec<u8>, RenderError> {
    debug!(len = payload.len(), "render_svg: called");
    let image = encode(payload)?
        .render::<svg::Color>()
        .min_dimensions(QR_IMAGE_SIZE, QR_IMAGE_SIZE)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(image.into_bytes())
}

/// Render `payload` as a base64 `data:image/svg+xml` URL
pub fn render_data_url(payload: &str) -> Result<String, RenderError> {
    let svg = render_svg(payload)?;
    Ok(format!("data:image/svg+xml;base64,{}", BASE64_STANDARD.encode(svg)))
}

/// Render `payload` as unicode half-blocks for a terminal
pub fn render_terminal(payload: &str) -> Result<String, RenderError> {
    debug!(len = payload.len(), "render_terminal: called");
    // Inverted colours so the code reads correctly on dark terminals
    let text = encode(payload)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build();
    Ok(text)
}
