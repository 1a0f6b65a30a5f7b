//! QR card rendering for the `/generate` endpoint.

use std::io::Cursor;

use askama::Template;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use log::debug;
use qrcode::{Color, EcLevel, QrCode};
use thiserror::Error;

const TARGET_SIZE: u32 = 512;
const QUIET_ZONE_MODULES: u32 = 4;
const CORNER_RADIUS: u32 = 40;
const LABEL_HEIGHT: u32 = 70;
const CARD_PADDING: u32 = 15;
const LOGO_PAD: u32 = 8;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("content cannot be encoded as a QR code: {0}")]
    Encode(qrcode::types::QrError),
    #[error("failed to encode card image: {0}")]
    Png(#[from] image::ImageError),
    #[error("failed to render card markup: {0}")]
    Template(#[from] askama::Error),
}

#[derive(Template)]
#[template(path = "card.html")]
struct CardTemplate<'a> {
    encoded: String,
    label: &'a str,
}

/// Render `content` as a PNG card, with `logo` (PNG bytes) centred on the
/// code when it decodes.
pub fn render_card(content: &str, logo: Option<&[u8]>) -> Result<Vec<u8>, RenderError> {
    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::H)
        .map_err(RenderError::Encode)?;

    let mut qr = round_corners(&paint_modules(&code), CORNER_RADIUS);
    if let Some(bytes) = logo {
        match image::load_from_memory_with_format(bytes, ImageFormat::Png) {
            Ok(logo) => place_logo(&mut qr, &logo.to_rgba8()),
            Err(error) => debug!("Ignoring logo that failed to decode: {error}"),
        }
    }

    let card = compose_card(&qr);
    let mut png = Vec::new();
    card.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// HTML fragment the UI swaps into its output area.
pub fn card_fragment(png: &[u8], label: &str) -> Result<String, RenderError> {
    let template = CardTemplate {
        encoded: STANDARD.encode(png),
        label,
    };
    Ok(template.render()?)
}

fn paint_modules(code: &QrCode) -> RgbaImage {
    let modules = u32::try_from(code.width()).unwrap_or(u32::MAX / 2);
    let total = modules + 2 * QUIET_ZONE_MODULES;
    let scale = (TARGET_SIZE / total).max(1);
    let side = total * scale;
    let colors = code.to_colors();

    RgbaImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / scale, y / scale);
        let inside = (QUIET_ZONE_MODULES..QUIET_ZONE_MODULES + modules).contains(&mx)
            && (QUIET_ZONE_MODULES..QUIET_ZONE_MODULES + modules).contains(&my);
        if !inside {
            return WHITE;
        }
        let index = (my - QUIET_ZONE_MODULES) * modules + (mx - QUIET_ZONE_MODULES);
        match colors.get(index as usize) {
            Some(Color::Dark) => BLACK,
            _ => WHITE,
        }
    })
}

fn inside_rounded_rect(x: u32, y: u32, width: u32, height: u32, radius: u32) -> bool {
    let radius = radius.min(width / 2).min(height / 2);
    let (x, y) = (i64::from(x), i64::from(y));
    let (width, height, radius) = (i64::from(width), i64::from(height), i64::from(radius));

    if (radius..width - radius).contains(&x) || (radius..height - radius).contains(&y) {
        return true;
    }
    let dx = if x < radius {
        radius - x
    } else {
        x - (width - radius - 1)
    };
    let dy = if y < radius {
        radius - y
    } else {
        y - (height - radius - 1)
    };
    dx * dx + dy * dy <= radius * radius
}

fn round_corners(image: &RgbaImage, radius: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        if inside_rounded_rect(x, y, width, height, radius) {
            *image.get_pixel(x, y)
        } else {
            TRANSPARENT
        }
    })
}

fn place_logo(qr: &mut RgbaImage, logo: &RgbaImage) {
    let (logo_width, logo_height) = logo.dimensions();
    if logo_width == 0 || logo_height == 0 {
        return;
    }

    let width = (qr.width() / 5).max(1);
    let height = (u64::from(logo_height) * u64::from(width) / u64::from(logo_width)).max(1);
    let height = u32::try_from(height).unwrap_or(qr.height()).min(qr.height());
    let resized = imageops::resize(logo, width, height, FilterType::Lanczos3);

    let x = (qr.width() - width) / 2;
    let y = (qr.height() - height) / 2;
    let pad_x = x.saturating_sub(LOGO_PAD);
    let pad_y = y.saturating_sub(LOGO_PAD);
    let pad_right = (x + width + LOGO_PAD).min(qr.width());
    let pad_bottom = (y + height + LOGO_PAD).min(qr.height());
    for py in pad_y..pad_bottom {
        for px in pad_x..pad_right {
            qr.put_pixel(px, py, WHITE);
        }
    }

    imageops::overlay(qr, &resized, i64::from(x), i64::from(y));
}

fn compose_card(qr: &RgbaImage) -> RgbaImage {
    let width = qr.width() + 2 * CARD_PADDING;
    let height = qr.height() + LABEL_HEIGHT + 2 * CARD_PADDING;
    let mut card = RgbaImage::from_fn(width, height, |x, y| {
        if inside_rounded_rect(x, y, width, height, CORNER_RADIUS) {
            BLACK
        } else {
            TRANSPARENT
        }
    });
    imageops::overlay(
        &mut card,
        qr,
        i64::from(CARD_PADDING),
        i64::from(CARD_PADDING),
    );
    card
}
