//! On-frame annotation.
//!
//! Paints the boundary line, one box per evaluated object (green above the
//! line, red below it), the running counters and a "BOUNDARY CROSSED!" banner
//! onto an RGB24 buffer. Text uses a built-in 3x5 bitmap font. Drawing needs
//! the `snapshots` feature; the overlay model itself is always available.

#[cfg(feature = "snapshots")]
use anyhow::{anyhow, Result};
#[cfg(feature = "snapshots")]
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
#[cfg(feature = "snapshots")]
use imageproc::rect::Rect;

use crate::detect::BoundingBox;
use crate::monitor::{FrameReport, Side};

pub type Rgb = [u8; 3];

pub const BOUNDARY_COLOR: Rgb = [255, 0, 0];
pub const SAFE_COLOR: Rgb = [0, 255, 0];
pub const RESTRICTED_COLOR: Rgb = [255, 0, 0];
#[cfg(feature = "snapshots")]
const COUNT_COLOR: Rgb = [255, 255, 255];
#[cfg(feature = "snapshots")]
const ALERT_COUNT_COLOR: Rgb = [255, 255, 0];

#[cfg(feature = "snapshots")]
const BOUNDARY_THICKNESS: u32 = 4;
#[cfg(feature = "snapshots")]
const BOX_THICKNESS: u32 = 3;
#[cfg(feature = "snapshots")]
const MARGIN: u32 = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub bbox: BoundingBox,
    pub color: Rgb,
    pub identity: Option<u64>,
}

/// What to draw for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub boundary_y: f32,
    pub boxes: Vec<OverlayBox>,
    /// Any crossing into the restricted zone this frame, reported or not.
    pub crossed: bool,
    pub object_count: usize,
    /// Alerts raised so far in the session.
    pub alert_count: usize,
}

impl Overlay {
    pub fn from_report(report: &FrameReport, boundary_y: f32, alert_count: usize) -> Self {
        let boxes = report
            .objects
            .iter()
            .map(|obj| OverlayBox {
                bbox: obj.bbox,
                color: match obj.side {
                    Side::Restricted => RESTRICTED_COLOR,
                    Side::Safe | Side::OnLine => SAFE_COLOR,
                },
                identity: obj.identity,
            })
            .collect();
        Self {
            boundary_y,
            boxes,
            crossed: report.crossed(),
            object_count: report.object_count,
            alert_count,
        }
    }

    /// Text lines in drawing order, for logs and headless runs.
    pub fn captions(&self) -> Vec<String> {
        let mut lines = vec![
            format!("CATTLE: {}", self.object_count),
            format!("ALERTS: {}", self.alert_count),
        ];
        if self.crossed {
            lines.push("BOUNDARY CROSSED!".to_string());
        }
        lines
    }
}

/// Paint `overlay` onto an RGB24 frame in place.
#[cfg(feature = "snapshots")]
pub fn draw_overlay(pixels: &mut [u8], width: u32, height: u32, overlay: &Overlay) -> Result<()> {
    let expected = (width as usize) * (height as usize) * 3;
    if pixels.len() != expected {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected,
            pixels.len()
        ));
    }
    if width == 0 || height == 0 {
        return Ok(());
    }
    let mut frame: FrameView<'_> = image::ImageBuffer::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", width, height))?;
    let scale = (height / 160).max(1);

    let line_y = overlay.boundary_y.max(0.0) as u32;
    if line_y < height {
        let top = line_y.saturating_sub(BOUNDARY_THICKNESS / 2);
        draw_filled_rect_mut(
            &mut frame,
            Rect::at(0, top as i32).of_size(width, BOUNDARY_THICKNESS),
            image::Rgb(BOUNDARY_COLOR),
        );
        draw_label(&mut frame, MARGIN, line_y + MARGIN / 2, "RESTRICTED AREA", scale, BOUNDARY_COLOR);
    }

    for item in &overlay.boxes {
        draw_box(&mut frame, &item.bbox, BOX_THICKNESS, item.color);
    }

    let captions = overlay.captions();
    let colors = [COUNT_COLOR, ALERT_COUNT_COLOR, RESTRICTED_COLOR];
    for (row, (caption, color)) in captions.iter().zip(colors).enumerate() {
        let y = MARGIN + row as u32 * 8 * scale;
        let text_scale = if row == 2 { scale * 2 } else { scale };
        draw_label(&mut frame, MARGIN, y, caption, text_scale, color);
    }
    Ok(())
}

#[cfg(feature = "snapshots")]
type FrameView<'a> = image::ImageBuffer<image::Rgb<u8>, &'a mut [u8]>;

/// Hollow box clamped to the frame, `thickness` pixels wide inward.
#[cfg(feature = "snapshots")]
fn draw_box(frame: &mut FrameView<'_>, bbox: &BoundingBox, thickness: u32, color: Rgb) {
    let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32) as u32;
    let x0 = clamp(bbox.x1, frame.width());
    let x1 = clamp(bbox.x2, frame.width());
    let y0 = clamp(bbox.y1, frame.height());
    let y1 = clamp(bbox.y2, frame.height());
    for inset in 0..thickness {
        let w = (x1 - x0.min(x1)).saturating_sub(2 * inset);
        let h = (y1 - y0.min(y1)).saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((x0 + inset) as i32, (y0 + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, image::Rgb(color));
    }
}

/// Bitmap text; every lit glyph cell becomes a `scale` x `scale` block.
#[cfg(feature = "snapshots")]
fn draw_label(frame: &mut FrameView<'_>, x: u32, y: u32, text: &str, scale: u32, color: Rgb) {
    let advance = 4 * scale;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..3u32 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as u32 * scale;
                let cell = Rect::at(px as i32, py as i32).of_size(scale, scale);
                draw_filled_rect_mut(frame, cell, image::Rgb(color));
            }
        }
    }
}

#[cfg(feature = "snapshots")]
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'N' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => [0; 5],
    }
}

/// Write an RGB24 frame as JPEG.
#[cfg(feature = "snapshots")]
pub fn save_snapshot(
    path: &std::path::Path,
    pixels: &[u8],
    width: u32,
    height: u32,
) -> Result<()> {
    image::save_buffer_with_format(
        path,
        pixels,
        width,
        height,
        image::ExtendedColorType::Rgb8,
        image::ImageFormat::Jpeg,
    )
    .map_err(|e| anyhow!("failed to write snapshot {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ObservedObject;

    #[cfg(feature = "snapshots")]
    fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> Rgb {
        let offset = ((y * width + x) * 3) as usize;
        [pixels[offset], pixels[offset + 1], pixels[offset + 2]]
    }

    fn report_with(side: Side) -> FrameReport {
        FrameReport {
            object_count: 1,
            objects: vec![ObservedObject {
                identity: Some(1),
                bbox: BoundingBox::new(100.0, 120.0, 140.0, 150.0),
                side,
            }],
            ..FrameReport::default()
        }
    }

    #[test]
    fn boxes_are_colored_by_side() {
        let safe = Overlay::from_report(&report_with(Side::Safe), 200.0, 0);
        assert_eq!(safe.boxes[0].color, SAFE_COLOR);
        let below = Overlay::from_report(&report_with(Side::Restricted), 200.0, 0);
        assert_eq!(below.boxes[0].color, RESTRICTED_COLOR);
        assert!(!below.crossed);
    }

    #[cfg(feature = "snapshots")]
    #[test]
    fn boundary_and_box_are_painted() -> Result<()> {
        let (w, h) = (320u32, 240u32);
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        let overlay = Overlay::from_report(&report_with(Side::Safe), 200.0, 2);
        draw_overlay(&mut pixels, w, h, &overlay)?;

        assert_eq!(pixel(&pixels, w, 300, 200), BOUNDARY_COLOR);
        assert_eq!(pixel(&pixels, w, 100, 135), SAFE_COLOR);
        assert_eq!(pixel(&pixels, w, 102, 135), SAFE_COLOR);
        assert_eq!(pixel(&pixels, w, 103, 135), [0, 0, 0]);
        assert_eq!(pixel(&pixels, w, 120, 135), [0, 0, 0]);
        Ok(())
    }

    #[cfg(feature = "snapshots")]
    #[test]
    fn out_of_frame_geometry_is_clipped() -> Result<()> {
        let (w, h) = (64u32, 48u32);
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        let mut overlay = Overlay::from_report(&report_with(Side::Restricted), 500.0, 0);
        overlay.boxes[0].bbox = BoundingBox::new(-20.0, 40.0, 90.0, 70.0);
        draw_overlay(&mut pixels, w, h, &overlay)?;
        assert_eq!(pixel(&pixels, w, 0, 45), RESTRICTED_COLOR);
        Ok(())
    }

    #[cfg(feature = "snapshots")]
    #[test]
    fn wrong_buffer_size_is_rejected() {
        let overlay = Overlay::from_report(&FrameReport::default(), 10.0, 0);
        assert!(draw_overlay(&mut [0u8; 10], 4, 4, &overlay).is_err());
    }

    #[test]
    fn captions_include_banner_only_when_crossed() {
        let mut overlay = Overlay::from_report(&FrameReport::default(), 10.0, 3);
        assert_eq!(overlay.captions(), vec!["CATTLE: 0", "ALERTS: 3"]);
        overlay.crossed = true;
        assert_eq!(overlay.captions().len(), 3);
    }
}
