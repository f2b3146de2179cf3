//! Annotated-frame rendering.
//!
//! Draws the cashier zone, person boxes coloured by role, hand markers and
//! wrist distance lines onto a copy of the raw frame. The same module
//! burns the event banner into clip frames and thumbnails.

use crate::backend::{HandSide, PoseResult};
use common::{CashierZone, Detection, EventKind, Frame};

const ZONE_COLOR: [u8; 3] = [0, 255, 255]; // yellow
const CASHIER_COLOR: [u8; 3] = [0, 255, 0]; // green
const CUSTOMER_COLOR: [u8; 3] = [0, 165, 255]; // orange
const HAND_COLOR: [u8; 3] = [255, 0, 255]; // magenta
const LINE_VALID: [u8; 3] = [0, 255, 0];
const LINE_IGNORED: [u8; 3] = [128, 128, 128];
const LINE_FAR: [u8; 3] = [0, 0, 255];
const BANNER_BG: [u8; 3] = [0, 0, 0];

/// Render the per-frame overlay onto a copy of the raw frame.
pub fn render(
    frame: &Frame,
    poses: &[PoseResult],
    zone: &CashierZone,
    pose_confidence: f32,
    hand_touch_distance: u32,
    detections: &[Detection],
) -> Frame {
    let mut out = frame.clone();

    draw_zone(&mut out, zone);

    struct Marker {
        hands: Vec<(f32, f32)>,
        in_zone: bool,
    }
    let mut markers = Vec::with_capacity(poses.len());

    for pose in poses {
        let center = pose.center(pose_confidence);
        let in_zone = zone.contains(center.0, center.1);
        let color = if in_zone { CASHIER_COLOR } else { CUSTOMER_COLOR };

        draw_rect(
            &mut out,
            pose.bbox.x1 as i64,
            pose.bbox.y1 as i64,
            pose.bbox.x2 as i64,
            pose.bbox.y2 as i64,
            color,
            2,
        );
        fill_circle(&mut out, center.0 as i64, center.1 as i64, 6, color);

        let mut hands = Vec::new();
        for side in [HandSide::Left, HandSide::Right] {
            if let Some((x, y, _)) = pose.wrist(side, pose_confidence) {
                fill_circle(&mut out, x as i64, y as i64, 5, HAND_COLOR);
                hands.push((x, y));
            }
        }
        markers.push(Marker { hands, in_zone });
    }

    // Wrist-to-wrist distance lines between people, coloured by validity.
    for i in 0..markers.len() {
        for j in (i + 1)..markers.len() {
            let valid_pair = markers[i].in_zone != markers[j].in_zone;
            for &(x1, y1) in &markers[i].hands {
                for &(x2, y2) in &markers[j].hands {
                    let distance = ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt();
                    let close = distance < hand_touch_distance as f32;
                    let color = match (close, valid_pair) {
                        (true, true) => LINE_VALID,
                        (true, false) => LINE_IGNORED,
                        (false, _) => LINE_FAR,
                    };
                    draw_line(
                        &mut out, x1 as i64, y1 as i64, x2 as i64, y2 as i64, color,
                    );
                }
            }
        }
    }

    for detection in detections {
        let color = detection.kind.banner_color();
        draw_rect(
            &mut out,
            detection.bbox.x1 as i64,
            detection.bbox.y1 as i64,
            detection.bbox.x2 as i64,
            detection.bbox.y2 as i64,
            color,
            3,
        );
    }

    out
}

/// Burn the event label banner into the top-left corner of a frame.
pub fn draw_banner(frame: &mut Frame, kind: EventKind) {
    let label = match kind {
        EventKind::Cash => "CASH DETECTED",
        EventKind::Violence => "VIOLENCE DETECTED",
        EventKind::Fire => "FIRE DETECTED",
    };
    let scale = 2;
    let width = (label.len() as i64) * 6 * scale + 10;
    fill_rect(frame, 10, 10, 10 + width, 45, BANNER_BG);
    draw_text(frame, 15, 17, label, kind.banner_color(), scale);
}

fn draw_zone(frame: &mut Frame, zone: &CashierZone) {
    match zone {
        CashierZone::Rect {
            x,
            y,
            width,
            height,
        } => {
            draw_rect(
                frame,
                *x as i64,
                *y as i64,
                (x + width) as i64,
                (y + height) as i64,
                ZONE_COLOR,
                2,
            );
        }
        CashierZone::Polygon { points } => {
            for i in 0..points.len() {
                let a = points[i];
                let b = points[(i + 1) % points.len()];
                draw_line(
                    frame, a[0] as i64, a[1] as i64, b[0] as i64, b[1] as i64, ZONE_COLOR,
                );
            }
        }
    }
}

pub fn fill_rect(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    for y in y1.max(0)..y2.min(frame.height() as i64) {
        for x in x1.max(0)..x2.min(frame.width() as i64) {
            frame.put_pixel(x as u32, y as u32, color);
        }
    }
}

pub fn draw_rect(
    frame: &mut Frame,
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
    color: [u8; 3],
    thickness: i64,
) {
    fill_rect(frame, x1, y1, x2, y1 + thickness, color);
    fill_rect(frame, x1, y2 - thickness, x2, y2, color);
    fill_rect(frame, x1, y1, x1 + thickness, y2, color);
    fill_rect(frame, x2 - thickness, y1, x2, y2, color);
}

pub fn draw_line(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    // Bresenham.
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x1, y1);
    loop {
        if x >= 0 && y >= 0 && (x as u32) < frame.width() && (y as u32) < frame.height() {
            frame.put_pixel(x as u32, y as u32, color);
        }
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn fill_circle(frame: &mut Frame, cx: i64, cy: i64, radius: i64, color: [u8; 3]) {
    for y in (cy - radius)..=(cy + radius) {
        for x in (cx - radius)..=(cx + radius) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= radius.pow(2)
                && x >= 0
                && y >= 0
                && (x as u32) < frame.width()
                && (y as u32) < frame.height()
            {
                frame.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// 5x7 bitmap glyphs for the banner alphabet.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}

pub fn draw_text(frame: &mut Frame, x: i64, y: i64, text: &str, color: [u8; 3], scale: i64) {
    let mut cursor = x;
    for c in text.chars() {
        if let Some(rows) = glyph(c.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5 {
                    if bits & (0x10 >> col) != 0 {
                        fill_rect(
                            frame,
                            cursor + col as i64 * scale,
                            y + row as i64 * scale,
                            cursor + (col as i64 + 1) * scale,
                            y + (row as i64 + 1) * scale,
                            color,
                        );
                    }
                }
            }
        }
        cursor += 6 * scale;
    }
}
