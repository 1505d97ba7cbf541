use crate::db::core::BoardDB;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as ImageRect;
use std::path::Path;

const LAYER_COLORS: [Rgba<u8>; 6] = [
    // Top copper: red
    Rgba([230, 40, 60, 200]),
    // Bottom copper: blue
    Rgba([30, 110, 255, 200]),
    Rgba([0, 220, 100, 190]),
    Rgba([255, 200, 0, 190]),
    Rgba([180, 50, 255, 190]),
    Rgba([0, 230, 240, 190]),
];

/// Renders pads, zone fills, traces and vias, layer by layer, into a PNG.
pub fn draw_routed_board(db: &BoardDB, filename: &Path, width: u32) -> image::ImageResult<()> {
    let board_w = db.outline.width();
    let board_h = db.outline.height();
    if board_w <= 0.0 || board_h <= 0.0 {
        return Ok(());
    }
    let scale = width as f64 / board_w;
    let height = ((board_h * scale).ceil() as u32).max(1);
    let mut img = RgbaImage::from_pixel(width, height, Rgba([10, 30, 15, 255]));

    let map = |x: f64, y: f64| {
        (
            ((x - db.outline.min.x) * scale) as f32,
            (height as f64 - (y - db.outline.min.y) * scale) as f32,
        )
    };
    let color_of = |layer: u8| LAYER_COLORS[(layer as usize).min(LAYER_COLORS.len() - 1)];

    // Bottom layers first so the top layer stays readable.
    for layer in (0..db.num_layers() as u8).rev() {
        let zone_color = {
            let Rgba([r, g, b, _]) = color_of(layer);
            Rgba([r / 2, g / 2, b / 2, 255])
        };
        for zone in db.zones.iter().filter(|z| z.layer == layer) {
            let Some(fill) = &zone.fill else { continue };
            for run in &fill.runs {
                let (x0, y1) = map(run.min.x, run.min.y);
                let w = (run.width() * scale).max(1.0) as u32;
                let h = (run.height() * scale).max(1.0) as u32;
                let rect = ImageRect::at(x0 as i32, (y1 - h as f32) as i32).of_size(w, h);
                draw_filled_rect_mut(&mut img, rect, zone_color);
            }
        }

        let routed = db.nets.iter().flat_map(|n| n.segments.iter());
        for seg in db
            .fixed_segments
            .iter()
            .chain(routed)
            .filter(|s| s.layer == layer)
        {
            let (x1, y1) = map(seg.p1.x, seg.p1.y);
            let (x2, y2) = map(seg.p2.x, seg.p2.y);
            let color = color_of(layer);
            let half = ((seg.width * scale / 2.0) as i32).max(0);
            // Thick strokes as a fan of offset lines plus round caps.
            for off in -half..=half {
                let o = off as f32;
                if (x2 - x1).abs() >= (y2 - y1).abs() {
                    draw_line_segment_mut(&mut img, (x1, y1 + o), (x2, y2 + o), color);
                } else {
                    draw_line_segment_mut(&mut img, (x1 + o, y1), (x2 + o, y2), color);
                }
            }
            draw_filled_circle_mut(&mut img, (x1 as i32, y1 as i32), half, color);
            draw_filled_circle_mut(&mut img, (x2 as i32, y2 as i32), half, color);
        }
    }

    let pad_color = Rgba([200, 170, 60, 255]);
    for pad in &db.pads {
        let r = pad.rect();
        let (x0, y1) = map(r.min.x, r.min.y);
        let w = (r.width() * scale).max(2.0) as u32;
        let h = (r.height() * scale).max(2.0) as u32;
        let rect = ImageRect::at(x0 as i32, (y1 - h as f32) as i32).of_size(w, h);
        draw_filled_rect_mut(&mut img, rect, pad_color);
    }

    let via_color = Rgba([235, 235, 235, 255]);
    let drill_color = Rgba([10, 10, 10, 255]);
    let routed_vias = db.nets.iter().flat_map(|n| n.vias.iter());
    for via in db.fixed_vias.iter().chain(routed_vias) {
        let (x, y) = map(via.position.x, via.position.y);
        let outer = ((via.diameter * scale / 2.0) as i32).max(2);
        let inner = ((via.drill * scale / 2.0) as i32).max(1);
        draw_filled_circle_mut(&mut img, (x as i32, y as i32), outer, via_color);
        draw_filled_circle_mut(&mut img, (x as i32, y as i32), inner, drill_color);
    }

    img.save(filename)
}
