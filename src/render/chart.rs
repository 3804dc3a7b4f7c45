//! PNG charts for case-count series
//!
//! Axes and data only; no text is drawn.

use crate::error::SragResult;
use crate::storage::ensure_parent;
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 500;
const MARGIN: u32 = 40;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);
const BAR: Rgb<u8> = Rgb([44, 160, 44]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
}

/// Draw `values` as a chart and save it as PNG at `path`
///
/// An empty series yields a chart with axes only.
pub fn save_chart(path: &Path, kind: ChartKind, values: &[u64]) -> SragResult<()> {
    let img = draw(kind, values);
    ensure_parent(path)?;
    img.save_with_format(path, ImageFormat::Png)?;
    tracing::info!(path = %path.display(), points = values.len(), "Saved chart");
    Ok(())
}

fn draw(kind: ChartKind, values: &[u64]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let plot = PlotArea::new();

    for step in 1..=4 {
        let y = plot.bottom - (plot.height() * step / 4);
        draw_line(&mut img, (plot.left, y), (plot.right, y), GRID);
    }
    draw_line(&mut img, (plot.left, plot.bottom), (plot.right, plot.bottom), AXIS);
    draw_line(&mut img, (plot.left, plot.top), (plot.left, plot.bottom), AXIS);

    if values.is_empty() {
        return img;
    }

    let max = values.iter().copied().max().unwrap_or(0).max(1);
    match kind {
        ChartKind::Line => {
            let points: Vec<(u32, u32)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (plot.x_center(i, values.len()), plot.y_for(*v, max)))
                .collect();
            for pair in points.windows(2) {
                draw_thick_line(&mut img, pair[0], pair[1], LINE);
            }
            for &(x, y) in &points {
                fill_rect(&mut img, x.saturating_sub(2), y.saturating_sub(2), x + 2, y + 2, LINE);
            }
        }
        ChartKind::Bar => {
            let slot = plot.width() / values.len() as u32;
            let half = (slot * 3 / 8).max(1);
            for (i, v) in values.iter().enumerate() {
                let x = plot.x_center(i, values.len());
                let y = plot.y_for(*v, max);
                fill_rect(&mut img, x.saturating_sub(half), y, x + half, plot.bottom - 1, BAR);
            }
        }
    }

    img
}

struct PlotArea {
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
}

impl PlotArea {
    fn new() -> Self {
        Self {
            left: MARGIN,
            right: WIDTH - MARGIN,
            top: MARGIN,
            bottom: HEIGHT - MARGIN,
        }
    }

    fn width(&self) -> u32 {
        self.right - self.left
    }

    fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Horizontal center of slot `i` out of `n`
    fn x_center(&self, i: usize, n: usize) -> u32 {
        let slot = self.width() as f64 / n as f64;
        self.left + (slot * (i as f64 + 0.5)) as u32
    }

    fn y_for(&self, value: u64, max: u64) -> u32 {
        let scaled = (value as f64 / max as f64) * self.height() as f64;
        self.bottom - scaled.round() as u32
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

// Bresenham
fn draw_line(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let (mut x0, mut y0) = (from.0 as i64, from.1 as i64);
    let (x1, y1) = (to.0 as i64, to.1 as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_thick_line(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    draw_line(img, from, to, color);
    draw_line(img, (from.0, from.1 + 1), (to.0, to.1 + 1), color);
    draw_line(img, (from.0, from.1.saturating_sub(1)), (to.0, to.1.saturating_sub(1)), color);
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    for y in y0..=y1 {
        for x in x0..=x1 {
            put(img, x as i64, y as i64, color);
        }
    }
}
