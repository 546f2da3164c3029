//! Calibration overlay: grid geometry and score region drawn onto a frame.
//!
//! Produces a PNG a human can eyeball to verify that the configured window
//! region, margins, and score readout rectangle actually line up with the
//! game's UI before committing to a recording or training session.

use crate::config::{Config, ScoreRegion, WindowRegion};
use crate::grid::GridMapper;
use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const GRID_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const SCORE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draw cell outlines, cell-center crosses, and the score region onto a
/// window-local frame.
pub fn draw_overlay(frame: &mut RgbImage, config: &Config) -> Result<()> {
    let mapper = GridMapper::new(config.window, config.grid)?;
    draw_grid(frame, &mapper, config.window);
    draw_score_region(frame, config.score_region);
    Ok(())
}

fn draw_grid(frame: &mut RgbImage, mapper: &GridMapper, window: WindowRegion) {
    for row in 0..mapper.rows() {
        for col in 0..mapper.cols() {
            // Cell centers come back in screen coordinates; the frame is
            // window-local
            let (sx, sy) = mapper.to_screen(row, col);
            let cx = sx - window.left;
            let cy = sy - window.top;

            let (nx, ny) = cell_outline_origin(mapper, window, row, col);
            let rect = Rect::at(nx, ny).of_size(cell_span(mapper).0, cell_span(mapper).1);
            draw_hollow_rect_mut(frame, rect, GRID_COLOR);
            draw_cross_mut(frame, CENTER_COLOR, cx, cy);
        }
    }
}

/// Top-left corner of a cell's outline, window-local.
fn cell_outline_origin(
    mapper: &GridMapper,
    window: WindowRegion,
    row: u32,
    col: u32,
) -> (i32, i32) {
    let (cx, cy) = mapper.to_screen(row, col);
    let (w, h) = cell_span(mapper);
    (
        cx - window.left - (w / 2) as i32,
        cy - window.top - (h / 2) as i32,
    )
}

fn cell_span(mapper: &GridMapper) -> (u32, u32) {
    (mapper.cell_width(), mapper.cell_height())
}

fn draw_score_region(frame: &mut RgbImage, region: ScoreRegion) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let rect = Rect::at(region.x as i32, region.y as i32).of_size(region.width, region.height);
    draw_hollow_rect_mut(frame, rect, SCORE_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSpec;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.window = WindowRegion {
            left: 0,
            top: 0,
            width: 1000,
            height: 800,
        };
        config.grid = GridSpec {
            rows: 10,
            cols: 10,
            margin_top: 0,
            margin_bottom: 0,
            margin_left: 0,
            margin_right: 0,
        };
        config.score_region = ScoreRegion {
            x: 700,
            y: 10,
            width: 150,
            height: 40,
        };
        config
    }

    #[test]
    fn test_overlay_marks_cell_centers() {
        let config = test_config();
        let mut frame = RgbImage::new(1000, 800);
        draw_overlay(&mut frame, &config).unwrap();

        // First and last cell centers get a cross
        assert_eq!(*frame.get_pixel(50, 40), CENTER_COLOR);
        assert_eq!(*frame.get_pixel(950, 760), CENTER_COLOR);
    }

    #[test]
    fn test_overlay_marks_score_region() {
        let config = test_config();
        let mut frame = RgbImage::new(1000, 800);
        draw_overlay(&mut frame, &config).unwrap();

        // Top-left corner of the score rectangle
        assert_eq!(*frame.get_pixel(700, 10), SCORE_COLOR);
    }

    #[test]
    fn test_overlay_rejects_bad_geometry() {
        let mut config = test_config();
        config.grid.rows = 0;
        let mut frame = RgbImage::new(1000, 800);
        assert!(draw_overlay(&mut frame, &config).is_err());
    }
}
