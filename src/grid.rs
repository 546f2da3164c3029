//! Mapping between discrete grid cells and screen pixel coordinates.
//!
//! Pure and stateless given a window region and grid spec. Integer floor
//! arithmetic throughout: click targets must be bit-for-bit reproducible
//! between the environment and any recorded data.

use crate::config::{ConfigError, GridSpec, WindowRegion};

/// Bidirectional cell-index <-> screen-point mapper.
#[derive(Debug, Clone, Copy)]
pub struct GridMapper {
    window: WindowRegion,
    rows: u32,
    cols: u32,
    margin_left: u32,
    margin_top: u32,
    cell_width: u32,
    cell_height: u32,
}

impl GridMapper {
    pub fn new(window: WindowRegion, grid: GridSpec) -> Result<Self, ConfigError> {
        if grid.rows == 0 || grid.cols == 0 {
            return Err(ConfigError::EmptyGrid {
                rows: grid.rows,
                cols: grid.cols,
            });
        }
        let usable_w = window
            .width
            .saturating_sub(grid.margin_left.saturating_add(grid.margin_right));
        let usable_h = window
            .height
            .saturating_sub(grid.margin_top.saturating_add(grid.margin_bottom));
        let cell_width = usable_w / grid.cols;
        let cell_height = usable_h / grid.rows;
        if cell_width == 0 || cell_height == 0 {
            return Err(ConfigError::DegenerateCells {
                width: window.width,
                height: window.height,
                rows: grid.rows,
                cols: grid.cols,
            });
        }
        Ok(Self {
            window,
            rows: grid.rows,
            cols: grid.cols,
            margin_left: grid.margin_left,
            margin_top: grid.margin_top,
            cell_width,
            cell_height,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Total number of cells (and of grid-click actions).
    pub fn cell_count(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    /// Flat index -> (row, col). Row-major, zero-based.
    pub fn cell_to_rc(&self, index: u32) -> (u32, u32) {
        (index / self.cols, index % self.cols)
    }

    /// (row, col) -> flat index.
    pub fn rc_to_cell(&self, row: u32, col: u32) -> u32 {
        row * self.cols + col
    }

    /// Screen pixel at the center of a cell.
    pub fn to_screen(&self, row: u32, col: u32) -> (i32, i32) {
        let x = self.window.left
            + (self.margin_left + col * self.cell_width + self.cell_width / 2) as i32;
        let y = self.window.top
            + (self.margin_top + row * self.cell_height + self.cell_height / 2) as i32;
        (x, y)
    }

    /// Screen pixel -> (row, col), clamped to the nearest valid edge cell.
    ///
    /// Human clicks may land in the margins or slightly outside the window;
    /// the recorder still wants the nearest cell rather than an error.
    pub fn to_cell(&self, x: i32, y: i32) -> (u32, u32) {
        let rel_x = x - self.window.left - self.margin_left as i32;
        let rel_y = y - self.window.top - self.margin_top as i32;
        let col = (rel_x.div_euclid(self.cell_width as i32)).clamp(0, self.cols as i32 - 1);
        let row = (rel_y.div_euclid(self.cell_height as i32)).clamp(0, self.rows as i32 - 1);
        (row as u32, col as u32)
    }
}
