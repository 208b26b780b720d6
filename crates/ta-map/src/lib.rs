//! # ta-map
//!
//! The cosmetic treasure-map renderer. Given a list of `(row, col)`
//! coordinate pairs it draws a 120×60 character chart of an island and
//! marks each treasure with a symbol chosen by a fixed position hash.
//!
//! The service consumes this crate as a single side function: directory
//! entries whose names parse as `"<row>,<col>"` become treasures, and the
//! rendered text is written out verbatim. Nothing here touches the wire
//! protocol or session state.

use std::fs;
use std::io;
use std::path::Path;

/// Chart width in cells.
pub const WIDTH: usize = 120;
/// Chart height in cells (one output line per row).
pub const HEIGHT: usize = 60;

const SYMBOLS_LAND: [char; 3] = ['X', '$', '💰'];
const SYMBOLS_WATER: [char; 4] = ['X', '$', '🚣', '⛵'];

/// A single treasure position on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Treasure {
    pub row: u32,
    pub col: u32,
}

impl Treasure {
    /// Parses a `"<row>,<col>"` name into a treasure.
    ///
    /// Strict: exactly two decimal fields joined by one comma, nothing else.
    pub fn parse(name: &str) -> Option<Self> {
        let (row, col) = name.split_once(',')?;
        Some(Treasure {
            row: row.parse().ok()?,
            col: col.parse().ok()?,
        })
    }
}

/// Marker symbol for a treasure, picked from the land or water table by a
/// fixed position hash so the same coordinates always render the same.
fn symbol(treasure: Treasure, water: bool) -> char {
    let table: &[char] = if water { &SYMBOLS_WATER } else { &SYMBOLS_LAND };
    let h = (treasure.row ^ '‰' as u32)
        .wrapping_mul(12345)
        .wrapping_add((treasure.col ^ '‽' as u32).wrapping_mul(1337))
        .wrapping_add(u32::from(water) * '~' as u32);
    table[h as usize % table.len()]
}

/// Whether the cell at `(row, col)` is part of the island.
///
/// The coastline is a closed curve over centred, normalised coordinates:
/// `h = 1 − (x²·1.5 + y²·2) + cos(−13a)/13 + cos(5a + 6)/5` with
/// `a = atan2(y, x)`; land wherever `h ≥ 0`.
fn is_land(row: usize, col: usize) -> bool {
    let y = (row as f64 - (HEIGHT / 2) as f64) / (HEIGHT / 2) as f64;
    let x = (col as f64 - (WIDTH / 2) as f64) / (WIDTH / 2) as f64;
    let a = y.atan2(x);
    let h = 1.0 - (x * x * 1.5 + y * y * 2.0) + (-13.0 * a).cos() / 13.0 + (5.0 * a + 6.0).cos() / 5.0;
    h >= 0.0
}

/// Renders the chart with the given treasures marked.
///
/// Treasures outside the 120×60 grid are skipped. The result is UTF-8 text,
/// [`HEIGHT`] lines of [`WIDTH`] cells, each line newline-terminated.
pub fn render(treasures: &[Treasure]) -> String {
    let mut grid = [[' '; WIDTH]; HEIGHT];
    let mut island = [[false; WIDTH]; HEIGHT];

    for (i, grid_row) in grid.iter_mut().enumerate() {
        for (j, cell) in grid_row.iter_mut().enumerate() {
            island[i][j] = is_land(i, j);
            *cell = if island[i][j] { '#' } else { '~' };
        }
    }

    for &t in treasures {
        let (row, col) = (t.row as usize, t.col as usize);
        if row >= HEIGHT || col >= WIDTH {
            continue;
        }
        grid[row][col] = symbol(t, !island[row][col]);
    }

    let mut out = String::with_capacity(HEIGHT * (WIDTH + 1));
    for grid_row in &grid {
        out.extend(grid_row.iter());
        out.push('\n');
    }
    out
}

/// Collects the treasures recorded in `dir`: every directory entry whose
/// file name parses as `"<row>,<col>"`, sorted by name.
pub fn scan_treasures(dir: &Path) -> io::Result<Vec<Treasure>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| Treasure::parse(name).is_some())
        .collect();
    names.sort();
    Ok(names
        .iter()
        .filter_map(|name| Treasure::parse(name))
        .collect())
}

/// Scans `dir` for treasure entries and renders the chart in one step.
pub fn render_dir(dir: &Path) -> io::Result<String> {
    let treasures = scan_treasures(dir)?;
    Ok(render(&treasures))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
