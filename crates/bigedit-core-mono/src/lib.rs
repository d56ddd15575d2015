//! `bigedit-core-mono` - Deterministic fixed-cell shaper for `bigedit-core`.
//!
//! This crate implements the core's [`Shaper`] interface for hosts whose
//! glyphs sit on a fixed cell grid (terminals, tests). Grapheme clusters
//! come from UAX #29 segmentation and advances from UAX #11 widths: a
//! cluster occupies `width` cells (CJK and emoji are two cells wide, and a
//! cluster never collapses to zero so the caret can always enter it).
//!
//! It is intentionally not a real text shaper: no ligatures, no bidi, no
//! font metrics. GUI hosts should adapt their shaping engine instead.

use bigedit_core::Shaper;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Fixed-cell shaper. `cell_width` is the width of one terminal cell in
/// the host's coordinate units; zooming is a swap to a different width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonoShaper {
    cell_width: f32,
}

impl MonoShaper {
    /// A shaper whose cell is `cell_width` units wide.
    pub fn new(cell_width: f32) -> Self {
        Self { cell_width }
    }

    /// The configured cell width.
    pub fn cell_width(&self) -> f32 {
        self.cell_width
    }

    /// Cells occupied by one grapheme cluster (at least one).
    fn cluster_cells(cluster: &str) -> usize {
        UnicodeWidthStr::width(cluster).max(1)
    }

    /// Advance of one cluster in coordinate units.
    fn cluster_advance(&self, cluster: &str) -> f32 {
        Self::cluster_cells(cluster) as f32 * self.cell_width
    }
}

impl Default for MonoShaper {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Shaper for MonoShaper {
    fn x_in_line(&self, line: &str, byte_offset: usize) -> f32 {
        let offset = byte_offset.min(line.len());
        let mut x = 0.0f32;
        for (start, cluster) in line.grapheme_indices(true) {
            if start >= offset {
                break;
            }
            x += self.cluster_advance(cluster);
        }
        x
    }

    fn offset_in_line_from_x(&self, line: &str, x: f32) -> usize {
        let mut acc = 0.0f32;
        for (start, cluster) in line.grapheme_indices(true) {
            let advance = self.cluster_advance(cluster);
            // Snap to the nearer cluster edge.
            if x < acc + advance * 0.5 {
                return start;
            }
            acc += advance;
        }
        line.len()
    }

    fn grapheme_step(&self, line: &str, byte_offset: usize, forward: bool) -> usize {
        let mut offset = byte_offset.min(line.len());
        while offset > 0 && !line.is_char_boundary(offset) {
            offset -= 1;
        }
        if forward {
            line[offset..]
                .grapheme_indices(true)
                .nth(1)
                .map(|(next, _)| offset + next)
                .unwrap_or(line.len())
        } else {
            line[..offset]
                .grapheme_indices(true)
                .last()
                .map(|(start, _)| start)
                .unwrap_or(0)
        }
    }

    fn reference_cell_width(&self) -> f32 {
        self.cell_width
    }
}
