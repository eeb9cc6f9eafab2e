use geo::{Intersects, Polygon};

use crate::geo_core::BoundingBox;

/// Square grid covering a bounding box with roughly `target_cells` cells
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub cols: usize,
    pub rows: usize,
}

impl Grid {
    /// Cell size from the bounds area; rows overshoot so the top edge is covered.
    pub fn covering(bounds: &BoundingBox, target_cells: usize) -> Grid {
        let target = target_cells.max(1);
        let area = bounds.width() * bounds.height();
        let cell_size = (area / target as f64).sqrt();
        let cols = if cell_size > 0.0 {
            ((bounds.width() / cell_size).floor() as usize).max(1)
        } else {
            1
        };
        Grid {
            origin_x: bounds.min_x,
            origin_y: bounds.min_y,
            cell_size,
            cols,
            rows: target / cols + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell(&self, col: usize, row: usize) -> Polygon<f64> {
        BoundingBox::new(
            self.origin_x + col as f64 * self.cell_size,
            self.origin_y + row as f64 * self.cell_size,
            self.origin_x + (col + 1) as f64 * self.cell_size,
            self.origin_y + (row + 1) as f64 * self.cell_size,
        )
        .to_polygon()
    }

    /// Cells in column-major order
    pub fn cells(&self) -> Vec<Polygon<f64>> {
        (0..self.cols)
            .flat_map(|col| (0..self.rows).map(move |row| self.cell(col, row)))
            .collect()
    }

    /// Sum `values` over every cell each geometry intersects
    pub fn aggregate<'a, G>(&self, items: impl IntoIterator<Item = (&'a G, f64)>) -> Vec<f64>
    where
        G: Intersects<Polygon<f64>> + 'a,
    {
        let cells = self.cells();
        let mut totals = vec![0.0; cells.len()];
        for (geometry, value) in items {
            for (total, cell) in totals.iter_mut().zip(&cells) {
                if geometry.intersects(cell) {
                    *total += value;
                }
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Point};

    #[test]
    fn test_grid_shape() {
        let grid = Grid::covering(&BoundingBox::new(0.0, 0.0, 400.0, 200.0), 800);
        assert!((grid.cell_size - 10.0).abs() < 1e-9);
        assert_eq!(grid.cols, 40);
        assert_eq!(grid.rows, 21);
        assert_eq!(grid.cells().len(), 840);
    }

    #[test]
    fn test_degenerate_bounds() {
        let grid = Grid::covering(&BoundingBox::new(5.0, 5.0, 5.0, 5.0), 800);
        assert_eq!(grid.cols, 1);
        assert_eq!(grid.rows, 801);
    }

    #[test]
    fn test_column_major_and_aggregate() {
        let grid = Grid::covering(&BoundingBox::new(0.0, 0.0, 20.0, 20.0), 4);
        assert_eq!((grid.cols, grid.rows), (2, 3));
        let cells = grid.cells();
        assert_eq!(cells[1], grid.cell(0, 1));

        let inside: Geometry<f64> = Point::new(5.0, 5.0).into();
        let corner: Geometry<f64> = Point::new(10.0, 10.0).into();
        let totals = grid.aggregate([(&inside, 3.0), (&corner, 2.0)]);
        assert_eq!(totals[0], 5.0);
        assert_eq!(totals[1], 2.0);
        assert_eq!(totals[3], 2.0);
        assert_eq!(totals[4], 2.0);
        assert_eq!(totals[2], 0.0);
    }
}
