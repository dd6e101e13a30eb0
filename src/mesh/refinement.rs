//! Red refinement of single cells.
use super::{sorted_pair, AdaptiveGrid, CellType, GridCell};
use crate::Real;
use nalgebra::{center, convert};

impl<T: Real> AdaptiveGrid<T> {
    /// Returns the vertex at the midpoint of the edge `(a, b)`, creating it if necessary.
    fn midpoint_vertex(&mut self, a: usize, b: usize) -> usize {
        let key = sorted_pair(a, b);
        if let Some(&m) = self.midpoints.get(&key) {
            return m;
        }
        let m = self.vertices.len();
        self.vertices
            .push(center(&self.vertices[a], &self.vertices[b]));
        self.midpoints.insert(key, m);
        m
    }

    /// Splits a leaf cell into four children of the same type.
    ///
    /// Triangles are split into three corner triangles and one interior triangle, quadrilaterals
    /// into four quadrilaterals sharing a new centre vertex. Children preserve the orientation
    /// of the parent.
    pub(super) fn refine_cell(&mut self, cell: usize) {
        debug_assert!(self.cells[cell].is_leaf());
        let cell_type = self.cells[cell].cell_type;
        let v = self.cells[cell].vertices.clone();
        let level = self.cells[cell].level + 1;

        let children_vertices = match cell_type {
            CellType::Triangle => {
                let m01 = self.midpoint_vertex(v[0], v[1]);
                let m12 = self.midpoint_vertex(v[1], v[2]);
                let m20 = self.midpoint_vertex(v[2], v[0]);
                vec![
                    vec![v[0], m01, m20],
                    vec![m01, v[1], m12],
                    vec![m20, m12, v[2]],
                    vec![m01, m12, m20],
                ]
            }
            CellType::Quadrilateral => {
                let m01 = self.midpoint_vertex(v[0], v[1]);
                let m12 = self.midpoint_vertex(v[1], v[2]);
                let m23 = self.midpoint_vertex(v[2], v[3]);
                let m30 = self.midpoint_vertex(v[3], v[0]);
                let c = self.vertices.len();
                let centre = self.vertices[v[0]].coords
                    + self.vertices[v[1]].coords
                    + self.vertices[v[2]].coords
                    + self.vertices[v[3]].coords;
                self.vertices.push((centre * convert::<f64, T>(0.25)).into());
                vec![
                    vec![v[0], m01, c, m30],
                    vec![m01, v[1], m12, c],
                    vec![c, m12, v[2], m23],
                    vec![m30, c, m23, v[3]],
                ]
            }
        };

        let first_child = self.cells.len();
        for vertices in children_vertices {
            self.cells.push(GridCell {
                cell_type,
                vertices,
                level,
                parent: Some(cell),
                children: Vec::new(),
                marked: false,
            });
        }
        let parent = &mut self.cells[cell];
        parent.children = (first_child..first_child + 4).collect();
        parent.marked = false;
    }
}
