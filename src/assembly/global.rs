use crate::assembly::buffers::{CellValues, FaceValues};
use crate::assembly::local::LocalOperator;
use crate::assembly::AssemblyError;
use crate::constraints::AffineConstraints;
use crate::space::FunctionSpace;
use crate::Real;
use gridfem_optimize::newton::NonlinearFunction;
use log::trace;
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct GridOperatorWorkspace<T: Real> {
    cell_values: CellValues<T>,
    face_values: FaceValues<T>,
    x_local: DVector<T>,
    r_local: DVector<T>,
    jacobian_local: DMatrix<T>,
    /// For every local DOF, the global DOFs and weights it contributes to.
    transformed: Vec<Vec<(usize, T)>>,
}

impl<T: Real> Default for GridOperatorWorkspace<T> {
    fn default() -> Self {
        Self {
            cell_values: CellValues::default(),
            face_values: FaceValues::default(),
            x_local: DVector::zeros(0),
            r_local: DVector::zeros(0),
            jacobian_local: DMatrix::zeros(0, 0),
            transformed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PatternCache {
    space_id: u64,
    constraints_id: u64,
    pattern: SparsityPattern,
}

/// Global DOFs (and weights) a contribution to `dof` is distributed to.
fn transform_dof<T: Real>(constraints: &AffineConstraints<T>, dof: usize, out: &mut Vec<(usize, T)>) {
    out.clear();
    match constraints.relation(dof) {
        Some(relation) => out.extend_from_slice(&relation.masters),
        None => out.push((dof, T::one())),
    }
}

/// Adds `value` to the entry `(row, col)` of a CSR matrix.
fn add_to_csr<T: Real>(matrix: &mut CsrMatrix<T>, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
    let mut csr_row = matrix.row_mut(row);
    let (cols, values) = csr_row.cols_and_values_mut();
    let idx = cols
        .binary_search(&col)
        .map_err(|_| AssemblyError::PatternMismatch { row, col })?;
    values[idx] += value;
    Ok(())
}

/// Assembles residuals and Jacobians of a local operator over all cells of a function space,
/// subject to affine constraints.
///
/// Local contributions are transformed with the constraint matrix `W` (`Wᵀ r` for residuals,
/// `Wᵀ J W` for Jacobians), so contributions to constrained DOFs are redistributed to their
/// masters. Constrained rows are closed afterwards: zero in the residual, identity rows in the
/// Jacobian.
#[derive(Debug)]
pub struct GridOperator<T: Real, L> {
    space: Arc<FunctionSpace<T>>,
    constraints: Arc<AffineConstraints<T>>,
    local_operator: L,
    // Buffers that prevent unnecessary allocations across assemblies
    workspace: RefCell<GridOperatorWorkspace<T>>,
    pattern_cache: RefCell<Option<PatternCache>>,
}

impl<T: Real, L: LocalOperator<T>> GridOperator<T, L> {
    pub fn new(
        space: Arc<FunctionSpace<T>>,
        constraints: Arc<AffineConstraints<T>>,
        local_operator: L,
    ) -> Result<Self, AssemblyError> {
        if constraints.num_dofs() != space.num_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                expected: space.num_dofs(),
                actual: constraints.num_dofs(),
            });
        }
        Ok(Self {
            space,
            constraints,
            local_operator,
            workspace: RefCell::new(GridOperatorWorkspace::default()),
            pattern_cache: RefCell::new(None),
        })
    }

    pub fn space(&self) -> &Arc<FunctionSpace<T>> {
        &self.space
    }

    pub fn constraints(&self) -> &Arc<AffineConstraints<T>> {
        &self.constraints
    }

    /// Replaces the constraints. The sparsity pattern is recomputed on next use if the
    /// constraint structure changed.
    pub fn set_constraints(&mut self, constraints: Arc<AffineConstraints<T>>) -> Result<(), AssemblyError> {
        if constraints.num_dofs() != self.space.num_dofs() {
            return Err(AssemblyError::DimensionMismatch {
                expected: self.space.num_dofs(),
                actual: constraints.num_dofs(),
            });
        }
        self.constraints = constraints;
        Ok(())
    }

    pub fn local_operator(&self) -> &L {
        &self.local_operator
    }

    pub fn local_operator_mut(&mut self) -> &mut L {
        &mut self.local_operator
    }

    pub fn num_dofs(&self) -> usize {
        self.space.num_dofs()
    }

    pub fn set_time(&mut self, time: T) {
        self.local_operator.set_time(time);
    }

    /// Overwrites the constrained DOFs of `x` with the values given by their relations.
    pub fn backtransform(&self, x: &mut DVector<T>) {
        self.constraints.backtransform(x);
    }

    fn check_vector(&self, len: usize) -> Result<(), AssemblyError> {
        if len == self.num_dofs() {
            Ok(())
        } else {
            Err(AssemblyError::DimensionMismatch {
                expected: self.num_dofs(),
                actual: len,
            })
        }
    }

    fn compute_pattern(&self) -> Result<SparsityPattern, AssemblyError> {
        // Collecting into a BTreeSet stores each entry exactly once
        let n = self.num_dofs();
        let mut entries: BTreeSet<(usize, usize)> = (0..n).map(|i| (i, i)).collect();
        let mut transformed = Vec::new();
        let mut cell_globals = Vec::new();
        for cell in 0..self.space.num_cells() {
            cell_globals.clear();
            for &dof in self.space.cell_dofs(cell) {
                transform_dof(&self.constraints, dof, &mut transformed);
                cell_globals.extend(transformed.iter().map(|&(global, _)| global));
            }
            cell_globals.sort_unstable();
            cell_globals.dedup();
            for &i in &cell_globals {
                for &j in &cell_globals {
                    entries.insert((i, j));
                }
            }
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut column_indices = Vec::with_capacity(entries.len());
        offsets.push(0);
        for (i, j) in entries {
            // Every row has at least its diagonal entry, so rows are never skipped
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
        }
        while offsets.len() < n + 1 {
            offsets.push(column_indices.len());
        }

        SparsityPattern::try_from_offsets_and_indices(n, n, offsets, column_indices)
            .map_err(|err| AssemblyError::InvalidPattern(err.to_string()))
    }

    /// Sparsity pattern of the constrained Jacobian, cached per (space, constraints) pair.
    pub fn sparsity_pattern(&self) -> Result<SparsityPattern, AssemblyError> {
        let mut cache = self.pattern_cache.borrow_mut();
        if let Some(cached) = cache.as_ref() {
            if cached.space_id == self.space.id() && cached.constraints_id == self.constraints.id() {
                return Ok(cached.pattern.clone());
            }
        }

        let pattern = self.compute_pattern()?;
        trace!(
            "Computed sparsity pattern: {} DOFs, {} non-zeros",
            self.num_dofs(),
            pattern.nnz()
        );
        *cache = Some(PatternCache {
            space_id: self.space.id(),
            constraints_id: self.constraints.id(),
            pattern: pattern.clone(),
        });
        Ok(pattern)
    }

    /// A zero matrix with the sparsity pattern of the Jacobian.
    pub fn create_jacobian(&self) -> Result<CsrMatrix<T>, AssemblyError> {
        let pattern = self.sparsity_pattern()?;
        let nnz = pattern.nnz();
        CsrMatrix::try_from_pattern_and_values(pattern, vec![T::zero(); nnz])
            .map_err(|err| AssemblyError::InvalidPattern(err.to_string()))
    }

    /// Evaluates the constrained residual at `x`.
    pub fn residual(&self, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), AssemblyError> {
        self.check_vector(r.len())?;
        r.fill(T::zero());
        self.accumulate_residual(x, r, T::one())?;
        self.close_residual(r);
        Ok(())
    }

    /// Assembles the constrained Jacobian at `x` into a matrix with a compatible pattern.
    pub fn jacobian(&self, x: &DVector<T>, jacobian: &mut CsrMatrix<T>) -> Result<(), AssemblyError> {
        self.check_vector(jacobian.nrows())?;
        self.check_vector(jacobian.ncols())?;
        jacobian.values_mut().fill(T::zero());
        self.accumulate_jacobian(x, jacobian, T::one())?;
        self.close_jacobian(jacobian)
    }

    /// Adds `scale` times the transformed residual contributions to `r` without closing
    /// constrained rows.
    pub fn accumulate_residual(&self, x: &DVector<T>, r: &mut DVector<T>, scale: T) -> Result<(), AssemblyError> {
        self.check_vector(x.len())?;
        self.check_vector(r.len())?;
        let ws = &mut *self.workspace.borrow_mut();
        let order = self.local_operator.quadrature_order();
        let mut transformed = Vec::new();

        for cell in 0..self.space.num_cells() {
            let dofs = self.space.cell_dofs(cell);
            ws.cell_values.populate(&self.space, cell, order)?;
            gather(x, dofs, &mut ws.x_local);
            ws.r_local.resize_vertically_mut(dofs.len(), T::zero());
            ws.r_local.fill(T::zero());
            self.local_operator
                .volume_residual(
                    &ws.cell_values,
                    DVectorView::from(&ws.x_local),
                    DVectorViewMut::from(&mut ws.r_local),
                )
                .map_err(|report| AssemblyError::LocalOperator { cell, report })?;
            self.scatter_vector(dofs, &ws.r_local, r, scale, &mut transformed);
        }

        if self.local_operator.uses_boundary_terms() {
            for face in self.space.view().boundary_faces() {
                let dofs = self.space.cell_dofs(face.cell);
                ws.face_values.populate(&self.space, face, order)?;
                gather(x, dofs, &mut ws.x_local);
                ws.r_local.resize_vertically_mut(dofs.len(), T::zero());
                ws.r_local.fill(T::zero());
                self.local_operator
                    .boundary_residual(
                        &ws.face_values,
                        DVectorView::from(&ws.x_local),
                        DVectorViewMut::from(&mut ws.r_local),
                    )
                    .map_err(|report| AssemblyError::Boundary {
                        cell: face.cell,
                        edge: face.local_edge,
                        report,
                    })?;
                self.scatter_vector(dofs, &ws.r_local, r, scale, &mut transformed);
            }
        }
        Ok(())
    }

    /// Adds `scale` times the transformed Jacobian contributions to `jacobian` without closing
    /// constrained rows.
    pub fn accumulate_jacobian(
        &self,
        x: &DVector<T>,
        jacobian: &mut CsrMatrix<T>,
        scale: T,
    ) -> Result<(), AssemblyError> {
        self.check_vector(x.len())?;
        let ws = &mut *self.workspace.borrow_mut();
        let order = self.local_operator.quadrature_order();

        for cell in 0..self.space.num_cells() {
            let dofs = self.space.cell_dofs(cell);
            ws.cell_values.populate(&self.space, cell, order)?;
            gather(x, dofs, &mut ws.x_local);
            ws.jacobian_local
                .resize_mut(dofs.len(), dofs.len(), T::zero());
            ws.jacobian_local.fill(T::zero());
            self.local_operator
                .volume_jacobian(
                    &ws.cell_values,
                    DVectorView::from(&ws.x_local),
                    DMatrixViewMut::from(&mut ws.jacobian_local),
                )
                .map_err(|report| AssemblyError::LocalOperator { cell, report })?;
            self.scatter_matrix(dofs, &ws.jacobian_local, jacobian, scale, &mut ws.transformed)?;
        }

        if self.local_operator.uses_boundary_terms() {
            for face in self.space.view().boundary_faces() {
                let dofs = self.space.cell_dofs(face.cell);
                ws.face_values.populate(&self.space, face, order)?;
                gather(x, dofs, &mut ws.x_local);
                ws.jacobian_local
                    .resize_mut(dofs.len(), dofs.len(), T::zero());
                ws.jacobian_local.fill(T::zero());
                self.local_operator
                    .boundary_jacobian(
                        &ws.face_values,
                        DVectorView::from(&ws.x_local),
                        DMatrixViewMut::from(&mut ws.jacobian_local),
                    )
                    .map_err(|report| AssemblyError::Boundary {
                        cell: face.cell,
                        edge: face.local_edge,
                        report,
                    })?;
                self.scatter_matrix(dofs, &ws.jacobian_local, jacobian, scale, &mut ws.transformed)?;
            }
        }
        Ok(())
    }

    fn scatter_vector(
        &self,
        dofs: &[usize],
        r_local: &DVector<T>,
        r: &mut DVector<T>,
        scale: T,
        transformed: &mut Vec<(usize, T)>,
    ) {
        for (&dof, &r_i) in dofs.iter().zip(r_local.iter()) {
            transform_dof(&self.constraints, dof, transformed);
            for &(global, weight) in transformed.iter() {
                r[global] += scale * weight * r_i;
            }
        }
    }

    fn scatter_matrix(
        &self,
        dofs: &[usize],
        jacobian_local: &DMatrix<T>,
        jacobian: &mut CsrMatrix<T>,
        scale: T,
        transformed: &mut Vec<Vec<(usize, T)>>,
    ) -> Result<(), AssemblyError> {
        transformed.resize_with(dofs.len(), Vec::new);
        for (&dof, targets) in dofs.iter().zip(transformed.iter_mut()) {
            transform_dof(&self.constraints, dof, targets);
        }

        for (i, row_targets) in transformed.iter().enumerate() {
            for (j, col_targets) in transformed.iter().enumerate() {
                let a_ij = jacobian_local[(i, j)];
                if a_ij == T::zero() {
                    continue;
                }
                for &(row, w_row) in row_targets {
                    for &(col, w_col) in col_targets {
                        add_to_csr(jacobian, row, col, scale * w_row * w_col * a_ij)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sets the constrained rows of a residual to zero.
    pub fn close_residual(&self, r: &mut DVector<T>) {
        self.constraints.set_constrained_dofs(r, T::zero());
    }

    /// Replaces the constrained rows of a Jacobian by identity rows.
    pub fn close_jacobian(&self, jacobian: &mut CsrMatrix<T>) -> Result<(), AssemblyError> {
        for &dof in self.constraints.constrained_dofs() {
            let mut row = jacobian.row_mut(dof);
            let (cols, values) = row.cols_and_values_mut();
            let mut has_diagonal = false;
            for (&col, value) in cols.iter().zip(values.iter_mut()) {
                if col == dof {
                    *value = T::one();
                    has_diagonal = true;
                } else {
                    *value = T::zero();
                }
            }
            if !has_diagonal {
                return Err(AssemblyError::PatternMismatch { row: dof, col: dof });
            }
        }
        Ok(())
    }
}

fn gather<T: Real>(x: &DVector<T>, dofs: &[usize], x_local: &mut DVector<T>) {
    x_local.resize_vertically_mut(dofs.len(), T::zero());
    for (x_i, &dof) in x_local.iter_mut().zip(dofs) {
        *x_i = x[dof];
    }
}

impl<T: Real, L: LocalOperator<T>> NonlinearFunction<T> for GridOperator<T, L> {
    type Error = AssemblyError;

    fn dimension(&self) -> usize {
        self.num_dofs()
    }

    fn residual(&mut self, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), Self::Error> {
        GridOperator::residual(self, x, r)
    }

    fn create_jacobian(&mut self) -> Result<CsrMatrix<T>, Self::Error> {
        GridOperator::create_jacobian(self)
    }

    fn jacobian(&mut self, x: &DVector<T>, jacobian: &mut CsrMatrix<T>) -> Result<(), Self::Error> {
        GridOperator::jacobian(self, x, jacobian)
    }

    fn constrain_iterate(&mut self, x: &mut DVector<T>) {
        self.constraints.backtransform(x);
    }

    fn constrain_update(&mut self, dx: &mut DVector<T>) {
        self.constraints.distribute_homogeneous(dx);
    }
}
