//! Affine DOF constraints.
//!
//! A constrained DOF `i` is not an unknown of the discrete problem. Its value is given by a
//! [`ConstraintRelation`]
//!
//! ```text
//! x[i] = offset + Σ_k weight_k * x[master_k]
//! ```
//!
//! Relations are collected in a [`ConstraintsBuilder`], typically by one or more
//! [`ConstraintPolicy`] implementations, and then resolved into [`AffineConstraints`], in which
//! every master is unconstrained. Dirichlet conditions are relations without masters, hanging
//! nodes are relations whose weights are the coarse-side basis functions evaluated at the
//! hanging DOF.
use crate::mesh::BoundaryFace;
use crate::space::{EntityKey, FunctionSpace};
use crate::Real;
use log::debug;
use nalgebra::{convert, DVector, Point2};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

mod hanging;

pub use hanging::*;

static NEXT_CONSTRAINTS_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    Dirichlet,
    HangingNode,
    User,
}

impl ConstraintKind {
    /// Relations of higher precedence replace relations of lower precedence on the same DOF.
    fn precedence(&self) -> u8 {
        match self {
            ConstraintKind::HangingNode => 0,
            ConstraintKind::User => 1,
            ConstraintKind::Dirichlet => 2,
        }
    }
}

/// Classification of a DOF with respect to a set of constraints.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DofClass {
    Free,
    Dirichlet,
    HangingNode,
    User,
}

impl From<ConstraintKind> for DofClass {
    fn from(kind: ConstraintKind) -> Self {
        match kind {
            ConstraintKind::Dirichlet => DofClass::Dirichlet,
            ConstraintKind::HangingNode => DofClass::HangingNode,
            ConstraintKind::User => DofClass::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRelation<T> {
    pub masters: Vec<(usize, T)>,
    pub offset: T,
    pub kind: ConstraintKind,
}

impl<T: Real> ConstraintRelation<T> {
    /// A Dirichlet relation. The offset is usually filled in later by
    /// [`AffineConstraints::set_dirichlet_values`].
    pub fn dirichlet(value: T) -> Self {
        Self {
            masters: Vec::new(),
            offset: value,
            kind: ConstraintKind::Dirichlet,
        }
    }

    pub fn hanging_node(masters: Vec<(usize, T)>) -> Self {
        Self {
            masters,
            offset: T::zero(),
            kind: ConstraintKind::HangingNode,
        }
    }

    pub fn user(masters: Vec<(usize, T)>, offset: T) -> Self {
        Self {
            masters,
            offset,
            kind: ConstraintKind::User,
        }
    }

    /// Value of the constrained DOF given the values of its masters in `x`.
    pub fn evaluate(&self, x: &DVector<T>) -> T {
        self.masters
            .iter()
            .fold(self.offset, |acc, &(master, weight)| acc + weight * x[master])
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainResolution {
    /// Constrained masters are substituted by their own relations, recursively.
    #[default]
    Flatten,
    /// Any relation with a constrained master is an error.
    Forbid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintResolutionError {
    #[error("DOF {dof} is out of bounds for {num_dofs} DOFs")]
    InvalidDof { dof: usize, num_dofs: usize },
    #[error("constraint relations form a cycle through DOF {dof}")]
    Cycle { dof: usize },
    #[error("DOF {dof} depends on DOF {master}, which is itself constrained")]
    TransitiveChain { dof: usize, master: usize },
    #[error("vector has length {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(
        "hanging-node isolation did not converge after {passes} passes, \
         {remaining} edges still carry more than one hanging node"
    )]
    IsolationDidNotConverge { passes: usize, remaining: usize },
}

/// Collects constraint relations before resolution.
#[derive(Debug, Clone)]
pub struct ConstraintsBuilder<T> {
    relations: Vec<Option<ConstraintRelation<T>>>,
}

impl<T: Real> ConstraintsBuilder<T> {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            relations: vec![None; num_dofs],
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.relations.len()
    }

    fn check_dof(&self, dof: usize) -> Result<(), ConstraintResolutionError> {
        if dof < self.num_dofs() {
            Ok(())
        } else {
            Err(ConstraintResolutionError::InvalidDof {
                dof,
                num_dofs: self.num_dofs(),
            })
        }
    }

    /// Adds a relation for `dof`.
    ///
    /// If `dof` already has a relation, the relation of higher precedence (Dirichlet, then user,
    /// then hanging node) is kept, independent of insertion order. Of two relations with the same
    /// precedence the first one is kept.
    pub fn add_relation(
        &mut self,
        dof: usize,
        relation: ConstraintRelation<T>,
    ) -> Result<(), ConstraintResolutionError> {
        self.check_dof(dof)?;
        for &(master, _) in &relation.masters {
            self.check_dof(master)?;
        }
        let slot = &mut self.relations[dof];
        let replace = match slot {
            Some(existing) => relation.kind.precedence() > existing.kind.precedence(),
            None => true,
        };
        if replace {
            *slot = Some(relation);
        }
        Ok(())
    }

    pub fn classify(&self, dof: usize) -> DofClass {
        match &self.relations[dof] {
            Some(relation) => relation.kind.into(),
            None => DofClass::Free,
        }
    }

    pub fn relation(&self, dof: usize) -> Option<&ConstraintRelation<T>> {
        self.relations[dof].as_ref()
    }

    /// Applies a policy to every leaf of `space`.
    pub fn apply(
        &mut self,
        space: &FunctionSpace<T>,
        policy: &impl ConstraintPolicy<T>,
    ) -> Result<(), ConstraintResolutionError> {
        for leaf in 0..space.num_leaves() {
            policy.add_constraints(space, leaf, self)?;
        }
        Ok(())
    }

    /// Applies a policy to the given leaves of `space` only.
    pub fn apply_to_leaves(
        &mut self,
        space: &FunctionSpace<T>,
        policy: &impl ConstraintPolicy<T>,
        leaves: &[usize],
    ) -> Result<(), ConstraintResolutionError> {
        for &leaf in leaves {
            policy.add_constraints(space, leaf, self)?;
        }
        Ok(())
    }

    /// Resolves the collected relations.
    pub fn build(self, resolution: ChainResolution) -> Result<AffineConstraints<T>, ConstraintResolutionError> {
        let resolved = resolve_relations(&self.relations, resolution)?;
        let constraints = AffineConstraints::from_parts(self.relations, resolved, resolution);
        debug!(
            "Resolved {} constraints on {} DOFs (constraints id {})",
            constraints.num_constrained(),
            constraints.num_dofs(),
            constraints.id()
        );
        Ok(constraints)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// Sorts masters by DOF, merges duplicates and drops zero weights.
fn normalize_masters<T: Real>(mut masters: Vec<(usize, T)>) -> Vec<(usize, T)> {
    masters.sort_by_key(|&(dof, _)| dof);
    let mut merged: Vec<(usize, T)> = Vec::with_capacity(masters.len());
    for (dof, weight) in masters {
        match merged.last_mut() {
            Some((last, last_weight)) if *last == dof => *last_weight += weight,
            _ => merged.push((dof, weight)),
        }
    }
    merged.retain(|&(_, weight)| weight != T::zero());
    merged
}

fn resolve_relations<T: Real>(
    relations: &[Option<ConstraintRelation<T>>],
    resolution: ChainResolution,
) -> Result<Vec<Option<ConstraintRelation<T>>>, ConstraintResolutionError> {
    let mut resolved: Vec<Option<ConstraintRelation<T>>> = vec![None; relations.len()];
    match resolution {
        ChainResolution::Forbid => {
            for (dof, relation) in relations.iter().enumerate() {
                if let Some(relation) = relation {
                    if let Some(&(master, _)) = relation
                        .masters
                        .iter()
                        .find(|(master, _)| relations[*master].is_some())
                    {
                        return Err(ConstraintResolutionError::TransitiveChain { dof, master });
                    }
                    resolved[dof] = Some(ConstraintRelation {
                        masters: normalize_masters(relation.masters.clone()),
                        ..relation.clone()
                    });
                }
            }
        }
        ChainResolution::Flatten => {
            let mut state = vec![VisitState::Unvisited; relations.len()];
            for dof in 0..relations.len() {
                flatten(dof, relations, &mut resolved, &mut state)?;
            }
        }
    }

    // Every master must be unconstrained after resolution
    for (dof, relation) in resolved.iter().enumerate() {
        if let Some(relation) = relation {
            if let Some(&(master, _)) = relation
                .masters
                .iter()
                .find(|(master, _)| resolved[*master].is_some())
            {
                return Err(ConstraintResolutionError::TransitiveChain { dof, master });
            }
        }
    }
    Ok(resolved)
}

fn flatten<T: Real>(
    dof: usize,
    relations: &[Option<ConstraintRelation<T>>],
    resolved: &mut [Option<ConstraintRelation<T>>],
    state: &mut [VisitState],
) -> Result<(), ConstraintResolutionError> {
    let relation = match &relations[dof] {
        Some(relation) => relation,
        None => return Ok(()),
    };
    match state[dof] {
        VisitState::Done => return Ok(()),
        VisitState::InProgress => return Err(ConstraintResolutionError::Cycle { dof }),
        VisitState::Unvisited => state[dof] = VisitState::InProgress,
    }

    let mut offset = relation.offset;
    let mut masters = Vec::with_capacity(relation.masters.len());
    for &(master, weight) in &relation.masters {
        if relations[master].is_some() {
            flatten(master, relations, resolved, state)?;
            if let Some(flat) = &resolved[master] {
                offset += weight * flat.offset;
                masters.extend(flat.masters.iter().map(|&(m, w)| (m, weight * w)));
            }
        } else {
            masters.push((master, weight));
        }
    }

    resolved[dof] = Some(ConstraintRelation {
        masters: normalize_masters(masters),
        offset,
        kind: relation.kind,
    });
    state[dof] = VisitState::Done;
    Ok(())
}

/// A resolved set of affine constraints on the DOFs of a space.
///
/// Every master of every relation is unconstrained, so applying the relations is idempotent
/// and independent of the order in which constrained DOFs are visited.
#[derive(Debug, Clone)]
pub struct AffineConstraints<T> {
    id: u64,
    resolution: ChainResolution,
    /// Relations as declared, kept to re-resolve after the Dirichlet values change.
    declared: Vec<Option<ConstraintRelation<T>>>,
    resolved: Vec<Option<ConstraintRelation<T>>>,
    constrained_dofs: Vec<usize>,
}

impl<T: Real> AffineConstraints<T> {
    fn from_parts(
        declared: Vec<Option<ConstraintRelation<T>>>,
        resolved: Vec<Option<ConstraintRelation<T>>>,
        resolution: ChainResolution,
    ) -> Self {
        let constrained_dofs = resolved
            .iter()
            .enumerate()
            .filter_map(|(dof, relation)| relation.as_ref().map(|_| dof))
            .collect();
        Self {
            id: NEXT_CONSTRAINTS_ID.fetch_add(1, Ordering::Relaxed),
            resolution,
            declared,
            resolved,
            constrained_dofs,
        }
    }

    /// Constraints without any constrained DOF.
    pub fn none(num_dofs: usize) -> Self {
        Self::from_parts(vec![None; num_dofs], vec![None; num_dofs], ChainResolution::default())
    }

    /// Collects the constraints of `policy` on all leaves of `space` and resolves them.
    pub fn from_policy(
        space: &FunctionSpace<T>,
        policy: &impl ConstraintPolicy<T>,
        resolution: ChainResolution,
    ) -> Result<Self, ConstraintResolutionError> {
        let mut builder = ConstraintsBuilder::new(space.num_dofs());
        builder.apply(space, policy)?;
        builder.build(resolution)
    }

    /// Unique identity of the constraint structure (the set of constrained DOFs and their masters).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_dofs(&self) -> usize {
        self.resolved.len()
    }

    pub fn num_constrained(&self) -> usize {
        self.constrained_dofs.len()
    }

    /// Constrained DOFs in increasing order.
    pub fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dofs
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.resolved[dof].is_some()
    }

    /// The resolved relation of a DOF, if it is constrained.
    pub fn relation(&self, dof: usize) -> Option<&ConstraintRelation<T>> {
        self.resolved[dof].as_ref()
    }

    pub fn classify(&self, dof: usize) -> DofClass {
        match &self.resolved[dof] {
            Some(relation) => relation.kind.into(),
            None => DofClass::Free,
        }
    }

    /// Overwrites every constrained DOF of `x` with `offset + Σ w x[m]`.
    pub fn backtransform(&self, x: &mut DVector<T>) {
        assert_eq!(x.len(), self.num_dofs());
        for &dof in &self.constrained_dofs {
            if let Some(relation) = &self.resolved[dof] {
                x[dof] = relation.evaluate(x);
            }
        }
    }

    /// Like [`backtransform`](Self::backtransform), but ignoring offsets. Used for updates.
    pub fn distribute_homogeneous(&self, dx: &mut DVector<T>) {
        assert_eq!(dx.len(), self.num_dofs());
        for &dof in &self.constrained_dofs {
            if let Some(relation) = &self.resolved[dof] {
                dx[dof] = relation
                    .masters
                    .iter()
                    .fold(T::zero(), |acc, &(master, weight)| acc + weight * dx[master]);
            }
        }
    }

    pub fn set_constrained_dofs(&self, x: &mut DVector<T>, value: T) {
        assert_eq!(x.len(), self.num_dofs());
        for &dof in &self.constrained_dofs {
            x[dof] = value;
        }
    }

    pub fn set_unconstrained_dofs(&self, x: &mut DVector<T>, value: T) {
        assert_eq!(x.len(), self.num_dofs());
        for (x_i, relation) in x.iter_mut().zip(&self.resolved) {
            if relation.is_none() {
                *x_i = value;
            }
        }
    }

    pub fn copy_constrained_dofs(&self, from: &DVector<T>, to: &mut DVector<T>) {
        assert_eq!(from.len(), self.num_dofs());
        assert_eq!(to.len(), self.num_dofs());
        for &dof in &self.constrained_dofs {
            to[dof] = from[dof];
        }
    }

    /// Takes the offsets of all Dirichlet relations from `values`, usually the interpolant of the
    /// boundary data, and resolves the relations again.
    pub fn set_dirichlet_values(&mut self, values: &DVector<T>) -> Result<(), ConstraintResolutionError> {
        if values.len() != self.num_dofs() {
            return Err(ConstraintResolutionError::DimensionMismatch {
                expected: self.num_dofs(),
                actual: values.len(),
            });
        }
        for (relation, &value) in self.declared.iter_mut().zip(values.iter()) {
            if let Some(relation) = relation {
                if relation.kind == ConstraintKind::Dirichlet {
                    relation.offset = value;
                }
            }
        }
        self.resolved = resolve_relations(&self.declared, self.resolution)?;
        Ok(())
    }
}

/// Produces constraint relations for one leaf of a function space.
pub trait ConstraintPolicy<T: Real> {
    fn add_constraints(
        &self,
        space: &FunctionSpace<T>,
        leaf: usize,
        builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError>;
}

impl<T: Real, P: ConstraintPolicy<T>> ConstraintPolicy<T> for &P {
    fn add_constraints(
        &self,
        space: &FunctionSpace<T>,
        leaf: usize,
        builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError> {
        (**self).add_constraints(space, leaf, builder)
    }
}

/// Decides which boundary faces carry Dirichlet conditions.
///
/// `s` is the edge-local coordinate in `[0, 1]` at which the face is classified.
pub trait BoundaryClassifier<T: Real> {
    fn is_dirichlet(&self, face: &BoundaryFace<T>, s: T) -> bool;
}

impl<T, F> BoundaryClassifier<T> for F
where
    T: Real,
    F: Fn(&BoundaryFace<T>, T) -> bool,
{
    fn is_dirichlet(&self, face: &BoundaryFace<T>, s: T) -> bool {
        self(face, s)
    }
}

/// Classifies boundary faces by the global coordinates of the classification point.
#[derive(Debug, Clone, Copy)]
pub struct GlobalBoundaryClassifier<F>(pub F);

impl<T, F> BoundaryClassifier<T> for GlobalBoundaryClassifier<F>
where
    T: Real,
    F: Fn(&Point2<T>) -> bool,
{
    fn is_dirichlet(&self, face: &BoundaryFace<T>, s: T) -> bool {
        (self.0)(&face.global(s))
    }
}

/// Classifies every boundary face as Dirichlet.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllDirichlet;

impl<T: Real> BoundaryClassifier<T> for AllDirichlet {
    fn is_dirichlet(&self, _face: &BoundaryFace<T>, _s: T) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraints;

impl<T: Real> ConstraintPolicy<T> for NoConstraints {
    fn add_constraints(
        &self,
        _space: &FunctionSpace<T>,
        _leaf: usize,
        _builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError> {
        Ok(())
    }
}

/// Constrains all DOFs on boundary faces classified as Dirichlet, with a zero offset.
///
/// Faces are classified at their centre.
#[derive(Debug, Clone, Copy)]
pub struct DirichletConstraints<B> {
    pub classifier: B,
}

impl<B> DirichletConstraints<B> {
    pub fn new(classifier: B) -> Self {
        Self { classifier }
    }
}

/// Global DOFs of `leaf` attached to a boundary face (its endpoints and the edge itself).
pub(crate) fn face_dofs<T: Real>(space: &FunctionSpace<T>, leaf: usize, face: &BoundaryFace<T>) -> Vec<usize> {
    let view = space.view();
    let cell = view.cell(face.cell);
    let [i, j] = cell.cell_type.edge_vertices(face.local_edge);
    let mut dofs = Vec::new();
    for entity in [
        EntityKey::Vertex(cell.vertices[i]),
        EntityKey::Vertex(cell.vertices[j]),
        EntityKey::Edge(face.edge),
    ] {
        dofs.extend(space.entity_dofs(leaf, entity));
    }
    dofs
}

fn add_dirichlet_constraints<T: Real>(
    space: &FunctionSpace<T>,
    leaf: usize,
    builder: &mut ConstraintsBuilder<T>,
    classifier: &impl BoundaryClassifier<T>,
) -> Result<(), ConstraintResolutionError> {
    let centre = convert(0.5);
    for face in space.view().boundary_faces() {
        if classifier.is_dirichlet(face, centre) {
            for dof in face_dofs(space, leaf, face) {
                builder.add_relation(dof, ConstraintRelation::dirichlet(T::zero()))?;
            }
        }
    }
    Ok(())
}

impl<T: Real, B: BoundaryClassifier<T>> ConstraintPolicy<T> for DirichletConstraints<B> {
    fn add_constraints(
        &self,
        space: &FunctionSpace<T>,
        leaf: usize,
        builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError> {
        add_dirichlet_constraints(space, leaf, builder, &self.classifier)
    }
}

/// Hanging-node constraints together with Dirichlet constraints.
///
/// Dirichlet relations take precedence where both apply.
#[derive(Debug, Clone, Copy)]
pub struct HangingNodeDirichletConstraints<B> {
    pub classifier: B,
}

impl<B> HangingNodeDirichletConstraints<B> {
    pub fn new(classifier: B) -> Self {
        Self { classifier }
    }
}

impl<T: Real, B: BoundaryClassifier<T>> ConstraintPolicy<T> for HangingNodeDirichletConstraints<B> {
    fn add_constraints(
        &self,
        space: &FunctionSpace<T>,
        leaf: usize,
        builder: &mut ConstraintsBuilder<T>,
    ) -> Result<(), ConstraintResolutionError> {
        HangingNodeConstraints.add_constraints(space, leaf, builder)?;
        add_dirichlet_constraints(space, leaf, builder, &self.classifier)
    }
}
