//! Per-thread finite-element scratch state.
//!
//! An [`AssemblyContext`] walks through
//! `Idle -> *Reinit -> Prepared -> [Cached] -> Scattered` for every element
//! visit. Any reinit drops the local residual and Jacobian blocks of the
//! previous visit; pending cached entries survive until they are scattered.
//!
//! Caching the same local blocks twice before scattering counts them twice.
//! Callers own that ordering.

use super::coupling::CouplingMatrix;
use crate::config::QuadratureConfig;
use crate::coupling_error::CouplingError;
use crate::fe::{FeValues, QuadratureRule};
use crate::mesh::Mesh;
use crate::system::{NumericVector, SparseMatrix, TaggedTensors, VarDofs};
use crate::tags::TagId;
use crate::topology::{CellType, PointId, SubdomainId};
use std::collections::{BTreeMap, HashMap};

/// Where an assembly context is in its per-element visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    ElementReinit,
    FaceReinit,
    NeighborReinit,
    NodeReinit,
    Prepared,
    Cached,
    Scattered,
}

/// Row/column placement of a local Jacobian block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    ElementElement,
    ElementNeighbor,
    NeighborElement,
    NeighborNeighbor,
    Nonlocal,
}

impl BlockKind {
    const NEIGHBOR: [BlockKind; 3] = [
        BlockKind::ElementNeighbor,
        BlockKind::NeighborElement,
        BlockKind::NeighborNeighbor,
    ];
}

/// Dense local Jacobian block, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DenseBlock {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
    scale: f64,
}

impl DenseBlock {
    fn new(rows: Vec<usize>, cols: Vec<usize>, scale: f64) -> Self {
        let values = vec![0.0; rows.len() * cols.len()];
        Self {
            rows,
            cols,
            values,
            scale,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.cols.len()
    }

    fn offset(&self, i: usize, j: usize) -> Result<usize, CouplingError> {
        let (n_rows, n_cols) = (self.rows.len(), self.cols.len());
        if i >= n_rows {
            return Err(CouplingError::DofOutOfRange { dof: i, n_dofs: n_rows });
        }
        if j >= n_cols {
            return Err(CouplingError::DofOutOfRange { dof: j, n_dofs: n_cols });
        }
        Ok(i * n_cols + j)
    }

    /// Entry at local row `i`, column `j`.
    pub fn get(&self, i: usize, j: usize) -> Result<f64, CouplingError> {
        Ok(self.values[self.offset(i, j)?])
    }

    pub fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), CouplingError> {
        let k = self.offset(i, j)?;
        self.values[k] += value;
        Ok(())
    }

    fn triplets_with(&self, rows: &[usize], cols: &[usize]) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.values.len());
        for (i, &r) in rows.iter().enumerate() {
            for (j, &c) in cols.iter().enumerate() {
                out.push((r, c, self.scale * self.values[i * cols.len() + j]));
            }
        }
        out
    }

    fn triplets(&self) -> Vec<(usize, usize, f64)> {
        self.triplets_with(&self.rows, &self.cols)
    }
}

/// Scratch state owned by exactly one worker thread.
#[derive(Debug)]
pub struct AssemblyContext {
    tid: usize,
    coupling: CouplingMatrix,
    volume_rules: HashMap<CellType, QuadratureRule>,
    face_rules: HashMap<CellType, QuadratureRule>,

    current_elem: Option<PointId>,
    current_cell: Option<CellType>,
    current_side: Option<usize>,
    current_subdomain: Option<SubdomainId>,
    current_neighbor: Option<PointId>,
    neighbor_side: Option<usize>,
    neighbor_subdomain: Option<SubdomainId>,
    current_node: Option<PointId>,
    fe_elem: Option<PointId>,

    fe: FeValues,
    fe_face: FeValues,
    fe_neighbor: FeValues,
    fe_node: FeValues,
    shapes: BTreeMap<usize, FeValues>,
    face_shapes: BTreeMap<usize, FeValues>,
    neighbor_shapes: BTreeMap<usize, FeValues>,

    elem_dofs: Vec<VarDofs>,
    neighbor_dofs: Vec<VarDofs>,
    nonlocal_dofs: Vec<VarDofs>,
    scalar_dofs: Vec<VarDofs>,

    residual: BTreeMap<(TagId, usize), Vec<f64>>,
    residual_neighbor: BTreeMap<(TagId, usize), Vec<f64>>,
    jacobian: BTreeMap<(TagId, BlockKind, usize, usize), DenseBlock>,
    jacobian_prepared: bool,

    cached_residual: BTreeMap<TagId, Vec<(usize, f64)>>,
    cached_jacobian: BTreeMap<TagId, Vec<(usize, usize, f64)>>,

    state: AssemblyState,
}

fn find(dofs: &[VarDofs], var: usize) -> Option<&VarDofs> {
    dofs.iter().find(|d| d.var == var)
}

fn upsert(dofs: &mut Vec<VarDofs>, entry: VarDofs) {
    match dofs.iter_mut().find(|d| d.var == entry.var) {
        Some(slot) => *slot = entry,
        None => dofs.push(entry),
    }
}

impl AssemblyContext {
    /// Context for worker `tid` with the rules named in `quadrature`.
    pub fn new(tid: usize, quadrature: &QuadratureConfig) -> Result<Self, CouplingError> {
        let mut ctx = Self {
            tid,
            coupling: CouplingMatrix::default(),
            volume_rules: HashMap::new(),
            face_rules: HashMap::new(),
            current_elem: None,
            current_cell: None,
            current_side: None,
            current_subdomain: None,
            current_neighbor: None,
            neighbor_side: None,
            neighbor_subdomain: None,
            current_node: None,
            fe_elem: None,
            fe: FeValues::default(),
            fe_face: FeValues::default(),
            fe_neighbor: FeValues::default(),
            fe_node: FeValues::default(),
            shapes: BTreeMap::new(),
            face_shapes: BTreeMap::new(),
            neighbor_shapes: BTreeMap::new(),
            elem_dofs: Vec::new(),
            neighbor_dofs: Vec::new(),
            nonlocal_dofs: Vec::new(),
            scalar_dofs: Vec::new(),
            residual: BTreeMap::new(),
            residual_neighbor: BTreeMap::new(),
            jacobian: BTreeMap::new(),
            jacobian_prepared: false,
            cached_residual: BTreeMap::new(),
            cached_jacobian: BTreeMap::new(),
            state: AssemblyState::Idle,
        };
        ctx.create_qrules(&quadrature.volume, &quadrature.face)?;
        Ok(ctx)
    }

    /// Install the variable coupling used to size Jacobian blocks.
    pub fn init(&mut self, coupling: CouplingMatrix) {
        self.coupling = coupling;
    }

    /// Build volume and face rules for every supported cell type.
    pub fn create_qrules(&mut self, volume: &str, face: &str) -> Result<(), CouplingError> {
        let mut volume_rules = HashMap::new();
        let mut face_rules = HashMap::new();
        for cell in [CellType::Segment, CellType::Triangle, CellType::Quadrilateral] {
            volume_rules.insert(cell, QuadratureRule::for_cell(volume, cell)?);
            face_rules.insert(cell, QuadratureRule::for_side(face, cell)?);
        }
        self.volume_rules = volume_rules;
        self.face_rules = face_rules;
        Ok(())
    }

    pub fn tid(&self) -> usize {
        self.tid
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn coupling(&self) -> &CouplingMatrix {
        &self.coupling
    }

    pub fn current_elem(&self) -> Option<PointId> {
        self.current_elem
    }

    pub fn current_side(&self) -> Option<usize> {
        self.current_side
    }

    pub fn current_subdomain(&self) -> Option<SubdomainId> {
        self.current_subdomain
    }

    pub fn current_neighbor(&self) -> Option<PointId> {
        self.current_neighbor
    }

    pub fn neighbor_side(&self) -> Option<usize> {
        self.neighbor_side
    }

    pub fn neighbor_subdomain(&self) -> Option<SubdomainId> {
        self.neighbor_subdomain
    }

    pub fn current_node(&self) -> Option<PointId> {
        self.current_node
    }

    /// Element the volume data in [`fe`](Self::fe) was computed on.
    pub fn fe_elem(&self) -> Option<PointId> {
        self.fe_elem
    }

    /// Forget every cached evaluation, e.g. after the mesh moved.
    ///
    /// Pending cached entries are kept.
    pub fn invalidate(&mut self) {
        self.reset_local();
        self.current_elem = None;
        self.current_neighbor = None;
        self.current_node = None;
        self.fe_elem = None;
        self.state = AssemblyState::Idle;
    }

    /// Volume (or physical-point) evaluation data.
    pub fn fe(&self) -> &FeValues {
        &self.fe
    }

    pub fn fe_face(&self) -> &FeValues {
        &self.fe_face
    }

    pub fn fe_neighbor(&self) -> &FeValues {
        &self.fe_neighbor
    }

    pub fn fe_node(&self) -> &FeValues {
        &self.fe_node
    }

    /// Evaluation points of the current element.
    pub fn q_points(&self) -> &[Vec<f64>] {
        &self.fe.q_points
    }

    /// Whether element Jacobian blocks were sized for the current element.
    pub fn jacobian_prepared(&self) -> bool {
        self.jacobian_prepared
    }

    pub fn set_current_subdomain_id(&mut self, subdomain: SubdomainId) {
        self.current_subdomain = Some(subdomain);
    }

    pub fn set_current_neighbor_subdomain_id(&mut self, subdomain: SubdomainId) {
        self.neighbor_subdomain = Some(subdomain);
    }

    fn reset_local(&mut self) {
        self.residual.clear();
        self.residual_neighbor.clear();
        self.jacobian.clear();
        self.jacobian_prepared = false;
    }

    fn volume_rule(&self, cell: CellType) -> Result<&QuadratureRule, CouplingError> {
        self.volume_rules
            .get(&cell)
            .ok_or(CouplingError::NotInitialized("volume quadrature"))
    }

    fn face_rule(&self, cell: CellType) -> Result<&QuadratureRule, CouplingError> {
        self.face_rules
            .get(&cell)
            .ok_or(CouplingError::NotInitialized("face quadrature"))
    }

    fn enter_elem(&mut self, mesh: &Mesh, elem: PointId) -> Result<(CellType, Vec<Vec<f64>>), CouplingError> {
        let e = mesh.elem(elem)?;
        let cell = e.cell_type;
        let subdomain = e.subdomain;
        let coords = mesh.element_coordinates(elem)?;
        self.reset_local();
        self.current_elem = Some(elem);
        self.current_cell = Some(cell);
        self.current_subdomain = Some(subdomain);
        self.current_side = None;
        self.current_node = None;
        Ok((cell, coords))
    }

    /// Volume shape data on `elem`.
    pub fn reinit_elem(&mut self, mesh: &Mesh, elem: PointId) -> Result<(), CouplingError> {
        let (cell, coords) = self.enter_elem(mesh, elem)?;
        self.fe = FeValues::volume(cell, self.volume_rule(cell)?, &coords)?;
        self.fe_elem = Some(elem);
        self.state = AssemblyState::ElementReinit;
        log::trace!("[{}] reinit elem {elem}", self.tid);
        Ok(())
    }

    /// Shape data on side `side` of `elem`.
    pub fn reinit_elem_face(
        &mut self,
        mesh: &Mesh,
        elem: PointId,
        side: usize,
    ) -> Result<(), CouplingError> {
        let (cell, coords) = self.enter_elem(mesh, elem)?;
        self.fe_face = FeValues::side(cell, side, self.face_rule(cell)?, &coords)?;
        self.current_side = Some(side);
        self.state = AssemblyState::FaceReinit;
        log::trace!("[{}] reinit elem {elem} side {side}", self.tid);
        Ok(())
    }

    /// Shape data on `elem` at exactly `points` (physical coordinates).
    pub fn reinit_at_physical(
        &mut self,
        mesh: &Mesh,
        elem: PointId,
        points: &[Vec<f64>],
    ) -> Result<(), CouplingError> {
        let (cell, coords) = self.enter_elem(mesh, elem)?;
        self.fe = FeValues::at_physical(cell, points, &coords)?;
        self.fe_elem = Some(elem);
        self.state = AssemblyState::ElementReinit;
        log::trace!("[{}] reinit elem {elem} at {} points", self.tid, points.len());
        Ok(())
    }

    /// Nodal evaluation at `node`.
    pub fn reinit_node(&mut self, mesh: &Mesh, node: PointId) -> Result<(), CouplingError> {
        let xyz = mesh.node(node)?;
        self.fe_node = FeValues::at_node(xyz);
        self.reset_local();
        self.current_node = Some(node);
        self.state = AssemblyState::NodeReinit;
        Ok(())
    }

    /// Face data on `elem` plus the matching points on its neighbor.
    pub fn reinit_elem_and_neighbor(
        &mut self,
        mesh: &Mesh,
        elem: PointId,
        side: usize,
        neighbor: PointId,
        neighbor_side: usize,
    ) -> Result<(), CouplingError> {
        self.reinit_elem_face(mesh, elem, side)?;
        let n = mesh.elem(neighbor)?;
        let (ncell, nsub) = (n.cell_type, n.subdomain);
        let ncoords = mesh.element_coordinates(neighbor)?;
        let mut fe_neighbor = FeValues::at_physical(ncell, &self.fe_face.q_points, &ncoords)?;
        fe_neighbor.jxw.clone_from(&self.fe_face.jxw);
        self.fe_neighbor = fe_neighbor;
        self.current_neighbor = Some(neighbor);
        self.neighbor_side = Some(neighbor_side);
        self.neighbor_subdomain = Some(nsub);
        self.state = AssemblyState::NeighborReinit;
        Ok(())
    }

    /// Neighbor shape data at `points`, optionally on a known side.
    pub fn reinit_neighbor_at_physical(
        &mut self,
        mesh: &Mesh,
        neighbor: PointId,
        neighbor_side: Option<usize>,
        points: &[Vec<f64>],
    ) -> Result<(), CouplingError> {
        let n = mesh.elem(neighbor)?;
        let (ncell, nsub) = (n.cell_type, n.subdomain);
        let ncoords = mesh.element_coordinates(neighbor)?;
        self.fe_neighbor = FeValues::at_physical(ncell, points, &ncoords)?;
        self.residual_neighbor.clear();
        self.jacobian.retain(|(_, kind, _, _), _| *kind == BlockKind::ElementElement);
        self.current_neighbor = Some(neighbor);
        self.neighbor_side = neighbor_side;
        self.neighbor_subdomain = Some(nsub);
        self.state = AssemblyState::NeighborReinit;
        Ok(())
    }

    /// Record element dofs and size residual blocks.
    pub fn prepare_residual(&mut self, dofs: Vec<VarDofs>) {
        self.elem_dofs = dofs;
        self.residual.clear();
        self.state = AssemblyState::Prepared;
    }

    /// Zero the element Jacobian blocks for every coupled variable pair.
    pub fn prepare_jacobian_block(&mut self) {
        self.jacobian
            .retain(|(_, kind, _, _), _| *kind != BlockKind::ElementElement);
        self.jacobian_prepared = true;
        self.state = AssemblyState::Prepared;
    }

    /// [`prepare_residual`](Self::prepare_residual) plus
    /// [`prepare_jacobian_block`](Self::prepare_jacobian_block).
    pub fn prepare(&mut self, dofs: Vec<VarDofs>) {
        self.prepare_residual(dofs);
        self.prepare_jacobian_block();
    }

    /// Record neighbor dofs and drop neighbor blocks.
    pub fn prepare_neighbor(&mut self, dofs: Vec<VarDofs>) {
        self.neighbor_dofs = dofs;
        self.residual_neighbor.clear();
        self.jacobian
            .retain(|(_, kind, _, _), _| !BlockKind::NEIGHBOR.contains(kind));
        self.state = AssemblyState::Prepared;
    }

    /// Record the full dof set of each variable for nonlocal coupling.
    pub fn prepare_nonlocal(&mut self, all_dofs: Vec<VarDofs>) {
        self.nonlocal_dofs = all_dofs;
        self.jacobian
            .retain(|(_, kind, _, _), _| *kind != BlockKind::Nonlocal);
    }

    /// Size the `(ivar, jvar)` element block for explicit `dof_indices`.
    pub fn prepare_block(&mut self, ivar: usize, jvar: usize, dof_indices: &[usize]) {
        for var in [ivar, jvar] {
            let scale = find(&self.elem_dofs, var).map_or(1.0, |d| d.scale_factor);
            upsert(
                &mut self.elem_dofs,
                VarDofs {
                    var,
                    dof_indices: dof_indices.to_vec(),
                    scale_factor: scale,
                },
            );
        }
        self.residual.retain(|(_, var), _| *var != ivar);
        self.jacobian.retain(|(_, kind, i, j), _| {
            !(*kind == BlockKind::ElementElement && *i == ivar && *j == jvar)
        });
        self.jacobian_prepared = true;
        self.state = AssemblyState::Prepared;
    }

    /// Size the `(ivar, jvar)` nonlocal block with explicit row and column dofs.
    pub fn prepare_block_nonlocal(
        &mut self,
        ivar: usize,
        jvar: usize,
        idof_indices: &[usize],
        jdof_indices: &[usize],
    ) {
        let iscale = find(&self.elem_dofs, ivar).map_or(1.0, |d| d.scale_factor);
        upsert(
            &mut self.elem_dofs,
            VarDofs {
                var: ivar,
                dof_indices: idof_indices.to_vec(),
                scale_factor: iscale,
            },
        );
        let jscale = find(&self.nonlocal_dofs, jvar).map_or(1.0, |d| d.scale_factor);
        upsert(
            &mut self.nonlocal_dofs,
            VarDofs {
                var: jvar,
                dof_indices: jdof_indices.to_vec(),
                scale_factor: jscale,
            },
        );
        self.jacobian.retain(|(_, kind, i, j), _| {
            !(*kind == BlockKind::Nonlocal && *i == ivar && *j == jvar)
        });
    }

    /// Make scalar-variable dofs available to element Jacobian blocks.
    pub fn prepare_off_diag_scalar(&mut self, scalar_dofs: Vec<VarDofs>) {
        self.scalar_dofs = scalar_dofs;
        self.jacobian.retain(|(_, kind, i, j), _| {
            *kind != BlockKind::ElementElement
                || (find(&self.scalar_dofs, *i).is_none() && find(&self.scalar_dofs, *j).is_none())
        });
    }

    /// Copy the current volume shape data for variable `var`.
    pub fn copy_shapes(&mut self, var: usize) {
        self.shapes.insert(var, self.fe.clone());
    }

    pub fn copy_face_shapes(&mut self, var: usize) {
        self.face_shapes.insert(var, self.fe_face.clone());
    }

    pub fn copy_neighbor_shapes(&mut self, var: usize) {
        self.neighbor_shapes.insert(var, self.fe_neighbor.clone());
    }

    pub fn shapes(&self, var: usize) -> Option<&FeValues> {
        self.shapes.get(&var)
    }

    pub fn face_shapes(&self, var: usize) -> Option<&FeValues> {
        self.face_shapes.get(&var)
    }

    pub fn neighbor_shapes(&self, var: usize) -> Option<&FeValues> {
        self.neighbor_shapes.get(&var)
    }

    fn elem_dofs_of(&self, var: usize) -> Option<&VarDofs> {
        find(&self.elem_dofs, var).or_else(|| find(&self.scalar_dofs, var))
    }

    /// Local residual of `var` under vector tag `tag`.
    pub fn residual_block_mut(&mut self, tag: TagId, var: usize) -> Result<&mut [f64], CouplingError> {
        let n = self
            .elem_dofs_of(var)
            .map(|d| d.dof_indices.len())
            .ok_or(CouplingError::NoCurrentElement { tid: self.tid })?;
        Ok(self
            .residual
            .entry((tag, var))
            .or_insert_with(|| vec![0.0; n]))
    }

    /// Local neighbor residual of `var` under vector tag `tag`.
    pub fn residual_block_neighbor_mut(
        &mut self,
        tag: TagId,
        var: usize,
    ) -> Result<&mut [f64], CouplingError> {
        let n = find(&self.neighbor_dofs, var)
            .map(|d| d.dof_indices.len())
            .ok_or(CouplingError::NoCurrentElement { tid: self.tid })?;
        Ok(self
            .residual_neighbor
            .entry((tag, var))
            .or_insert_with(|| vec![0.0; n]))
    }

    /// Local Jacobian block `(ivar, jvar)` of `kind` under matrix tag `tag`.
    pub fn jacobian_block_mut(
        &mut self,
        tag: TagId,
        kind: BlockKind,
        ivar: usize,
        jvar: usize,
    ) -> Result<&mut DenseBlock, CouplingError> {
        if !self.coupling.coupled(ivar, jvar) {
            return Err(CouplingError::UncoupledBlock { ivar, jvar });
        }
        if kind == BlockKind::ElementElement && !self.jacobian_prepared {
            return Err(CouplingError::NotInitialized("element Jacobian block"));
        }
        let key = (tag, kind, ivar, jvar);
        if !self.jacobian.contains_key(&key) {
            let missing = CouplingError::NoCurrentElement { tid: self.tid };
            let (rows, cols) = match kind {
                BlockKind::ElementElement => (self.elem_dofs_of(ivar), self.elem_dofs_of(jvar)),
                BlockKind::ElementNeighbor => {
                    (self.elem_dofs_of(ivar), find(&self.neighbor_dofs, jvar))
                }
                BlockKind::NeighborElement => {
                    (find(&self.neighbor_dofs, ivar), self.elem_dofs_of(jvar))
                }
                BlockKind::NeighborNeighbor => {
                    (find(&self.neighbor_dofs, ivar), find(&self.neighbor_dofs, jvar))
                }
                BlockKind::Nonlocal => (self.elem_dofs_of(ivar), find(&self.nonlocal_dofs, jvar)),
            };
            let (Some(rows), Some(cols)) = (rows, cols) else {
                return Err(missing);
            };
            let block = DenseBlock::new(
                rows.dof_indices.clone(),
                cols.dof_indices.clone(),
                rows.scale_factor,
            );
            self.jacobian.insert(key, block);
        }
        self.jacobian
            .get_mut(&key)
            .ok_or(CouplingError::NoCurrentElement { tid: self.tid })
    }

    fn scaled_residual(
        blocks: &BTreeMap<(TagId, usize), Vec<f64>>,
        dofs: &[VarDofs],
        scalar_dofs: &[VarDofs],
        tags: &[TagId],
    ) -> Vec<(TagId, Vec<usize>, Vec<f64>)> {
        blocks
            .iter()
            .filter(|((tag, _), _)| tags.contains(tag))
            .filter_map(|(&(tag, var), values)| {
                let d = find(dofs, var).or_else(|| find(scalar_dofs, var))?;
                let scaled = values.iter().map(|v| v * d.scale_factor).collect();
                Some((tag, d.dof_indices.clone(), scaled))
            })
            .collect()
    }

    fn jacobian_triplets(&self, kinds: &[BlockKind], tags: &[TagId]) -> Vec<(TagId, Vec<(usize, usize, f64)>)> {
        self.jacobian
            .iter()
            .filter(|((tag, kind, _, _), _)| tags.contains(tag) && kinds.contains(kind))
            .map(|(&(tag, ..), block)| (tag, block.triplets()))
            .collect()
    }

    /// Scatter local residual blocks of `tags` into the global vectors.
    pub fn add_residual(&mut self, tensors: &TaggedTensors, tags: &[TagId]) -> Result<(), CouplingError> {
        for (tag, dofs, values) in
            Self::scaled_residual(&self.residual, &self.elem_dofs, &self.scalar_dofs, tags)
        {
            tensors.add_to_vector(tag, &dofs, &values)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Scatter local neighbor residual blocks of `tags`.
    pub fn add_residual_neighbor(
        &mut self,
        tensors: &TaggedTensors,
        tags: &[TagId],
    ) -> Result<(), CouplingError> {
        for (tag, dofs, values) in
            Self::scaled_residual(&self.residual_neighbor, &self.neighbor_dofs, &[], tags)
        {
            tensors.add_to_vector(tag, &dofs, &values)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Queue local residual blocks of `tags` for a later scatter.
    pub fn cache_residual(&mut self, tags: &[TagId]) {
        for (tag, dofs, values) in
            Self::scaled_residual(&self.residual, &self.elem_dofs, &self.scalar_dofs, tags)
        {
            self.cached_residual
                .entry(tag)
                .or_default()
                .extend(dofs.into_iter().zip(values));
        }
        self.state = AssemblyState::Cached;
    }

    /// Queue local neighbor residual blocks of `tags`.
    pub fn cache_residual_neighbor(&mut self, tags: &[TagId]) {
        for (tag, dofs, values) in
            Self::scaled_residual(&self.residual_neighbor, &self.neighbor_dofs, &[], tags)
        {
            self.cached_residual
                .entry(tag)
                .or_default()
                .extend(dofs.into_iter().zip(values));
        }
        self.state = AssemblyState::Cached;
    }

    /// Number of queued residual entries across tags.
    pub fn n_cached_residual_entries(&self) -> usize {
        self.cached_residual.values().map(Vec::len).sum()
    }

    /// Scatter and clear every queued residual entry.
    pub fn add_cached_residuals(&mut self, tensors: &TaggedTensors) -> Result<(), CouplingError> {
        for (tag, entries) in std::mem::take(&mut self.cached_residual) {
            let (dofs, values): (Vec<usize>, Vec<f64>) = entries.into_iter().unzip();
            tensors.add_to_vector(tag, &dofs, &values)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Scatter and clear the queued entries of `tag` into `residual`.
    pub fn add_cached_residual(
        &mut self,
        residual: &mut NumericVector,
        tag: TagId,
    ) -> Result<(), CouplingError> {
        if let Some(entries) = self.cached_residual.remove(&tag) {
            for (dof, value) in entries {
                residual.add(dof, value)?;
            }
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Overwrite `residual` entries with the local blocks of `tag`.
    pub fn set_residual(&mut self, residual: &mut NumericVector, tag: TagId) -> Result<(), CouplingError> {
        for (_, dofs, values) in
            Self::scaled_residual(&self.residual, &self.elem_dofs, &self.scalar_dofs, &[tag])
        {
            for (dof, value) in dofs.into_iter().zip(values) {
                residual.set(dof, value)?;
            }
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Overwrite `residual` entries with the local neighbor blocks of `tag`.
    pub fn set_residual_neighbor(
        &mut self,
        residual: &mut NumericVector,
        tag: TagId,
    ) -> Result<(), CouplingError> {
        for (_, dofs, values) in
            Self::scaled_residual(&self.residual_neighbor, &self.neighbor_dofs, &[], &[tag])
        {
            for (dof, value) in dofs.into_iter().zip(values) {
                residual.set(dof, value)?;
            }
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    fn scatter_jacobian(
        &mut self,
        tensors: &TaggedTensors,
        kinds: &[BlockKind],
        tags: &[TagId],
    ) -> Result<(), CouplingError> {
        for (tag, triplets) in self.jacobian_triplets(kinds, tags) {
            tensors.add_to_matrix(tag, &triplets)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    fn cache_jacobian_kinds(&mut self, kinds: &[BlockKind], tags: &[TagId]) {
        for (tag, triplets) in self.jacobian_triplets(kinds, tags) {
            self.cached_jacobian.entry(tag).or_default().extend(triplets);
        }
        self.state = AssemblyState::Cached;
    }

    pub fn add_jacobian(&mut self, tensors: &TaggedTensors, tags: &[TagId]) -> Result<(), CouplingError> {
        self.scatter_jacobian(tensors, &[BlockKind::ElementElement], tags)
    }

    pub fn add_jacobian_nonlocal(
        &mut self,
        tensors: &TaggedTensors,
        tags: &[TagId],
    ) -> Result<(), CouplingError> {
        self.scatter_jacobian(tensors, &[BlockKind::Nonlocal], tags)
    }

    pub fn add_jacobian_neighbor(
        &mut self,
        tensors: &TaggedTensors,
        tags: &[TagId],
    ) -> Result<(), CouplingError> {
        self.scatter_jacobian(tensors, &BlockKind::NEIGHBOR, tags)
    }

    pub fn cache_jacobian(&mut self, tags: &[TagId]) {
        self.cache_jacobian_kinds(&[BlockKind::ElementElement], tags);
    }

    pub fn cache_jacobian_nonlocal(&mut self, tags: &[TagId]) {
        self.cache_jacobian_kinds(&[BlockKind::Nonlocal], tags);
    }

    pub fn cache_jacobian_neighbor(&mut self, tags: &[TagId]) {
        self.cache_jacobian_kinds(&BlockKind::NEIGHBOR, tags);
    }

    /// Scatter and clear every queued Jacobian entry.
    pub fn add_cached_jacobian(&mut self, tensors: &TaggedTensors) -> Result<(), CouplingError> {
        for (tag, triplets) in std::mem::take(&mut self.cached_jacobian) {
            tensors.add_to_matrix(tag, &triplets)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    fn block(&self, tag: TagId, kind: BlockKind, ivar: usize, jvar: usize) -> Option<&DenseBlock> {
        self.jacobian.get(&(tag, kind, ivar, jvar))
    }

    fn add_block_to(
        matrix: &mut SparseMatrix,
        block: &DenseBlock,
        rows: &[usize],
        cols: &[usize],
    ) -> Result<(), CouplingError> {
        if rows.len() != block.n_rows() {
            return Err(CouplingError::BlockSizeMismatch {
                expected: block.n_rows(),
                found: rows.len(),
            });
        }
        if cols.len() != block.n_cols() {
            return Err(CouplingError::BlockSizeMismatch {
                expected: block.n_cols(),
                found: cols.len(),
            });
        }
        for (r, c, v) in block.triplets_with(rows, cols) {
            matrix.add(r, c, v)?;
        }
        Ok(())
    }

    /// Add element block `(ivar, jvar)` of `tag` into `jacobian` at `dof_indices`.
    pub fn add_jacobian_block(
        &mut self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        dof_indices: &[usize],
        tag: TagId,
    ) -> Result<(), CouplingError> {
        if let Some(block) = self.block(tag, BlockKind::ElementElement, ivar, jvar) {
            Self::add_block_to(jacobian, block, dof_indices, dof_indices)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Add nonlocal block `(ivar, jvar)` of `tag` into `jacobian`.
    pub fn add_jacobian_block_nonlocal(
        &mut self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        idof_indices: &[usize],
        jdof_indices: &[usize],
        tag: TagId,
    ) -> Result<(), CouplingError> {
        if let Some(block) = self.block(tag, BlockKind::Nonlocal, ivar, jvar) {
            Self::add_block_to(jacobian, block, idof_indices, jdof_indices)?;
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }

    /// Add the three element/neighbor cross blocks of `(ivar, jvar)` into `jacobian`.
    pub fn add_jacobian_neighbor_block(
        &mut self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        dof_indices: &[usize],
        neighbor_dof_indices: &[usize],
        tag: TagId,
    ) -> Result<(), CouplingError> {
        let placements = [
            (BlockKind::ElementNeighbor, dof_indices, neighbor_dof_indices),
            (BlockKind::NeighborElement, neighbor_dof_indices, dof_indices),
            (BlockKind::NeighborNeighbor, neighbor_dof_indices, neighbor_dof_indices),
        ];
        for (kind, rows, cols) in placements {
            if let Some(block) = self.block(tag, kind, ivar, jvar) {
                Self::add_block_to(jacobian, block, rows, cols)?;
            }
        }
        self.state = AssemblyState::Scattered;
        Ok(())
    }
}
