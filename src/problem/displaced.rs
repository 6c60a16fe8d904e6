//! A problem living on a copy of the reference mesh that moves with the
//! solution.
//!
//! The displaced mesh is a structural clone of the reference mesh; only its
//! coordinates differ. Its systems are mirrors of the reference systems with
//! identical dof numbering, refreshed from the reference solution on every
//! [`DisplacedProblem::sync_solutions`]. Kernels drive it through the same
//! reinit/prepare/cache/add vocabulary as the reference problem, one
//! [`AssemblyContext`] per worker.
//!
//! Identity questions (variable existence, tags, solver flags) are answered
//! by the reference problem. Variable *storage* lookups resolve against the
//! displaced systems, nonlinear first.

use super::equation_systems::EquationSystems;
use super::reference::{CoordinateSystem, ReferenceProblem};
use crate::algs::displace::{
    NodeRange, ResetDisplacedMeshVisitor, UpdateDisplacedMeshVisitor, check_node_correspondence,
    visit_nodes,
};
use crate::assembly::AssemblyContext;
use crate::config::DisplacedProblemConfig;
use crate::coupling_error::CouplingError;
use crate::fe::FeValues;
use crate::mesh::Mesh;
use crate::search::{DiracKernelInfo, GeometricSearch, GeometricSearchData, SearchKind};
use crate::system::{
    DofMap, ExtraSendListFn, FieldSystem, FieldType, NumericVector, SparseMatrix, Variable,
    VariableKind, VariableSpec,
};
use crate::tags::TagId;
use crate::topology::{ANY_BOUNDARY_ID, BoundaryId, PointId, SubdomainId};
use parking_lot::{Mutex, MutexGuard, RwLockReadGuard};
use std::sync::Arc;

/// Mirror of a reference problem on displaced geometry.
#[derive(Debug)]
pub struct DisplacedProblem {
    name: String,
    reference: Arc<dyn ReferenceProblem>,
    config: DisplacedProblemConfig,
    mesh: Mesh,
    displaced_nl: FieldSystem,
    displaced_aux: FieldSystem,
    eq: EquationSystems,
    assembly: Vec<Mutex<AssemblyContext>>,
    geometric_search: Box<dyn GeometricSearch>,
    dirac: DiracKernelInfo,
    initialized: bool,
}

impl DisplacedProblem {
    /// Clone the reference mesh and mirror both reference systems.
    ///
    /// Nothing is numbered until [`DisplacedProblem::init`].
    pub fn new(
        reference: Arc<dyn ReferenceProblem>,
        config: DisplacedProblemConfig,
    ) -> Result<Self, CouplingError> {
        let mesh = reference.mesh().read().clone();
        if config.displacements.len() > mesh.dimension() {
            return Err(CouplingError::DisplacementCountMismatch {
                dimension: mesh.dimension(),
                found: config.displacements.len(),
            });
        }
        let n_threads = config.resolved_threads();
        let name = format!("{}_displaced", reference.name());
        let displaced_nl = reference
            .nonlinear_system()
            .read()
            .mirror(format!("{name}_nl"), n_threads);
        let displaced_aux = reference
            .auxiliary_system()
            .read()
            .mirror(format!("{name}_aux"), n_threads);
        let mut assembly = Vec::with_capacity(n_threads);
        for tid in 0..n_threads {
            assembly.push(Mutex::new(AssemblyContext::new(tid, &config.quadrature)?));
        }
        log::debug!(
            "displaced problem '{name}' created: {} nodes, {n_threads} contexts, displacements {:?}",
            mesh.n_nodes(),
            config.displacements
        );
        Ok(Self {
            name,
            reference,
            config,
            mesh,
            displaced_nl,
            displaced_aux,
            eq: EquationSystems::new(),
            assembly,
            geometric_search: Box::new(GeometricSearchData::new()),
            dirac: DiracKernelInfo::new(),
            initialized: false,
        })
    }

    /// Replace the geometric search service.
    pub fn with_geometric_search(mut self, search: Box<dyn GeometricSearch>) -> Self {
        self.geometric_search = search;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &Arc<dyn ReferenceProblem> {
        &self.reference
    }

    pub fn config(&self) -> &DisplacedProblemConfig {
        &self.config
    }

    pub fn displacements(&self) -> &[String] {
        &self.config.displacements
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Size of the assembly context pool.
    pub fn n_threads(&self) -> usize {
        self.assembly.len()
    }

    /// The displaced mesh.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// The reference mesh.
    pub fn ref_mesh(&self) -> RwLockReadGuard<'_, Mesh> {
        self.reference.mesh().read()
    }

    pub fn nl(&self) -> &FieldSystem {
        &self.displaced_nl
    }

    pub fn aux(&self) -> &FieldSystem {
        &self.displaced_aux
    }

    pub fn eq(&self) -> &EquationSystems {
        &self.eq
    }

    pub fn eq_mut(&mut self) -> &mut EquationSystems {
        &mut self.eq
    }

    pub fn geometric_search(&self) -> &dyn GeometricSearch {
        self.geometric_search.as_ref()
    }

    pub fn geometric_search_mut(&mut self) -> &mut dyn GeometricSearch {
        self.geometric_search.as_mut()
    }

    pub fn dirac_info(&self) -> &DiracKernelInfo {
        &self.dirac
    }

    pub fn dirac_info_mut(&mut self) -> &mut DiracKernelInfo {
        &mut self.dirac
    }

    /// Exclusive access to the context of worker `tid`.
    pub fn assembly(&self, tid: usize) -> Result<MutexGuard<'_, AssemblyContext>, CouplingError> {
        self.assembly
            .get(tid)
            .map(Mutex::lock)
            .ok_or(CouplingError::ThreadOutOfRange {
                tid,
                n_threads: self.assembly.len(),
            })
    }

    fn check_tid(&self, tid: usize) -> Result<(), CouplingError> {
        if tid < self.assembly.len() {
            Ok(())
        } else {
            Err(CouplingError::ThreadOutOfRange {
                tid,
                n_threads: self.assembly.len(),
            })
        }
    }

    fn invalidate_contexts(&self) {
        for ctx in &self.assembly {
            ctx.lock().invalidate();
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Size contexts from the reference coupling, number both systems, and
    /// build the Dirac point locator.
    pub fn init(&mut self) -> Result<(), CouplingError> {
        let coupling = self.reference.coupling();
        for ctx in &self.assembly {
            ctx.lock().init(coupling.clone());
        }

        let extra = self.extra_send_list();
        self.displaced_nl
            .dof_map_mut()
            .attach_extra_send_list_function(Arc::clone(&extra));
        self.displaced_aux
            .dof_map_mut()
            .attach_extra_send_list_function(extra);

        self.eq
            .init(&self.mesh, &mut [&mut self.displaced_nl, &mut self.displaced_aux])?;
        crate::debug_invariants!(self.check_layout(), "displaced dof map diverged");
        self.mesh.mesh_changed();
        self.dirac.update_point_locator(&self.mesh)?;
        self.initialized = true;
        log::debug!(
            "displaced problem '{}' initialized: {} nl dofs, {} aux dofs",
            self.name,
            self.displaced_nl.n_dofs(),
            self.displaced_aux.n_dofs()
        );
        Ok(())
    }

    /// Off-process dofs needed by ghosted elements of the reference problem.
    fn extra_send_list(&self) -> ExtraSendListFn {
        let reference = Arc::clone(&self.reference);
        Arc::new(move |map: &DofMap, list: &mut Vec<usize>| {
            for elem in reference.ghosted_elems() {
                list.extend_from_slice(map.element_support(elem));
            }
        })
    }

    #[cfg_attr(not(any(debug_assertions, feature = "check-invariants")), allow(dead_code))]
    fn check_layout(&self) -> Result<(), CouplingError> {
        let pairs = [
            (&self.displaced_nl, self.reference.nonlinear_system()),
            (&self.displaced_aux, self.reference.auxiliary_system()),
        ];
        for (displaced, reference) in pairs {
            let reference = reference.read();
            if reference.is_initialized() && !displaced.dof_map().same_layout(reference.dof_map()) {
                return Err(CouplingError::SolutionSizeMismatch {
                    system: displaced.name().to_string(),
                    expected: reference.n_dofs(),
                    found: displaced.n_dofs(),
                });
            }
        }
        Ok(())
    }

    #[cfg_attr(not(any(debug_assertions, feature = "check-invariants")), allow(dead_code))]
    fn check_topology(&self, reference: &Mesh) -> Result<(), CouplingError> {
        if reference.topology_eq(&self.mesh) {
            Ok(())
        } else {
            Err(CouplingError::InvalidGeometry(
                "displaced mesh topology differs from the reference mesh".to_string(),
            ))
        }
    }

    /// Forward quadrature selection to every context.
    pub fn create_qrules(&mut self, volume: &str, face: &str) -> Result<(), CouplingError> {
        for ctx in &self.assembly {
            ctx.lock().create_qrules(volume, face)?;
        }
        self.config.quadrature.volume = volume.to_string();
        self.config.quadrature.face = face.to_string();
        Ok(())
    }

    /// Copy the reference solutions into the displaced systems.
    pub fn sync_solutions(&mut self) -> Result<(), CouplingError> {
        let nl = self.reference.nonlinear_system().read().solution().clone();
        let aux = self.reference.auxiliary_system().read().solution().clone();
        self.sync_solutions_with(&nl, &aux)
    }

    /// Copy `nl` and `aux` into the displaced systems.
    ///
    /// Both sizes are checked before either system is written.
    pub fn sync_solutions_with(
        &mut self,
        nl: &NumericVector,
        aux: &NumericVector,
    ) -> Result<(), CouplingError> {
        if !self.initialized {
            return Err(CouplingError::NotInitialized("DisplacedProblem::sync_solutions"));
        }
        for (sys, values) in [(&self.displaced_nl, nl), (&self.displaced_aux, aux)] {
            if sys.n_dofs() != values.len() {
                return Err(CouplingError::SolutionSizeMismatch {
                    system: sys.name().to_string(),
                    expected: sys.n_dofs(),
                    found: values.len(),
                });
            }
        }
        self.displaced_nl.set_solution(nl)?;
        self.displaced_aux.set_solution(aux)?;
        self.displaced_nl.update();
        self.displaced_aux.update();
        log::trace!("displaced problem '{}' synced solutions", self.name);
        Ok(())
    }

    /// Sync from the reference problem, then move the mesh.
    pub fn update_mesh(&mut self) -> Result<(), CouplingError> {
        self.sync_solutions()?;
        self.displace()
    }

    /// Sync from explicit vectors, then move the mesh.
    pub fn update_mesh_with(
        &mut self,
        nl: &NumericVector,
        aux: &NumericVector,
    ) -> Result<(), CouplingError> {
        self.sync_solutions_with(nl, aux)?;
        self.displace()
    }

    /// Make both meshes agree on how their nodes are distributed.
    fn repair_distribution(&mut self, reference: &mut Mesh) {
        if reference.is_serial() && !self.mesh.is_serial() {
            log::warn!("displaced mesh '{}' is not serial; allgathering it", self.name);
            self.mesh.allgather();
        } else if self.mesh.is_serial() && !reference.is_serial() {
            log::warn!("displaced mesh '{}' is serial; allgathering the reference mesh", self.name);
            reference.allgather();
        }
        if reference.is_serial_on_zero() && !self.mesh.is_serial_on_zero() {
            log::warn!("displaced mesh '{}' is not gathered on rank 0; gathering it", self.name);
            self.mesh.gather_to_zero();
        } else if self.mesh.is_serial_on_zero() && !reference.is_serial_on_zero() {
            log::warn!("reference mesh is not gathered on rank 0; gathering it");
            reference.gather_to_zero();
        }
    }

    fn displace(&mut self) -> Result<(), CouplingError> {
        let reference = Arc::clone(&self.reference);
        self.repair_distribution(&mut reference.mesh().write());

        let ref_mesh = reference.mesh().read();
        check_node_correspondence(&ref_mesh, &self.mesh)?;
        let visitor = UpdateDisplacedMeshVisitor::new(
            &ref_mesh,
            &self.config.displacements,
            &self.displaced_nl,
            &self.displaced_aux,
        )?;
        let n = visit_nodes(
            &visitor,
            &mut self.mesh,
            NodeRange::full(&ref_mesh),
            self.config.grain_size,
        )?;
        crate::debug_invariants!(self.check_topology(&ref_mesh), "displacement changed topology");
        drop(ref_mesh);

        self.invalidate_contexts();
        self.geometric_search.update(&self.mesh, SearchKind::All)?;
        self.dirac.update_point_locator(&self.mesh)?;
        log::debug!("displaced problem '{}' moved {n} nodes", self.name);
        Ok(())
    }

    /// Write the reference coordinates back into every displaced node.
    pub fn undisplace_mesh(&mut self) -> Result<(), CouplingError> {
        let reference = Arc::clone(&self.reference);
        let ref_mesh = reference.mesh().read();
        check_node_correspondence(&ref_mesh, &self.mesh)?;
        let visitor = ResetDisplacedMeshVisitor::new(&ref_mesh);
        let n = visit_nodes(&visitor, &mut self.mesh, NodeRange::full(&ref_mesh), 1)?;
        drop(ref_mesh);
        self.invalidate_contexts();
        log::debug!("displaced problem '{}' reset {n} nodes", self.name);
        Ok(())
    }

    /// React to a topology change of the reference mesh.
    ///
    /// The displaced mesh is re-cloned if the topologies no longer match (its
    /// coordinates are then the reference ones until the next update), dofs
    /// are redistributed, and search structures are rebuilt from scratch.
    pub fn mesh_changed(&mut self) -> Result<(), CouplingError> {
        {
            let ref_mesh = self.reference.mesh().read();
            if !ref_mesh.topology_eq(&self.mesh) {
                log::debug!("displaced problem '{}' re-cloning changed topology", self.name);
                self.mesh = ref_mesh.clone();
            }
        }
        self.eq
            .reinit(&self.mesh, &mut [&mut self.displaced_nl, &mut self.displaced_aux])?;
        self.mesh.mesh_changed();
        self.dirac.update_point_locator(&self.mesh)?;
        self.geometric_search.reinit(&self.mesh)?;
        self.invalidate_contexts();
        log::debug!("displaced problem '{}' mesh changed", self.name);
        Ok(())
    }

    /// Incremental geometric search update.
    pub fn update_geom_search(&mut self, kind: SearchKind) -> Result<(), CouplingError> {
        self.geometric_search.update(&self.mesh, kind)
    }

    pub fn save_old_solutions(&mut self) {
        self.displaced_nl.save_old_solutions();
        self.displaced_aux.save_old_solutions();
    }

    pub fn restore_old_solutions(&mut self) {
        self.displaced_nl.restore_old_solutions();
        self.displaced_aux.restore_old_solutions();
    }

    /// Shift the current displaced solutions into the old-solution history.
    pub fn copy_solutions_backwards(&mut self) {
        self.displaced_nl.copy_old_solutions();
        self.displaced_aux.copy_old_solutions();
    }

    /// Sum of every tagged residual assembled through the displaced system.
    pub fn compute_residual(&self) -> NumericVector {
        self.displaced_nl.tensors().sum_vectors(&self.vector_tags())
    }

    /// The `SYSTEM` Jacobian assembled through the displaced system.
    pub fn compute_jacobian(&self) -> Result<SparseMatrix, CouplingError> {
        let tag = self.get_matrix_tag_id(crate::tags::SYSTEM_TAG)?;
        Ok(self
            .displaced_nl
            .tensors()
            .matrix(tag)
            .unwrap_or_else(|| SparseMatrix::new(self.displaced_nl.n_dofs())))
    }

    /// Nothing to solve on the displaced side.
    pub fn solve(&mut self) {}

    pub fn on_timestep_begin(&mut self) {}

    pub fn on_timestep_end(&mut self) {}

    pub fn init_adaptivity(&mut self) {}

    // ---------------------------------------------------------------------
    // Variables
    // ---------------------------------------------------------------------

    pub fn add_variable(&mut self, spec: VariableSpec) -> Result<usize, CouplingError> {
        self.displaced_nl.add_variable(spec)
    }

    pub fn add_aux_variable(&mut self, spec: VariableSpec) -> Result<usize, CouplingError> {
        self.displaced_aux.add_variable(spec)
    }

    pub fn add_scalar_variable(
        &mut self,
        name: &str,
        order: usize,
        scale_factor: f64,
    ) -> Result<usize, CouplingError> {
        self.displaced_nl.add_scalar_variable(name, order, scale_factor)
    }

    pub fn add_aux_scalar_variable(
        &mut self,
        name: &str,
        order: usize,
        scale_factor: f64,
    ) -> Result<usize, CouplingError> {
        self.displaced_aux.add_scalar_variable(name, order, scale_factor)
    }

    /// Whether the reference problem declares `name`.
    pub fn has_variable(&self, name: &str) -> bool {
        self.reference.has_variable(name)
    }

    /// `name` in the displaced nonlinear system, else the auxiliary one.
    pub fn get_variable(&self, tid: usize, name: &str) -> Result<&Variable, CouplingError> {
        self.check_tid(tid)?;
        if self.displaced_nl.has_variable(name) {
            self.displaced_nl.variable(name)
        } else if self.displaced_aux.has_variable(name) {
            self.displaced_aux.variable(name)
        } else {
            Err(CouplingError::VariableNotFound(name.to_string()))
        }
    }

    /// [`get_variable`](Self::get_variable) with kind and field-type checks.
    pub fn get_variable_of(
        &self,
        tid: usize,
        name: &str,
        kind: Option<VariableKind>,
        field_type: Option<FieldType>,
    ) -> Result<&Variable, CouplingError> {
        let var = self.get_variable(tid, name)?;
        if let Some(kind) = kind.filter(|k| *k != var.kind) {
            return Err(CouplingError::VariableTypeMismatch {
                name: name.to_string(),
                expected: format!("{kind:?}"),
                found: format!("{:?}", var.kind),
            });
        }
        if let Some(field_type) = field_type.filter(|f| *f != var.field_type) {
            return Err(CouplingError::VariableTypeMismatch {
                name: name.to_string(),
                expected: field_type.to_string(),
                found: var.field_type.to_string(),
            });
        }
        Ok(var)
    }

    pub fn get_standard_variable(&self, tid: usize, name: &str) -> Result<&Variable, CouplingError> {
        self.get_variable_of(tid, name, None, Some(FieldType::Standard))
    }

    pub fn get_vector_variable(&self, tid: usize, name: &str) -> Result<&Variable, CouplingError> {
        self.get_variable_of(tid, name, None, Some(FieldType::Vector))
    }

    pub fn has_scalar_variable(&self, name: &str) -> bool {
        self.displaced_nl.has_scalar_variable(name) || self.displaced_aux.has_scalar_variable(name)
    }

    pub fn get_scalar_variable(&self, tid: usize, name: &str) -> Result<&Variable, CouplingError> {
        self.check_tid(tid)?;
        if self.displaced_nl.has_scalar_variable(name) {
            self.displaced_nl.variable(name)
        } else if self.displaced_aux.has_scalar_variable(name) {
            self.displaced_aux.variable(name)
        } else {
            Err(CouplingError::VariableNotFound(name.to_string()))
        }
    }

    /// The displaced system holding `name`.
    pub fn system_for(&self, name: &str) -> Result<&FieldSystem, CouplingError> {
        if self.displaced_nl.has_variable(name) {
            Ok(&self.displaced_nl)
        } else if self.displaced_aux.has_variable(name) {
            Ok(&self.displaced_aux)
        } else {
            Err(CouplingError::SystemNotFound(name.to_string()))
        }
    }

    pub fn coord_system(&self, subdomain: SubdomainId) -> CoordinateSystem {
        self.reference.coord_system(subdomain)
    }

    pub fn is_transient(&self) -> bool {
        self.reference.is_transient()
    }

    pub fn converged(&self) -> bool {
        self.reference.converged()
    }

    pub fn computing_initial_residual(&self) -> bool {
        self.reference.computing_initial_residual()
    }

    // ---------------------------------------------------------------------
    // Tags (always the reference registry)
    // ---------------------------------------------------------------------

    pub fn add_vector_tag(&self, name: &str) -> TagId {
        self.reference.tags().add_vector_tag(name)
    }

    pub fn get_vector_tag_id(&self, name: &str) -> Result<TagId, CouplingError> {
        self.reference.tags().get_vector_tag_id(name)
    }

    pub fn vector_tag_name(&self, tag: TagId) -> Result<String, CouplingError> {
        self.reference.tags().vector_tag_name(tag)
    }

    pub fn vector_tag_exists(&self, tag: TagId) -> bool {
        self.reference.tags().vector_tag_exists(tag)
    }

    pub fn vector_tag_name_exists(&self, name: &str) -> bool {
        self.reference.tags().vector_tag_name_exists(name)
    }

    pub fn num_vector_tags(&self) -> usize {
        self.reference.tags().num_vector_tags()
    }

    pub fn vector_tags(&self) -> Vec<TagId> {
        self.reference.tags().vector_tags()
    }

    pub fn add_matrix_tag(&self, name: &str) -> TagId {
        self.reference.tags().add_matrix_tag(name)
    }

    pub fn get_matrix_tag_id(&self, name: &str) -> Result<TagId, CouplingError> {
        self.reference.tags().get_matrix_tag_id(name)
    }

    pub fn matrix_tag_name(&self, tag: TagId) -> Result<String, CouplingError> {
        self.reference.tags().matrix_tag_name(tag)
    }

    pub fn matrix_tag_exists(&self, tag: TagId) -> bool {
        self.reference.tags().matrix_tag_exists(tag)
    }

    pub fn matrix_tag_name_exists(&self, name: &str) -> bool {
        self.reference.tags().matrix_tag_name_exists(name)
    }

    pub fn num_matrix_tags(&self) -> usize {
        self.reference.tags().num_matrix_tags()
    }

    pub fn matrix_tags(&self) -> Vec<TagId> {
        self.reference.tags().matrix_tags()
    }

    // ---------------------------------------------------------------------
    // Ghosting (forwarded)
    // ---------------------------------------------------------------------

    pub fn add_ghosted_elem(&self, elem: PointId) {
        self.reference.add_ghosted_elem(elem);
    }

    pub fn add_ghosted_boundary(&self, boundary: BoundaryId) {
        self.reference.add_ghosted_boundary(boundary);
    }

    pub fn ghost_ghosted_boundaries(&self) {
        self.reference.ghost_ghosted_boundaries();
    }

    pub fn ghosted_elems(&self) -> Vec<PointId> {
        self.reference.ghosted_elems()
    }

    // ---------------------------------------------------------------------
    // Preparation
    // ---------------------------------------------------------------------

    /// Element reinit of the context, dof lookup on both systems, then sizing
    /// of the local blocks.
    ///
    /// Jacobian blocks are left unprepared when the reference problem already
    /// holds a constant Jacobian.
    pub fn prepare(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_elem(&self.mesh, elem)?;
        self.displaced_nl.prepare(&self.mesh, elem, tid)?;
        self.displaced_aux.prepare(&self.mesh, elem, tid)?;
        if !self.reference.has_jacobian() || !self.reference.const_jacobian() {
            ctx.prepare_jacobian_block();
        }
        ctx.prepare_residual(self.displaced_nl.element_dofs(tid)?);
        Ok(())
    }

    /// [`prepare`](Self::prepare) for a single `(ivar, jvar)` block with
    /// caller-supplied dofs.
    pub fn prepare_block(
        &self,
        elem: PointId,
        ivar: usize,
        jvar: usize,
        dof_indices: &[usize],
        tid: usize,
    ) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_elem(&self.mesh, elem)?;
        self.displaced_nl.prepare(&self.mesh, elem, tid)?;
        self.displaced_aux.prepare(&self.mesh, elem, tid)?;
        ctx.prepare_block(ivar, jvar, dof_indices);
        Ok(())
    }

    pub fn prepare_nonlocal(&self, tid: usize) -> Result<(), CouplingError> {
        let all = self.displaced_nl.all_dofs();
        self.assembly(tid)?.prepare_nonlocal(all);
        Ok(())
    }

    pub fn prepare_face(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        self.displaced_nl.prepare_face(&self.mesh, elem, tid)?;
        self.displaced_aux.prepare_face(&self.mesh, elem, tid)
    }

    pub fn prepare_block_nonlocal(
        &self,
        ivar: usize,
        jvar: usize,
        idof_indices: &[usize],
        jdof_indices: &[usize],
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.assembly(tid)?
            .prepare_block_nonlocal(ivar, jvar, idof_indices, jdof_indices);
        Ok(())
    }

    /// Size local blocks for the dofs last prepared on the nonlinear system.
    pub fn prepare_assembly(&self, tid: usize) -> Result<(), CouplingError> {
        let dofs = self.displaced_nl.element_dofs(tid)?;
        self.assembly(tid)?.prepare(dofs);
        Ok(())
    }

    pub fn prepare_assembly_neighbor(&self, tid: usize) -> Result<(), CouplingError> {
        let dofs = self.displaced_nl.neighbor_dofs(tid)?;
        self.assembly(tid)?.prepare_neighbor(dofs);
        Ok(())
    }

    pub fn set_current_subdomain_id(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        let subdomain = self.mesh.elem(elem)?.subdomain;
        self.assembly(tid)?.set_current_subdomain_id(subdomain);
        Ok(())
    }

    pub fn set_neighbor_subdomain_id(
        &self,
        elem: PointId,
        side: usize,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let neighbor = self.mesh.neighbor(elem, side)?;
        let subdomain = self.mesh.elem(neighbor)?.subdomain;
        self.assembly(tid)?.set_current_neighbor_subdomain_id(subdomain);
        Ok(())
    }

    pub fn reinit_off_diag_scalars(&self, tid: usize) -> Result<(), CouplingError> {
        let scalars = self.displaced_nl.scalar_var_dofs();
        self.assembly(tid)?.prepare_off_diag_scalar(scalars);
        Ok(())
    }

    pub fn prepare_shapes(&self, var: usize, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.copy_shapes(var);
        Ok(())
    }

    pub fn prepare_face_shapes(&self, var: usize, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.copy_face_shapes(var);
        Ok(())
    }

    pub fn prepare_neighbor_shapes(&self, var: usize, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.copy_neighbor_shapes(var);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reinitialization
    // ---------------------------------------------------------------------

    /// Evaluate both systems on `elem` at its quadrature points, nonlinear
    /// first.
    pub fn reinit_elem(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_elem(&self.mesh, elem)?;
        self.reinit_systems_on_elem(elem, ctx.fe(), tid)
    }

    /// Evaluate on `elem` at the physical `points` instead of quadrature points.
    pub fn reinit_elem_phys(
        &self,
        elem: PointId,
        points: &[Vec<f64>],
        tid: usize,
    ) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_at_physical(&self.mesh, elem, points)?;
        self.displaced_nl.prepare(&self.mesh, elem, tid)?;
        self.displaced_aux.prepare(&self.mesh, elem, tid)?;
        ctx.prepare(self.displaced_nl.element_dofs(tid)?);
        self.reinit_systems_on_elem(elem, ctx.fe(), tid)
    }

    /// Evaluate on `elem` at its registered Dirac points.
    ///
    /// Returns `false` without touching the evaluation points when `elem`
    /// has none; kernels are expected to skip the element then.
    pub fn reinit_dirac(&self, elem: PointId, tid: usize) -> Result<bool, CouplingError> {
        let points = self.dirac.points(elem);
        let mut ctx = self.assembly(tid)?;
        if !points.is_empty() {
            ctx.reinit_at_physical(&self.mesh, elem, points)?;
            self.displaced_nl.prepare(&self.mesh, elem, tid)?;
            self.displaced_aux.prepare(&self.mesh, elem, tid)?;
            self.reinit_systems_on_elem(elem, ctx.fe(), tid)?;
        }
        ctx.prepare(self.displaced_nl.element_dofs(tid)?);
        Ok(!points.is_empty())
    }

    fn reinit_systems_on_elem(
        &self,
        elem: PointId,
        fe: &FeValues,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.displaced_nl.reinit_elem(&self.mesh, elem, fe, tid)?;
        self.displaced_aux.reinit_elem(&self.mesh, elem, fe, tid)
    }

    pub fn reinit_elem_face(
        &self,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_elem_face(&self.mesh, elem, side)?;
        self.displaced_nl
            .reinit_elem_face(&self.mesh, elem, side, bid, ctx.fe_face(), tid)?;
        self.displaced_aux
            .reinit_elem_face(&self.mesh, elem, side, bid, ctx.fe_face(), tid)
    }

    pub fn reinit_node(&self, node: PointId, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.reinit_node(&self.mesh, node)?;
        self.displaced_nl.reinit_node(node, tid)?;
        self.displaced_aux.reinit_node(node, tid)
    }

    pub fn reinit_node_face(&self, node: PointId, bid: BoundaryId, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.reinit_node(&self.mesh, node)?;
        self.displaced_nl.reinit_node_face(node, bid, tid)?;
        self.displaced_aux.reinit_node_face(node, bid, tid)
    }

    pub fn reinit_nodes(&self, nodes: &[PointId], tid: usize) -> Result<(), CouplingError> {
        self.check_tid(tid)?;
        self.displaced_nl.reinit_nodes(nodes, tid)?;
        self.displaced_aux.reinit_nodes(nodes, tid)
    }

    pub fn reinit_nodes_neighbor(&self, nodes: &[PointId], tid: usize) -> Result<(), CouplingError> {
        self.check_tid(tid)?;
        self.displaced_nl.reinit_nodes_neighbor(nodes, tid)?;
        self.displaced_aux.reinit_nodes_neighbor(nodes, tid)
    }

    /// Face of `elem` across `side` together with the neighbor behind it.
    pub fn reinit_neighbor(&self, elem: PointId, side: usize, tid: usize) -> Result<(), CouplingError> {
        let neighbor = self.mesh.neighbor(elem, side)?;
        let neighbor_side = self
            .mesh
            .which_neighbor_am_i(neighbor, elem)
            .ok_or(CouplingError::MissingNeighbor { elem, side })?;

        let mut ctx = self.assembly(tid)?;
        ctx.reinit_elem_and_neighbor(&self.mesh, elem, side, neighbor, neighbor_side)?;
        self.displaced_nl.prepare_neighbor(&self.mesh, neighbor, tid)?;
        self.displaced_aux.prepare_neighbor(&self.mesh, neighbor, tid)?;
        ctx.prepare_neighbor(self.displaced_nl.neighbor_dofs(tid)?);

        for sys in [&self.displaced_nl, &self.displaced_aux] {
            sys.reinit_elem_face(&self.mesh, elem, side, ANY_BOUNDARY_ID, ctx.fe_face(), tid)?;
        }
        for sys in [&self.displaced_nl, &self.displaced_aux] {
            sys.reinit_neighbor_face(
                &self.mesh,
                neighbor,
                neighbor_side,
                ANY_BOUNDARY_ID,
                ctx.fe_neighbor(),
                tid,
            )?;
        }
        Ok(())
    }

    fn reinit_neighbor_at(
        &self,
        neighbor: PointId,
        neighbor_side: Option<usize>,
        points: &[Vec<f64>],
        tid: usize,
    ) -> Result<(), CouplingError> {
        let mut ctx = self.assembly(tid)?;
        ctx.reinit_neighbor_at_physical(&self.mesh, neighbor, neighbor_side, points)?;
        self.displaced_nl.prepare_neighbor(&self.mesh, neighbor, tid)?;
        self.displaced_aux.prepare_neighbor(&self.mesh, neighbor, tid)?;
        ctx.prepare_neighbor(self.displaced_nl.neighbor_dofs(tid)?);
        for sys in [&self.displaced_nl, &self.displaced_aux] {
            match neighbor_side {
                Some(side) => sys.reinit_neighbor_face(
                    &self.mesh,
                    neighbor,
                    side,
                    ANY_BOUNDARY_ID,
                    ctx.fe_neighbor(),
                    tid,
                )?,
                None => sys.reinit_neighbor(&self.mesh, neighbor, ctx.fe_neighbor(), tid)?,
            }
        }
        Ok(())
    }

    /// Neighbor evaluation at physical points on a known side.
    pub fn reinit_neighbor_phys_on_side(
        &self,
        neighbor: PointId,
        neighbor_side: usize,
        points: &[Vec<f64>],
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.reinit_neighbor_at(neighbor, Some(neighbor_side), points, tid)
    }

    /// Neighbor evaluation at physical points anywhere in the element.
    pub fn reinit_neighbor_phys(
        &self,
        neighbor: PointId,
        points: &[Vec<f64>],
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.reinit_neighbor_at(neighbor, None, points, tid)
    }

    pub fn reinit_scalars(&self, tid: usize) -> Result<(), CouplingError> {
        self.check_tid(tid)?;
        self.displaced_nl.reinit_scalars(tid)?;
        self.displaced_aux.reinit_scalars(tid)
    }

    // ---------------------------------------------------------------------
    // Dirac points
    // ---------------------------------------------------------------------

    pub fn dirac_elements(&self) -> Vec<PointId> {
        self.dirac.elements()
    }

    pub fn clear_dirac_info(&mut self) {
        self.dirac.clear_points();
    }

    // ---------------------------------------------------------------------
    // Residual and Jacobian (pass-through to the thread's context)
    // ---------------------------------------------------------------------

    pub fn add_residual(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.vector_tags();
        self.assembly(tid)?
            .add_residual(self.displaced_nl.tensors(), &tags)
    }

    pub fn add_residual_neighbor(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.vector_tags();
        self.assembly(tid)?
            .add_residual_neighbor(self.displaced_nl.tensors(), &tags)
    }

    pub fn cache_residual(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.vector_tags();
        self.assembly(tid)?.cache_residual(&tags);
        Ok(())
    }

    pub fn cache_residual_neighbor(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.vector_tags();
        self.assembly(tid)?.cache_residual_neighbor(&tags);
        Ok(())
    }

    pub fn add_cached_residual(&self, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?
            .add_cached_residuals(self.displaced_nl.tensors())
    }

    /// Cached time and non-time entries, added straight into `residual`.
    pub fn add_cached_residual_directly(
        &self,
        residual: &mut NumericVector,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let time = self.displaced_nl.time_vector_tag()?;
        let non_time = self.displaced_nl.non_time_vector_tag()?;
        let mut ctx = self.assembly(tid)?;
        ctx.add_cached_residual(residual, time)?;
        ctx.add_cached_residual(residual, non_time)
    }

    /// Overwrite `residual` with the local non-time blocks.
    pub fn set_residual(&self, residual: &mut NumericVector, tid: usize) -> Result<(), CouplingError> {
        let tag = self.displaced_nl.non_time_vector_tag()?;
        self.assembly(tid)?.set_residual(residual, tag)
    }

    pub fn set_residual_neighbor(
        &self,
        residual: &mut NumericVector,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let tag = self.displaced_nl.non_time_vector_tag()?;
        self.assembly(tid)?.set_residual_neighbor(residual, tag)
    }

    pub fn add_jacobian(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?
            .add_jacobian(self.displaced_nl.tensors(), &tags)
    }

    pub fn add_jacobian_nonlocal(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?
            .add_jacobian_nonlocal(self.displaced_nl.tensors(), &tags)
    }

    pub fn add_jacobian_neighbor(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?
            .add_jacobian_neighbor(self.displaced_nl.tensors(), &tags)
    }

    pub fn cache_jacobian(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?.cache_jacobian(&tags);
        Ok(())
    }

    pub fn cache_jacobian_nonlocal(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?.cache_jacobian_nonlocal(&tags);
        Ok(())
    }

    pub fn cache_jacobian_neighbor(&self, tid: usize) -> Result<(), CouplingError> {
        let tags = self.matrix_tags();
        self.assembly(tid)?.cache_jacobian_neighbor(&tags);
        Ok(())
    }

    pub fn add_cached_jacobian(&self, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?
            .add_cached_jacobian(self.displaced_nl.tensors())
    }

    pub fn add_jacobian_block(
        &self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        dof_indices: &[usize],
        tag: TagId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.assembly(tid)?
            .add_jacobian_block(jacobian, ivar, jvar, dof_indices, tag)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_jacobian_block_nonlocal(
        &self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        idof_indices: &[usize],
        jdof_indices: &[usize],
        tag: TagId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.assembly(tid)?.add_jacobian_block_nonlocal(
            jacobian,
            ivar,
            jvar,
            idof_indices,
            jdof_indices,
            tag,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_jacobian_neighbor_block(
        &self,
        jacobian: &mut SparseMatrix,
        ivar: usize,
        jvar: usize,
        dof_indices: &[usize],
        neighbor_dof_indices: &[usize],
        tag: TagId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.assembly(tid)?.add_jacobian_neighbor_block(
            jacobian,
            ivar,
            jvar,
            dof_indices,
            neighbor_dof_indices,
            tag,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;
    use crate::problem::FeProblem;

    fn setup() -> (Arc<FeProblem>, DisplacedProblem) {
        let reference = Arc::new(FeProblem::new("ref", generation::line(2, 2.0).unwrap(), 2));
        reference.add_variable(VariableSpec::lagrange("disp_x")).unwrap();
        reference.add_aux_variable(VariableSpec::monomial("stress")).unwrap();
        reference.init().unwrap();
        let cfg = DisplacedProblemConfig::new(["disp_x"]).with_threads(2);
        let mut displaced = DisplacedProblem::new(reference.clone(), cfg).unwrap();
        displaced.init().unwrap();
        (reference, displaced)
    }

    #[test]
    fn storage_lookup_prefers_nonlinear_then_aux() {
        let (_reference, displaced) = setup();
        assert_eq!(displaced.get_variable(0, "disp_x").unwrap().kind, VariableKind::Nonlinear);
        assert_eq!(displaced.get_variable(1, "stress").unwrap().kind, VariableKind::Auxiliary);
        assert_eq!(
            displaced.get_variable(0, "nope").unwrap_err(),
            CouplingError::VariableNotFound("nope".into())
        );
        assert_eq!(
            displaced.system_for("nope").unwrap_err(),
            CouplingError::SystemNotFound("nope".into())
        );
        assert!(matches!(
            displaced.get_variable(2, "disp_x"),
            Err(CouplingError::ThreadOutOfRange { tid: 2, n_threads: 2 })
        ));
        assert!(matches!(
            displaced.get_vector_variable(0, "disp_x"),
            Err(CouplingError::VariableTypeMismatch { .. })
        ));
    }

    #[test]
    fn sync_rejects_wrong_sizes_without_writing() {
        let (_reference, mut displaced) = setup();
        let nl = NumericVector::from_vec(vec![1.0, 2.0, 3.0]);
        let bad_aux = NumericVector::new(7);
        let err = displaced.sync_solutions_with(&nl, &bad_aux).unwrap_err();
        assert!(matches!(err, CouplingError::SolutionSizeMismatch { expected: 2, found: 7, .. }));
        assert_eq!(displaced.nl().solution().as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn prepare_skips_jacobian_when_constant() {
        let (reference, displaced) = setup();
        let elem = PointId::new(4).unwrap();
        displaced.prepare(elem, 0).unwrap();
        assert!(displaced.assembly(0).unwrap().jacobian_prepared());

        reference.set_const_jacobian(true);
        reference.compute_jacobian().unwrap();
        displaced.prepare(elem, 0).unwrap();
        assert!(!displaced.assembly(0).unwrap().jacobian_prepared());
    }

    #[test]
    fn extra_send_list_follows_reference_ghosting() {
        let (reference, mut displaced) = setup();
        reference.add_ghosted_elem(PointId::new(5).unwrap());
        displaced.mesh_changed().unwrap();
        assert_eq!(displaced.nl().dof_map().send_list(), &[1, 2]);
        assert_eq!(displaced.aux().dof_map().send_list(), &[1]);
    }
}
