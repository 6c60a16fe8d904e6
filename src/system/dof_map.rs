//! Degree-of-freedom numbering for one system on one mesh.
//!
//! Dofs are numbered variable by variable. Nodal variables take consecutive
//! indices per node (one per component) in mesh node order; elemental
//! variables take them per element in id order; scalar variables get `order`
//! trailing indices. Two meshes with identical topology therefore produce
//! identical maps, which is what keeps a displaced system aligned with its
//! reference system.

use super::variable::{Variable, VariableFamily};
use crate::mesh::Mesh;
use crate::topology::PointId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Callback extending the send list with dofs needed off-process.
pub type ExtraSendListFn = Arc<dyn Fn(&DofMap, &mut Vec<usize>) + Send + Sync>;

/// Global dof numbering plus the parallel send list.
#[derive(Clone, Default)]
pub struct DofMap {
    n_dofs: usize,
    node_dofs: HashMap<(PointId, usize), Vec<usize>>,
    elem_dofs: HashMap<(PointId, usize), Vec<usize>>,
    scalar_dofs: BTreeMap<usize, Vec<usize>>,
    elem_support: BTreeMap<PointId, Vec<usize>>,
    send_list: Vec<usize>,
    extra_send_list: Option<ExtraSendListFn>,
}

impl fmt::Debug for DofMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DofMap")
            .field("n_dofs", &self.n_dofs)
            .field("send_list", &self.send_list.len())
            .field("extra_send_list", &self.extra_send_list.is_some())
            .finish()
    }
}

impl DofMap {
    /// Number `variables` on `mesh`, keeping any attached send-list callback.
    pub fn distribute_dofs(&mut self, mesh: &Mesh, variables: &[Variable]) {
        let node_subdomains = mesh.node_subdomains();
        let mut next = 0usize;
        let mut take = |n: usize| {
            let dofs: Vec<usize> = (next..next + n).collect();
            next += n;
            dofs
        };

        self.node_dofs.clear();
        self.elem_dofs.clear();
        self.scalar_dofs.clear();
        for var in variables {
            match var.family {
                VariableFamily::Lagrange => {
                    for &node in mesh.node_ids() {
                        let active = node_subdomains
                            .get(&node)
                            .is_some_and(|subs| subs.iter().any(|&s| var.active_on(s)));
                        if active {
                            self.node_dofs
                                .insert((node, var.number), take(var.n_components));
                        }
                    }
                }
                VariableFamily::Monomial => {
                    for (elem, e) in mesh.elements() {
                        if var.active_on(e.subdomain) {
                            self.elem_dofs
                                .insert((elem, var.number), take(var.n_components));
                        }
                    }
                }
                VariableFamily::Scalar => {
                    self.scalar_dofs.insert(var.number, take(var.n_components));
                }
            }
        }
        self.n_dofs = next;

        self.elem_support.clear();
        for (elem, e) in mesh.elements() {
            let mut support = BTreeSet::new();
            for var in variables {
                support.extend(self.element_dofs(elem, &e.nodes, var));
            }
            self.elem_support.insert(elem, support.into_iter().collect());
        }
        self.send_list.clear();
    }

    #[inline]
    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    /// Dofs of `var` at `node`, one per component.
    pub fn node_dofs(&self, node: PointId, var: usize) -> Option<&[usize]> {
        self.node_dofs.get(&(node, var)).map(Vec::as_slice)
    }

    /// Dofs of elemental `var` on `elem`, one per component.
    pub fn elem_dofs(&self, elem: PointId, var: usize) -> Option<&[usize]> {
        self.elem_dofs.get(&(elem, var)).map(Vec::as_slice)
    }

    /// Dofs of scalar `var`.
    pub fn scalar_dofs(&self, var: usize) -> &[usize] {
        self.scalar_dofs.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every dof of `var`, sorted.
    pub fn variable_dofs(&self, var: usize) -> Vec<usize> {
        let mut dofs: Vec<usize> = self
            .node_dofs
            .iter()
            .chain(&self.elem_dofs)
            .filter(|((_, v), _)| *v == var)
            .flat_map(|(_, d)| d.iter().copied())
            .chain(self.scalar_dofs(var).iter().copied())
            .collect();
        dofs.sort_unstable();
        dofs
    }

    /// Dofs of `var` on an element with connectivity `nodes`.
    ///
    /// Nodal variables are ordered component-major: all nodes of component
    /// zero first. Scalar variables have no element dofs.
    pub fn element_dofs(&self, elem: PointId, nodes: &[PointId], var: &Variable) -> Vec<usize> {
        match var.family {
            VariableFamily::Lagrange => {
                let mut out = Vec::with_capacity(nodes.len() * var.n_components);
                for c in 0..var.n_components {
                    for &node in nodes {
                        if let Some(d) = self.node_dofs(node, var.number).and_then(|d| d.get(c)) {
                            out.push(*d);
                        }
                    }
                }
                out
            }
            VariableFamily::Monomial => self
                .elem_dofs(elem, var.number)
                .map(<[usize]>::to_vec)
                .unwrap_or_default(),
            VariableFamily::Scalar => Vec::new(),
        }
    }

    /// Every dof supported on `elem`, across all variables.
    pub fn element_support(&self, elem: PointId) -> &[usize] {
        self.elem_support.get(&elem).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register a callback run whenever the send list is prepared.
    pub fn attach_extra_send_list_function(&mut self, f: ExtraSendListFn) {
        self.extra_send_list = Some(f);
    }

    pub fn has_extra_send_list_function(&self) -> bool {
        self.extra_send_list.is_some()
    }

    /// Queue `dofs` for sending.
    pub fn add_to_send_list(&mut self, dofs: &[usize]) {
        self.send_list.extend_from_slice(dofs);
    }

    /// Run the extra send-list callback, then sort and deduplicate.
    pub fn prepare_send_list(&mut self) {
        let mut list = std::mem::take(&mut self.send_list);
        if let Some(extra) = self.extra_send_list.clone() {
            extra(self, &mut list);
        }
        list.retain(|&d| d < self.n_dofs);
        list.sort_unstable();
        list.dedup();
        self.send_list = list;
    }

    pub fn send_list(&self) -> &[usize] {
        &self.send_list
    }

    /// Same numbering, ignoring send lists and callbacks.
    pub fn same_layout(&self, other: &DofMap) -> bool {
        self.n_dofs == other.n_dofs
            && self.node_dofs == other.node_dofs
            && self.elem_dofs == other.elem_dofs
            && self.scalar_dofs == other.scalar_dofs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;
    use crate::system::variable::{VariableKind, VariableSpec};

    fn vars(specs: Vec<VariableSpec>) -> Vec<Variable> {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, s)| Variable::from_spec(s, i, VariableKind::Nonlinear))
            .collect()
    }

    #[test]
    fn numbering_is_variable_major() {
        let mesh = generation::line(2, 2.0).unwrap();
        let vars = vars(vec![
            VariableSpec::lagrange("u"),
            VariableSpec::monomial("p"),
            VariableSpec::scalar("lambda", 2),
        ]);
        let mut map = DofMap::default();
        map.distribute_dofs(&mesh, &vars);
        assert_eq!(map.n_dofs(), 3 + 2 + 2);
        let n3 = PointId::new(3).unwrap();
        assert_eq!(map.node_dofs(n3, 0), Some(&[2][..]));
        assert_eq!(map.elem_dofs(PointId::new(4).unwrap(), 1), Some(&[3][..]));
        assert_eq!(map.scalar_dofs(2), &[5, 6]);
    }

    #[test]
    fn vector_element_dofs_are_component_major() {
        let mesh = generation::line(1, 1.0).unwrap();
        let vars = vars(vec![VariableSpec::vector("vel", 2)]);
        let mut map = DofMap::default();
        map.distribute_dofs(&mesh, &vars);
        let (elem, e) = mesh.elements().next().unwrap();
        assert_eq!(map.element_dofs(elem, &e.nodes, &vars[0]), vec![0, 2, 1, 3]);
    }

    #[test]
    fn extra_send_list_runs_on_prepare() {
        let mesh = generation::line(2, 2.0).unwrap();
        let vars = vars(vec![VariableSpec::lagrange("u")]);
        let mut map = DofMap::default();
        map.attach_extra_send_list_function(Arc::new(|map: &DofMap, list: &mut Vec<usize>| {
            list.extend_from_slice(map.element_support(PointId::new(5).unwrap()));
        }));
        map.distribute_dofs(&mesh, &vars);
        map.add_to_send_list(&[2, 99]);
        map.prepare_send_list();
        assert_eq!(map.send_list(), &[1, 2]);
        assert!(map.has_extra_send_list_function());
    }
}
