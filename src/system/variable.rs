//! Variable metadata.

use crate::topology::SubdomainId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which system a variable lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Primary unknown solved by the nonlinear solver.
    Nonlinear,
    /// Auxiliary field computed from other fields.
    Auxiliary,
}

/// Shape of the field carried by a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// One value per dof location.
    Standard,
    /// One value per spatial component per dof location.
    Vector,
    /// Global values not attached to any mesh entity.
    Scalar,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Standard => "standard",
            FieldType::Vector => "vector",
            FieldType::Scalar => "scalar",
        };
        f.write_str(name)
    }
}

/// Where the dofs of a variable live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableFamily {
    /// Nodal, interpolated with the element's linear basis.
    Lagrange,
    /// One constant per element.
    Monomial,
    /// Global dofs; the count is the variable order.
    Scalar,
}

/// Declaration of a variable before it is numbered inside a system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub field_type: FieldType,
    pub family: VariableFamily,
    /// Components per dof location (vector fields) or scalar order.
    pub n_components: usize,
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    /// Restrict the variable to these subdomains; `None` means everywhere.
    #[serde(default)]
    pub active_subdomains: Option<BTreeSet<SubdomainId>>,
}

fn default_scale() -> f64 {
    1.0
}

impl VariableSpec {
    /// Nodal scalar field.
    pub fn lagrange(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Standard,
            family: VariableFamily::Lagrange,
            n_components: 1,
            scale_factor: 1.0,
            active_subdomains: None,
        }
    }

    /// Elementwise constant field.
    pub fn monomial(name: impl Into<String>) -> Self {
        Self {
            family: VariableFamily::Monomial,
            ..Self::lagrange(name)
        }
    }

    /// Nodal vector field with `n_components` components.
    pub fn vector(name: impl Into<String>, n_components: usize) -> Self {
        Self {
            field_type: FieldType::Vector,
            n_components,
            ..Self::lagrange(name)
        }
    }

    /// Global scalar variable with `order` dofs.
    pub fn scalar(name: impl Into<String>, order: usize) -> Self {
        Self {
            field_type: FieldType::Scalar,
            family: VariableFamily::Scalar,
            n_components: order,
            ..Self::lagrange(name)
        }
    }

    pub fn scale(mut self, factor: f64) -> Self {
        self.scale_factor = factor;
        self
    }

    pub fn on_subdomains(mut self, subdomains: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.active_subdomains = Some(subdomains.into_iter().collect());
        self
    }
}

/// A variable numbered inside a [`FieldSystem`](super::FieldSystem).
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Position inside the owning system.
    pub number: usize,
    pub kind: VariableKind,
    pub field_type: FieldType,
    pub family: VariableFamily,
    pub n_components: usize,
    pub scale_factor: f64,
    pub active_subdomains: Option<BTreeSet<SubdomainId>>,
}

impl Variable {
    pub(crate) fn from_spec(spec: VariableSpec, number: usize, kind: VariableKind) -> Self {
        Self {
            name: spec.name,
            number,
            kind,
            field_type: spec.field_type,
            family: spec.family,
            n_components: spec.n_components.max(1),
            scale_factor: spec.scale_factor,
            active_subdomains: spec.active_subdomains,
        }
    }

    /// Whether the variable has dofs on `subdomain`.
    pub fn active_on(&self, subdomain: SubdomainId) -> bool {
        self.active_subdomains
            .as_ref()
            .is_none_or(|set| set.contains(&subdomain))
    }

    /// Whether the variable has dofs at mesh nodes.
    pub fn is_nodal(&self) -> bool {
        self.family == VariableFamily::Lagrange
    }

    /// Global scalar variable.
    pub fn is_scalar(&self) -> bool {
        self.field_type == FieldType::Scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_from_json() {
        let spec: VariableSpec = serde_json::from_str(
            r#"{"name":"disp_x","field_type":"Standard","family":"Lagrange","n_components":1}"#,
        )
        .unwrap();
        assert_eq!(spec, VariableSpec::lagrange("disp_x"));
    }

    #[test]
    fn subdomain_restriction() {
        let var = Variable::from_spec(
            VariableSpec::monomial("p").on_subdomains([2]),
            0,
            VariableKind::Auxiliary,
        );
        assert!(var.active_on(2));
        assert!(!var.active_on(1));
        assert!(!var.is_nodal());
    }
}
