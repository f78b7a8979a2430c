//! Global latent parameters and their local views.
//!
//! Every [`LatentParameter`] links one global name to one or many
//! `(owner, local name)` pairs. Once the layout is finalized, each latent
//! parameter owns a contiguous `[start, end)` slice of the global vector,
//! assigned in first-registration order. The same order places prior
//! means and Jacobian columns.
//!
//! The length of a latent parameter is read from its linked local
//! parameters when the layout is built, so a value assigned after linking
//! still sizes the slice.

use crate::errors::BayesError;
use crate::parameters::{ParameterArena, ParameterList};
use log::debug;
use nalgebra::DVector;
use std::ops::Range;

/// Who owns a parameter list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    ModelError(String),
    Noise(String),
}

impl Owner {
    pub fn model_error(key: &str) -> Self {
        Self::ModelError(key.to_string())
    }

    pub fn noise(key: &str) -> Self {
        Self::Noise(key.to_string())
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelError(key) => write!(f, "model error `{}`", key),
            Self::Noise(key) => write!(f, "noise model `{}`", key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatentParameter {
    name: String,
    links: Vec<(Owner, String)>,
    // length known when linking, if any
    link_dim: Option<usize>,
}

impl LatentParameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(owner, local name)` pairs in link order
    pub fn links(&self) -> &[(Owner, String)] {
        &self.links
    }
}

/// Frozen placement of every latent parameter in the global vector
#[derive(Debug, Clone, PartialEq)]
pub struct LatentLayout {
    entries: Vec<(String, Range<usize>)>,
    total_dim: usize,
}

impl LatentLayout {
    pub fn total_dim(&self) -> usize {
        self.total_dim
    }

    pub fn global_index_range(&self, name: &str) -> anyhow::Result<Range<usize>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| {
                BayesError::Lookup(format!("`{}` is not a latent parameter", name)).into()
            })
    }

    /// `(global name, range)` in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Range<usize>)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check_vector(&self, vector: &DVector<f64>) -> anyhow::Result<()> {
        if vector.len() != self.total_dim {
            anyhow::bail!(BayesError::Dimension(format!(
                "global parameter vector has length {}, the latent parameters need {}",
                vector.len(),
                self.total_dim
            )));
        }
        Ok(())
    }
}

/// Ordered registry global name -> [`LatentParameter`]
#[derive(Debug, Clone, Default)]
pub struct LatentParameters {
    params: Vec<LatentParameter>,
    layout: Option<LatentLayout>,
}

impl LatentParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `local_name` of `owner` to the global `global_name`
    ///
    /// * `owner_list` - the owner's parameter list; `local_name` must be
    ///   defined there
    pub fn add(
        &mut self,
        global_name: &str,
        owner: Owner,
        local_name: &str,
        owner_list: &ParameterList,
    ) -> anyhow::Result<()> {
        if self.layout.is_some() {
            anyhow::bail!(BayesError::Configuration(format!(
                "can't link `{}` to `{}`: the latent layout is already finalized",
                local_name, global_name
            )));
        }

        if !owner_list.contains(local_name) {
            anyhow::bail!(BayesError::Configuration(format!(
                "`{}` is not defined in the parameter list of {}",
                local_name, owner
            )));
        }

        if let Some(other) = self
            .params
            .iter()
            .find(|p| p.links.iter().any(|(o, l)| *o == owner && l == local_name))
        {
            anyhow::bail!(BayesError::Configuration(format!(
                "`{}` of {} is already linked to `{}`",
                local_name, owner, other.name
            )));
        }

        let local_dim = owner_list.dim(local_name);

        let idx = match self.params.iter().position(|p| p.name == global_name) {
            Some(idx) => idx,
            None => {
                self.params.push(LatentParameter {
                    name: global_name.to_string(),
                    links: vec![],
                    link_dim: None,
                });
                self.params.len() - 1
            }
        };
        let latent = &mut self.params[idx];

        match (latent.link_dim, local_dim) {
            (Some(n), Some(m)) if n != m => {
                anyhow::bail!(BayesError::Dimension(format!(
                    "`{}` has dimension {}, but `{}` of {} has {}",
                    global_name, n, local_name, owner, m
                )));
            }
            (None, Some(m)) => latent.link_dim = Some(m),
            _ => {}
        }

        debug!("latent `{}` <- `{}` of {}", global_name, local_name, owner);
        latent.links.push((owner, local_name.to_string()));
        Ok(())
    }

    pub fn contains(&self, global_name: &str) -> bool {
        self.params.iter().any(|p| p.name == global_name)
    }

    pub fn get(&self, global_name: &str) -> Option<&LatentParameter> {
        self.params.iter().find(|p| p.name == global_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LatentParameter> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.layout.is_some()
    }

    /// Assign the index ranges once; later calls return the same layout
    /// and no further links are accepted.
    ///
    /// Each latent parameter is as long as its sized local parameters in
    /// `arena` (they must agree), or 1 if none of them is sized yet.
    pub fn finalize(&mut self, arena: &ParameterArena) -> anyhow::Result<&LatentLayout> {
        let layout = match self.layout.take() {
            Some(layout) => layout,
            None => build_layout(&self.params, arena)?,
        };
        let layout: &LatentLayout = self.layout.insert(layout);
        Ok(layout)
    }

    pub fn layout(&self) -> Option<&LatentLayout> {
        self.layout.as_ref()
    }

    fn frozen(&self) -> anyhow::Result<&LatentLayout> {
        self.layout.as_ref().ok_or_else(|| {
            BayesError::Configuration("the latent layout is not finalized yet".to_string()).into()
        })
    }

    /// Needs a finalized layout
    pub fn global_index_range(&self, global_name: &str) -> anyhow::Result<Range<usize>> {
        self.frozen()?.global_index_range(global_name)
    }

    /// Finalizes the layout if needed
    pub fn total_dim(&mut self, arena: &ParameterArena) -> anyhow::Result<usize> {
        Ok(self.finalize(arena)?.total_dim())
    }

    /// Write the slices of `vector` into every linked local parameter
    pub fn update(
        &mut self,
        vector: &DVector<f64>,
        arena: &mut ParameterArena,
    ) -> anyhow::Result<()> {
        self.finalize(arena)?;
        let layout = self.frozen()?;
        layout.check_vector(vector)?;

        for (latent, (_, range)) in self.params.iter().zip(layout.entries.iter()) {
            let values = &vector.as_slice()[range.clone()];
            for (owner, local_name) in latent.links.iter() {
                arena.get_mut(owner)?.assign_slice(local_name, values)?;
            }
        }
        Ok(())
    }

    /// `(local name, global name)` pairs relevant to `owner`, in
    /// latent registration order
    pub fn latent_names(&self, owner: &Owner) -> Vec<(String, String)> {
        let mut ret = vec![];
        for latent in self.params.iter() {
            for (o, local_name) in latent.links.iter() {
                if o == owner {
                    ret.push((local_name.clone(), latent.name.clone()));
                }
            }
        }
        ret
    }
}

fn build_layout(
    params: &[LatentParameter],
    arena: &ParameterArena,
) -> anyhow::Result<LatentLayout> {
    let mut lb = 0;
    let mut entries = Vec::with_capacity(params.len());
    for latent in params {
        let range = lb..(lb + resolve_dim(latent, arena)?);
        lb = range.end;
        entries.push((latent.name.clone(), range));
    }
    debug!("finalized {} latent parameters, total {}", entries.len(), lb);
    Ok(LatentLayout {
        entries,
        total_dim: lb,
    })
}

fn resolve_dim(latent: &LatentParameter, arena: &ParameterArena) -> anyhow::Result<usize> {
    let mut first: Option<(usize, &Owner, &str)> = None;
    for (owner, local_name) in latent.links.iter() {
        let Some(m) = arena.get(owner)?.dim(local_name) else {
            continue;
        };
        match first {
            Some((n, first_owner, first_local)) if n != m => {
                anyhow::bail!(BayesError::Dimension(format!(
                    "`{}` has dimension {} through `{}` of {}, but `{}` of {} has {}",
                    latent.name, n, first_local, first_owner, local_name, owner, m
                )));
            }
            None => first = Some((m, owner, local_name.as_str())),
            _ => {}
        }
    }
    Ok(first.map_or(1, |(n, _, _)| n))
}
