use crate::errors::BayesError;
use crate::latent::Owner;
use fnv::FnvHashMap as HashMap;
use nalgebra::DVector;

/// Ordered, named parameters of one model error or noise model
///
/// A name is first *defined*, then *set*. The dimension of a parameter
/// is fixed by `define_with_dim` or by its first assignment; a scalar is
/// a vector of length one.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    slots: Vec<ParameterSlot>,
}

#[derive(Debug, Clone)]
struct ParameterSlot {
    name: String,
    dim: Option<usize>,
    value: Option<DVector<f64>>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list with all `names` defined, none set
    pub fn with_names(names: &[&str]) -> anyhow::Result<Self> {
        let mut ret = Self::new();
        for name in names {
            ret.define(name)?;
        }
        Ok(ret)
    }

    pub fn define(&mut self, name: &str) -> anyhow::Result<()> {
        self.define_slot(name, None)
    }

    pub fn define_with_dim(&mut self, name: &str, dim: usize) -> anyhow::Result<()> {
        if dim == 0 {
            anyhow::bail!(BayesError::Dimension(format!(
                "parameter `{}` can't have zero dimension",
                name
            )));
        }
        self.define_slot(name, Some(dim))
    }

    fn define_slot(&mut self, name: &str, dim: Option<usize>) -> anyhow::Result<()> {
        if self.contains(name) {
            anyhow::bail!(BayesError::Configuration(format!(
                "parameter `{}` is already defined",
                name
            )));
        }
        self.slots.push(ParameterSlot {
            name: name.to_string(),
            dim,
            value: None,
        });
        Ok(())
    }

    /// Assign a value; defines `name` if needed
    pub fn set(&mut self, name: &str, value: DVector<f64>) -> anyhow::Result<()> {
        if !self.contains(name) {
            self.define(name)?;
        }
        let slot = self.slot_mut(name)?;
        match slot.dim {
            Some(dim) if dim != value.len() => {
                anyhow::bail!(BayesError::Dimension(format!(
                    "parameter `{}` has dimension {}, got a value of length {}",
                    name,
                    dim,
                    value.len()
                )));
            }
            Some(_) => {}
            None => slot.dim = Some(value.len()),
        }
        slot.value = Some(value);
        Ok(())
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        self.set(name, DVector::from_element(1, value))
    }

    /// Copy `values` into an already sized parameter without reallocating
    pub fn assign_slice(&mut self, name: &str, values: &[f64]) -> anyhow::Result<()> {
        if let Some(v) = self
            .slot_mut(name)?
            .value
            .as_mut()
            .filter(|v| v.len() == values.len())
        {
            v.copy_from_slice(values);
            return Ok(());
        }
        self.set(name, DVector::from_column_slice(values))
    }

    pub fn get(&self, name: &str) -> anyhow::Result<&DVector<f64>> {
        let slot = self.slot(name)?;
        slot.value.as_ref().ok_or_else(|| {
            BayesError::Configuration(format!("parameter `{}` is defined but not set", name))
                .into()
        })
    }

    /// Value of a parameter of dimension one
    pub fn scalar(&self, name: &str) -> anyhow::Result<f64> {
        let value = self.get(name)?;
        if value.len() != 1 {
            anyhow::bail!(BayesError::Dimension(format!(
                "parameter `{}` is a vector of length {}, not a scalar",
                name,
                value.len()
            )));
        }
        Ok(value[0])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.name == name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.name == name && s.value.is_some())
    }

    /// Known dimension of a parameter, if fixed yet
    pub fn dim(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.dim)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, name: &str) -> anyhow::Result<&ParameterSlot> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| undefined(name))
    }

    fn slot_mut(&mut self, name: &str) -> anyhow::Result<&mut ParameterSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| undefined(name))
    }
}

fn undefined(name: &str) -> anyhow::Error {
    BayesError::Lookup(format!("parameter `{}` is not defined", name)).into()
}

/// Owns every parameter list of a problem; latent links refer into
/// it by [`Owner`] instead of holding references
#[derive(Debug, Default)]
pub struct ParameterArena {
    owners: Vec<Owner>,
    lists: Vec<ParameterList>,
    index: HashMap<Owner, usize>,
}

impl ParameterArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, owner: Owner, list: ParameterList) -> anyhow::Result<()> {
        if self.index.contains_key(&owner) {
            anyhow::bail!(BayesError::Configuration(format!(
                "{} already owns a parameter list",
                owner
            )));
        }
        self.index.insert(owner.clone(), self.lists.len());
        self.owners.push(owner);
        self.lists.push(list);
        Ok(())
    }

    pub fn get(&self, owner: &Owner) -> anyhow::Result<&ParameterList> {
        let &idx = self.index.get(owner).ok_or_else(|| unknown_owner(owner))?;
        Ok(&self.lists[idx])
    }

    pub fn get_mut(&mut self, owner: &Owner) -> anyhow::Result<&mut ParameterList> {
        let &idx = self.index.get(owner).ok_or_else(|| unknown_owner(owner))?;
        Ok(&mut self.lists[idx])
    }

    pub fn contains(&self, owner: &Owner) -> bool {
        self.index.contains_key(owner)
    }

    /// Owners in registration order
    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }
}

fn unknown_owner(owner: &Owner) -> anyhow::Error {
    BayesError::Lookup(format!("{} is not registered", owner)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> BayesError {
        err.downcast_ref::<BayesError>().cloned().expect("BayesError")
    }

    #[test]
    fn define_then_set() -> anyhow::Result<()> {
        let mut prm = ParameterList::with_names(&["A", "B"])?;
        assert!(prm.contains("A"));
        assert!(!prm.is_set("A"));
        assert!(kind(&prm.get("A").unwrap_err()).is_configuration());
        assert!(kind(&prm.get("C").unwrap_err()).is_lookup());

        prm.set_scalar("A", 2.0)?;
        assert_eq!(prm.scalar("A")?, 2.0);
        assert_eq!(prm.dim("A"), Some(1));
        assert_eq!(prm.dim("B"), None);
        assert_eq!(prm.names().collect::<Vec<_>>(), vec!["A", "B"]);
        Ok(())
    }

    #[test]
    fn duplicate_names_fail() -> anyhow::Result<()> {
        let mut prm = ParameterList::new();
        prm.define("E")?;
        assert!(kind(&prm.define("E").unwrap_err()).is_configuration());
        Ok(())
    }

    #[test]
    fn dimension_is_fixed_at_first_assignment() -> anyhow::Result<()> {
        let mut prm = ParameterList::new();
        prm.set("E", DVector::from_vec(vec![1.0, 2.0, 3.0]))?;
        let err = prm.set("E", DVector::from_vec(vec![1.0])).unwrap_err();
        assert!(kind(&err).is_dimension());
        assert!(kind(&prm.scalar("E").unwrap_err()).is_dimension());

        prm.define_with_dim("F", 2)?;
        assert!(prm.set_scalar("F", 1.0).is_err());
        prm.assign_slice("F", &[1.0, 2.0])?;
        assert_eq!(prm.get("F")?.as_slice(), &[1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn arena_lookup() -> anyhow::Result<()> {
        let mut arena = ParameterArena::new();
        let owner = Owner::model_error("0");
        arena.insert(owner.clone(), ParameterList::with_names(&["A"])?)?;
        assert!(arena.insert(owner.clone(), ParameterList::new()).is_err());
        arena.get_mut(&owner)?.set_scalar("A", 1.0)?;
        assert_eq!(arena.get(&owner)?.scalar("A")?, 1.0);
        assert!(kind(&arena.get(&Owner::noise("noise0")).unwrap_err()).is_lookup());
        Ok(())
    }
}
