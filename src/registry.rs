//! Per-target shared variable registry
//!
//! An arena of [`SharedVar`]s indexed by [`VarId`], with id lookup and
//! parent/child relations stored as indices. The registry finds the
//! variables whose wire format recognizes an inbound line; the engine
//! drives consumption and notification.

use crate::error::{AvrError, Result};
use crate::variable::{SharedVar, VarDef};
use std::collections::HashMap;

/// Index of a variable in its registry's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

pub struct VarRegistry {
    vars: Vec<SharedVar>,
    by_id: HashMap<String, VarId>,
}

impl VarRegistry {
    pub fn new(defs: impl IntoIterator<Item = VarDef>) -> Self {
        let mut reg = Self {
            vars: Vec::new(),
            by_id: HashMap::new(),
        };
        for def in defs {
            reg.insert(def);
        }
        reg
    }

    fn insert(&mut self, def: VarDef) -> VarId {
        let id = VarId(self.vars.len());
        self.by_id.insert(def.id.clone(), id);
        self.vars.push(SharedVar::new(def));
        id
    }

    pub fn lookup(&self, id: &str) -> Result<VarId> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| AvrError::UnknownVar(id.to_string()))
    }

    pub fn get(&self, id: VarId) -> &SharedVar {
        &self.vars[id.0]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut SharedVar {
        &mut self.vars[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.vars.len()).map(VarId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &SharedVar)> {
        self.vars.iter().enumerate().map(|(i, v)| (VarId(i), v))
    }

    /// Block parent of a variable, if it belongs to one
    pub fn parent_of(&self, id: VarId) -> Option<VarId> {
        let parent = self.get(id).def.parent.as_deref()?;
        self.by_id.get(parent).copied()
    }

    /// Children of a block parent, in emission order
    pub fn children_of(&self, id: VarId) -> Vec<VarId> {
        self.get(id)
            .def
            .children
            .iter()
            .filter_map(|c| self.by_id.get(c.as_str()).copied())
            .collect()
    }

    /// All variables whose `matches()` recognizes `line`
    pub fn matching(&self, line: &str) -> Vec<VarId> {
        self.iter()
            .filter(|(_, var)| !var.def.is_block() && var.def.codec.matches(line))
            .map(|(id, _)| id)
            .collect()
    }

    /// Block parents recognizing `line`: a child line or the sentinel
    pub fn matching_block(&self, line: &str) -> Option<VarId> {
        self.iter()
            .find(|(id, var)| {
                var.def.is_block()
                    && (var.def.sentinel.as_deref() == Some(line)
                        || self
                            .children_of(*id)
                            .iter()
                            .any(|c| self.get(*c).def.codec.matches(line)))
            })
            .map(|(id, _)| id)
    }

    /// Variable whose poll command equals `line`, for the server role
    pub fn polled_by(&self, line: &str) -> Option<VarId> {
        self.iter()
            .find(|(_, var)| var.def.codec.poll_cmd().as_deref() == Some(line))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PrefixCodec, TranslationCodec};
    use crate::value::VarKind;
    use std::sync::Arc;

    fn registry() -> VarRegistry {
        VarRegistry::new([
            VarDef::new(
                "power",
                VarKind::Bool,
                Arc::new(TranslationCodec::new([("PWON", true), ("PWSTANDBY", false)])),
            ),
            VarDef::new(
                "volume",
                VarKind::Select {
                    options: vec!["50".into()],
                },
                Arc::new(PrefixCodec::new("MV").exclude("MVMAX")),
            ),
        ])
    }

    #[test]
    fn lookup_and_dispatch() {
        let reg = registry();
        let power = reg.lookup("power").unwrap();
        assert_eq!(reg.matching("PWON"), vec![power]);
        assert!(reg.matching("MVMAX 86").is_empty());
        assert!(matches!(reg.lookup("nope"), Err(AvrError::UnknownVar(_))));
    }

    #[test]
    fn polled_by_finds_poll_command() {
        let reg = registry();
        let volume = reg.lookup("volume").unwrap();
        assert_eq!(reg.polled_by("MV?"), Some(volume));
        assert_eq!(reg.polled_by("MV50"), None);
    }
}
