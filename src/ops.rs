//! The shader-operation intrinsic table.
//!
//! Shader-operation functions are recognized by a stable naming
//! convention rather than by identity; every library carries its own
//! declarations, and the link job re-declares them verbatim in the
//! output module instead of mapping them through the value map.

use std::collections::BTreeMap;

use crate::ir::{FuncId, Module};

/// Name prefix shared by all shader-operation functions.
pub const OP_NAME_PREFIX: &str = "dx.op.";

/// Whether `name` follows the shader-operation naming convention.
pub fn is_op_func_name(name: &str) -> bool {
    name.starts_with(OP_NAME_PREFIX)
}

/// Per-module cache of shader-operation declarations, refreshed after
/// bulk module surgery invalidates it.
#[derive(Debug, Clone, Default)]
pub struct OpCache {
    funcs: BTreeMap<String, FuncId>,
}

impl OpCache {
    pub fn rebuild(module: &Module) -> OpCache {
        let mut funcs = BTreeMap::new();
        for (id, f) in module.functions() {
            if is_op_func_name(&f.name) {
                funcs.insert(f.name.clone(), id);
            }
        }
        OpCache { funcs }
    }

    pub fn lookup(&self, name: &str) -> Option<FuncId> {
        self.funcs.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}
