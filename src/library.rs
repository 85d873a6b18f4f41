//! Per-library indexing of shader modules.
//!
//! Registering a module builds its link index in a single deterministic
//! pass: internal-linkage symbols get the library identifier prepended
//! (external symbols are the join points across libraries), every
//! defined function gets a [`FunctionLinkInfo`] recording what it calls
//! and which globals and resources it touches, and the module's
//! constructor list is folded into the call sets so that pulling any
//! user of a global into a link transitively pulls the global's
//! initializer.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, trace};

use crate::ir::{FuncId, GlobalId, Linkage, Module, ResourceDesc};
use crate::profile::ShaderKind;

/// Link-time dependency record for one defined function.
#[derive(Debug)]
pub struct FunctionLinkInfo {
    pub func: FuncId,
    /// Callees, including shader-operation intrinsics and declarations
    /// of functions defined in other libraries.
    pub used_functions: HashSet<FuncId>,
    pub used_globals: HashSet<GlobalId>,
    /// The resource-backed subset of `used_globals`.
    pub used_resources: HashSet<GlobalId>,
}

impl FunctionLinkInfo {
    fn new(func: FuncId) -> Self {
        Self {
            func,
            used_functions: HashSet::new(),
            used_globals: HashSet::new(),
            used_resources: HashSet::new(),
        }
    }
}

/// A registered shader library: one module plus its link index.
pub struct ShaderLib {
    name: String,
    module: Module,
    functions: HashMap<String, FunctionLinkInfo>,
    /// Range-id global of a binding → its descriptor.
    resource_map: HashMap<GlobalId, ResourceDesc>,
    init_funcs: HashSet<FuncId>,
}

impl ShaderLib {
    pub fn new(name: impl ToString, mut module: Module) -> Self {
        let name = name.to_string();
        module.name = name.clone();
        debug!("{}: indexing library module", name);

        // Rename internal functions; their names join nothing across
        // libraries and must not collide in the registry.
        let fids: Vec<FuncId> = module.functions().map(|(id, _)| id).collect();
        for id in fids {
            let f = module.function_mut(id);
            if f.linkage == Linkage::Internal {
                f.name = format!("{}{}", name, f.name);
            }
        }

        let mut functions: HashMap<String, FunctionLinkInfo> = HashMap::new();
        for (id, f) in module.functions() {
            if f.is_declaration() {
                continue;
            }
            functions.insert(f.name.clone(), FunctionLinkInfo::new(id));
        }

        // Call sets, from call instructions only. Constant uses of a
        // function (constructor-list entries) are not calls.
        for (_, f) in module.functions() {
            if f.is_declaration() {
                continue;
            }
            let mut callees: HashSet<FuncId> = HashSet::new();
            for b in &f.blocks {
                for &i in &b.insts {
                    if let crate::ir::Inst::Call { callee, .. } = &f.insts[i as usize] {
                        callees.insert(*callee);
                    }
                }
            }
            if let Some(li) = functions.get_mut(&f.name) {
                li.used_functions.extend(callees);
            }
        }

        // A hull shader's patch-constant companion rides along with the
        // entry even though no call instruction names it.
        for (id, f) in module.functions() {
            if let Some(props) = module.function_props(id) {
                if props.shader_kind == ShaderKind::Hull {
                    if let Some(pc) = props.patch_constant_func {
                        if let Some(li) = functions.get_mut(&f.name) {
                            li.used_functions.insert(pc);
                        }
                    }
                }
            }
        }

        // Rename internal globals, then chart which functions use each
        // global, walking use chains through initializer constants.
        let gids: Vec<GlobalId> = module.globals().map(|(id, _)| id).collect();
        for id in gids.iter().copied() {
            let g = module.global_mut(id);
            if g.linkage == Linkage::Internal {
                g.name = format!("{}{}", name, g.name);
            }
        }
        for id in gids {
            for fid in module.functions_using_global(id) {
                let fname = &module.function(fid).name;
                if let Some(li) = functions.get_mut(fname) {
                    li.used_globals.insert(id);
                }
            }
        }

        let mut resource_map = HashMap::new();
        for desc in module.resources.iter() {
            resource_map.insert(desc.symbol, desc.clone());
        }
        for li in functions.values_mut() {
            li.used_resources = li
                .used_globals
                .iter()
                .copied()
                .filter(|g| resource_map.contains_key(g))
                .collect();
        }

        // Static initializers from the constructor list. Entries must be
        // non-null and of void () type.
        let mut init_funcs: HashSet<FuncId> = HashSet::new();
        for entry in &module.ctors {
            let Some(ctor) = entry.func else {
                continue;
            };
            let f = module.function(ctor);
            if !f.ty.is_void_no_args() {
                trace!("{}: skipping constructor {} of non-void() type", name, f);
                continue;
            }
            init_funcs.insert(ctor);
        }

        // Any function that uses a global belonging to an initializer
        // must call that initializer, so the closure walk pulls it in.
        for &ctor in &init_funcs {
            let ctor_name = module.function(ctor).name.clone();
            let used: Vec<GlobalId> = functions
                .get(&ctor_name)
                .map(|li| li.used_globals.iter().copied().collect())
                .unwrap_or_default();
            for g in used {
                for fid in module.functions_using_global(g) {
                    if fid == ctor {
                        continue;
                    }
                    let fname = &module.function(fid).name;
                    if let Some(li) = functions.get_mut(fname) {
                        li.used_functions.insert(ctor);
                    }
                }
            }
        }

        debug!(
            "{}: indexed {} definitions, {} resources, {} initializers",
            name,
            functions.len(),
            resource_map.len(),
            init_funcs.len()
        );

        Self {
            name,
            module,
            functions,
            resource_map,
            init_funcs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn link_info(&self, name: &str) -> Option<&FunctionLinkInfo> {
        self.functions.get(name)
    }

    pub fn function_table(&self) -> &HashMap<String, FunctionLinkInfo> {
        &self.functions
    }

    pub fn is_init_func(&self, f: FuncId) -> bool {
        self.init_funcs.contains(&f)
    }

    pub fn is_resource_global(&self, g: GlobalId) -> bool {
        self.resource_map.contains_key(&g)
    }

    pub fn resource(&self, g: GlobalId) -> Option<&ResourceDesc> {
        self.resource_map.get(&g)
    }
}

impl fmt::Display for ShaderLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
