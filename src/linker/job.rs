//! Construction of the linked output module.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{LinkError, LinkErrorKind};
use crate::ir::clone::{clone_const, clone_function_into, ValueMap};
use crate::ir::{Const, FnAttrs, FuncId, Function, GlobalId, GlobalVar, Module, ResourceDesc};
use crate::library::ShaderLib;
use crate::passes;
use crate::profile::{ShaderKind, ShaderModel};

/// Transient state for a single link request.
///
/// Static-initializer calls are emitted in closure discovery order (the
/// order definitions entered the job); callers must not rely on it.
pub(crate) struct LinkJob {
    /// (library, function name) pairs to materialize, in discovery order.
    defs: Vec<(Arc<ShaderLib>, String)>,
    /// Shader-operation intrinsics to re-declare verbatim, keyed by name.
    op_funcs: BTreeMap<String, (Arc<ShaderLib>, FuncId)>,
    /// Functions created in the output module, by name.
    new_functions: HashMap<String, FuncId>,
    /// Globals created in the output module, by name.
    new_globals: HashMap<String, GlobalId>,
    /// Merged resource table keyed by resource global name.
    resource_map: BTreeMap<String, (ResourceDesc, GlobalId)>,
    vmap: ValueMap,
}

impl LinkJob {
    pub(crate) fn new() -> Self {
        Self {
            defs: Vec::new(),
            op_funcs: BTreeMap::new(),
            new_functions: HashMap::new(),
            new_globals: HashMap::new(),
            resource_map: BTreeMap::new(),
            vmap: ValueMap::default(),
        }
    }

    pub(crate) fn add_function(&mut self, lib: Arc<ShaderLib>, name: String) {
        self.defs.push((lib, name));
    }

    pub(crate) fn add_op_function(&mut self, lib: Arc<ShaderLib>, f: FuncId) {
        let name = lib.module().function(f).name.clone();
        self.op_funcs.entry(name).or_insert((lib, f));
    }

    pub(crate) fn link(
        mut self,
        entry: &str,
        entry_lib: &Arc<ShaderLib>,
        profile: &str,
    ) -> Result<Module, LinkError> {
        let entry_li = entry_lib
            .link_info(entry)
            .expect("entry resolves in its owning library");
        let entry_fid = entry_li.func;
        let src = entry_lib.module();

        // Validate the entry against the requested profile before any
        // output construction.
        let Some(props) = src.function_props(entry_fid).cloned() else {
            return Err(LinkErrorKind::NoEntryProps {
                name: entry.to_string(),
            }
            .into());
        };
        if matches!(
            props.shader_kind,
            ShaderKind::Library | ShaderKind::Invalid
        ) {
            return Err(LinkErrorKind::InvalidProfile {
                profile: profile.to_string(),
            }
            .into());
        }
        let Some(sm) =
            ShaderModel::get_by_name(profile).filter(|sm| sm.kind() == props.shader_kind)
        else {
            return Err(LinkErrorKind::ShaderKindMismatch {
                profile: profile.to_string(),
                kind: props.shader_kind,
            }
            .into());
        };

        let mut out = Module::new(entry, src.target_triple.clone());
        out.shader_model = Some(sm);
        debug!("{}: materializing {} definitions", entry, self.defs.len());

        // Shader operations are declared verbatim and bind by name; they
        // never pass through the value map.
        for (name, (lib, f)) in &self.op_funcs {
            let f = lib.module().function(*f);
            let mut nf = Function::new(&f.name, f.ty.clone(), f.linkage);
            nf.attrs = f.attrs;
            let id = out.add_function(nf);
            self.new_functions.insert(name.clone(), id);
        }

        // Declarations for every function being materialized. Bodies
        // come later, once globals exist to map.
        let mut init_funcs: Vec<FuncId> = Vec::new();
        for (lib, fname) in &self.defs {
            let li = lib
                .link_info(fname)
                .expect("materialized names resolve in their library");
            let f = lib.module().function(li.func);
            let mut nf = Function::new(&f.name, f.ty.clone(), f.linkage);
            nf.attrs = f.attrs | FnAttrs::ALWAYS_INLINE;
            let id = out.add_function(nf);
            out.copy_annotation_from(id, lib.module(), li.func);
            self.new_functions.insert(f.name.clone(), id);
            if lib.is_init_func(li.func) {
                init_funcs.push(id);
            }
            self.vmap.insert_func(lib.name(), li.func, id);
        }

        // Entry wiring.
        let new_entry = self.new_functions[entry];
        out.entry = Some(new_entry);
        if let Some(sig) = src.entry_signature_of(entry_fid) {
            out.entry_signature = Some(sig.clone());
        }
        out.function_mut(new_entry).attrs.remove(FnAttrs::ALWAYS_INLINE);
        let mut props = props;
        if props.shader_kind == ShaderKind::Hull {
            if let Some(pc) = props.patch_constant_func {
                let pc_name = src.function(pc).name.as_str();
                let new_pc = self.new_functions[pc_name];
                props.patch_constant_func = Some(new_pc);
                out.function_mut(new_pc).attrs.remove(FnAttrs::ALWAYS_INLINE);
            }
        }
        out.entry_props = Some(props);

        // Globals. Redefinitions and resource conflicts are collected so
        // one link reports them all.
        let mut errs: Vec<LinkError> = Vec::new();
        let mut pending_inits: Vec<(GlobalId, Arc<ShaderLib>, Const)> = Vec::new();
        for (lib, fname) in &self.defs {
            let li = lib
                .link_info(fname)
                .expect("materialized names resolve in their library");
            let m = lib.module();
            let mut used: Vec<GlobalId> = li.used_globals.iter().copied().collect();
            used.sort();
            for g in used {
                let gv = m.global(g);
                if let Some(&have) = self.new_globals.get(&gv.name) {
                    if self.vmap.global(lib.name(), g).is_none() {
                        if let Some(res) = lib.resource(g) {
                            // Same resource seen from another library;
                            // merge and share the materialized global.
                            match Self::add_resource(&mut self.resource_map, res, have) {
                                Ok(()) => self.vmap.insert_global(lib.name(), g, have),
                                Err(e) => errs.push(e),
                            }
                        } else {
                            errs.push(
                                LinkErrorKind::RedefineGlobal {
                                    name: gv.name.clone(),
                                }
                                .into(),
                            );
                        }
                    }
                    continue;
                }

                trace!("{}: materializing global {}", entry, gv.name);
                let nid = out.add_global(GlobalVar {
                    name: gv.name.clone(),
                    ty: gv.ty.clone(),
                    is_const: gv.is_const,
                    linkage: gv.linkage,
                    tls_mode: gv.tls_mode,
                    addr_space: gv.addr_space,
                    externally_initialized: gv.externally_initialized,
                    init: None,
                });
                if let Some(init) = &gv.init {
                    pending_inits.push((nid, lib.clone(), init.clone()));
                }
                self.new_globals.insert(gv.name.clone(), nid);
                self.vmap.insert_global(lib.name(), g, nid);
                if let Some(res) = lib.resource(g) {
                    if let Err(e) = Self::add_resource(&mut self.resource_map, res, nid) {
                        errs.push(e);
                    }
                }
            }
        }
        if !errs.is_empty() {
            return Err(LinkError::new_collect(
                LinkErrorKind::LinkFail {
                    entry: entry.to_string(),
                },
                errs,
            ));
        }

        // Initializer constants may reference globals or functions
        // materialized after their owner; rewrite them only now.
        for (nid, lib, init) in &pending_inits {
            self.resolve_const_refs(lib, init)?;
            let mapped = clone_const(init, lib.name(), &self.vmap);
            out.global_mut(*nid).init = Some(mapped);
        }

        // Clone bodies. Callees not yet mapped must exist in the output
        // by name — the closure walk guarantees it.
        for (lib, fname) in &self.defs {
            let li = lib
                .link_info(fname)
                .expect("materialized names resolve in their library");
            for &callee in &li.used_functions {
                if self.vmap.func(lib.name(), callee).is_none() {
                    let cname = &lib.module().function(callee).name;
                    let Some(&nf) = self.new_functions.get(cname) else {
                        return Err(LinkErrorKind::UndefFunction {
                            name: cname.clone(),
                        }
                        .into());
                    };
                    self.vmap.insert_func(lib.name(), callee, nf);
                }
            }
            let new_f = self.new_functions[fname.as_str()];
            clone_function_into(&mut out, new_f, lib.module(), li.func, lib.name(), &self.vmap);
        }

        // Static initializers run before anything else in the entry.
        if !init_funcs.is_empty() {
            debug!(
                "{}: scheduling {} static initializers",
                entry,
                init_funcs.len()
            );
            out.insert_calls_at_entry(new_entry, &init_funcs);
        }

        // Install the merged resource table and fold each binding's
        // assigned identifier into the cloned code.
        let resource_map = std::mem::take(&mut self.resource_map);
        for (_, (desc, ngid)) in resource_map {
            let table = out.resources.table_mut(desc.class);
            let id = table.len() as u32;
            let mut desc = desc;
            desc.id = id;
            desc.symbol = ngid;
            table.push(desc);
            let elem_ty = out.global(ngid).ty.clone();
            out.replace_global_loads(
                ngid,
                Const::Int {
                    ty: elem_ty,
                    value: id as i64,
                },
            );
        }

        passes::run_prepare_pipeline(&mut out);

        Ok(out)
    }

    /// Merge a resource into the table keyed by its global name. An
    /// existing entry must agree on class and bound element type.
    fn add_resource(
        map: &mut BTreeMap<String, (ResourceDesc, GlobalId)>,
        res: &ResourceDesc,
        gv: GlobalId,
    ) -> Result<(), LinkError> {
        if let Some((have, _)) = map.get(&res.name) {
            if have.class != res.class || have.symbol_ty != res.symbol_ty {
                return Err(LinkErrorKind::RedefineResource {
                    class: res.class,
                    name: res.name.clone(),
                }
                .into());
            }
        } else {
            map.insert(res.name.clone(), (res.clone(), gv));
        }
        Ok(())
    }

    /// Seed the value map for every function or global a constant
    /// references, resolving by name when the reference crosses into
    /// another materialized definition.
    fn resolve_const_refs(&mut self, lib: &Arc<ShaderLib>, c: &Const) -> Result<(), LinkError> {
        match c {
            Const::FuncAddr(f) => {
                if self.vmap.func(lib.name(), *f).is_none() {
                    let name = &lib.module().function(*f).name;
                    match self.new_functions.get(name) {
                        Some(&nf) => self.vmap.insert_func(lib.name(), *f, nf),
                        None => {
                            return Err(LinkErrorKind::UndefFunction { name: name.clone() }.into())
                        }
                    }
                }
            }
            Const::GlobalAddr(g) => {
                if self.vmap.global(lib.name(), *g).is_none() {
                    let name = &lib.module().global(*g).name;
                    match self.new_globals.get(name) {
                        Some(&ng) => self.vmap.insert_global(lib.name(), *g, ng),
                        None => return Err(LinkErrorKind::Unknown.into()),
                    }
                }
            }
            Const::Array(_, elems) | Const::Struct(elems) => {
                for e in elems {
                    self.resolve_const_refs(lib, e)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
