//! The canned finalization pipeline run over freshly linked modules.
//!
//! Passes are invoked opaquely, by name, in a fixed order. They are
//! intentionally small: the linker's contract is which passes run and
//! when, not how aggressive each one is.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use tracing::trace;

use crate::ir::{
    BinOp, Block, Const, FnAttrs, FuncId, Function, GlobalId, Inst, Linkage, Module,
    ResourceClass, Value,
};
use crate::ops::OpCache;

pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&self, module: &mut Module);
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn add(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn run(&self, module: &mut Module) {
        for pass in &self.passes {
            trace!("{}: running pass {}", module.name, pass.name());
            pass.run(module);
        }
    }
}

/// The fixed post-link pipeline.
pub fn run_prepare_pipeline(module: &mut Module) {
    let mut pm = PassManager::default();
    pm.add(RefreshOpCache);
    pm.add(AlwaysInline {
        insert_lifetime: false,
    });
    pm.add(DeadCodeElim);
    pm.add(GlobalDce);
    pm.add(SimplifyInst);
    pm.add(SimplifyCfg);
    pm.add(CondenseResources);
    pm.add(ComputeViewIdState);
    pm.add(EmitMetadata);
    pm.run(module);
}

pub struct RefreshOpCache;

impl Pass for RefreshOpCache {
    fn name(&self) -> &'static str {
        "refresh-op-cache"
    }

    fn run(&self, module: &mut Module) {
        let cache = OpCache::rebuild(module);
        module.op_cache = cache;
    }
}

/// Inlines calls to always-inline functions with straight-line bodies,
/// then drops internal helpers that were inlined away.
pub struct AlwaysInline {
    pub insert_lifetime: bool,
}

impl Pass for AlwaysInline {
    fn name(&self) -> &'static str {
        "always-inline"
    }

    fn run(&self, module: &mut Module) {
        for _ in 0..1024 {
            let Some((caller, block, pos)) = find_inline_site(module) else {
                break;
            };
            inline_site(module, caller, block, pos);
        }
        remove_dead_inline_funcs(module);
    }
}

fn find_inline_site(m: &Module) -> Option<(FuncId, usize, usize)> {
    for (fid, f) in m.functions() {
        for (bi, b) in f.blocks.iter().enumerate() {
            for (pos, &iid) in b.insts.iter().enumerate() {
                if let Inst::Call { callee, .. } = &f.insts[iid as usize] {
                    if *callee == fid {
                        continue;
                    }
                    let cf = m.function(*callee);
                    if cf.attrs.contains(FnAttrs::ALWAYS_INLINE)
                        && !cf.is_declaration()
                        && cf.blocks.len() == 1
                    {
                        return Some((fid, bi, pos));
                    }
                }
            }
        }
    }
    None
}

fn inline_site(m: &mut Module, caller: FuncId, bi: usize, pos: usize) {
    let (callee_id, args, call_iid) = {
        let f = m.function(caller);
        let iid = f.blocks[bi].insts[pos];
        let Inst::Call { callee, args, .. } = &f.insts[iid as usize] else {
            unreachable!("inline site is a call");
        };
        (*callee, args.clone(), iid)
    };
    let callee_fn = m.function(callee_id).clone();
    let caller_fn = m.function_mut(caller);

    let mut map: HashMap<u32, u32> = HashMap::new();
    let mut new_ids: Vec<u32> = Vec::new();
    let mut ret_val: Option<Value> = None;
    for &j in &callee_fn.blocks[0].insts {
        let remap = |v: &Value, map: &HashMap<u32, u32>| -> Value {
            match v {
                Value::Arg(i) => args[*i as usize].clone(),
                Value::Inst(k) => Value::Inst(map[k]),
                other => other.clone(),
            }
        };
        let inst = callee_fn.insts[j as usize].clone();
        if let Inst::Ret { value } = &inst {
            ret_val = value.as_ref().map(|v| remap(v, &map));
            continue;
        }
        let mut inst = inst;
        for v in inst.values_mut() {
            let old = v.clone();
            *v = remap(&old, &map);
        }
        caller_fn.insts.push(inst);
        let nid = (caller_fn.insts.len() - 1) as u32;
        map.insert(j, nid);
        new_ids.push(nid);
    }
    caller_fn.blocks[bi].insts.splice(pos..=pos, new_ids);

    if let Some(rv) = ret_val {
        for inst in &mut caller_fn.insts {
            for v in inst.values_mut() {
                if matches!(v, Value::Inst(x) if *x == call_iid) {
                    *v = rv.clone();
                }
            }
        }
    }
}

fn remove_dead_inline_funcs(m: &mut Module) {
    let mut referenced: HashSet<FuncId> = HashSet::new();
    for (_, f) in m.functions() {
        for b in &f.blocks {
            for &i in &b.insts {
                let inst = &f.insts[i as usize];
                if let Inst::Call { callee, .. } = inst {
                    referenced.insert(*callee);
                }
                for v in inst.values() {
                    collect_value_funcs(v, &mut referenced);
                }
            }
        }
    }
    for (_, g) in m.globals() {
        if let Some(init) = &g.init {
            collect_const_funcs(init, &mut referenced);
        }
    }
    for e in &m.ctors {
        if let Some(f) = e.func {
            referenced.insert(f);
        }
    }
    if let Some(e) = m.entry {
        referenced.insert(e);
    }
    if let Some(props) = &m.entry_props {
        if let Some(pc) = props.patch_constant_func {
            referenced.insert(pc);
        }
    }

    let keep: HashSet<FuncId> = m
        .functions()
        .filter(|(id, f)| {
            !(f.attrs.contains(FnAttrs::ALWAYS_INLINE)
                && f.linkage == Linkage::Internal
                && !referenced.contains(id))
        })
        .map(|(id, _)| id)
        .collect();
    if keep.len() != m.function_count() {
        m.retain_functions(&keep);
    }
}

/// Removes pure instructions whose results are unused.
pub struct DeadCodeElim;

impl Pass for DeadCodeElim {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, module: &mut Module) {
        for f in module.functions_raw_mut() {
            dce_function(f);
        }
    }
}

fn dce_function(f: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let used: HashSet<u32> = {
            let insts = &f.insts;
            f.blocks
                .iter()
                .flat_map(|b| b.insts.iter())
                .flat_map(|&i| insts[i as usize].values())
                .filter_map(|v| match v {
                    Value::Inst(x) => Some(*x),
                    _ => None,
                })
                .collect()
        };
        let Function { insts, blocks, .. } = f;
        let mut any = false;
        for b in blocks.iter_mut() {
            let before = b.insts.len();
            b.insts
                .retain(|&i| !(insts[i as usize].is_pure() && !used.contains(&i)));
            if b.insts.len() != before {
                any = true;
            }
        }
        if !any {
            break;
        }
        changed = true;
    }
    changed
}

/// Removes internal functions and globals nothing reachable refers to.
pub struct GlobalDce;

impl Pass for GlobalDce {
    fn name(&self) -> &'static str {
        "global-dce"
    }

    fn run(&self, module: &mut Module) {
        // Functions reachable from the non-discardable roots.
        let mut graph: DiGraph<FuncId, ()> = DiGraph::new();
        let mut nodes: HashMap<FuncId, NodeIndex> = HashMap::new();
        for (id, _) in module.functions() {
            nodes.insert(id, graph.add_node(id));
        }
        for (id, f) in module.functions() {
            let mut targets: HashSet<FuncId> = HashSet::new();
            for b in &f.blocks {
                for &i in &b.insts {
                    let inst = &f.insts[i as usize];
                    if let Inst::Call { callee, .. } = inst {
                        targets.insert(*callee);
                    }
                    for v in inst.values() {
                        collect_value_funcs(v, &mut targets);
                    }
                }
            }
            for t in targets {
                graph.add_edge(nodes[&id], nodes[&t], ());
            }
        }

        let mut roots: Vec<FuncId> = Vec::new();
        if let Some(e) = module.entry {
            roots.push(e);
        }
        if let Some(props) = &module.entry_props {
            if let Some(pc) = props.patch_constant_func {
                roots.push(pc);
            }
        }
        for e in &module.ctors {
            if let Some(f) = e.func {
                roots.push(f);
            }
        }
        for (id, f) in module.functions() {
            if f.linkage == Linkage::External {
                roots.push(id);
            }
        }
        for (_, g) in module.globals() {
            if let Some(init) = &g.init {
                let mut s = HashSet::new();
                collect_const_funcs(init, &mut s);
                roots.extend(s);
            }
        }

        let mut keep: HashSet<FuncId> = HashSet::new();
        for root in roots {
            let mut bfs = Bfs::new(&graph, nodes[&root]);
            while let Some(nx) = bfs.next(&graph) {
                keep.insert(graph[nx]);
            }
        }
        if keep.len() != module.function_count() {
            module.retain_functions(&keep);
        }

        // Globals referenced from live code, live initializers, or the
        // resource tables; external linkage is non-discardable.
        let mut keep_g: HashSet<GlobalId> = HashSet::new();
        for (id, g) in module.globals() {
            if g.linkage == Linkage::External {
                keep_g.insert(id);
            }
        }
        for desc in module.resources.iter() {
            keep_g.insert(desc.symbol);
        }
        for (_, f) in module.functions() {
            for b in &f.blocks {
                for &i in &b.insts {
                    let inst = &f.insts[i as usize];
                    match inst {
                        Inst::Load { src, .. } => {
                            keep_g.insert(*src);
                        }
                        Inst::Store { dst, .. } => {
                            keep_g.insert(*dst);
                        }
                        _ => {}
                    }
                    for v in inst.values() {
                        collect_value_globals(v, &mut keep_g);
                    }
                }
            }
        }
        loop {
            let mut added = false;
            let snapshot: Vec<GlobalId> = keep_g.iter().copied().collect();
            for id in snapshot {
                if let Some(init) = &module.global(id).init {
                    let mut s = HashSet::new();
                    collect_const_globals(init, &mut s);
                    for x in s {
                        if keep_g.insert(x) {
                            added = true;
                        }
                    }
                }
            }
            if !added {
                break;
            }
        }
        if keep_g.len() != module.global_count() {
            module.retain_globals(&keep_g);
        }
    }
}

/// Folds arithmetic over constants.
pub struct SimplifyInst;

impl Pass for SimplifyInst {
    fn name(&self) -> &'static str {
        "simplify-inst"
    }

    fn run(&self, module: &mut Module) {
        for f in module.functions_raw_mut() {
            let mut folded = false;
            for idx in 0..f.insts.len() {
                let replacement: Option<Const> = match &f.insts[idx] {
                    Inst::Binary {
                        op,
                        lhs: Value::Const(Const::Int { ty, value: a }),
                        rhs: Value::Const(Const::Int { value: b, .. }),
                        ..
                    } => {
                        let value = match op {
                            BinOp::Add => a.wrapping_add(*b),
                            BinOp::Sub => a.wrapping_sub(*b),
                            BinOp::Mul => a.wrapping_mul(*b),
                            _ => continue,
                        };
                        Some(Const::Int {
                            ty: ty.clone(),
                            value,
                        })
                    }
                    Inst::Binary {
                        op,
                        lhs: Value::Const(Const::Float { ty, value: a }),
                        rhs: Value::Const(Const::Float { value: b, .. }),
                        ..
                    } => {
                        let value = match op {
                            BinOp::FAdd => a + b,
                            BinOp::FMul => a * b,
                            _ => continue,
                        };
                        Some(Const::Float {
                            ty: ty.clone(),
                            value,
                        })
                    }
                    _ => None,
                };
                let Some(c) = replacement else {
                    continue;
                };
                let id = idx as u32;
                for inst in &mut f.insts {
                    for v in inst.values_mut() {
                        if matches!(v, Value::Inst(x) if *x == id) {
                            *v = Value::Const(c.clone());
                        }
                    }
                }
                folded = true;
            }
            if folded {
                dce_function(f);
            }
        }
    }
}

/// Prunes blocks unreachable from the entry block.
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&self, module: &mut Module) {
        for f in module.functions_raw_mut() {
            if f.blocks.len() <= 1 {
                continue;
            }
            let mut reach: HashSet<u32> = HashSet::new();
            let mut work: Vec<u32> = vec![0];
            while let Some(bi) = work.pop() {
                if !reach.insert(bi) {
                    continue;
                }
                let mut terminated = false;
                for &i in &f.blocks[bi as usize].insts {
                    match &f.insts[i as usize] {
                        Inst::Br { dest } => {
                            work.push(*dest);
                            terminated = true;
                        }
                        Inst::CondBr {
                            then_dest,
                            else_dest,
                            ..
                        } => {
                            work.push(*then_dest);
                            work.push(*else_dest);
                            terminated = true;
                        }
                        Inst::Ret { .. } => {
                            terminated = true;
                        }
                        _ => {}
                    }
                }
                if !terminated && (bi as usize) + 1 < f.blocks.len() {
                    work.push(bi + 1);
                }
            }
            if reach.len() == f.blocks.len() {
                continue;
            }

            let old = std::mem::take(&mut f.blocks);
            let mut remap: HashMap<u32, u32> = HashMap::new();
            let mut kept: Vec<Block> = Vec::new();
            for (i, b) in old.into_iter().enumerate() {
                let i = i as u32;
                if reach.contains(&i) {
                    remap.insert(i, kept.len() as u32);
                    kept.push(b);
                }
            }
            f.blocks = kept;
            f.compact_insts();
            for inst in &mut f.insts {
                match inst {
                    Inst::Br { dest } => *dest = remap[dest],
                    Inst::CondBr {
                        then_dest,
                        else_dest,
                        ..
                    } => {
                        *then_dest = remap[then_dest];
                        *else_dest = remap[else_dest];
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Renumbers each class table densely.
pub struct CondenseResources;

impl Pass for CondenseResources {
    fn name(&self) -> &'static str {
        "condense-resources"
    }

    fn run(&self, module: &mut Module) {
        for class in [
            ResourceClass::Uav,
            ResourceClass::Srv,
            ResourceClass::CBuffer,
            ResourceClass::Sampler,
        ] {
            for (i, desc) in module.resources.table_mut(class).iter_mut().enumerate() {
                desc.id = i as u32;
            }
        }
    }
}

/// One state slot per entry-signature output.
pub struct ComputeViewIdState;

impl Pass for ComputeViewIdState {
    fn name(&self) -> &'static str {
        "compute-view-id-state"
    }

    fn run(&self, module: &mut Module) {
        module.view_id_state = module
            .entry_signature
            .as_ref()
            .map(|sig| vec![0; sig.outputs.len()])
            .unwrap_or_default();
    }
}

/// Writes the module-level named metadata.
pub struct EmitMetadata;

impl Pass for EmitMetadata {
    fn name(&self) -> &'static str {
        "emit-metadata"
    }

    fn run(&self, module: &mut Module) {
        if let Some(e) = module.entry {
            let name = module.function(e).name.clone();
            module.metadata.insert("dx.entryPoints".to_string(), name);
        }
        if let Some(sm) = module.shader_model {
            module
                .metadata
                .insert("dx.shaderModel".to_string(), sm.to_string());
        }
        module.metadata.insert(
            "dx.resources".to_string(),
            format!(
                "uav:{};srv:{};cbuffer:{};sampler:{}",
                module.resources.uavs.len(),
                module.resources.srvs.len(),
                module.resources.cbuffers.len(),
                module.resources.samplers.len()
            ),
        );
        if !module.view_id_state.is_empty() {
            module.metadata.insert(
                "dx.viewIdState".to_string(),
                module.view_id_state.len().to_string(),
            );
        }
    }
}

fn collect_value_funcs(v: &Value, set: &mut HashSet<FuncId>) {
    match v {
        Value::Func(f) => {
            set.insert(*f);
        }
        Value::Const(c) => collect_const_funcs(c, set),
        _ => {}
    }
}

fn collect_const_funcs(c: &Const, set: &mut HashSet<FuncId>) {
    match c {
        Const::FuncAddr(f) => {
            set.insert(*f);
        }
        Const::Array(_, elems) | Const::Struct(elems) => {
            for e in elems {
                collect_const_funcs(e, set);
            }
        }
        _ => {}
    }
}

fn collect_value_globals(v: &Value, set: &mut HashSet<GlobalId>) {
    match v {
        Value::Global(g) => {
            set.insert(*g);
        }
        Value::Const(c) => collect_const_globals(c, set),
        _ => {}
    }
}

fn collect_const_globals(c: &Const, set: &mut HashSet<GlobalId>) {
    match c {
        Const::GlobalAddr(g) => {
            set.insert(*g);
        }
        Const::Array(_, elems) | Const::Struct(elems) => {
            for e in elems {
                collect_const_globals(e, set);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FnTy, Ty};
    use crate::testutil;

    #[test]
    fn always_inline_splices_straight_line_callees() {
        let mut m = testutil::module("m");
        let g = m.add_global(testutil::internal_global("g", Ty::I32, None));
        let callee = m.add_function(testutil::define_internal(
            "store42",
            FnTy::new(Ty::Void, vec![]),
        ));
        m.function_mut(callee).attrs |= FnAttrs::ALWAYS_INLINE;
        m.function_mut(callee).push_inst(
            0,
            Inst::Store {
                dst: g,
                value: Value::Const(Const::Int {
                    ty: Ty::I32,
                    value: 42,
                }),
            },
        );
        testutil::ret_void(&mut m, callee);
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::call_void(&mut m, main, callee);
        testutil::ret_void(&mut m, main);
        m.entry = Some(main);

        AlwaysInline {
            insert_lifetime: false,
        }
        .run(&mut m);

        // The helper was inlined away and dropped.
        assert!(m.find_function("store42").is_none());
        let main = m.entry.unwrap();
        let mf = m.function(main);
        let listed: Vec<&Inst> = mf
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .map(|&i| &mf.insts[i as usize])
            .collect();
        assert!(listed
            .iter()
            .any(|i| matches!(i, Inst::Store { .. })));
        assert!(!listed.iter().any(|i| matches!(i, Inst::Call { .. })));
    }

    #[test]
    fn inline_substitutes_arguments_and_results() {
        let mut m = testutil::module("m");
        let callee = m.add_function(testutil::define_internal(
            "double",
            FnTy::new(Ty::I32, vec![Ty::I32]),
        ));
        m.function_mut(callee).attrs |= FnAttrs::ALWAYS_INLINE;
        {
            let f = m.function_mut(callee);
            let mul = f.push_inst(
                0,
                Inst::Binary {
                    op: BinOp::Mul,
                    lhs: Value::Arg(0),
                    rhs: Value::Const(Const::Int {
                        ty: Ty::I32,
                        value: 2,
                    }),
                    ty: Ty::I32,
                },
            );
            f.push_inst(
                0,
                Inst::Ret {
                    value: Some(Value::Inst(mul)),
                },
            );
        }
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::I32, vec![])));
        {
            let f = m.function_mut(main);
            let call = f.push_inst(
                0,
                Inst::Call {
                    callee,
                    args: vec![Value::Const(Const::Int {
                        ty: Ty::I32,
                        value: 21,
                    })],
                    ty: Ty::I32,
                },
            );
            f.push_inst(
                0,
                Inst::Ret {
                    value: Some(Value::Inst(call)),
                },
            );
        }
        m.entry = Some(main);

        AlwaysInline {
            insert_lifetime: false,
        }
        .run(&mut m);
        SimplifyInst.run(&mut m);

        let main = m.entry.unwrap();
        let mf = m.function(main);
        let ret = &mf.insts[*mf.blocks[0].insts.last().unwrap() as usize];
        assert_eq!(
            *ret,
            Inst::Ret {
                value: Some(Value::Const(Const::Int {
                    ty: Ty::I32,
                    value: 42
                }))
            }
        );
    }

    #[test]
    fn dce_drops_unused_pure_instructions() {
        let mut m = testutil::module("m");
        let g = m.add_global(testutil::global("g", Ty::I32, None));
        let f = m.add_function(testutil::define("f", FnTy::new(Ty::Void, vec![])));
        m.function_mut(f).push_inst(
            0,
            Inst::Load {
                src: g,
                ty: Ty::I32,
            },
        );
        testutil::ret_void(&mut m, f);

        DeadCodeElim.run(&mut m);
        let func = m.function(f);
        assert_eq!(func.blocks[0].insts.len(), 1);
        assert!(matches!(
            func.insts[func.blocks[0].insts[0] as usize],
            Inst::Ret { .. }
        ));
    }

    #[test]
    fn global_dce_keeps_external_and_referenced_symbols() {
        let mut m = testutil::module("m");
        m.add_global(testutil::internal_global("dead", Ty::I32, None));
        let live_g = m.add_global(testutil::internal_global("live", Ty::I32, None));
        m.add_global(testutil::global("ext", Ty::I32, None));
        let dead_f = m.add_function(testutil::define_internal(
            "dead_fn",
            FnTy::new(Ty::Void, vec![]),
        ));
        testutil::ret_void(&mut m, dead_f);
        let ext_f = m.add_function(testutil::define("ext_fn", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, ext_f);
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        m.function_mut(main).push_inst(
            0,
            Inst::Store {
                dst: live_g,
                value: Value::Const(Const::Int {
                    ty: Ty::I32,
                    value: 1,
                }),
            },
        );
        testutil::ret_void(&mut m, main);
        m.entry = Some(main);

        GlobalDce.run(&mut m);

        assert!(m.find_function("dead_fn").is_none());
        assert!(m.find_function("ext_fn").is_some());
        assert!(m.find_global("dead").is_none());
        assert!(m.find_global("live").is_some());
        assert!(m.find_global("ext").is_some());
    }

    #[test]
    fn simplify_cfg_prunes_unreachable_blocks() {
        let mut m = testutil::module("m");
        let f = m.add_function(testutil::define("f", FnTy::new(Ty::Void, vec![])));
        {
            let func = m.function_mut(f);
            func.blocks.push(Block::default());
            func.blocks.push(Block::default());
            // Block 0 jumps straight to block 2; block 1 is dead.
            func.push_inst(0, Inst::Br { dest: 2 });
            func.push_inst(1, Inst::Ret { value: None });
            func.push_inst(2, Inst::Ret { value: None });
        }

        SimplifyCfg.run(&mut m);
        let func = m.function(f);
        assert_eq!(func.blocks.len(), 2);
        let first = &func.insts[func.blocks[0].insts[0] as usize];
        assert_eq!(*first, Inst::Br { dest: 1 });
    }

    #[test]
    fn condense_renumbers_densely() {
        let mut m = testutil::module("m");
        let s0 = m.add_global(testutil::global("a", Ty::I32, None));
        let s1 = m.add_global(testutil::global("b", Ty::I32, None));
        let mut d0 = testutil::srv("a", s0, Ty::vec(Ty::F32, 4));
        d0.id = 7;
        let mut d1 = testutil::srv("b", s1, Ty::vec(Ty::F32, 4));
        d1.id = 9;
        m.resources.srvs.push(d0);
        m.resources.srvs.push(d1);

        CondenseResources.run(&mut m);
        assert_eq!(m.resources.srvs[0].id, 0);
        assert_eq!(m.resources.srvs[1].id, 1);
    }
}
