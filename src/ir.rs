//! The in-memory shader-module model the linker operates on.
//!
//! This is deliberately a small slice of a real shader IR: functions
//! with flat instruction arenas and block lists, module globals whose
//! initializers may form constant DAGs, per-class resource tables, a
//! global-constructor list, and the per-function metadata the linker
//! consumes (shader properties, entry signatures, type annotations).
//! Functions and globals are arena-owned and referred to by index
//! newtypes; cross-module references never exist, which is what makes
//! the link job's value map necessary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use bitflags::bitflags;

use crate::ops::OpCache;
use crate::profile::{ShaderKind, ShaderModel};

pub mod clone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadLocalMode {
    #[default]
    NotThreadLocal,
    LocalDynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    I1,
    I32,
    I64,
    F32,
    F64,
    Vec { elem: Box<Ty>, count: u8 },
    Named(String),
}

impl Ty {
    pub fn vec(elem: Ty, count: u8) -> Ty {
        Ty::Vec {
            elem: Box::new(elem),
            count,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::I1 => write!(f, "i1"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::F32 => write!(f, "float"),
            Ty::F64 => write!(f, "double"),
            Ty::Vec { elem, count } => write!(f, "<{} x {}>", count, elem),
            Ty::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnTy {
    pub ret: Ty,
    pub params: Vec<Ty>,
}

impl FnTy {
    pub fn new(ret: Ty, params: Vec<Ty>) -> Self {
        Self { ret, params }
    }

    /// `void ()`, the required shape for a static initializer.
    pub fn is_void_no_args(&self) -> bool {
        self.ret == Ty::Void && self.params.is_empty()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FnAttrs: u32 {
        const ALWAYS_INLINE = 1 << 0;
        const NO_INLINE = 1 << 1;
        const READ_NONE = 1 << 2;
        const READ_ONLY = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int { ty: Ty, value: i64 },
    Float { ty: Ty, value: f64 },
    Zero(Ty),
    Null(Ty),
    Array(Ty, Vec<Const>),
    Struct(Vec<Const>),
    GlobalAddr(GlobalId),
    FuncAddr(FuncId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Function argument, by position.
    Arg(u32),
    /// Result of an instruction, by arena index within the function.
    Inst(u32),
    Const(Const),
    Global(GlobalId),
    Func(FuncId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FAdd,
    FMul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Call {
        callee: FuncId,
        args: Vec<Value>,
        ty: Ty,
    },
    Load {
        src: GlobalId,
        ty: Ty,
    },
    Store {
        dst: GlobalId,
        value: Value,
    },
    Binary {
        op: BinOp,
        lhs: Value,
        rhs: Value,
        ty: Ty,
    },
    Br {
        dest: u32,
    },
    CondBr {
        cond: Value,
        then_dest: u32,
        else_dest: u32,
    },
    Ret {
        value: Option<Value>,
    },
}

impl Inst {
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Inst::Call { args, .. } => args.iter().collect(),
            Inst::Store { value, .. } => vec![value],
            Inst::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::CondBr { cond, .. } => vec![cond],
            Inst::Ret { value } => value.iter().collect(),
            Inst::Load { .. } | Inst::Br { .. } => vec![],
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Inst::Call { args, .. } => args.iter_mut().collect(),
            Inst::Store { value, .. } => vec![value],
            Inst::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::CondBr { cond, .. } => vec![cond],
            Inst::Ret { value } => value.iter_mut().collect(),
            Inst::Load { .. } | Inst::Br { .. } => vec![],
        }
    }

    /// Loads and arithmetic produce a value and have no other effect.
    pub fn is_pure(&self) -> bool {
        matches!(self, Inst::Load { .. } | Inst::Binary { .. })
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// Arena indices of the instructions in this block, in order.
    pub insts: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: FnTy,
    pub linkage: Linkage,
    pub attrs: FnAttrs,
    /// Instruction arena; slots may become unlisted during surgery and
    /// are dropped by [`Function::compact_insts`].
    pub insts: Vec<Inst>,
    /// An empty block list marks a declaration.
    pub blocks: Vec<Block>,
}

impl Function {
    /// A declaration; push blocks and instructions to make a definition.
    pub fn new(name: impl ToString, ty: FnTy, linkage: Linkage) -> Self {
        Self {
            name: name.to_string(),
            ty,
            linkage,
            attrs: FnAttrs::empty(),
            insts: vec![],
            blocks: vec![],
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append an instruction to `block`, returning its arena index.
    pub fn push_inst(&mut self, block: usize, inst: Inst) -> u32 {
        let id = self.insts.len() as u32;
        self.insts.push(inst);
        self.blocks[block].insts.push(id);
        id
    }

    /// Drop unlisted arena slots and renumber instruction references.
    pub fn compact_insts(&mut self) {
        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut kept: Vec<Inst> = Vec::new();
        for b in &self.blocks {
            for &i in &b.insts {
                remap.entry(i).or_insert_with(|| {
                    kept.push(self.insts[i as usize].clone());
                    (kept.len() - 1) as u32
                });
            }
        }
        for b in &mut self.blocks {
            for i in &mut b.insts {
                *i = remap[i];
            }
        }
        for inst in &mut kept {
            for v in inst.values_mut() {
                if let Value::Inst(x) = v {
                    *x = remap[x];
                }
            }
        }
        self.insts = kept;
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    /// Element type of the variable.
    pub ty: Ty,
    pub is_const: bool,
    pub linkage: Linkage,
    pub tls_mode: ThreadLocalMode,
    pub addr_space: u32,
    pub externally_initialized: bool,
    pub init: Option<Const>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Uav,
    Srv,
    CBuffer,
    Sampler,
}

impl ResourceClass {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceClass::Uav => "UAV",
            ResourceClass::Srv => "SRV",
            ResourceClass::CBuffer => "CBuffer",
            ResourceClass::Sampler => "Sampler",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
    TypedBuffer,
    RawBuffer,
    StructuredBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    Default,
    Comparison,
}

/// Class-specific descriptor payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceProps {
    Uav {
        kind: ResourceKind,
        globally_coherent: bool,
        has_counter: bool,
    },
    Srv {
        kind: ResourceKind,
    },
    CBuffer {
        size_in_bytes: u32,
    },
    Sampler {
        kind: SamplerKind,
    },
}

/// One binding-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDesc {
    pub class: ResourceClass,
    /// Source-level resource name; the merge key across libraries.
    pub name: String,
    /// Range-id global backing this binding in the owning module.
    pub symbol: GlobalId,
    /// Element type of the bound view; must match across libraries.
    pub symbol_ty: Ty,
    pub id: u32,
    pub lower_bound: u32,
    pub range_size: u32,
    pub space: u32,
    pub props: ResourceProps,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTables {
    pub uavs: Vec<ResourceDesc>,
    pub srvs: Vec<ResourceDesc>,
    pub cbuffers: Vec<ResourceDesc>,
    pub samplers: Vec<ResourceDesc>,
}

impl ResourceTables {
    pub fn table(&self, class: ResourceClass) -> &Vec<ResourceDesc> {
        match class {
            ResourceClass::Uav => &self.uavs,
            ResourceClass::Srv => &self.srvs,
            ResourceClass::CBuffer => &self.cbuffers,
            ResourceClass::Sampler => &self.samplers,
        }
    }

    pub fn table_mut(&mut self, class: ResourceClass) -> &mut Vec<ResourceDesc> {
        match class {
            ResourceClass::Uav => &mut self.uavs,
            ResourceClass::Srv => &mut self.srvs,
            ResourceClass::CBuffer => &mut self.cbuffers,
            ResourceClass::Sampler => &mut self.samplers,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDesc> {
        self.uavs
            .iter()
            .chain(self.srvs.iter())
            .chain(self.cbuffers.iter())
            .chain(self.samplers.iter())
    }

    pub fn len(&self) -> usize {
        self.uavs.len() + self.srvs.len() + self.cbuffers.len() + self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry in the module's global-constructor list.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CtorEntry {
    pub priority: u32,
    pub func: Option<FuncId>,
}

/// Shader properties attached to a function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProps {
    pub shader_kind: ShaderKind,
    /// Hull shaders name a patch-constant companion.
    pub patch_constant_func: Option<FuncId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SigElement {
    pub semantic: String,
    pub rows: u32,
    pub cols: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntrySignature {
    pub inputs: Vec<SigElement>,
    pub outputs: Vec<SigElement>,
}

/// Type-system annotation for a function, copied across modules at link
/// time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionAnnotation {
    pub param_semantics: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub target_triple: String,
    functions: Vec<Function>,
    globals: Vec<GlobalVar>,
    pub resources: ResourceTables,
    pub ctors: Vec<CtorEntry>,
    func_props: HashMap<FuncId, FunctionProps>,
    signatures: HashMap<FuncId, EntrySignature>,
    annotations: HashMap<FuncId, FunctionAnnotation>,
    pub entry: Option<FuncId>,
    pub shader_model: Option<ShaderModel>,
    /// Properties of the entry, installed by the link job.
    pub entry_props: Option<FunctionProps>,
    /// Signature of the entry, installed by the link job.
    pub entry_signature: Option<EntrySignature>,
    pub metadata: BTreeMap<String, String>,
    pub view_id_state: Vec<u32>,
    pub op_cache: OpCache,
}

impl Module {
    pub fn new(name: impl ToString, target_triple: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            target_triple: target_triple.to_string(),
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, f: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(f);
        id
    }

    pub fn add_global(&mut self, g: GlobalVar) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(g);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVar {
        &self.globals[id.0 as usize]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut GlobalVar {
        &mut self.globals[id.0 as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVar)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    pub(crate) fn functions_raw_mut(&mut self) -> &mut Vec<Function> {
        &mut self.functions
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals().find(|(_, g)| g.name == name).map(|(id, _)| id)
    }

    pub fn set_function_props(&mut self, f: FuncId, props: FunctionProps) {
        self.func_props.insert(f, props);
    }

    pub fn function_props(&self, f: FuncId) -> Option<&FunctionProps> {
        self.func_props.get(&f)
    }

    pub fn set_entry_signature(&mut self, f: FuncId, sig: EntrySignature) {
        self.signatures.insert(f, sig);
    }

    pub fn entry_signature_of(&self, f: FuncId) -> Option<&EntrySignature> {
        self.signatures.get(&f)
    }

    pub fn set_annotation(&mut self, f: FuncId, annotation: FunctionAnnotation) {
        self.annotations.insert(f, annotation);
    }

    pub fn annotation(&self, f: FuncId) -> Option<&FunctionAnnotation> {
        self.annotations.get(&f)
    }

    /// Copy `src_f`'s annotation out of `src`'s type-system store into
    /// this module's store under `dst_f`, if one exists.
    pub fn copy_annotation_from(&mut self, dst_f: FuncId, src: &Module, src_f: FuncId) {
        if let Some(a) = src.annotations.get(&src_f) {
            self.annotations.insert(dst_f, a.clone());
        }
    }

    /// The set of functions that transitively reach an instruction using
    /// `g`. Use chains run through global initializers (constants form a
    /// DAG); walked with an explicit worklist and visited set.
    pub fn functions_using_global(&self, g: GlobalId) -> HashSet<FuncId> {
        let mut roots: HashSet<GlobalId> = HashSet::new();
        let mut work: Vec<GlobalId> = vec![g];
        while let Some(cur) = work.pop() {
            if !roots.insert(cur) {
                continue;
            }
            for (gid, gv) in self.globals() {
                if roots.contains(&gid) {
                    continue;
                }
                if let Some(init) = &gv.init {
                    if const_mentions_global(init, cur) {
                        work.push(gid);
                    }
                }
            }
        }

        let mut out = HashSet::new();
        for (fid, f) in self.functions() {
            'func: for b in &f.blocks {
                for &i in &b.insts {
                    if inst_mentions_any_global(&f.insts[i as usize], &roots) {
                        out.insert(fid);
                        break 'func;
                    }
                }
            }
        }
        out
    }

    /// Insert calls to `callees` (in order) at the front of `f`'s entry
    /// block.
    pub fn insert_calls_at_entry(&mut self, f: FuncId, callees: &[FuncId]) {
        let func = &mut self.functions[f.0 as usize];
        let mut ids = Vec::with_capacity(callees.len());
        for &callee in callees {
            let id = func.insts.len() as u32;
            func.insts.push(Inst::Call {
                callee,
                args: vec![],
                ty: Ty::Void,
            });
            ids.push(id);
        }
        func.blocks[0].insts.splice(0..0, ids);
    }

    /// Replace every use of a load of `g` with `replacement`. The loads
    /// themselves become dead and are left for DCE.
    pub fn replace_global_loads(&mut self, g: GlobalId, replacement: Const) {
        for f in &mut self.functions {
            let loads: HashSet<u32> = f
                .insts
                .iter()
                .enumerate()
                .filter_map(|(i, inst)| {
                    matches!(inst, Inst::Load { src, .. } if *src == g).then_some(i as u32)
                })
                .collect();
            if loads.is_empty() {
                continue;
            }
            for inst in &mut f.insts {
                for v in inst.values_mut() {
                    if matches!(v, Value::Inst(x) if loads.contains(x)) {
                        *v = Value::Const(replacement.clone());
                    }
                }
            }
        }
    }

    /// Keep only the functions in `keep`, compacting the arena and
    /// renumbering every function reference in the module.
    pub fn retain_functions(&mut self, keep: &HashSet<FuncId>) {
        for f in &mut self.functions {
            f.compact_insts();
        }

        let mut remap: HashMap<FuncId, FuncId> = HashMap::new();
        let old = std::mem::take(&mut self.functions);
        let mut kept = Vec::with_capacity(keep.len());
        for (i, f) in old.into_iter().enumerate() {
            let id = FuncId(i as u32);
            if keep.contains(&id) {
                remap.insert(id, FuncId(kept.len() as u32));
                kept.push(f);
            }
        }
        self.functions = kept;

        for f in &mut self.functions {
            for inst in &mut f.insts {
                if let Inst::Call { callee, .. } = inst {
                    *callee = remap[callee];
                }
                for v in inst.values_mut() {
                    remap_value_funcs(v, &remap);
                }
            }
        }
        for g in &mut self.globals {
            if let Some(init) = &mut g.init {
                remap_const_funcs(init, &remap);
            }
        }
        for entry in &mut self.ctors {
            entry.func = entry.func.and_then(|f| remap.get(&f).copied());
        }
        self.entry = self.entry.and_then(|e| remap.get(&e).copied());
        if let Some(props) = &mut self.entry_props {
            props.patch_constant_func = props
                .patch_constant_func
                .and_then(|f| remap.get(&f).copied());
        }
        self.func_props = std::mem::take(&mut self.func_props)
            .into_iter()
            .filter_map(|(k, mut v)| {
                let k = remap.get(&k).copied()?;
                v.patch_constant_func = v.patch_constant_func.and_then(|f| remap.get(&f).copied());
                Some((k, v))
            })
            .collect();
        self.signatures = std::mem::take(&mut self.signatures)
            .into_iter()
            .filter_map(|(k, v)| Some((remap.get(&k).copied()?, v)))
            .collect();
        self.annotations = std::mem::take(&mut self.annotations)
            .into_iter()
            .filter_map(|(k, v)| Some((remap.get(&k).copied()?, v)))
            .collect();
        let cache = OpCache::rebuild(self);
        self.op_cache = cache;
    }

    /// Keep only the globals in `keep`, compacting the arena and
    /// renumbering every global reference in the module.
    pub fn retain_globals(&mut self, keep: &HashSet<GlobalId>) {
        for f in &mut self.functions {
            f.compact_insts();
        }

        let mut remap: HashMap<GlobalId, GlobalId> = HashMap::new();
        let old = std::mem::take(&mut self.globals);
        let mut kept = Vec::with_capacity(keep.len());
        for (i, g) in old.into_iter().enumerate() {
            let id = GlobalId(i as u32);
            if keep.contains(&id) {
                remap.insert(id, GlobalId(kept.len() as u32));
                kept.push(g);
            }
        }
        self.globals = kept;

        for f in &mut self.functions {
            for inst in &mut f.insts {
                match inst {
                    Inst::Load { src, .. } => *src = remap[src],
                    Inst::Store { dst, .. } => *dst = remap[dst],
                    _ => {}
                }
                for v in inst.values_mut() {
                    remap_value_globals(v, &remap);
                }
            }
        }
        for g in &mut self.globals {
            if let Some(init) = &mut g.init {
                remap_const_globals(init, &remap);
            }
        }
        for class in [
            ResourceClass::Uav,
            ResourceClass::Srv,
            ResourceClass::CBuffer,
            ResourceClass::Sampler,
        ] {
            for desc in self.resources.table_mut(class) {
                desc.symbol = remap[&desc.symbol];
            }
        }
    }
}

fn const_mentions_global(c: &Const, g: GlobalId) -> bool {
    match c {
        Const::GlobalAddr(x) => *x == g,
        Const::Array(_, elems) | Const::Struct(elems) => {
            elems.iter().any(|e| const_mentions_global(e, g))
        }
        _ => false,
    }
}

fn const_mentions_any_global(c: &Const, set: &HashSet<GlobalId>) -> bool {
    match c {
        Const::GlobalAddr(x) => set.contains(x),
        Const::Array(_, elems) | Const::Struct(elems) => {
            elems.iter().any(|e| const_mentions_any_global(e, set))
        }
        _ => false,
    }
}

fn value_mentions_any_global(v: &Value, set: &HashSet<GlobalId>) -> bool {
    match v {
        Value::Global(x) => set.contains(x),
        Value::Const(c) => const_mentions_any_global(c, set),
        _ => false,
    }
}

fn inst_mentions_any_global(inst: &Inst, set: &HashSet<GlobalId>) -> bool {
    match inst {
        Inst::Load { src, .. } => set.contains(src),
        Inst::Store { dst, value } => {
            set.contains(dst) || value_mentions_any_global(value, set)
        }
        _ => inst.values().iter().any(|v| value_mentions_any_global(v, set)),
    }
}

fn remap_value_funcs(v: &mut Value, remap: &HashMap<FuncId, FuncId>) {
    match v {
        Value::Func(f) => *f = remap[f],
        Value::Const(c) => remap_const_funcs(c, remap),
        _ => {}
    }
}

fn remap_const_funcs(c: &mut Const, remap: &HashMap<FuncId, FuncId>) {
    match c {
        Const::FuncAddr(f) => *f = remap[f],
        Const::Array(_, elems) | Const::Struct(elems) => {
            for e in elems {
                remap_const_funcs(e, remap);
            }
        }
        _ => {}
    }
}

fn remap_value_globals(v: &mut Value, remap: &HashMap<GlobalId, GlobalId>) {
    match v {
        Value::Global(g) => *g = remap[g],
        Value::Const(c) => remap_const_globals(c, remap),
        _ => {}
    }
}

fn remap_const_globals(c: &mut Const, remap: &HashMap<GlobalId, GlobalId>) {
    match c {
        Const::GlobalAddr(g) => *g = remap[g],
        Const::Array(_, elems) | Const::Struct(elems) => {
            for e in elems {
                remap_const_globals(e, remap);
            }
        }
        _ => {}
    }
}
