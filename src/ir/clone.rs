//! Cross-module function cloning under a value map.

use std::collections::HashMap;

use super::{Const, FuncId, GlobalId, Inst, Module, Value};

/// Maps values in source library modules to values in the output
/// module. Ids are module-local, so keys carry the source library
/// identifier.
#[derive(Debug, Default)]
pub struct ValueMap {
    funcs: HashMap<String, HashMap<FuncId, FuncId>>,
    globals: HashMap<String, HashMap<GlobalId, GlobalId>>,
}

impl ValueMap {
    pub fn insert_func(&mut self, lib: &str, old: FuncId, new: FuncId) {
        self.funcs.entry(lib.to_string()).or_default().insert(old, new);
    }

    pub fn insert_global(&mut self, lib: &str, old: GlobalId, new: GlobalId) {
        self.globals
            .entry(lib.to_string())
            .or_default()
            .insert(old, new);
    }

    pub fn func(&self, lib: &str, old: FuncId) -> Option<FuncId> {
        self.funcs.get(lib).and_then(|m| m.get(&old)).copied()
    }

    pub fn global(&self, lib: &str, old: GlobalId) -> Option<GlobalId> {
        self.globals.get(lib).and_then(|m| m.get(&old)).copied()
    }
}

fn map_func(vmap: &ValueMap, lib: &str, f: FuncId) -> FuncId {
    match vmap.func(lib, f) {
        Some(new) => new,
        None => panic!("unmapped function {} from library {}", f, lib),
    }
}

fn map_global(vmap: &ValueMap, lib: &str, g: GlobalId) -> GlobalId {
    match vmap.global(lib, g) {
        Some(new) => new,
        None => panic!("unmapped global {} from library {}", g, lib),
    }
}

/// Rewrite a constant from library `lib` into output-module terms. All
/// referenced functions and globals must already be mapped.
pub fn clone_const(c: &Const, lib: &str, vmap: &ValueMap) -> Const {
    match c {
        Const::GlobalAddr(g) => Const::GlobalAddr(map_global(vmap, lib, *g)),
        Const::FuncAddr(f) => Const::FuncAddr(map_func(vmap, lib, *f)),
        Const::Array(ty, elems) => Const::Array(
            ty.clone(),
            elems.iter().map(|e| clone_const(e, lib, vmap)).collect(),
        ),
        Const::Struct(elems) => {
            Const::Struct(elems.iter().map(|e| clone_const(e, lib, vmap)).collect())
        }
        other => other.clone(),
    }
}

fn clone_value(v: &Value, lib: &str, vmap: &ValueMap) -> Value {
    match v {
        // Arguments and instruction results map one-to-one by position.
        Value::Arg(i) => Value::Arg(*i),
        Value::Inst(i) => Value::Inst(*i),
        Value::Const(c) => Value::Const(clone_const(c, lib, vmap)),
        Value::Global(g) => Value::Global(map_global(vmap, lib, *g)),
        Value::Func(f) => Value::Func(map_func(vmap, lib, *f)),
    }
}

fn clone_inst(inst: &Inst, lib: &str, vmap: &ValueMap) -> Inst {
    match inst {
        Inst::Call { callee, args, ty } => Inst::Call {
            callee: map_func(vmap, lib, *callee),
            args: args.iter().map(|a| clone_value(a, lib, vmap)).collect(),
            ty: ty.clone(),
        },
        Inst::Load { src, ty } => Inst::Load {
            src: map_global(vmap, lib, *src),
            ty: ty.clone(),
        },
        Inst::Store { dst, value } => Inst::Store {
            dst: map_global(vmap, lib, *dst),
            value: clone_value(value, lib, vmap),
        },
        Inst::Binary { op, lhs, rhs, ty } => Inst::Binary {
            op: *op,
            lhs: clone_value(lhs, lib, vmap),
            rhs: clone_value(rhs, lib, vmap),
            ty: ty.clone(),
        },
        Inst::Br { dest } => Inst::Br { dest: *dest },
        Inst::CondBr {
            cond,
            then_dest,
            else_dest,
        } => Inst::CondBr {
            cond: clone_value(cond, lib, vmap),
            then_dest: *then_dest,
            else_dest: *else_dest,
        },
        Inst::Ret { value } => Inst::Ret {
            value: value.as_ref().map(|v| clone_value(v, lib, vmap)),
        },
    }
}

/// Clone the body of `src_f` (from library module `src`, identified as
/// `lib`) into the declaration `dst_f` of the output module, rewriting
/// function and global references through the value map.
pub fn clone_function_into(
    dst: &mut Module,
    dst_f: FuncId,
    src: &Module,
    src_f: FuncId,
    lib: &str,
    vmap: &ValueMap,
) {
    let sf = src.function(src_f);
    let insts = sf.insts.iter().map(|i| clone_inst(i, lib, vmap)).collect();
    let blocks = sf.blocks.clone();
    let df = dst.function_mut(dst_f);
    df.insts = insts;
    df.blocks = blocks;
}
