//! The linker facade and its symbol registry.
//!
//! The facade owns every registered library behind an [`Arc`]; the
//! registry maps each defined function name to the library that owns
//! it. Attaching a library is atomic with respect to name collisions:
//! every collision is reported before the attach rolls back. Linking
//! never mutates the facade — a failed link leaves only diagnostics
//! behind, and a successful one hands the caller a fresh module.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{LinkError, LinkErrorKind, SharedSink};
use crate::ir::Module;
use crate::library::ShaderLib;
use crate::ops;

mod job;

use job::LinkJob;

pub struct Linker {
    libs: HashMap<String, Arc<ShaderLib>>,
    attached: HashSet<String>,
    /// Function name → owning attached library.
    registry: HashMap<String, Arc<ShaderLib>>,
    sink: SharedSink,
}

impl Linker {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            libs: HashMap::new(),
            attached: HashSet::new(),
            registry: HashMap::new(),
            sink,
        }
    }

    pub fn has_lib_registered(&self, name: &str) -> bool {
        self.libs.contains_key(name)
    }

    /// Register a library under `name`. Fails if the name is taken or
    /// both modules are absent. When a debug module is supplied it is
    /// preferred over the stripped one.
    pub fn register_lib(
        &mut self,
        name: &str,
        module: Option<Module>,
        debug_module: Option<Module>,
    ) -> bool {
        if self.libs.contains_key(name) {
            return false;
        }
        let Some(module) = debug_module.or(module) else {
            return false;
        };
        debug!("{}: registering library", name);
        self.libs
            .insert(name.to_string(), Arc::new(ShaderLib::new(name, module)));
        true
    }

    pub fn attach_lib(&mut self, name: &str) -> bool {
        let Some(lib) = self.libs.get(name).cloned() else {
            return false;
        };
        self.attach(&lib)
    }

    pub fn detach_lib(&mut self, name: &str) -> bool {
        let Some(lib) = self.libs.get(name).cloned() else {
            return false;
        };
        self.detach(&lib)
    }

    pub fn detach_all(&mut self) {
        self.registry.clear();
        self.attached.clear();
    }

    fn attach(&mut self, lib: &Arc<ShaderLib>) -> bool {
        if self.attached.contains(lib.name()) {
            return false;
        }

        let mut names: Vec<&String> = lib.function_table().keys().collect();
        names.sort();
        let mut collisions: Vec<LinkError> = Vec::new();
        for name in names {
            if self.registry.contains_key(name) {
                collisions.push(
                    LinkErrorKind::RedefineFunction { name: name.clone() }.into(),
                );
                continue;
            }
            self.registry.insert(name.clone(), lib.clone());
        }

        if collisions.is_empty() {
            self.attached.insert(lib.name().to_string());
            debug!("{}: attached", lib);
            true
        } else {
            // Roll back every name inserted for this library; the
            // registry returns to its pre-attach state.
            self.registry.retain(|_, owner| !Arc::ptr_eq(owner, lib));
            self.report(&LinkError::new_collect(
                LinkErrorKind::AttachFail {
                    library: lib.name().to_string(),
                },
                collisions,
            ));
            false
        }
    }

    fn detach(&mut self, lib: &Arc<ShaderLib>) -> bool {
        if !self.attached.remove(lib.name()) {
            return false;
        }
        for name in lib.function_table().keys() {
            self.registry.remove(name);
        }
        debug!("{}: detached", lib);
        true
    }

    /// Link a self-contained module specialized to `entry` and
    /// `profile` out of the attached libraries.
    pub fn link(&self, entry: &str, profile: &str) -> Result<Module, LinkError> {
        debug!("linking {} for profile {}", entry, profile);

        let mut visited: HashSet<String> = HashSet::new();
        let mut work: SmallVec<[String; 4]> = SmallVec::new();
        work.push(entry.to_string());
        let mut job = LinkJob::new();

        while let Some(name) = work.pop() {
            if visited.contains(&name) {
                continue;
            }
            let Some(lib) = self.registry.get(&name) else {
                let err: LinkError = LinkErrorKind::UndefFunction { name }.into();
                self.report(&err);
                return Err(err);
            };
            let li = lib
                .link_info(&name)
                .expect("registry names resolve in their owning library");
            job.add_function(lib.clone(), name.clone());

            for &callee in &li.used_functions {
                let f = lib.module().function(callee);
                if ops::is_op_func_name(&f.name) {
                    // Shader operations are re-declared verbatim, never
                    // resolved through the registry.
                    job.add_op_function(lib.clone(), callee);
                } else {
                    trace!("{}: queueing callee {}", name, f);
                    work.push(f.name.clone());
                }
            }
            visited.insert(name);
        }

        let entry_lib = self
            .registry
            .get(entry)
            .cloned()
            .expect("entry resolved during the closure walk");
        match job.link(entry, &entry_lib, profile) {
            Ok(module) => Ok(module),
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Emit the leaf diagnostics of `err` to the ambient sink.
    fn report(&self, err: &LinkError) {
        let mut sink = self.sink.lock().unwrap();
        if err.related.is_empty() {
            sink.emit(&err.kind.to_string());
        } else {
            for rel in &err.related {
                sink.emit(&rel.kind.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::DiagnosticLog;
    use crate::ir::{
        Block, Const, CtorEntry, FnTy, Function, Inst, Linkage, ResourceClass, Ty, Value,
    };
    use crate::profile::ShaderKind;
    use crate::testutil;

    fn linker() -> (Linker, Arc<Mutex<DiagnosticLog>>) {
        let log = DiagnosticLog::new_shared();
        (Linker::new(log.clone()), log)
    }

    fn entries(log: &Arc<Mutex<DiagnosticLog>>) -> Vec<String> {
        log.lock().unwrap().entries().to_vec()
    }

    /// `main` (pixel entry) calling external `helper`, which loads
    /// global `g` and conditionally invokes a shader operation. The
    /// helper body spans two blocks, so the inliner leaves it alone.
    fn basic_lib() -> Module {
        let mut m = testutil::module("A");
        let g = m.add_global(testutil::global("g", Ty::I1, None));
        let op = m.add_function(testutil::declare(
            "dx.op.unary.f32",
            FnTy::new(Ty::F32, vec![Ty::I32, Ty::F32]),
        ));
        let helper = {
            let mut f = Function::new("helper", FnTy::new(Ty::Void, vec![]), Linkage::External);
            f.blocks.push(Block::default());
            f.blocks.push(Block::default());
            m.add_function(f)
        };
        {
            let f = m.function_mut(helper);
            let cond = f.push_inst(
                0,
                Inst::Load {
                    src: g,
                    ty: Ty::I1,
                },
            );
            f.push_inst(
                0,
                Inst::CondBr {
                    cond: Value::Inst(cond),
                    then_dest: 1,
                    else_dest: 1,
                },
            );
            f.push_inst(
                1,
                Inst::Call {
                    callee: op,
                    args: vec![
                        Value::Const(Const::Int {
                            ty: Ty::I32,
                            value: 13,
                        }),
                        Value::Const(Const::Float {
                            ty: Ty::F32,
                            value: 1.5,
                        }),
                    ],
                    ty: Ty::F32,
                },
            );
            f.push_inst(1, Inst::Ret { value: None });
        }
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::call_void(&mut m, main, helper);
        testutil::ret_void(&mut m, main);
        m.set_function_props(main, testutil::props(ShaderKind::Pixel));
        m
    }

    #[test]
    fn register_rejects_duplicates_and_empty_input() {
        let (mut linker, _log) = linker();
        assert!(!linker.register_lib("A", None, None));
        assert!(linker.register_lib("A", Some(basic_lib()), None));
        assert!(linker.has_lib_registered("A"));
        assert!(!linker.register_lib("A", Some(basic_lib()), None));
    }

    #[test]
    fn attach_unknown_library_is_a_state_error() {
        let (mut linker, log) = linker();
        assert!(!linker.attach_lib("missing"));
        assert!(!linker.detach_lib("missing"));
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn attach_is_not_reentrant() {
        let (mut linker, _log) = linker();
        linker.register_lib("A", Some(basic_lib()), None);
        assert!(linker.attach_lib("A"));
        assert!(!linker.attach_lib("A"));
    }

    #[test]
    fn unresolved_entry_fails_with_a_diagnostic() {
        let (mut linker, log) = linker();
        let mut m = testutil::module("A");
        let g = m.add_function(testutil::define("g", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, g);
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec!["Cannot find definition of function main".to_string()]
        );
    }

    #[test]
    fn attach_collision_reports_all_names_and_rolls_back() {
        fn lib_with(names: &[&str]) -> Module {
            let mut m = testutil::module("L");
            for name in names {
                let f = m.add_function(testutil::define(name, FnTy::new(Ty::Void, vec![])));
                testutil::ret_void(&mut m, f);
                if *name == "main" {
                    m.set_function_props(f, testutil::props(ShaderKind::Pixel));
                }
            }
            m
        }
        let (mut linker, log) = linker();
        linker.register_lib("A", Some(lib_with(&["foo", "main"])), None);
        linker.register_lib("B", Some(lib_with(&["foo", "main"])), None);

        assert!(linker.attach_lib("A"));
        assert!(!linker.attach_lib("B"));
        assert_eq!(
            entries(&log),
            vec![
                "Definition already exists for function foo".to_string(),
                "Definition already exists for function main".to_string(),
            ]
        );

        // The registry equals its post-Attach(A) state: A still links,
        // and after detaching A, B attaches cleanly.
        assert!(linker.link("main", "ps_6_0").is_ok());
        assert!(linker.detach_lib("A"));
        assert!(linker.attach_lib("B"));
        assert!(!linker.detach_lib("A"));
    }

    #[test]
    fn detach_attach_round_trips() {
        let (mut linker, _log) = linker();
        linker.register_lib("A", Some(basic_lib()), None);
        assert!(linker.attach_lib("A"));
        assert!(linker.detach_lib("A"));
        assert!(!linker.detach_lib("A"));
        assert!(linker.attach_lib("A"));
        assert!(linker.link("main", "ps_6_0").is_ok());

        linker.detach_all();
        assert!(linker.link("main", "ps_6_0").is_err());
        assert!(linker.attach_lib("A"));
        assert!(linker.link("main", "ps_6_0").is_ok());
    }

    #[test]
    fn internal_functions_of_the_same_name_do_not_collide() {
        fn lib(libname: &str) -> Module {
            let mut m = testutil::module(libname);
            let f = m.add_function(testutil::define_internal(
                "f",
                FnTy::new(Ty::Void, vec![]),
            ));
            testutil::ret_void(&mut m, f);
            m
        }
        let (mut linker, log) = linker();
        linker.register_lib("A", Some(lib("A")), None);
        linker.register_lib("B", Some(lib("B")), None);
        assert!(linker.attach_lib("A"));
        assert!(linker.attach_lib("B"));
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn profile_mismatch_is_reported() {
        let (mut linker, log) = linker();
        let mut m = testutil::module("A");
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, main);
        m.set_function_props(main, testutil::props(ShaderKind::Vertex));
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec![
                "Profile mismatch between entry function and target profile:ps_6_0 and vertex"
                    .to_string()
            ]
        );
    }

    #[test]
    fn library_kind_entries_cannot_be_linked() {
        let (mut linker, log) = linker();
        let mut m = testutil::module("A");
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, main);
        m.set_function_props(main, testutil::props(ShaderKind::Library));
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");

        assert!(linker.link("main", "lib_6_3").is_err());
        assert_eq!(
            entries(&log),
            vec!["lib_6_3 is invalid profile to link".to_string()]
        );
    }

    #[test]
    fn entries_without_properties_are_rejected() {
        let (mut linker, log) = linker();
        let mut m = testutil::module("A");
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, main);
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec!["Cannot find function property for entry function main".to_string()]
        );
    }

    #[test]
    fn link_produces_a_closed_module() {
        let (mut linker, log) = linker();
        let mut m = basic_lib();
        // An extra definition not reachable from main stays out.
        let unused = m.add_function(testutil::define("unused", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, unused);
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");

        let out = linker.link("main", "ps_6_0").unwrap();
        assert!(entries(&log).is_empty());

        assert_eq!(out.name, "main");
        assert_eq!(out.target_triple, testutil::TRIPLE);
        let main = out.find_function("main").unwrap();
        assert_eq!(out.entry, Some(main));
        let helper = out.find_function("helper").unwrap();
        let op = out.find_function("dx.op.unary.f32").unwrap();
        assert!(out.function(op).is_declaration());
        assert!(out.find_function("unused").is_none());
        assert!(out.find_global("g").is_some());
        assert_eq!(out.shader_model.unwrap().to_string(), "ps_6_0");
        assert_eq!(
            out.entry_props.as_ref().unwrap().shader_kind,
            ShaderKind::Pixel
        );

        // main still calls helper (the helper body is multi-block, so
        // the inliner leaves the call in place).
        let mf = out.function(main);
        let calls: Vec<_> = mf
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter_map(|&i| match &mf.insts[i as usize] {
                Inst::Call { callee, .. } => Some(*callee),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![helper]);

        // Every call in the output resolves to an output function.
        for (_, f) in out.functions() {
            for inst in &f.insts {
                if let Inst::Call { callee, .. } = inst {
                    assert!((callee.0 as usize) < out.function_count());
                }
            }
        }
    }

    #[test]
    fn failed_link_leaves_the_linker_usable() {
        let (mut linker, log) = linker();
        linker.register_lib("A", Some(basic_lib()), None);
        linker.attach_lib("A");

        assert!(linker.link("missing", "ps_6_0").is_err());
        log.lock().unwrap().clear();
        assert!(linker.link("main", "ps_6_0").is_ok());
        assert!(entries(&log).is_empty());
    }

    /// A library binding SRV `tex` whose `fname` loads it; when
    /// `calls_helper` is set, `fname` also calls an external `helper`.
    fn resource_lib(libname: &str, fname: &str, elem: Ty, calls_helper: bool) -> Module {
        let mut m = testutil::module(libname);
        let sym = m.add_global(testutil::global("tex", Ty::I32, None));
        m.resources.srvs.push(testutil::srv("tex", sym, elem));
        let helper = calls_helper.then(|| {
            m.add_function(testutil::declare("helper", FnTy::new(Ty::Void, vec![])))
        });
        let f = m.add_function(testutil::define(fname, FnTy::new(Ty::Void, vec![])));
        m.function_mut(f).push_inst(
            0,
            Inst::Load {
                src: sym,
                ty: Ty::I32,
            },
        );
        if let Some(h) = helper {
            testutil::call_void(&mut m, f, h);
        }
        testutil::ret_void(&mut m, f);
        if fname == "main" {
            m.set_function_props(f, testutil::props(ShaderKind::Pixel));
        }
        m
    }

    #[test]
    fn compatible_resources_merge_to_one_entry() {
        let (mut linker, log) = linker();
        let a = resource_lib("A", "main", Ty::vec(Ty::F32, 4), true);
        let b = resource_lib("B", "helper", Ty::vec(Ty::F32, 4), false);
        linker.register_lib("A", Some(a), None);
        linker.register_lib("B", Some(b), None);
        linker.attach_lib("A");
        linker.attach_lib("B");

        let out = linker.link("main", "ps_6_0").unwrap();
        assert!(entries(&log).is_empty());
        assert_eq!(out.resources.srvs.len(), 1);
        assert_eq!(out.resources.srvs[0].name, "tex");
        assert_eq!(out.resources.srvs[0].id, 0);
        // Only one backing global was materialized for the shared name.
        assert_eq!(
            out.globals().filter(|(_, g)| g.name == "tex").count(),
            1
        );
    }

    #[test]
    fn resource_shape_conflicts_are_reported() {
        let (mut linker, log) = linker();
        let a = resource_lib("A", "main", Ty::vec(Ty::F32, 4), true);
        let b = resource_lib("B", "helper", Ty::vec(Ty::I32, 4), false);
        linker.register_lib("A", Some(a), None);
        linker.register_lib("B", Some(b), None);
        linker.attach_lib("A");
        linker.attach_lib("B");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec!["Resource already exists as SRV for tex".to_string()]
        );
    }

    #[test]
    fn colliding_plain_globals_are_reported() {
        fn lib(libname: &str, fname: &str, calls_helper: bool) -> Module {
            let mut m = testutil::module(libname);
            let g = m.add_global(testutil::global("shared", Ty::I32, None));
            let helper = calls_helper.then(|| {
                m.add_function(testutil::declare("helper", FnTy::new(Ty::Void, vec![])))
            });
            let f = m.add_function(testutil::define(fname, FnTy::new(Ty::Void, vec![])));
            m.function_mut(f).push_inst(
                0,
                Inst::Load {
                    src: g,
                    ty: Ty::I32,
                },
            );
            if let Some(h) = helper {
                testutil::call_void(&mut m, f, h);
            }
            testutil::ret_void(&mut m, f);
            if fname == "main" {
                m.set_function_props(f, testutil::props(ShaderKind::Pixel));
            }
            m
        }
        let (mut linker, log) = linker();
        linker.register_lib("A", Some(lib("A", "main", true)), None);
        linker.register_lib("B", Some(lib("B", "helper", false)), None);
        linker.attach_lib("A");
        linker.attach_lib("B");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec!["Definition already exists for global variable shared".to_string()]
        );
    }

    #[test]
    fn static_initializers_run_first_in_the_entry_block() {
        let mut m = testutil::module("A");
        let flag = m.add_global(testutil::internal_global("init_done", Ty::I1, None));
        let counter = m.add_global(testutil::internal_global("counter", Ty::I32, None));
        // Guarded initializer: two blocks keep it out of the inliner.
        let ctor = {
            let mut f = Function::new(
                "init_counter",
                FnTy::new(Ty::Void, vec![]),
                Linkage::Internal,
            );
            f.blocks.push(Block::default());
            f.blocks.push(Block::default());
            m.add_function(f)
        };
        {
            let f = m.function_mut(ctor);
            let done = f.push_inst(
                0,
                Inst::Load {
                    src: flag,
                    ty: Ty::I1,
                },
            );
            f.push_inst(
                0,
                Inst::CondBr {
                    cond: Value::Inst(done),
                    then_dest: 1,
                    else_dest: 1,
                },
            );
            f.push_inst(
                1,
                Inst::Store {
                    dst: counter,
                    value: Value::Const(Const::Int {
                        ty: Ty::I32,
                        value: 0,
                    }),
                },
            );
            f.push_inst(1, Inst::Ret { value: None });
        }
        m.ctors.push(CtorEntry {
            priority: 65535,
            func: Some(ctor),
        });
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        m.function_mut(main).push_inst(
            0,
            Inst::Load {
                src: counter,
                ty: Ty::I32,
            },
        );
        testutil::ret_void(&mut m, main);
        m.set_function_props(main, testutil::props(ShaderKind::Pixel));

        let (mut linker, log) = linker();
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");
        let out = linker.link("main", "ps_6_0").unwrap();
        assert!(entries(&log).is_empty());

        let main = out.entry.unwrap();
        let mf = out.function(main);
        let first = &mf.insts[mf.blocks[0].insts[0] as usize];
        let Inst::Call { callee, .. } = first else {
            panic!("expected an initializer call, got {:?}", first);
        };
        assert_eq!(out.function(*callee).name, "Ainit_counter");
    }

    #[test]
    fn linking_twice_yields_the_same_resource_table() {
        let (mut linker, _log) = linker();
        linker.register_lib(
            "A",
            Some(resource_lib("A", "main", Ty::vec(Ty::F32, 4), false)),
            None,
        );
        linker.attach_lib("A");

        let first = linker.link("main", "ps_6_0").unwrap();
        let second = linker.link("main", "ps_6_0").unwrap();
        assert_eq!(first.resources.srvs, second.resources.srvs);
    }

    #[test]
    fn hull_entries_rewire_their_companion() {
        let mut m = testutil::module("A");
        let pc = m.add_function(testutil::define("patch_fn", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, pc);
        let main = m.add_function(testutil::define("main", FnTy::new(Ty::Void, vec![])));
        testutil::ret_void(&mut m, main);
        m.set_function_props(
            main,
            crate::ir::FunctionProps {
                shader_kind: ShaderKind::Hull,
                patch_constant_func: Some(pc),
            },
        );

        let (mut linker, log) = linker();
        linker.register_lib("A", Some(m), None);
        linker.attach_lib("A");
        let out = linker.link("main", "hs_6_0").unwrap();
        assert!(entries(&log).is_empty());

        let props = out.entry_props.as_ref().unwrap();
        let pc = props.patch_constant_func.unwrap();
        assert_eq!(out.function(pc).name, "patch_fn");
        assert!(!out
            .function(pc)
            .attrs
            .contains(crate::ir::FnAttrs::ALWAYS_INLINE));
    }

    #[test]
    fn resource_class_is_checked_on_merge() {
        // Same name, same element type, different class.
        let (mut linker, log) = linker();
        let a = resource_lib("A", "main", Ty::vec(Ty::F32, 4), true);

        let mut b = testutil::module("B");
        let sym = b.add_global(testutil::global("tex", Ty::I32, None));
        let mut desc = testutil::srv("tex", sym, Ty::vec(Ty::F32, 4));
        desc.class = ResourceClass::Uav;
        desc.props = crate::ir::ResourceProps::Uav {
            kind: crate::ir::ResourceKind::Texture2D,
            globally_coherent: false,
            has_counter: false,
        };
        b.resources.uavs.push(desc);
        let f = b.add_function(testutil::define("helper", FnTy::new(Ty::Void, vec![])));
        b.function_mut(f).push_inst(
            0,
            Inst::Load {
                src: sym,
                ty: Ty::I32,
            },
        );
        testutil::ret_void(&mut b, f);

        linker.register_lib("A", Some(a), None);
        linker.register_lib("B", Some(b), None);
        linker.attach_lib("A");
        linker.attach_lib("B");

        assert!(linker.link("main", "ps_6_0").is_err());
        assert_eq!(
            entries(&log),
            vec!["Resource already exists as UAV for tex".to_string()]
        );
    }
}
