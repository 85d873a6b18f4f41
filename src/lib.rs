//! Welcome to the shader-library linker.
//!
//! The job of this crate is to take one or more pre-compiled shader
//! library modules and produce a single self-contained module
//! specialized to a named entry point and a target shader profile:
//!   1. Index each library: name its symbols, chart what every defined
//!      function calls and which globals and resources it touches.
//!   2. Resolve cross-library references by name through a registry of
//!      attached libraries.
//!   3. Clone the entry point's transitive call closure into a fresh
//!      module, merge the resources it touches, schedule static
//!      initializers, and run a small finalization pipeline.
//!
//! # Basic linking concepts
//!
//! *What is a shader library?* A compilation unit holding function
//! definitions, module globals, binding-table resources, and optionally
//! a list of static initializers. Functions with internal linkage are
//! private to the library; the indexer prepends the library identifier
//! to their names so two libraries can both carry an internal `helper`
//! without colliding. External-linkage functions keep their names, and
//! those names are the join points across libraries: a call that a
//! library cannot satisfy itself is a declaration that some other
//! attached library must define.
//!
//! Linking starts from an entry function and walks its call set, then
//! the call sets of everything it reaches, until the set is closed.
//! Shader-operation intrinsics (recognized by their naming convention,
//! see [`ops`]) are the exception: each library carries its own
//! declarations, so the linker re-declares them verbatim in the output
//! instead of resolving them through the registry. Everything else —
//! functions, globals, resource descriptors — is materialized into the
//! fresh output module, with a value map rewriting old references to
//! their new counterparts as bodies are cloned.
//!
//! Resources deserve a word: two libraries may bind the same resource
//! name, and that is fine as long as the class and bound element type
//! agree — the merged table keeps one entry and both libraries' code
//! ends up addressing it through the same assigned identifier. A
//! disagreement is a link error, reported alongside any others found in
//! the same pass rather than one at a time.
//!
//! Static initializers ride the call graph: the indexer makes every
//! user of an initialized global call the global's initializer, so
//! pulling any user into a link pulls the initializer too, and the link
//! job emits calls to each of them at the top of the entry function.
//!
//! # Error handling
//!
//! Operations report failure with the [`LinkError`] type, which
//! implements std's Error and miette's Diagnostic and aggregates
//! multi-diagnostic failures through its `related` list. The stable
//! diagnostic strings are also appended, one by one, to the
//! [`ErrorSink`] handle supplied when the [`Linker`] is built.

mod error;
pub use error::*;

pub mod ir;
pub mod library;
pub mod linker;
pub mod ops;
pub mod passes;
pub mod profile;

pub use linker::Linker;

#[cfg(test)]
pub(crate) mod testutil;
