//! Error definitions for the shader-library linker.

use std::sync::{Arc, Mutex};

use itertools::{Either, Itertools};
use miette::Diagnostic;
use thiserror::Error;

use crate::ir::ResourceClass;
use crate::profile::ShaderKind;

#[derive(Debug, Error, Diagnostic, Default)]
#[error("{kind}")]
pub struct LinkError {
    pub kind: LinkErrorKind,
    #[related]
    pub related: Vec<LinkError>,
}

impl LinkError {
    pub fn new(kind: LinkErrorKind) -> Self {
        Self {
            kind,
            related: vec![],
        }
    }

    pub fn new_collect(kind: LinkErrorKind, related: Vec<LinkError>) -> Self {
        Self { kind, related }
    }

    /// Partition an iterator of results; if any errored, aggregate the
    /// errors under `parent_kind`.
    pub fn collect<I, T>(parent_kind: LinkErrorKind, it: I) -> Result<Vec<T>, LinkError>
    where
        I: IntoIterator<Item = Result<T, LinkError>>,
    {
        let (vals, errs): (Vec<T>, Vec<LinkError>) =
            it.into_iter().partition_map(|item| match item {
                Ok(o) => Either::Left(o),
                Err(e) => Either::Right(e),
            });

        if errs.is_empty() {
            Ok(vals)
        } else {
            Err(LinkError {
                kind: parent_kind,
                related: errs,
            })
        }
    }
}

impl From<LinkErrorKind> for LinkError {
    fn from(value: LinkErrorKind) -> Self {
        Self {
            kind: value,
            related: vec![],
        }
    }
}

/// The stable diagnostic strings live on this enum's `Display`
/// implementation; tests and callers match on them verbatim.
#[derive(Debug, Error, Diagnostic, Default)]
pub enum LinkErrorKind {
    #[default]
    #[error("unknown")]
    Unknown,
    #[error("Cannot find definition of function {name}")]
    UndefFunction { name: String },
    #[error("Definition already exists for function {name}")]
    RedefineFunction { name: String },
    #[error("Definition already exists for global variable {name}")]
    RedefineGlobal { name: String },
    #[error("{profile} is invalid profile to link")]
    InvalidProfile { profile: String },
    #[error("Profile mismatch between entry function and target profile:{profile} and {kind}")]
    ShaderKindMismatch { profile: String, kind: ShaderKind },
    #[error("Cannot find function property for entry function {name}")]
    NoEntryProps { name: String },
    #[error("Resource already exists as {class} for {name}")]
    RedefineResource { class: ResourceClass, name: String },
    // Aggregate kinds. These carry leaf diagnostics in `related` and are
    // never emitted to the error sink themselves.
    #[error("failed to attach library {library}")]
    AttachFail { library: String },
    #[error("failed to link {entry}")]
    LinkFail { entry: String },
}

/// Receives the stable diagnostic strings, one call per diagnostic.
pub trait ErrorSink: Send {
    fn emit(&mut self, diag: &str);
}

/// Shared handle to the ambient sink, supplied at linker construction.
pub type SharedSink = Arc<Mutex<dyn ErrorSink>>;

/// Default sink: collects diagnostics in order of emission.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<String>,
}

impl DiagnosticLog {
    pub fn new_shared() -> Arc<Mutex<DiagnosticLog>> {
        Arc::new(Mutex::new(DiagnosticLog::default()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ErrorSink for DiagnosticLog {
    fn emit(&mut self, diag: &str) {
        self.entries.push(diag.to_string());
    }
}
