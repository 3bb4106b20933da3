//! Per-call optimization state.
//!
//! Everything a stage needs to remember across units of work lives in an
//! [`OptimizeContext`] that is created for one optimize call and dropped with
//! it, so independent calls never see each other's bookkeeping.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
};

use crate::data_structures::scene_graph::{GeometryId, MaterialId, ReleaseStats, TextureId};

/// A recovered failure of one unit of work (a mesh, a merge group, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub stage: &'static str,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct OptimizeContext {
    /// Textures already capped in this pass.
    pub processed_textures: HashSet<TextureId>,
    /// Source material to its transformed replacement.
    pub processed_materials: HashMap<MaterialId, MaterialId>,
    /// Geometries already decimated in this pass.
    pub decimated_geometries: HashSet<GeometryId>,
    pub diagnostics: Vec<Diagnostic>,
    pub released: ReleaseStats,
}

impl OptimizeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnose(&mut self, stage: &'static str, subject: impl Into<String>, message: impl ToString) {
        let diagnostic = Diagnostic {
            stage,
            subject: subject.into(),
            message: message.to_string(),
        };
        log::warn!(
            "[{}] {}: {}",
            diagnostic.stage,
            diagnostic.subject,
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
