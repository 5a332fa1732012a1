//! Discovery and normalization errors.
//!
//! Neither kind is fatal to a reload cycle: a module that fails to load is
//! skipped and reported, a descriptor that fails validation is dropped and
//! counted.

use thiserror::Error;

/// A source module could not produce its descriptors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModuleLoadError {
    /// The compiled module returned an error from its descriptor function.
    #[error("module '{module}' failed to describe itself: {message}")]
    Describe { module: String, message: String },

    /// The compiled module panicked while producing descriptors.
    #[error("module '{module}' panicked during discovery: {message}")]
    Panicked { module: String, message: String },

    /// A manifest file could not be read.
    #[error("manifest {path}: IO error: {message}")]
    Io { path: String, message: String },

    /// A manifest file is not valid YAML for the manifest schema.
    #[error("manifest {path}: parse error: {message}")]
    Parse { path: String, message: String },

    /// A manifest points at a compiled module that is not registered.
    #[error("manifest {path}: unknown module '{module}'")]
    UnknownModule { path: String, module: String },
}

impl ModuleLoadError {
    /// Identifier of the module (or manifest path) that failed.
    pub fn source_id(&self) -> &str {
        match self {
            ModuleLoadError::Describe { module, .. } | ModuleLoadError::Panicked { module, .. } => {
                module
            }
            ModuleLoadError::Io { path, .. }
            | ModuleLoadError::Parse { path, .. }
            | ModuleLoadError::UnknownModule { path, .. } => path,
        }
    }
}

/// A descriptor is missing required fields or carries an unusable method.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("descriptor from '{module}' has no path")]
    MissingPath { module: String },

    #[error("descriptor {path} from '{module}' has no name")]
    MissingName { module: String, path: String },

    #[error("descriptor {path} from '{module}' declares unknown verb '{verb}'")]
    UnknownVerb {
        module: String,
        path: String,
        verb: String,
    },
}
