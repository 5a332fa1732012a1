//! Metadata discovery - enumerates capability descriptors from every source.
//!
//! Sources, in enumeration order:
//! 1. Compiled modules from the [`ModuleSet`], in registration order
//! 2. Manifest YAML files under each manifest directory (recursive), sorted
//!    by path
//!
//! A source that fails is recorded in [`DiscoveryOutcome::failures`] and
//! skipped; one broken module never aborts the pass.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use super::descriptor::CapabilityDescriptor;
use super::error::ModuleLoadError;
use super::manifest::ManifestFile;
use super::module::{CapabilityModule, ModuleSet};

/// Result of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    /// Raw descriptors, possibly multi-verb.
    pub descriptors: Vec<CapabilityDescriptor>,
    /// Sources that failed to load.
    pub failures: Vec<ModuleLoadError>,
}

/// Enumerates capability descriptors from compiled modules and manifests.
#[derive(Debug, Clone, Default)]
pub struct MetadataDiscovery {
    modules: ModuleSet,
    manifest_dirs: Vec<PathBuf>,
}

impl MetadataDiscovery {
    pub fn new(modules: ModuleSet) -> Self {
        Self {
            modules,
            manifest_dirs: Vec::new(),
        }
    }

    /// Builder-style [`add_manifest_dir`](Self::add_manifest_dir).
    pub fn with_manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.add_manifest_dir(dir);
        self
    }

    /// Add a directory searched for manifest files on every pass.
    pub fn add_manifest_dir(&mut self, dir: impl Into<PathBuf>) {
        self.manifest_dirs.push(dir.into());
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn manifest_dirs(&self) -> &[PathBuf] {
        &self.manifest_dirs
    }

    /// Run one discovery pass.
    pub fn discover(&self) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();

        for module in self.modules.iter() {
            match describe_module(module.as_ref()) {
                Ok(descriptors) => outcome.descriptors.extend(descriptors),
                Err(e) => {
                    log::warn!("Skipping capability module {}: {}", module.id(), e);
                    outcome.failures.push(e);
                }
            }
        }

        for dir in &self.manifest_dirs {
            if !dir.exists() {
                log::debug!("Manifest directory {} does not exist", dir.display());
                continue;
            }
            let mut files = Vec::new();
            if let Err(e) = collect_manifest_files(dir, &mut files) {
                log::warn!("Failed to scan manifest directory {}: {}", dir.display(), e);
                outcome.failures.push(ModuleLoadError::Io {
                    path: dir.display().to_string(),
                    message: e.to_string(),
                });
            }
            files.sort();

            for path in files {
                match self.load_manifest(&path) {
                    Ok(descriptors) => outcome.descriptors.extend(descriptors),
                    Err(e) => {
                        log::warn!("Skipping manifest {}: {}", path.display(), e);
                        outcome.failures.push(e);
                    }
                }
            }
        }

        log::debug!(
            "Discovery found {} descriptors ({} failed sources)",
            outcome.descriptors.len(),
            outcome.failures.len()
        );
        outcome
    }

    fn load_manifest(&self, path: &Path) -> Result<Vec<CapabilityDescriptor>, ModuleLoadError> {
        let manifest = ManifestFile::from_yaml_file(path)?;
        if !self.modules.contains(&manifest.module) {
            return Err(ModuleLoadError::UnknownModule {
                path: path.display().to_string(),
                module: manifest.module,
            });
        }
        Ok(manifest.into_descriptors())
    }
}

/// Call a module's descriptor function, isolating errors and panics.
fn describe_module(module: &dyn CapabilityModule) -> Result<Vec<CapabilityDescriptor>, ModuleLoadError> {
    let id = module.id().to_string();
    let result = panic::catch_unwind(AssertUnwindSafe(|| module.descriptors()));

    match result {
        Ok(Ok(mut descriptors)) => {
            for descriptor in &mut descriptors {
                descriptor.source_module_id = id.clone();
            }
            Ok(descriptors)
        }
        Ok(Err(e)) => Err(ModuleLoadError::Describe {
            module: id,
            message: e.to_string(),
        }),
        Err(payload) => Err(ModuleLoadError::Panicked {
            module: id,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn collect_manifest_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_manifest_files(&path, out)?;
        } else if path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::module::test_support::*;

    fn sample_set() -> ModuleSet {
        ModuleSet::new()
            .with(StaticModule::new(
                "search",
                vec![CapabilityDescriptor::new("/search/lyrics", "GET", "Lyrics")],
            ))
            .with(Arc::new(BrokenModule("broken")))
            .with(Arc::new(PanickingModule("panicky")))
            .with(StaticModule::new(
                "tools",
                vec![CapabilityDescriptor::new("/tools/ssweb", "GET,POST", "Screenshot")],
            ))
    }

    #[test]
    fn test_failing_modules_are_isolated() {
        let outcome = MetadataDiscovery::new(sample_set()).discover();

        let paths: Vec<_> = outcome.descriptors.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/search/lyrics", "/tools/ssweb"]);
        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(outcome.failures[0], ModuleLoadError::Describe { .. }));
        assert!(matches!(outcome.failures[1], ModuleLoadError::Panicked { .. }));
        assert_eq!(outcome.failures[1].source_id(), "panicky");
    }

    #[test]
    fn test_source_module_id_is_stamped() {
        let mut desc = CapabilityDescriptor::new("/x", "GET", "X");
        desc.source_module_id = "spoofed".into();
        let set = ModuleSet::new().with(StaticModule::new("real", vec![desc]));

        let outcome = MetadataDiscovery::new(set).discover();
        assert_eq!(outcome.descriptors[0].source_module_id, "real");
    }

    #[test]
    fn test_order_is_stable_across_passes() {
        let discovery = MetadataDiscovery::new(sample_set());
        let first = discovery.discover().descriptors;
        let second = discovery.discover().descriptors;
        assert_eq!(first, second);
    }

    #[test]
    fn test_manifests_are_loaded_sorted_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "module: tools\nendpoints:\n  - { path: /tools/b, method: GET, name: B }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("nested/a.yml"),
            "module: tools\nendpoint: { path: /tools/a, method: POST, name: A }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("c.yaml"),
            "module: ghost\nendpoints:\n  - { path: /ghost, name: Ghost }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = ModuleSet::new().with(StaticModule::new("tools", vec![]));
        let outcome = MetadataDiscovery::new(set)
            .with_manifest_dir(dir.path())
            .with_manifest_dir(dir.path().join("missing"))
            .discover();

        let paths: Vec<_> = outcome.descriptors.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/tools/b", "/tools/a"]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            ModuleLoadError::UnknownModule { module, .. } if module == "ghost"
        ));
    }
}
