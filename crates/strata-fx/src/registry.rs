use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use strata_core::{StrataError, StrataResult};

use crate::builtin::builtin_shaders;
use crate::compile::{compile_descriptor, CompiledStage};
use crate::shader::{CompilePolicy, ShaderDescriptor};

/// Catalog of shader descriptors by name.
///
/// Registration validates the descriptor and refuses to replace an existing
/// name; there is no removal. `Eager` shaders are compiled during
/// registration and their stages kept here for workers to adopt.
/// Resolution hands out shared, immutable descriptors and is safe from any
/// thread.
pub struct ShaderRegistry {
    shaders: RwLock<BTreeMap<String, Arc<ShaderDescriptor>>>,
    compiled: RwLock<HashMap<String, Arc<[CompiledStage]>>>,
}

static GLOBAL: OnceLock<ShaderRegistry> = OnceLock::new();

impl ShaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            shaders: RwLock::new(BTreeMap::new()),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding the built-in shader set.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for desc in builtin_shaders() {
            let name = desc.name.clone();
            if let Err(e) = registry.register(desc) {
                tracing::error!(shader = %name, error = %e, "built-in shader rejected");
            }
        }
        registry
    }

    /// The process-wide registry, populated with the built-ins on first use.
    pub fn global() -> &'static ShaderRegistry {
        GLOBAL.get_or_init(|| {
            let registry = Self::with_builtins();
            tracing::debug!(count = registry.len(), "shader registry initialized");
            registry
        })
    }

    pub fn register(&self, desc: ShaderDescriptor) -> StrataResult<()> {
        desc.validate()?;
        if self.contains(&desc.name) {
            return Err(StrataError::DuplicateShader(desc.name));
        }
        let stages = match desc.compile {
            CompilePolicy::Eager => Some(compile_descriptor(&desc)?),
            CompilePolicy::Warm | CompilePolicy::Lazy => None,
        };

        let mut shaders = self.shaders.write();
        if shaders.contains_key(&desc.name) {
            return Err(StrataError::DuplicateShader(desc.name));
        }
        if let Some(stages) = stages {
            tracing::trace!(shader = %desc.name, stages = stages.len(), "compiled on registration");
            self.compiled.write().insert(desc.name.clone(), stages.into());
        }
        tracing::trace!(shader = %desc.name, version = desc.version, "shader registered");
        shaders.insert(desc.name.clone(), Arc::new(desc));
        Ok(())
    }

    /// Stages compiled at registration, for `Eager` shaders.
    pub fn compiled(&self, name: &str) -> Option<Arc<[CompiledStage]>> {
        self.compiled.read().get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> StrataResult<Arc<ShaderDescriptor>> {
        self.shaders
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::UnknownShader(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shaders.read().contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.shaders.read().keys().cloned().collect()
    }

    /// Snapshot of every descriptor, sorted by name.
    pub fn descriptors(&self) -> Vec<Arc<ShaderDescriptor>> {
        self.shaders.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shaders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.read().is_empty()
    }
}

impl Default for ShaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
