use std::collections::HashMap;

use anyhow::{bail, Result};
use futures::future::LocalBoxFuture;

use crate::module::{ModuleHandle, ModuleId};

/// Future produced by a registered loader function.
pub type LoaderFuture = LocalBoxFuture<'static, Result<ModuleHandle>>;

/// Constructor for a module's contents. In the browser build this is the
/// code-splitting import; here it is any async factory.
pub type LoaderFn = Box<dyn Fn() -> LoaderFuture>;

/// Static table mapping each module identifier to its loader function.
///
/// The table is built once by the application root and closed afterwards —
/// the loader only reads from it.
pub struct ModuleRegistry {
    loaders: HashMap<ModuleId, LoaderFn>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: ModuleId, loader: LoaderFn) -> Result<()> {
        if self.loaders.contains_key(&id) {
            bail!("duplicate loader for module: {}", id);
        }
        self.loaders.insert(id, loader);
        Ok(())
    }

    pub(crate) fn loader(&self, id: ModuleId) -> Option<&LoaderFn> {
        self.loaders.get(&id)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.loaders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}
