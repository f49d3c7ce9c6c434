use thiserror::Error;

use crate::module::ModuleId;

/// Failure produced by the module loader.
///
/// Clonable so it can ride inside a shared in-flight future that several
/// concurrent callers await.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("no loader registered for module `{0}`")]
    Unregistered(ModuleId),

    #[error("loader for `{module}` failed on attempt {attempt}: {message}")]
    LoaderFailed {
        module: ModuleId,
        attempt: u32,
        message: String,
    },
}

impl LoadError {
    /// The module the failure concerns.
    pub fn module(&self) -> ModuleId {
        match self {
            LoadError::Unregistered(module) => *module,
            LoadError::LoaderFailed { module, .. } => *module,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_module() {
        let err = LoadError::LoaderFailed {
            module: ModuleId::Carousel,
            attempt: 2,
            message: "chunk fetch timed out".into(),
        };
        let text = err.to_string();
        assert!(text.contains("carousel"));
        assert!(text.contains("attempt 2"));

        let err = LoadError::Unregistered(ModuleId::Blog);
        assert!(err.to_string().contains("blog"));
    }
}
