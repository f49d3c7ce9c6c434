use std::any::Any;

use sitekit_core::module::{FeatureModule, ModuleId};

/// Dark-mode support.
///
/// The effective theme is the visitor's stored override when one exists,
/// otherwise the host's prefers-dark hint captured at load time.
pub struct ThemeModule {
    system_prefers_dark: bool,
}

impl ThemeModule {
    pub fn new(system_prefers_dark: bool) -> Self {
        Self {
            system_prefers_dark,
        }
    }

    /// Resolve the effective dark-mode flag from the stored override.
    pub fn effective(&self, stored: Option<bool>) -> bool {
        stored.unwrap_or(self.system_prefers_dark)
    }
}

impl FeatureModule for ThemeModule {
    fn id(&self) -> ModuleId {
        ModuleId::DarkMode
    }
    fn title(&self) -> &'static str {
        "Dark mode"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
