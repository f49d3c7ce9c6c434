use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Identifier of an independently loadable feature unit.
///
/// The set is closed: every module the site can load is a variant here, and
/// the application root maps each variant to a concrete constructor, so an
/// unknown module name is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleId {
    Carousel,
    Drawer,
    Animations,
    DarkMode,
    Language,
    Cookies,
    Forms,
    Navigation,
    Blog,
    HomePage,
    ContactPage,
    ExpertisesPage,
}

impl ModuleId {
    pub const ALL: [ModuleId; 12] = [
        ModuleId::Carousel,
        ModuleId::Drawer,
        ModuleId::Animations,
        ModuleId::DarkMode,
        ModuleId::Language,
        ModuleId::Cookies,
        ModuleId::Forms,
        ModuleId::Navigation,
        ModuleId::Blog,
        ModuleId::HomePage,
        ModuleId::ContactPage,
        ModuleId::ExpertisesPage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleId::Carousel => "carousel",
            ModuleId::Drawer => "drawer",
            ModuleId::Animations => "animations",
            ModuleId::DarkMode => "dark-mode",
            ModuleId::Language => "language",
            ModuleId::Cookies => "cookies",
            ModuleId::Forms => "forms",
            ModuleId::Navigation => "navigation",
            ModuleId::Blog => "blog",
            ModuleId::HomePage => "home-page",
            ModuleId::ContactPage => "contact-page",
            ModuleId::ExpertisesPage => "expertises-page",
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loadable feature module.
///
/// Modules are constructed by the registry's loader functions and cached by
/// the [`crate::loader::ModuleLoader`] for the life of the page. The trait
/// surface is deliberately small: feature behavior lives on the concrete
/// types, reached through [`as_any`](FeatureModule::as_any) downcasting.
pub trait FeatureModule {
    /// The identifier this module was registered under.
    fn id(&self) -> ModuleId;

    /// Human-readable display name for the debug overlay.
    fn title(&self) -> &'static str;

    /// Return `self` as `&dyn Any` to enable downcasting to the concrete
    /// module type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a loaded module's contents.
pub type ModuleHandle = Rc<dyn FeatureModule>;
