//! The closed module table: every [`ModuleId`] variant mapped to its
//! concrete constructor, checked exhaustively at compile time.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use futures::FutureExt;

use sitekit_config::RuntimeConfig;
use sitekit_core::module::{FeatureModule, ModuleHandle, ModuleId};
use sitekit_core::registry::{LoaderFn, ModuleRegistry};
use sitekit_mod_language::LanguageModule;
use sitekit_mod_theme::ThemeModule;

/// Build the full registry. Iterates [`ModuleId::ALL`] so a new variant
/// without a constructor fails loudly at startup, not on first load.
pub fn build_registry(config: &RuntimeConfig, prefers_dark: bool) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for id in ModuleId::ALL {
        registry.register(id, loader_for(id, config, prefers_dark))?;
    }
    Ok(registry)
}

fn loader_for(id: ModuleId, config: &RuntimeConfig, prefers_dark: bool) -> LoaderFn {
    match id {
        ModuleId::Language => {
            let default_language = config.default_language.clone();
            Box::new(move || {
                let default_language = default_language.clone();
                async move {
                    Ok(Rc::new(LanguageModule::new(&default_language)) as ModuleHandle)
                }
                .boxed_local()
            })
        }
        ModuleId::DarkMode => Box::new(move || {
            async move { Ok(Rc::new(ThemeModule::new(prefers_dark)) as ModuleHandle) }
                .boxed_local()
        }),
        ModuleId::Carousel => Box::new(|| {
            async { Ok(Rc::new(CarouselModule::new(5)) as ModuleHandle) }.boxed_local()
        }),
        ModuleId::Forms => {
            Box::new(|| async { Ok(Rc::new(FormsModule) as ModuleHandle) }.boxed_local())
        }
        ModuleId::Drawer => glue(id, "Mobile drawer"),
        ModuleId::Animations => glue(id, "Scroll animations"),
        ModuleId::Cookies => glue(id, "Cookie consent"),
        ModuleId::Navigation => glue(id, "Navigation"),
        ModuleId::Blog => glue(id, "Blog"),
        ModuleId::HomePage => glue(id, "Home page"),
        ModuleId::ContactPage => glue(id, "Contact page"),
        ModuleId::ExpertisesPage => glue(id, "Expertises page"),
    }
}

fn glue(id: ModuleId, title: &'static str) -> LoaderFn {
    Box::new(move || {
        async move { Ok(Rc::new(GlueModule { id, title }) as ModuleHandle) }.boxed_local()
    })
}

/// Module whose behavior lives entirely in page markup and CSS; loading it
/// only marks the feature available.
struct GlueModule {
    id: ModuleId,
    title: &'static str,
}

impl FeatureModule for GlueModule {
    fn id(&self) -> ModuleId {
        self.id
    }
    fn title(&self) -> &'static str {
        self.title
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hero carousel with a wrapping slide cursor.
pub struct CarouselModule {
    slides: usize,
    index: Cell<usize>,
}

impl CarouselModule {
    pub fn new(slides: usize) -> Self {
        Self {
            slides,
            index: Cell::new(0),
        }
    }

    pub fn current(&self) -> usize {
        self.index.get()
    }

    pub fn advance(&self) -> usize {
        let next = (self.index.get() + 1) % self.slides.max(1);
        self.index.set(next);
        next
    }
}

impl FeatureModule for CarouselModule {
    fn id(&self) -> ModuleId {
        ModuleId::Carousel
    }
    fn title(&self) -> &'static str {
        "Carousel"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Client-side validation for the contact and consultation forms.
pub struct FormsModule;

impl FormsModule {
    pub fn validate_required(&self, input: &str) -> bool {
        !input.trim().is_empty()
    }

    pub fn validate_email(&self, input: &str) -> bool {
        let input = input.trim();
        match input.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }
            None => false,
        }
    }
}

impl FeatureModule for FormsModule {
    fn id(&self) -> ModuleId {
        ModuleId::Forms
    }
    fn title(&self) -> &'static str {
        "Forms"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
