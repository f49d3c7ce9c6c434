use std::any::Any;
use std::collections::HashMap;

use sitekit_core::module::{FeatureModule, ModuleId};

/// Multilingual support: the translation tables for every language the site
/// ships, with fallback to the default language.
///
/// Lookups never fail loudly — a missing key renders as nothing rather than
/// breaking the page, so [`translate`](LanguageModule::translate) returns an
/// `Option` and leaves the decision to the caller.
pub struct LanguageModule {
    default_language: String,
    tables: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

impl LanguageModule {
    pub fn new(default_language: &str) -> Self {
        Self {
            default_language: default_language.to_string(),
            tables: builtin_tables(),
        }
    }

    /// Languages with a shipped translation table.
    pub fn supported(&self) -> Vec<&'static str> {
        let mut langs: Vec<&'static str> = self.tables.keys().copied().collect();
        langs.sort_unstable();
        langs
    }

    pub fn is_supported(&self, lang: &str) -> bool {
        self.tables.contains_key(lang)
    }

    /// Translate `key` into `lang`, falling back to the default language
    /// when the key is missing there (or the language is unknown).
    pub fn translate(&self, lang: &str, key: &str) -> Option<&'static str> {
        self.tables
            .get(lang)
            .and_then(|table| table.get(key))
            .or_else(|| {
                self.tables
                    .get(self.default_language.as_str())
                    .and_then(|table| table.get(key))
            })
            .copied()
    }
}

impl FeatureModule for LanguageModule {
    fn id(&self) -> ModuleId {
        ModuleId::Language
    }
    fn title(&self) -> &'static str {
        "Language"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn builtin_tables() -> HashMap<&'static str, HashMap<&'static str, &'static str>> {
    let fr: HashMap<&str, &str> = [
        ("nav.home", "Accueil"),
        ("nav.expertises", "Expertises"),
        ("nav.contact", "Contact"),
        ("cookies.accept", "Accepter"),
        ("cookies.decline", "Refuser"),
        ("form.required", "Ce champ est obligatoire"),
        ("form.invalid-email", "Adresse e-mail invalide"),
    ]
    .into_iter()
    .collect();

    let en: HashMap<&str, &str> = [
        ("nav.home", "Home"),
        ("nav.expertises", "Expertise"),
        ("nav.contact", "Contact"),
        ("cookies.accept", "Accept"),
        ("cookies.decline", "Decline"),
        ("form.required", "This field is required"),
        ("form.invalid-email", "Invalid email address"),
    ]
    .into_iter()
    .collect();

    let ru: HashMap<&str, &str> = [
        ("nav.home", "Главная"),
        ("nav.expertises", "Компетенции"),
        ("nav.contact", "Контакты"),
        ("cookies.accept", "Принять"),
        ("cookies.decline", "Отклонить"),
        ("form.required", "Обязательное поле"),
    ]
    .into_iter()
    .collect();

    [("fr", fr), ("en", en), ("ru", ru)].into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_supported_language() {
        let module = LanguageModule::new("fr");
        assert_eq!(module.translate("en", "nav.home"), Some("Home"));
        assert_eq!(module.translate("ru", "nav.home"), Some("Главная"));
    }

    #[test]
    fn falls_back_to_default_for_missing_key() {
        let module = LanguageModule::new("fr");
        // ru has no invalid-email entry
        assert_eq!(
            module.translate("ru", "form.invalid-email"),
            Some("Adresse e-mail invalide")
        );
    }

    #[test]
    fn falls_back_to_default_for_unknown_language() {
        let module = LanguageModule::new("fr");
        assert_eq!(module.translate("de", "nav.contact"), Some("Contact"));
    }

    #[test]
    fn unknown_key_is_none() {
        let module = LanguageModule::new("fr");
        assert_eq!(module.translate("fr", "nav.missing"), None);
    }

    #[test]
    fn reports_supported_languages() {
        let module = LanguageModule::new("fr");
        assert_eq!(module.supported(), vec!["en", "fr", "ru"]);
        assert!(module.is_supported("ru"));
        assert!(!module.is_supported("de"));
    }
}
