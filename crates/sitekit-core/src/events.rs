//! Catalogue of well-known cross-module events.
//!
//! These names and payload shapes are the contract between the modules that
//! produce them and the modules that consume them. Changing a payload shape
//! is a breaking change for every consumer: add fields with `#[serde(default)]`
//! or introduce a new event name instead.

use serde::{Deserialize, Serialize};

use crate::module::ModuleId;

pub const LANGUAGE_CHANGED: &str = "language:changed";
pub const DARK_MODE_CHANGED: &str = "theme:dark-mode-changed";
pub const MODULE_LOAD_FAILED: &str = "loader:module-failed";
pub const COOKIE_CONSENT_UPDATED: &str = "cookies:consent-updated";
pub const ROUTE_CHANGED: &str = "navigation:route-changed";
pub const FORM_SUBMITTED: &str = "forms:submitted";

/// Payload of [`LANGUAGE_CHANGED`]. `old` is absent on the first selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageChanged {
    #[serde(default)]
    pub old: Option<String>,
    pub new: String,
}

/// Payload of [`DARK_MODE_CHANGED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarkModeChanged {
    pub enabled: bool,
}

/// Payload of [`MODULE_LOAD_FAILED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLoadFailed {
    pub module: ModuleId,
    pub reason: String,
}

/// Payload of [`COOKIE_CONSENT_UPDATED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieConsentUpdated {
    pub analytics: bool,
    pub marketing: bool,
}

/// Payload of [`ROUTE_CHANGED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChanged {
    pub route: String,
}

/// Payload of [`FORM_SUBMITTED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSubmitted {
    pub form_id: String,
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn language_changed_round_trips() {
        let payload = LanguageChanged {
            old: Some("fr".into()),
            new: "en".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"old": "fr", "new": "en"}));
        let back: LanguageChanged = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn language_changed_tolerates_missing_old() {
        let back: LanguageChanged = serde_json::from_value(json!({"new": "ru"})).unwrap();
        assert_eq!(back.old, None);
    }

    #[test]
    fn module_load_failed_uses_kebab_module_names() {
        let value = serde_json::to_value(ModuleLoadFailed {
            module: ModuleId::DarkMode,
            reason: "fetch failed".into(),
        })
        .unwrap();
        assert_eq!(value["module"], json!("dark-mode"));
    }
}
