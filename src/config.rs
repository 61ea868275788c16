// =============================================================================
// CONFIG — Les options de conventions, chargeables depuis TOML
// =============================================================================
//
// Les conventions de nommage se règlent par un petit fichier :
//
// ```toml
// [conventions]
// case_insensitive = true
// flattening = true
// source_prefixes = ["str", "m_"]
// destination_postfixes = ["Dto"]
// replacements = [{ original = "ß", replacement = "ss" }]
// source_naming = "lower_underscore"
// destination_naming = "pascal_case"
// ```
//
// Tous les champs sont optionnels : les valeurs par défaut redonnent
// l'ordre standard (nom explicite, exact, insensible à la casse,
// préfixes/suffixes, remplacements, découpage).
//
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::convention::{
    CaseInsensitive, ConventionSet, ExactName, ExplicitName, NameSplit, NamingStyle, PrePostfix,
    ReplaceName,
};
use crate::error::OptionsError;

/// Un remplacement littéral de sous-chaîne
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub original: String,
    pub replacement: String,
}

/// Réglages des conventions de résolution de membres
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionOptions {
    #[serde(default = "default_true")]
    pub case_insensitive: bool,

    #[serde(default = "default_true")]
    pub flattening: bool,

    #[serde(default)]
    pub source_prefixes: Vec<String>,

    #[serde(default)]
    pub source_postfixes: Vec<String>,

    #[serde(default)]
    pub destination_prefixes: Vec<String>,

    #[serde(default)]
    pub destination_postfixes: Vec<String>,

    #[serde(default)]
    pub replacements: Vec<Replacement>,

    #[serde(default)]
    pub source_naming: NamingStyle,

    #[serde(default)]
    pub destination_naming: NamingStyle,
}

fn default_true() -> bool {
    true
}

impl Default for ConventionOptions {
    fn default() -> Self {
        ConventionOptions {
            case_insensitive: true,
            flattening: true,
            source_prefixes: Vec::new(),
            source_postfixes: Vec::new(),
            destination_prefixes: Vec::new(),
            destination_postfixes: Vec::new(),
            replacements: Vec::new(),
            source_naming: NamingStyle::default(),
            destination_naming: NamingStyle::default(),
        }
    }
}

/// Les options du mapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperOptions {
    #[serde(default)]
    pub conventions: ConventionOptions,
}

impl MapperOptions {
    /// Lit les options depuis une chaîne TOML
    pub fn from_toml_str(content: &str) -> Result<Self, OptionsError> {
        Ok(toml::from_str(content)?)
    }

    /// Lit les options depuis un fichier TOML
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Construit l'ensemble ordonné des conventions
    pub fn convention_set(&self) -> ConventionSet {
        let c = &self.conventions;
        let mut set = ConventionSet::empty();
        set.push(ExplicitName).push(ExactName);
        if c.case_insensitive {
            set.push(CaseInsensitive);
        }
        set.push(PrePostfix {
            prefixes: c.source_prefixes.clone(),
            postfixes: c.source_postfixes.clone(),
            destination_prefixes: c.destination_prefixes.clone(),
            destination_postfixes: c.destination_postfixes.clone(),
        });
        if !c.replacements.is_empty() {
            set.push(ReplaceName {
                replacements: c
                    .replacements
                    .iter()
                    .map(|r| (r.original.clone(), r.replacement.clone()))
                    .collect(),
            });
        }
        if c.flattening {
            set.push(NameSplit {
                source_style: c.source_naming,
                destination_style: c.destination_naming,
            });
        }
        set
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_give_standard_order() {
        let options = MapperOptions::default();
        assert_eq!(
            options.convention_set().names(),
            vec!["explicit-name", "exact", "case-insensitive", "prefix-postfix", "name-split"]
        );
    }

    #[test]
    fn test_empty_toml_is_default() {
        let options = MapperOptions::from_toml_str("").unwrap();
        assert_eq!(options, MapperOptions::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let options = MapperOptions::from_toml_str(
            r#"
            [conventions]
            case_insensitive = false
            flattening = true
            source_prefixes = ["str"]
            replacements = [{ original = "ß", replacement = "ss" }]
            source_naming = "lower_underscore"
            "#,
        )
        .unwrap();
        let c = &options.conventions;
        assert!(!c.case_insensitive);
        assert_eq!(c.source_prefixes, vec!["str"]);
        assert_eq!(c.source_naming, NamingStyle::LowerUnderscore);
        assert_eq!(c.destination_naming, NamingStyle::PascalCase);
        assert_eq!(
            options.convention_set().names(),
            vec!["explicit-name", "exact", "prefix-postfix", "replace", "name-split"]
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = MapperOptions::from_toml_str("[conventions]\nsource_naming = \"kebab\"").unwrap_err();
        assert!(matches!(err, OptionsError::Toml(_)));
    }
}
