//! Propriétés du découpage des noms et de l'ordre des conventions.

use proptest::prelude::*;

use exprmap::core::convention::{ConventionSet, NamingStyle};
use exprmap::core::schema::Schema;
use exprmap::core::typeside::TypeRef;

/// Un mot PascalCase simple : une majuscule puis des minuscules
fn word() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,6}"
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: découper puis recomposer un nom PascalCase rend le nom.
    #[test]
    fn property_pascal_split_join(words in proptest::collection::vec(word(), 1..5)) {
        let name = words.concat();
        let split = NamingStyle::PascalCase.split(&name);
        prop_assert_eq!(&split, &words);
        prop_assert_eq!(NamingStyle::PascalCase.join(&split), name);
    }

    /// PROPERTY: un nom lower_underscore se découpe sur les soulignés.
    #[test]
    fn property_lower_underscore_split(words in proptest::collection::vec("[a-z]{1,6}", 1..5)) {
        let name = words.join("_");
        prop_assert_eq!(NamingStyle::LowerUnderscore.split(&name), words);
    }

    /// PROPERTY: la correspondance exacte gagne sur les variantes de casse,
    /// qu'elles soient déclarées avant ou après le nom exact.
    #[test]
    fn property_exact_name_wins(name in word(), exact_first in any::<bool>()) {
        let mut schema = Schema::new("Naming");
        schema.add_type("Src");
        let decoys = [name.to_lowercase(), name.to_uppercase()];
        if exact_first {
            schema.add_member("Src", &name, TypeRef::string());
        }
        for decoy in &decoys {
            schema.add_member("Src", decoy, TypeRef::string());
        }
        if !exact_first {
            schema.add_member("Src", &name, TypeRef::string());
        }
        let chain = ConventionSet::standard().resolve(&schema, &name, &TypeRef::shape("Src"));
        prop_assert!(chain.is_some());
        let chain = chain.unwrap_or_default();
        prop_assert_eq!(chain.len(), 1);
        prop_assert_eq!(&chain[0].name, &name);
    }
}
