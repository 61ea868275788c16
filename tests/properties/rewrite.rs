//! Propriétés de la réécriture : déterminisme et aller-retour.

use proptest::prelude::*;

use crate::common::*;
use exprmap::core::expr::Expr;

fn member_path() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("CustomerName"), Just("Total"), Just("Id"), Just("CustomerId")]
}

fn constant_for(path: &str, n: i64) -> Expr {
    match path {
        "CustomerName" => Expr::constant(format!("client-{}", n).as_str()),
        "Total" => Expr::constant(n as f64),
        _ => Expr::constant(n),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: réécrire deux fois le même arbre donne deux arbres égaux.
    #[test]
    fn property_rewrite_is_deterministic(path in member_path(), n in -1000i64..1000) {
        let registry = shop_registry();
        let expr = dto_predicate(registry.schema(), path, constant_for(path, n));
        let a = registry.map_expression(&expr, &predicate_type(order())).unwrap();
        let b = registry.map_expression(&expr, &predicate_type(order())).unwrap();
        prop_assert_eq!(a, b);
    }

    /// PROPERTY: avec un mapping inverse, l'aller-retour rend le chemin d'origine.
    #[test]
    fn property_round_trip(path in member_path(), n in -1000i64..1000) {
        let registry = shop_registry();
        let expr = dto_predicate(registry.schema(), path, constant_for(path, n));
        let there = registry.map_expression(&expr, &predicate_type(order())).unwrap();
        let back = registry.map_expression(&Expr::Lambda(there), &predicate_type(dto())).unwrap();
        let Expr::Lambda(original) = &expr else {
            panic!("lambda attendue");
        };
        prop_assert_eq!(back.body.to_string(), original.body.to_string());
    }
}
