// =============================================================================
// VALIDATE — Les vérifications du scellement
// =============================================================================
//
// Au moment de seal(), chaque TypeMapping passe par deux étapes :
//
//   1. apply_conventions : tout membre destination sans règle explicite
//      est cherché par les conventions dans le type source.
//   2. check_mapping : on collecte TOUTES les erreurs de la paire
//      (membres non résolus, types incompatibles, lambdas mal formées,
//      chemins inconnus, doublons relevés pendant la configuration).
//
// La règle de compatibilité des valeurs :
//
//   - identité, ou vers Object
//   - types littéraux : égalité EXACTE, seul T → Nullable<T> est toléré
//   - sinon assignabilité du schéma (héritage, familles génériques)
//   - ou un TypeMapping enregistré entre les deux types
//     (y compris élément par élément pour les séquences)
//
// Les erreurs ne s'arrêtent jamais à la première : un scellement raté doit
// montrer toute la configuration fautive d'un coup.
//
// =============================================================================

use tracing::debug;

use super::convention::ConventionSet;
use super::expr::Lambda;
use super::mapping::{MemberList, MemberRule, RuleOrigin, TypeMapping, TypePair};
use super::schema::Schema;
use super::typeside::TypeRef;
use crate::error::ConfigError;

/// "Un TypeMapping est-il enregistré de `from` vers `to` ?"
pub type KnownPairs<'a> = dyn Fn(&TypeRef, &TypeRef) -> bool + 'a;

/// Une valeur de type `from` peut-elle alimenter un membre de type `to` ?
pub fn value_compatible(schema: &Schema, known: &KnownPairs<'_>, from: &TypeRef, to: &TypeRef) -> bool {
    if from == to || *to == TypeRef::Object || known(from, to) {
        return true;
    }
    if from.is_literal() || to.is_literal() {
        return to.is_nullable() && to.underlying() == from;
    }
    if schema.is_assignable(from, to) {
        return true;
    }
    match (from.element_type(), to.element_type()) {
        (Some(a), Some(b)) => value_compatible(schema, known, a, b),
        _ => false,
    }
}

/// Une lambda "sur le type source" : un seul paramètre, qui accepte la source.
pub fn check_source_lambda(schema: &Schema, source: &TypeRef, lambda: &Lambda) -> Result<(), String> {
    match lambda.params.as_slice() {
        [p] if p.ty == *source || schema.is_assignable(source, &p.ty) => Ok(()),
        [p] => Err(format!("paramètre '{}' de type {} au lieu de {}", p.name, p.ty, source)),
        params => Err(format!("un seul paramètre attendu, {} reçu(s)", params.len())),
    }
}

/// Résout par conventions les membres destination qui n'ont pas de source.
/// Retourne le nombre de membres résolus.
pub fn apply_conventions(schema: &Schema, conventions: &ConventionSet, mapping: &mut TypeMapping) -> usize {
    if mapping.converter.is_some() {
        return 0;
    }
    let source = mapping.pair.source.clone();
    let members: Vec<_> = schema
        .members_of(&mapping.pair.destination)
        .into_iter()
        .cloned()
        .collect();

    let mut resolved = 0;
    for member in members {
        if mapping.rule_for(&member.name).is_some_and(|r| r.is_resolved()) {
            continue;
        }
        if mapping.path_rules.iter().any(|p| p.path.first() == Some(&member.name)) {
            continue;
        }
        let Some(chain) = conventions.resolve(schema, &member.name, &source) else {
            continue;
        };
        debug!(
            pair = %mapping.pair,
            member = %member.name,
            chain = %chain.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join("."),
            "membre résolu par convention"
        );
        match mapping.rule_for_mut(&member.name) {
            Some(rule) => rule.source_chain = chain,
            None => mapping
                .rules
                .push(MemberRule::from_chain(member, chain, RuleOrigin::Convention)),
        }
        resolved += 1;
    }
    resolved
}

/// Collecte toutes les erreurs d'un TypeMapping.
pub fn check_mapping(schema: &Schema, known: &KnownPairs<'_>, mapping: &TypeMapping) -> Vec<ConfigError> {
    let mut errors = mapping.pending_errors.clone();
    let pair = &mapping.pair;

    let unknown: Vec<_> = [&pair.source, &pair.destination]
        .into_iter()
        .filter(|ty| !schema.knows(ty))
        .map(|ty| ConfigError::UnknownType { ty: ty.clone() })
        .collect();
    if !unknown.is_empty() || mapping.converter.is_some() {
        errors.extend(unknown);
        return errors;
    }

    if mapping.member_list == MemberList::Destination {
        for member in schema.members_of(&pair.destination) {
            let covered = mapping.rule_for(&member.name).is_some_and(|r| r.is_resolved())
                || mapping.path_rules.iter().any(|p| p.path.first() == Some(&member.name));
            if !covered {
                errors.push(ConfigError::UnmappedMember {
                    pair: pair.clone(),
                    member: member.name.clone(),
                });
            }
        }
    }

    for rule in mapping.rules.iter().filter(|r| !r.ignored) {
        check_rule(schema, known, pair, rule, &mut errors);
    }

    for path_rule in &mapping.path_rules {
        let dotted = path_rule.dotted();
        if path_rule.path.is_empty() {
            errors.push(ConfigError::InvalidPath {
                pair: pair.clone(),
                path: dotted,
                reason: "chemin vide".to_string(),
            });
            continue;
        }
        let Some(chain) = schema.resolve_chain(&pair.destination, &path_rule.path) else {
            errors.push(ConfigError::InvalidPath {
                pair: pair.clone(),
                path: dotted,
                reason: format!("chemin inconnu sur {}", pair.destination),
            });
            continue;
        };
        if let Err(reason) = check_source_lambda(schema, &pair.source, &path_rule.source) {
            errors.push(ConfigError::InvalidPath {
                pair: pair.clone(),
                path: dotted,
                reason,
            });
            continue;
        }
        if let Some(leaf) = chain.last() {
            let found = path_rule.source.body.ty();
            if !value_compatible(schema, known, &found, &leaf.ty) {
                errors.push(ConfigError::TypeMismatch {
                    pair: pair.clone(),
                    member: dotted,
                    expected: leaf.ty.clone(),
                    found,
                });
            }
        }
    }

    errors
}

fn check_rule(
    schema: &Schema,
    known: &KnownPairs<'_>,
    pair: &TypePair,
    rule: &MemberRule,
    errors: &mut Vec<ConfigError>,
) {
    let member = &rule.destination;
    if let Some(custom) = &rule.custom {
        if let Err(reason) = check_source_lambda(schema, &pair.source, custom) {
            errors.push(ConfigError::InvalidCustomExpression {
                pair: pair.clone(),
                member: member.name.clone(),
                reason,
            });
            return;
        }
    }
    let Some(found) = rule.value_type() else {
        return;
    };
    let mismatch = |expected: &TypeRef, found: &TypeRef| ConfigError::TypeMismatch {
        pair: pair.clone(),
        member: member.name.clone(),
        expected: expected.clone(),
        found: found.clone(),
    };
    match &rule.converter {
        Some(conv) => {
            if found != conv.from && !schema.is_assignable(&found, &conv.from) {
                errors.push(mismatch(&conv.from, &found));
            }
            if !value_compatible(schema, known, &conv.to, &member.ty) {
                errors.push(mismatch(&member.ty, &conv.to));
            }
        }
        None => {
            if !value_compatible(schema, known, &found, &member.ty) {
                errors.push(mismatch(&member.ty, &found));
            }
        }
    }
}

/// Un prédicat d'équivalence : (source, destination) → Bool.
pub fn check_equivalency(schema: &Schema, pair: &TypePair, predicate: &Lambda) -> Option<ConfigError> {
    let invalid = |reason: String| {
        Some(ConfigError::InvalidEquivalency {
            pair: pair.clone(),
            reason,
        })
    };
    let [s, d] = predicate.params.as_slice() else {
        return invalid(format!("deux paramètres attendus, {} reçu(s)", predicate.params.len()));
    };
    if !schema.is_assignable(&pair.source, &s.ty) {
        return invalid(format!("premier paramètre de type {} au lieu de {}", s.ty, pair.source));
    }
    if !schema.is_assignable(&pair.destination, &d.ty) {
        return invalid(format!("second paramètre de type {} au lieu de {}", d.ty, pair.destination));
    }
    let ret = predicate.body.ty();
    if *ret.underlying() != TypeRef::boolean() {
        return invalid(format!("le corps doit être booléen, pas {}", ret));
    }
    None
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{Expr, Parameter};
    use crate::core::mapping::PathRule;
    use crate::core::schema::Member;

    /// Order { Id, Customer, Total } / OrderDto { Id, CustomerName, Total }
    fn schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Customer")
         .add_type("Order")
         .add_type("OrderDto")
         .add_member("Customer", "Name", TypeRef::string())
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_member("Order", "Total", TypeRef::float())
         .add_key("OrderDto", "Id", TypeRef::int())
         .add_member("OrderDto", "CustomerName", TypeRef::string())
         .add_member("OrderDto", "Total", TypeRef::nullable(TypeRef::float()));
        s
    }

    fn no_pairs(_: &TypeRef, _: &TypeRef) -> bool {
        false
    }

    fn pair() -> TypePair {
        TypePair::new(TypeRef::shape("Order"), TypeRef::shape("OrderDto"))
    }

    #[test]
    fn test_literal_types_must_match_exactly() {
        let s = schema();
        assert!(value_compatible(&s, &no_pairs, &TypeRef::int(), &TypeRef::int()));
        assert!(value_compatible(&s, &no_pairs, &TypeRef::int(), &TypeRef::nullable(TypeRef::int())));
        assert!(!value_compatible(&s, &no_pairs, &TypeRef::nullable(TypeRef::int()), &TypeRef::int()));
        assert!(!value_compatible(&s, &no_pairs, &TypeRef::int(), &TypeRef::float()));
        assert!(value_compatible(&s, &|_: &TypeRef, _: &TypeRef| true, &TypeRef::int(), &TypeRef::float()));
    }

    #[test]
    fn test_sequences_use_element_mappings() {
        let s = schema();
        let known = |a: &TypeRef, b: &TypeRef| {
            *a == TypeRef::shape("Order") && *b == TypeRef::shape("OrderDto")
        };
        assert!(value_compatible(
            &s,
            &known,
            &TypeRef::list(TypeRef::shape("Order")),
            &TypeRef::list(TypeRef::shape("OrderDto"))
        ));
        assert!(!value_compatible(
            &s,
            &no_pairs,
            &TypeRef::list(TypeRef::shape("Order")),
            &TypeRef::list(TypeRef::shape("OrderDto"))
        ));
    }

    #[test]
    fn test_conventions_then_clean_check() {
        let s = schema();
        let mut mapping = TypeMapping::new(pair());
        let resolved = apply_conventions(&s, &ConventionSet::standard(), &mut mapping);
        assert_eq!(resolved, 3);
        let chain = &mapping.rule_for("CustomerName").unwrap().source_chain;
        assert_eq!(chain.len(), 2);
        assert!(check_mapping(&s, &no_pairs, &mapping).is_empty());
    }

    #[test]
    fn test_unmapped_member_reported() {
        let mut s = schema();
        s.add_member("OrderDto", "Comment", TypeRef::string());
        let mut mapping = TypeMapping::new(pair());
        apply_conventions(&s, &ConventionSet::standard(), &mut mapping);
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert_eq!(
            errors,
            vec![ConfigError::UnmappedMember { pair: pair(), member: "Comment".into() }]
        );

        mapping.member_list = MemberList::None;
        assert!(check_mapping(&s, &no_pairs, &mapping).is_empty());
    }

    #[test]
    fn test_type_mismatch_on_custom_expression() {
        let s = schema();
        let mut mapping = TypeMapping::new(pair());
        apply_conventions(&s, &ConventionSet::standard(), &mut mapping);
        let o = Parameter::new("o", TypeRef::shape("Order"));
        let rule = mapping.rule_for_mut("CustomerName").unwrap();
        rule.custom = Some(Lambda::new(vec![o.clone()], Expr::param(&o).access(&s, "Id").unwrap()));
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert!(matches!(
            &errors[..],
            [ConfigError::TypeMismatch { member, .. }] if member == "CustomerName"
        ));
    }

    #[test]
    fn test_custom_expression_on_wrong_type() {
        let s = schema();
        let mut mapping = TypeMapping::new(pair());
        let c = Parameter::new("c", TypeRef::shape("Customer"));
        let mut rule = MemberRule::new(
            Member::new("OrderDto", "CustomerName", TypeRef::string()),
            RuleOrigin::Explicit,
        );
        rule.custom = Some(Lambda::new(vec![c.clone()], Expr::param(&c).access(&s, "Name").unwrap()));
        mapping.rules.push(rule);
        mapping.member_list = MemberList::None;
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert!(matches!(&errors[..], [ConfigError::InvalidCustomExpression { .. }]));
    }

    #[test]
    fn test_unknown_path() {
        let s = schema();
        let mut mapping = TypeMapping::new(pair());
        mapping.member_list = MemberList::None;
        let o = Parameter::new("o", TypeRef::shape("Order"));
        mapping.path_rules.push(PathRule {
            path: vec!["Customer".into(), "Name".into()],
            source: Lambda::new(vec![o.clone()], Expr::param(&o)),
            origin: RuleOrigin::Explicit,
        });
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert!(matches!(&errors[..], [ConfigError::InvalidPath { path, .. }] if path == "Customer.Name"));
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let s = schema();
        let mut mapping = TypeMapping::new(pair());
        mapping.member_list = MemberList::None;
        let o = Parameter::new("o", TypeRef::shape("Order"));
        mapping.path_rules.push(PathRule {
            path: Vec::new(),
            source: Lambda::new(vec![o.clone()], Expr::param(&o)),
            origin: RuleOrigin::Explicit,
        });
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert!(matches!(
            &errors[..],
            [ConfigError::InvalidPath { path, reason, .. }] if path.is_empty() && reason == "chemin vide"
        ));
    }

    #[test]
    fn test_unknown_type() {
        let s = schema();
        let mapping = TypeMapping::new(TypePair::new(TypeRef::shape("Ghost"), TypeRef::shape("OrderDto")));
        let errors = check_mapping(&s, &no_pairs, &mapping);
        assert_eq!(errors, vec![ConfigError::UnknownType { ty: TypeRef::shape("Ghost") }]);
    }

    #[test]
    fn test_equivalency_shape() {
        let s = schema();
        let o = Parameter::new("o", TypeRef::shape("Order"));
        let d = Parameter::new("d", TypeRef::shape("OrderDto"));
        let good = Lambda::new(
            vec![o.clone(), d.clone()],
            Expr::param(&o)
                .access(&s, "Id")
                .unwrap()
                .equal(Expr::param(&d).access(&s, "Id").unwrap()),
        );
        assert!(check_equivalency(&s, &pair(), &good).is_none());

        let one_param = Lambda::new(vec![o.clone()], Expr::constant(true));
        assert!(check_equivalency(&s, &pair(), &one_param).is_some());

        let not_bool = Lambda::new(vec![o.clone(), d], Expr::param(&o).access(&s, "Id").unwrap());
        assert!(check_equivalency(&s, &pair(), &not_bool).is_some());
    }
}
