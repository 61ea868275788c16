// =============================================================================
// RESOLVE — Résolution d'un chemin de membres d'un type vers un autre
// =============================================================================
//
// Une requête écrite sur le type S doit être réécrite sur le type D.
// Pour chaque chaîne `x.A.B.C` (x : S), on cherche la suite d'étapes qui
// produit la même valeur à partir de D.
//
// SENS : on utilise les règles qui construisent S à partir de D, donc le
// TypeMapping D → S (ses membres destination sont ceux de S).
//
//   OrderDto.CustomerName  avec  Order → OrderDto { CustomerName ← Customer.Name }
//      ⇒ [ chaîne Customer.Name ]
//
// Segment par segment :
//   - si S == D, le reste du chemin est recopié tel quel
//   - sinon on collecte les CANDIDATS : la règle membre du premier segment
//     et les règles de chemin dont le chemin préfixe le reste
//   - plusieurs candidats : leurs empreintes (plus longue chaîne de
//     membres produite) doivent s'emboîter par préfixe, sinon
//     ExpressionTooComplex ; on garde le plus spécifique
//   - on descend dans le type du membre S et le type produit côté D,
//     ce qui fait intervenir le TypeMapping imbriqué suivant
//
// Le résultat est une liste de MemberMapInfo, mise en cache par
// (S, D, chemin). Les erreurs ne sont jamais mises en cache.
//
// =============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::expr::{Expr, Lambda};
use super::mapping::{MemberRule, TypeMapping};
use super::registry::Registry;
use super::schema::Member;
use super::typeside::TypeRef;
use crate::error::MappingError;

/// Une étape résolue : une chaîne de membres côté D, ou une expression
/// personnalisée dont le paramètre sera remplacé par le préfixe.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberMapInfo {
    pub custom: Option<Lambda>,
    pub members: Vec<Member>,
}

impl MemberMapInfo {
    pub fn chain(members: Vec<Member>) -> Self {
        MemberMapInfo { custom: None, members }
    }

    pub fn custom(lambda: Lambda) -> Self {
        MemberMapInfo {
            custom: Some(lambda),
            members: Vec::new(),
        }
    }

    /// Le type produit par l'étape
    pub fn value_type(&self) -> TypeRef {
        match (&self.custom, self.members.last()) {
            (Some(custom), _) => custom.body.ty(),
            (None, Some(last)) => last.ty.clone(),
            (None, None) => TypeRef::Object,
        }
    }

    /// Noms de la plus longue chaîne de membres lue par l'étape
    fn footprint(&self) -> Vec<String> {
        match &self.custom {
            Some(custom) => lambda_footprint(custom),
            None => self.members.iter().map(|m| m.name.clone()).collect(),
        }
    }
}

fn lambda_footprint(lambda: &Lambda) -> Vec<String> {
    let Some(param) = lambda.params.first() else {
        return Vec::new();
    };
    lambda
        .body
        .member_chains_on(param.id)
        .into_iter()
        .max_by_key(|chain| chain.len())
        .map(|chain| chain.into_iter().map(|m| m.name).collect())
        .unwrap_or_default()
}

type PathKey = (TypeRef, TypeRef, Vec<String>);

/// Cache des chemins résolus : (S, D, segments) → étapes.
#[derive(Default)]
pub struct PathCache {
    entries: RwLock<HashMap<PathKey, Arc<Vec<MemberMapInfo>>>>,
}

impl PathCache {
    fn get(&self, key: &PathKey) -> Option<Arc<Vec<MemberMapInfo>>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn insert(&self, key: PathKey, infos: Arc<Vec<MemberMapInfo>>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, infos);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PathCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathCache({} chemin(s))", self.len())
    }
}

/// Résout `segments` (écrit sur `source`) vers `destination`, avec cache.
pub fn resolve_path(
    registry: &Registry,
    source: &TypeRef,
    destination: &TypeRef,
    segments: &[String],
) -> Result<Arc<Vec<MemberMapInfo>>, MappingError> {
    let key = (source.clone(), destination.clone(), segments.to_vec());
    if let Some(hit) = registry.path_cache().get(&key) {
        return Ok(hit);
    }
    let infos = Arc::new(resolve_uncached(registry, source, destination, segments)?);
    debug!(
        source = %source,
        destination = %destination,
        path = %segments.join("."),
        steps = infos.len(),
        "chemin résolu et mis en cache"
    );
    registry.path_cache().insert(key, Arc::clone(&infos));
    Ok(infos)
}

/// Un candidat à la résolution du début du chemin restant
struct Candidate {
    consumed: usize,
    label: String,
    footprint: Vec<String>,
    converted: bool,
    info: MemberMapInfo,
}

fn resolve_uncached(
    registry: &Registry,
    source: &TypeRef,
    destination: &TypeRef,
    segments: &[String],
) -> Result<Vec<MemberMapInfo>, MappingError> {
    let schema = registry.schema();
    let mut infos = Vec::new();
    let mut s = source.clone();
    let mut d = destination.clone();
    let mut i = 0;

    while i < segments.len() {
        let remaining = &segments[i..];
        if s == d {
            let chain = schema.resolve_chain(&d, remaining).ok_or_else(|| MappingError::MissingMember {
                ty: d.clone(),
                member: remaining.join("."),
            })?;
            infos.push(MemberMapInfo::chain(chain));
            break;
        }

        let mapping = registry.get_mapping(&d, &s)?;
        if mapping.converter.is_some() {
            return Err(MappingError::CannotRemap {
                reason: format!(
                    "{} passe par un convertisseur de paire, '{}' ne peut pas être traversé",
                    mapping.pair, remaining[0]
                ),
            });
        }
        let candidate = pick_candidate(mapping, remaining)?;

        let consumed = &remaining[..candidate.consumed];
        let s_member = schema
            .resolve_chain(&s, consumed)
            .and_then(|chain| chain.last().cloned())
            .ok_or_else(|| MappingError::MissingMember {
                ty: s.clone(),
                member: consumed.join("."),
            })?;
        let produced = candidate.info.value_type();
        if !candidate.converted {
            check_value_type(registry, &s_member, &produced)?;
        }

        i += candidate.consumed;
        infos.push(candidate.info);
        s = s_member.ty;
        d = produced;
    }
    Ok(infos)
}

/// Un membre littéral doit recevoir exactement son type (au Nullable près)
fn check_value_type(registry: &Registry, member: &Member, produced: &TypeRef) -> Result<(), MappingError> {
    let expected = &member.ty;
    if !(expected.is_literal() || produced.is_literal()) {
        return Ok(());
    }
    let compatible = expected.underlying() == produced.underlying()
        || *expected == TypeRef::Object
        || registry.has_mapping(produced, expected)
        || registry.has_mapping(expected, produced);
    if compatible {
        Ok(())
    } else {
        Err(MappingError::ValueTypeMismatch {
            member: member.name.clone(),
            expected: expected.clone(),
            found: produced.clone(),
        })
    }
}

fn pick_candidate(mapping: &TypeMapping, remaining: &[String]) -> Result<Candidate, MappingError> {
    let mut candidates: Vec<Candidate> = mapping
        .path_rules_for(remaining)
        .map(|rule| Candidate {
            consumed: rule.path.len(),
            label: format!("{} <- {}", rule.dotted(), rule.source),
            footprint: lambda_footprint(&rule.source),
            converted: false,
            info: MemberMapInfo::custom(rule.source.clone()),
        })
        .collect();

    let first = &remaining[0];
    match mapping.rule_for(first).map(|rule| rule_candidate(mapping, rule)) {
        Some(Ok(Some(candidate))) => candidates.push(candidate),
        Some(Err(e)) if candidates.is_empty() => return Err(e),
        _ => {}
    }

    if candidates.len() > 1 {
        let mut by_size: Vec<&Candidate> = candidates.iter().collect();
        by_size.sort_by_key(|c| c.footprint.len());
        for pair in by_size.windows(2) {
            let (short, long) = (&pair[0].footprint, &pair[1].footprint);
            if !long.starts_with(short) {
                return Err(MappingError::ExpressionTooComplex {
                    first: pair[0].label.clone(),
                    second: pair[1].label.clone(),
                });
            }
        }
    }

    candidates
        .into_iter()
        .max_by_key(|c| (c.consumed, c.footprint.len()))
        .ok_or_else(|| MappingError::UnmappedMember {
            pair: mapping.pair.clone(),
            member: first.clone(),
        })
}

fn rule_candidate(mapping: &TypeMapping, rule: &MemberRule) -> Result<Option<Candidate>, MappingError> {
    let name = &rule.destination.name;
    if rule.ignored {
        return Ok(None);
    }
    if let Some(custom) = &rule.custom {
        return Ok(Some(Candidate {
            consumed: 1,
            label: format!("{} <- {}", name, custom),
            footprint: lambda_footprint(custom),
            converted: rule.converter.is_some(),
            info: MemberMapInfo::custom(custom.clone()),
        }));
    }
    if rule.resolver.is_some() {
        return Err(MappingError::CustomResolverUnsupported {
            pair: mapping.pair.clone(),
            member: name.clone(),
        });
    }
    if rule.source_chain.is_empty() {
        return Err(MappingError::SourceMemberRequired {
            pair: mapping.pair.clone(),
            member: name.clone(),
        });
    }
    let info = MemberMapInfo::chain(rule.source_chain.clone());
    Ok(Some(Candidate {
        consumed: 1,
        label: format!("{} <- {}", name, info.footprint().join(".")),
        footprint: info.footprint(),
        converted: rule.converter.is_some(),
        info,
    }))
}

/// Reconstruit l'expression côté D à partir de la racine réécrite.
/// La dernière expression personnalisée est greffée sur tout ce qui la
/// précède ; les chaînes suivantes s'ajoutent par accès membres.
pub fn build_from_infos(root: Expr, infos: &[MemberMapInfo]) -> Expr {
    let Some((last, init)) = infos.split_last() else {
        return root;
    };
    let prefix = build_from_infos(root, init);
    match &last.custom {
        Some(custom) => match custom.params.first() {
            Some(param) => custom.body.substitute(param.id, &prefix),
            None => (*custom.body).clone(),
        },
        None => last
            .members
            .iter()
            .fold(prefix, |target, member| target.member(member.clone())),
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::Parameter;
    use crate::core::registry::RegistryBuilder;
    use crate::core::schema::Schema;

    /// Address { City } ; Customer { Name, Home : Address }
    /// Order { Id, Customer } ; OrderDto { Id, CustomerName, City }
    fn schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Address")
         .add_type("Customer")
         .add_type("Order")
         .add_type("OrderDto")
         .add_member("Address", "City", TypeRef::string())
         .add_member("Customer", "Name", TypeRef::string())
         .add_member("Customer", "Home", TypeRef::shape("Address"))
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_key("OrderDto", "Id", TypeRef::int())
         .add_member("OrderDto", "CustomerName", TypeRef::string())
         .add_member("OrderDto", "City", TypeRef::string());
        s
    }

    fn order() -> TypeRef {
        TypeRef::shape("Order")
    }

    fn dto() -> TypeRef {
        TypeRef::shape("OrderDto")
    }

    fn segs(dotted: &str) -> Vec<String> {
        dotted.split('.').map(String::from).collect()
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new(schema());
        builder
            .create_mapping(order(), dto())
            .map_member("City", "Customer.Home.City");
        builder.seal().unwrap()
    }

    #[test]
    fn test_flattened_member_resolves_to_chain() {
        let r = registry();
        let infos = resolve_path(&r, &dto(), &order(), &segs("CustomerName")).unwrap();
        assert_eq!(infos.len(), 1);
        let names: Vec<&str> = infos[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Customer", "Name"]);
    }

    #[test]
    fn test_results_are_cached() {
        let r = registry();
        assert_eq!(r.cached_paths(), 0);
        let a = resolve_path(&r, &dto(), &order(), &segs("City")).unwrap();
        let b = resolve_path(&r, &dto(), &order(), &segs("City")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.cached_paths(), 1);
    }

    #[test]
    fn test_unknown_member_and_missing_mapping() {
        let r = registry();
        let err = resolve_path(&r, &dto(), &order(), &segs("Nope")).unwrap_err();
        assert!(matches!(err, MappingError::UnmappedMember { .. }));
        let err = resolve_path(&r, &order(), &dto(), &segs("Id")).unwrap_err();
        assert!(matches!(err, MappingError::MissingTypeMapping { .. }));
        assert_eq!(r.cached_paths(), 0);
    }

    #[test]
    fn test_same_type_copies_path() {
        let r = registry();
        let infos = resolve_path(&r, &order(), &order(), &segs("Customer.Name")).unwrap();
        assert_eq!(infos[0].members.len(), 2);
    }

    #[test]
    fn test_resolver_is_rejected() {
        let mut builder = RegistryBuilder::new(schema());
        builder
            .create_mapping(order(), dto())
            .resolve_using("City", TypeRef::string(), |_| Ok("Paris".into()));
        let r = builder.seal().unwrap();
        let err = resolve_path(&r, &dto(), &order(), &segs("City")).unwrap_err();
        assert!(matches!(err, MappingError::CustomResolverUnsupported { member, .. } if member == "City"));
    }

    #[test]
    fn test_converted_member_yields_source_type() {
        let mut builder = RegistryBuilder::new(schema());
        let conv = crate::core::mapping::ValueConverter::new(TypeRef::int(), TypeRef::string(), |v| {
            Ok(crate::core::typeside::Value::String(v.to_string()))
        });
        builder
            .create_mapping(order(), dto())
            .map_member("City", "Id")
            .convert_member("City", conv);
        let r = builder.seal().unwrap();
        let infos = resolve_path(&r, &dto(), &order(), &segs("City")).unwrap();
        assert_eq!(infos[0].value_type(), TypeRef::int());
    }

    #[test]
    fn test_build_splices_last_custom() {
        let s = schema();
        let o = Parameter::new("o", order());
        let c = Parameter::new("c", TypeRef::shape("Customer"));
        let infos = vec![
            MemberMapInfo::chain(vec![s.find_member(&order(), "Customer").unwrap().clone()]),
            MemberMapInfo::custom(Lambda::new(
                vec![c.clone()],
                Expr::param(&c).access(&s, "Home").unwrap(),
            )),
            MemberMapInfo::chain(vec![s.find_member(&TypeRef::shape("Address"), "City").unwrap().clone()]),
        ];
        let built = build_from_infos(Expr::param(&o), &infos);
        assert_eq!(built.to_string(), "o.Customer.Home.City");
    }

    #[test]
    fn test_nested_path_rule_and_member_rule_are_compatible() {
        let mut s = schema();
        s.add_type("Place")
         .add_member("Place", "Town", TypeRef::string())
         .add_member("OrderDto", "Where", TypeRef::shape("Place"));
        let mut builder = RegistryBuilder::new(s.clone());
        let o = Parameter::new("o", order());
        let where_ = Lambda::new(vec![o.clone()], Expr::param(&o).access(&s, "Customer.Home").unwrap());
        let town = Lambda::new(vec![o.clone()], Expr::param(&o).access(&s, "Customer.Home.City").unwrap());
        builder
            .create_mapping(order(), dto())
            .map_member("City", "Customer.Home.City")
            .map_from("Where", where_)
            .for_path("Where.Town", town);
        builder
            .create_mapping(TypeRef::shape("Address"), TypeRef::shape("Place"))
            .map_member("Town", "City");
        let r = builder.seal().unwrap();
        let infos = resolve_path(&r, &dto(), &order(), &segs("Where.Town")).unwrap();
        assert_eq!(infos.len(), 1);
        let built = build_from_infos(Expr::param(&o), &infos);
        assert_eq!(built.to_string(), "o.Customer.Home.City");
    }

    #[test]
    fn test_literal_member_must_receive_its_type() {
        let r = registry();
        let name = Member::new("OrderDto", "CustomerName", TypeRef::string());
        let err = check_value_type(&r, &name, &TypeRef::int()).unwrap_err();
        assert_eq!(
            err,
            MappingError::ValueTypeMismatch {
                member: "CustomerName".into(),
                expected: TypeRef::string(),
                found: TypeRef::int(),
            }
        );
        assert!(check_value_type(&r, &name, &TypeRef::nullable(TypeRef::string())).is_ok());
        let boxed = Member::new("OrderDto", "Payload", TypeRef::Object);
        assert!(check_value_type(&r, &boxed, &TypeRef::int()).is_ok());
    }

    #[test]
    fn test_rule_without_source_member() {
        use crate::core::mapping::{RuleOrigin, TypePair};

        let mut mapping = TypeMapping::new(TypePair::new(order(), dto()));
        let city = Member::new("OrderDto", "City", TypeRef::string());
        mapping.rules.push(MemberRule::new(city, RuleOrigin::Explicit));
        let err = pick_candidate(&mapping, &segs("City")).err();
        assert_eq!(
            err,
            Some(MappingError::SourceMemberRequired {
                pair: TypePair::new(order(), dto()),
                member: "City".into(),
            })
        );
    }
}
