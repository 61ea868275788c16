// =============================================================================
// EQUIVALENCY — "Ces deux objets sont-ils la même entité logique ?"
// =============================================================================
//
// Pour fusionner une liste de DTO dans une liste d'entités (upsert), il faut
// savoir quel DTO correspond à quelle entité. C'est un PRÉDICAT :
//
//   (o : Order, d : OrderDto) => o.Id == d.Id
//
// Trois sources, dans cet ordre :
//
//   1. le prédicat déclaré par l'utilisateur (jamais remplacé, jamais caché)
//   2. les règles membres du TypeMapping qui portent une clé et dont la
//      source est un accès simple à UN membre
//   3. le fournisseur de clés externe (code non fiable : ses erreurs et
//      ses paniques deviennent "non dérivable")
//
// Le cache a trois états par paire :
//
//   absent       → jamais calculé
//   Resolved     → prédicat disponible
//   NotDerivable → échec mémorisé, on ne redemande pas
//
// =============================================================================

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::eval::{apply_predicate, Env};
use super::expr::{Expr, Lambda, ParamId, Parameter};
use super::mapping::{TypeMapping, TypePair};
use super::schema::{Member, Schema};
use super::typeside::{TypeRef, Value};
use crate::error::MappingError;

/// Une paire (membre clé destination, membre source proposé).
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPair {
    pub destination: Member,
    pub source: Option<Member>,
}

/// Fournisseur externe de membres clés. Son avis n'est pas fiable.
pub trait KeyProvider: Send + Sync {
    fn propose_key_members(
        &self,
        schema: &Schema,
        source: &TypeRef,
        destination: &TypeRef,
    ) -> Result<Option<Vec<KeyPair>>, Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquivalencyOrigin {
    User,
    MemberRules,
    KeyProvider,
}

/// Le prédicat d'équivalence d'une paire : (source, destination) → Bool.
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalencyExpression {
    pub pair: TypePair,
    pub predicate: Lambda,
    pub origin: EquivalencyOrigin,
}

impl EquivalencyExpression {
    pub fn new(pair: TypePair, predicate: Lambda, origin: EquivalencyOrigin) -> Self {
        EquivalencyExpression {
            pair,
            predicate,
            origin,
        }
    }

    /// Évalue le prédicat sur deux instances, après vérification de leurs types.
    pub fn is_equivalent(&self, schema: &Schema, source: &Value, destination: &Value) -> Result<bool, MappingError> {
        check_instance(schema, source, &self.pair.source)?;
        check_instance(schema, destination, &self.pair.destination)?;
        Ok(apply_predicate(
            &self.predicate,
            &[source.clone(), destination.clone()],
            &Env::new(),
        )?)
    }

    /// Fige l'instance source dans le prédicat : ses membres deviennent des
    /// constantes, il reste un prédicat d'existence sur la destination.
    pub fn to_single_source(&self, schema: &Schema, source: &Value) -> Result<Lambda, MappingError> {
        check_instance(schema, source, &self.pair.source)?;
        let [s, d] = self.predicate.params.as_slice() else {
            return Err(MappingError::CannotRemap {
                reason: format!("prédicat d'équivalence {} à {} paramètre(s)", self.pair, self.predicate.params.len()),
            });
        };
        let body = bind_source(&self.predicate.body, s, source);
        Ok(Lambda::new(vec![d.clone()], body))
    }
}

impl fmt::Display for EquivalencyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.pair, self.predicate)
    }
}

fn check_instance(schema: &Schema, value: &Value, expected: &TypeRef) -> Result<(), MappingError> {
    let matches = match (value, expected) {
        (Value::Object(o), TypeRef::Shape(name)) => o.type_name == *name || schema.derives_from(&o.type_name, name),
        (Value::Null, _) => false,
        (other, ty) => other.runtime_type().is_some_and(|t| schema.is_assignable(&t, ty)),
    };
    if matches {
        Ok(())
    } else {
        Err(MappingError::NotOfType {
            expected: expected.clone(),
            found: value.kind(),
        })
    }
}

/// Remplace chaque chaîne de membres sur `param` par la valeur lue dans
/// `source`, typée comme le dernier membre.
fn bind_source(expr: &Expr, param: &Parameter, source: &Value) -> Expr {
    fold_param(expr, param.id, &|members: &[&Member]| {
        let path: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
        let value = match source {
            Value::Object(o) => o.get_path(&path),
            other if path.is_empty() => other.clone(),
            _ => Value::Null,
        };
        let ty = members.last().map(|m| m.ty.clone()).unwrap_or_else(|| param.ty.clone());
        Expr::typed_constant(value, ty)
    })
}

fn fold_param(expr: &Expr, id: ParamId, leaf: &dyn Fn(&[&Member]) -> Expr) -> Expr {
    match expr {
        Expr::Member { .. } | Expr::Parameter(_) => {
            let (root, members) = expr.member_chain();
            match root {
                Expr::Parameter(p) if p.id == id => leaf(&members),
                _ if members.is_empty() => expr.clone(),
                other => members
                    .into_iter()
                    .fold(fold_param(other, id, leaf), |target, m| target.member(m.clone())),
            }
        }
        Expr::Constant { .. } => expr.clone(),
        Expr::Call { receiver, method, args } => Expr::Call {
            receiver: receiver.as_ref().map(|r| Box::new(fold_param(r, id, leaf))),
            method: method.clone(),
            args: args.iter().map(|a| fold_param(a, id, leaf)).collect(),
        },
        Expr::Unary { op, operand, ty } => Expr::Unary {
            op: *op,
            operand: Box::new(fold_param(operand, id, leaf)),
            ty: ty.clone(),
        },
        Expr::Binary { op, left, right } => Expr::binary(*op, fold_param(left, id, leaf), fold_param(right, id, leaf)),
        Expr::Lambda(l) => Expr::Lambda(Lambda {
            params: l.params.clone(),
            body: Box::new(fold_param(&l.body, id, leaf)),
        }),
    }
}

enum CacheEntry {
    Resolved(Arc<EquivalencyExpression>),
    NotDerivable,
}

/// Le générateur : prédicats utilisateur, fournisseur de clés, cache.
pub struct EquivalencyGenerator {
    user: HashMap<TypePair, Arc<EquivalencyExpression>>,
    provider: Option<Arc<dyn KeyProvider>>,
    cache: RwLock<HashMap<TypePair, CacheEntry>>,
}

impl EquivalencyGenerator {
    pub(crate) fn new(
        user: HashMap<TypePair, Arc<EquivalencyExpression>>,
        provider: Option<Arc<dyn KeyProvider>>,
    ) -> Self {
        EquivalencyGenerator {
            user,
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Le prédicat d'une paire, ou None si aucun n'est dérivable.
    pub fn get(&self, schema: &Schema, mapping: Option<&TypeMapping>, pair: &TypePair) -> Option<Arc<EquivalencyExpression>> {
        if let Some(user) = self.user.get(pair) {
            return Some(Arc::clone(user));
        }
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            match cache.get(pair) {
                Some(CacheEntry::Resolved(e)) => return Some(Arc::clone(e)),
                Some(CacheEntry::NotDerivable) => return None,
                None => {}
            }
        }

        let derived = mapping
            .and_then(from_member_rules)
            .or_else(|| self.from_provider(schema, pair));
        let entry = match &derived {
            Some(e) => CacheEntry::Resolved(Arc::clone(e)),
            None => CacheEntry::NotDerivable,
        };
        debug!(pair = %pair, found = derived.is_some(), "cache d'équivalence rempli");
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pair.clone(), entry);
        derived
    }

    fn from_provider(&self, schema: &Schema, pair: &TypePair) -> Option<Arc<EquivalencyExpression>> {
        let provider = self.provider.as_ref()?;
        let proposal = catch_unwind(AssertUnwindSafe(|| {
            provider.propose_key_members(schema, &pair.source, &pair.destination)
        }));
        let keys = match proposal {
            Ok(Ok(Some(keys))) => keys,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(pair = %pair, error = %e, "le fournisseur de clés a échoué");
                return None;
            }
            Err(_) => {
                warn!(pair = %pair, "le fournisseur de clés a paniqué");
                return None;
            }
        };

        let mut equalities = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(source) = &key.source else {
                warn!(pair = %pair, member = %key.destination.name, "clé proposée sans membre source");
                return None;
            };
            equalities.push((source.clone(), key.destination.clone()));
        }
        let covered = schema
            .members_of(&pair.destination)
            .into_iter()
            .filter(|m| m.is_key)
            .all(|k| keys.iter().any(|p| p.destination.name == k.name));
        if equalities.is_empty() || !covered {
            warn!(pair = %pair, "proposition de clés incomplète");
            return None;
        }
        Some(Arc::new(conjunction(pair, &equalities, EquivalencyOrigin::KeyProvider)))
    }
}

impl fmt::Debug for EquivalencyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquivalencyGenerator")
            .field("user", &self.user.len())
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

/// Règles clés à accès simple → conjonction d'égalités
fn from_member_rules(mapping: &TypeMapping) -> Option<Arc<EquivalencyExpression>> {
    if !mapping.is_valid() || mapping.converter.is_some() {
        return None;
    }
    let equalities: Vec<(Member, Member)> = mapping
        .rules
        .iter()
        .filter(|r| r.is_plain() && r.converter.is_none() && !r.ignored)
        .filter_map(|r| match r.source_chain.as_slice() {
            [single] if single.is_key || r.destination.is_key => {
                Some((single.clone(), r.destination.clone()))
            }
            _ => None,
        })
        .collect();
    if equalities.is_empty() {
        return None;
    }
    Some(Arc::new(conjunction(&mapping.pair, &equalities, EquivalencyOrigin::MemberRules)))
}

fn conjunction(pair: &TypePair, equalities: &[(Member, Member)], origin: EquivalencyOrigin) -> EquivalencyExpression {
    let s = Parameter::new("s", pair.source.clone());
    let d = Parameter::new("d", pair.destination.clone());
    let body = equalities
        .iter()
        .map(|(src, dst)| {
            Expr::param(&s)
                .member(src.clone())
                .equal(Expr::param(&d).member(dst.clone()))
        })
        .reduce(Expr::and_also)
        .unwrap_or_else(|| Expr::constant(false));
    EquivalencyExpression::new(pair.clone(), Lambda::new(vec![s, d], body), origin)
}
