// =============================================================================
// BACKEND — Le consommateur des arbres réécrits
// =============================================================================
//
// Le réécrivain produit une lambda écrite sur le type destination. Un
// backend l'exécute : ORM, traducteur SQL, service distant... Le cœur
// ne connaît JAMAIS les backends, seulement ce trait.
//
//   q => q.Where(o => o.Customer.Name == "Alice").OrderBy(o => o.Id)
//        ↓  QueryBackend::execute
//   [Order { Id = 1, .. }, Order { Id = 4, .. }]
//
// Le MemoryBackend fourni garde des collections d'objets par nom de forme
// et interprète la requête avec l'évaluateur du cœur. Il sert à vérifier
// de bout en bout qu'une requête réécrite renvoie les bons objets.
//
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use crate::core::eval::{apply, apply_predicate, Env};
use crate::core::expr::Lambda;
use crate::core::instance::ObjectValue;
use crate::core::typeside::{TypeRef, Value};
use crate::error::BackendError;

/// Un moteur capable d'exécuter une requête réécrite.
///
/// La requête est une lambda à un paramètre : la séquence racine
/// (`Queryable<T>`), fournie par le backend.
pub trait QueryBackend {
    fn execute(&self, query: &Lambda) -> Result<Value, BackendError>;

    /// Nom du backend, pour les logs
    fn name(&self) -> &str;
}

/// Collections d'objets en mémoire, indexées par nom de forme.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: HashMap<String, Vec<ObjectValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un objet à la collection de sa forme
    pub fn insert(&mut self, object: ObjectValue) -> &mut Self {
        self.collections
            .entry(object.type_name.clone())
            .or_default()
            .push(object);
        self
    }

    pub fn collection(&self, type_name: &str) -> Option<&[ObjectValue]> {
        self.collections.get(type_name).map(Vec::as_slice)
    }

    fn rows(&self, ty: &TypeRef) -> Result<&[ObjectValue], BackendError> {
        ty.shape_name()
            .and_then(|name| self.collection(name))
            .ok_or_else(|| BackendError::UnknownCollection { ty: ty.clone() })
    }

    /// Filtre une collection avec un prédicat `x => bool`.
    pub fn filter(&self, predicate: &Lambda) -> Result<Vec<ObjectValue>, BackendError> {
        let [param] = predicate.params.as_slice() else {
            return Err(BackendError::NotAQuery {
                found: predicate.func_type(),
            });
        };
        let mut out = Vec::new();
        for row in self.rows(&param.ty)? {
            if apply_predicate(predicate, &[Value::Object(row.clone())], &Env::new())? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }
}

impl QueryBackend for MemoryBackend {
    fn execute(&self, query: &Lambda) -> Result<Value, BackendError> {
        let element = match query.params.as_slice() {
            [param] => param.ty.element_type().cloned(),
            _ => None,
        };
        let Some(element) = element else {
            return Err(BackendError::NotAQuery {
                found: query.func_type(),
            });
        };
        let rows = self.rows(&element)?;
        debug!(backend = self.name(), query = %query, rows = rows.len(), "exécution");
        let source = Value::List(rows.iter().cloned().map(Value::Object).collect());
        Ok(apply(query, &[source], &Env::new())?)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{Expr, Parameter};
    use crate::core::query;
    use crate::core::schema::Schema;

    /// Order { Id, Label }
    fn schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Order")
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Label", TypeRef::string());
        s
    }

    /// Trois commandes, Id 1..3
    fn backend() -> MemoryBackend {
        let mut b = MemoryBackend::new();
        for (id, label) in [(3i64, "c"), (1, "a"), (2, "b")] {
            b.insert(ObjectValue::new("Order").with("Id", id).with("Label", label));
        }
        b
    }

    fn ids(v: &Value) -> Vec<Value> {
        match v {
            Value::List(items) => items
                .iter()
                .filter_map(|i| i.as_object().map(|o| o.get("Id").clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_filter() {
        let s = schema();
        let o = Parameter::new("o", TypeRef::shape("Order"));
        let pred = Lambda::new(
            vec![o.clone()],
            Expr::param(&o).access(&s, "Id").unwrap().greater_than(Expr::constant(1i64)),
        );
        assert_eq!(backend().filter(&pred).unwrap().len(), 2);
    }

    #[test]
    fn test_execute_where_order_by() {
        let s = schema();
        let q = Parameter::new("q", TypeRef::queryable(TypeRef::shape("Order")));
        let o = Parameter::new("o", TypeRef::shape("Order"));
        let pred = Lambda::new(
            vec![o.clone()],
            Expr::param(&o).access(&s, "Label").unwrap().not_equal(Expr::constant("b")),
        );
        let key = Lambda::new(vec![o.clone()], Expr::param(&o).access(&s, "Id").unwrap());
        let body = query::where_(&s, Expr::param(&q), pred).unwrap();
        let body = query::order_by(&s, body, key).unwrap();
        let result = backend().execute(&Lambda::new(vec![q], body)).unwrap();
        assert_eq!(ids(&result), vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn test_unknown_collection_and_bad_query() {
        let q = Parameter::new("q", TypeRef::queryable(TypeRef::shape("Nope")));
        let err = backend().execute(&Lambda::new(vec![q.clone()], Expr::param(&q))).unwrap_err();
        assert!(matches!(err, BackendError::UnknownCollection { .. }));

        let x = Parameter::new("x", TypeRef::int());
        let err = backend().execute(&Lambda::new(vec![x.clone()], Expr::param(&x))).unwrap_err();
        assert!(matches!(err, BackendError::NotAQuery { .. }));
    }
}
