// =============================================================================
// MIGRATE — La façade d'exécution : convertir un objet vivant
// =============================================================================
//
// Le réécrivain d'expressions manipule des ARBRES. Mais un arbre peut
// contenir une CONSTANTE typée source (un DTO capturé, une liste de DTO
// pour un Contains...). Cette constante doit être convertie vers le type
// destination : c'est le rôle de la façade.
//
//   convert(OrderDto { Id = 3 }, OrderDto, Order) → Order { Id = 3 }
//
// L'ObjectMapper par défaut suit le registre :
//
//   1. types égaux, Null, T → Nullable<T>   → la valeur telle quelle
//   2. convertisseur de paire enregistré    → la fonction de l'utilisateur
//   3. sinon, membre par membre :
//        resolver  → appelé sur l'objet source
//        custom    → évalué en mémoire
//        chaîne    → lue dans l'objet source
//      puis convertisseur de membre, puis conversion récursive des types
//      imbriqués ; les règles de chemin créent les objets intermédiaires
//   4. enums : par nom de variante
//   5. séquences : élément par élément
//
// Une autre façade peut être installée sur le RegistryBuilder.
//
// =============================================================================

use std::fmt;

use tracing::debug;

use super::eval::{apply, Env};
use super::instance::ObjectValue;
use super::mapping::{MemberRule, TypeMapping};
use super::registry::Registry;
use super::typeside::{TypeRef, Value};
use crate::error::MappingError;

/// Le moteur de copie d'objets utilisé par le réécrivain.
pub trait MappingFacade: Send + Sync + fmt::Debug {
    fn convert(&self, registry: &Registry, value: &Value, from: &TypeRef, to: &TypeRef) -> Result<Value, MappingError>;
}

/// La façade par défaut, pilotée par les TypeMappings du registre.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMapper;

impl MappingFacade for ObjectMapper {
    fn convert(&self, registry: &Registry, value: &Value, from: &TypeRef, to: &TypeRef) -> Result<Value, MappingError> {
        if from == to || value.is_null() || *to == TypeRef::Object {
            return Ok(value.clone());
        }
        if to.is_nullable() && to.underlying() == from {
            return Ok(value.clone());
        }
        if registry.find_mapping(from, to).is_some() {
            let mapping = registry.get_mapping(from, to)?;
            return self.convert_object(registry, mapping, value);
        }
        match (from, to, value) {
            (TypeRef::Enum(_), TypeRef::Enum(target), Value::Enum { variant, .. }) => {
                let known = registry
                    .schema()
                    .enum_descriptor(target)
                    .is_some_and(|e| e.variants.contains(variant));
                if known {
                    Ok(Value::enum_variant(target, variant))
                } else {
                    Err(MappingError::Conversion {
                        from: from.clone(),
                        to: to.clone(),
                        reason: format!("variante '{}' absente de {}", variant, target),
                    })
                }
            }
            (_, _, Value::List(items)) => match (from.element_type(), to.element_type()) {
                (Some(a), Some(b)) => items
                    .iter()
                    .map(|item| self.convert(registry, item, a, b))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                _ => Err(MappingError::MissingTypeMapping {
                    from: from.clone(),
                    to: to.clone(),
                }),
            },
            _ => Err(MappingError::MissingTypeMapping {
                from: from.clone(),
                to: to.clone(),
            }),
        }
    }
}

impl ObjectMapper {
    fn convert_object(&self, registry: &Registry, mapping: &TypeMapping, value: &Value) -> Result<Value, MappingError> {
        if let Some(converter) = &mapping.converter {
            return converter.convert(value);
        }
        let Value::Object(source) = value else {
            return Err(MappingError::NotOfType {
                expected: mapping.source().clone(),
                found: value.kind(),
            });
        };
        let Some(type_name) = mapping.destination().shape_name() else {
            return Err(MappingError::Conversion {
                from: mapping.source().clone(),
                to: mapping.destination().clone(),
                reason: "la destination n'est pas une forme".into(),
            });
        };
        debug!(pair = %mapping.pair, "conversion membre par membre");

        let mut out = ObjectValue::new(type_name);
        for rule in mapping.rules.iter().filter(|r| !r.ignored) {
            let Some(raw) = self.read_rule(rule, source, value)? else {
                continue;
            };
            let converted = match (&rule.converter, rule.value_type()) {
                (Some(conv), _) => conv.convert(&raw)?,
                (None, Some(found)) => self.convert(registry, &raw, &found, &rule.destination.ty)?,
                (None, None) => raw,
            };
            out.set(&rule.destination.name, converted);
        }

        for path_rule in &mapping.path_rules {
            let Some(chain) = registry.schema().resolve_chain(mapping.destination(), &path_rule.path) else {
                continue;
            };
            let raw = apply(&path_rule.source, std::slice::from_ref(value), &Env::new())?;
            let leaf = chain.last().map(|m| m.ty.clone()).unwrap_or(TypeRef::Object);
            let converted = self.convert(registry, &raw, &path_rule.source.body.ty(), &leaf)?;
            let types: Vec<String> = chain
                .iter()
                .map(|m| m.ty.shape_name().unwrap_or_default().to_string())
                .collect();
            out.set_path(&path_rule.path, &types, converted);
        }
        Ok(Value::Object(out))
    }

    fn read_rule(&self, rule: &MemberRule, source: &ObjectValue, value: &Value) -> Result<Option<Value>, MappingError> {
        if let Some(resolver) = &rule.resolver {
            return resolver.resolve(value).map(Some);
        }
        if let Some(custom) = &rule.custom {
            return Ok(Some(apply(custom, std::slice::from_ref(value), &Env::new())?));
        }
        if rule.source_chain.is_empty() {
            return Ok(None);
        }
        let path: Vec<String> = rule.source_chain.iter().map(|m| m.name.clone()).collect();
        Ok(Some(source.get_path(&path)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::ValueConverter;
    use crate::core::registry::RegistryBuilder;
    use crate::core::schema::Schema;

    /// Customer { Id, Name } ; Order { Id, Customer } ; OrderDto { Id, CustomerName }
    /// + deux enums Status / Phase aux variantes différentes
    fn schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Customer")
         .add_type("Order")
         .add_type("OrderDto")
         .add_enum("Status", &["Open", "Closed"])
         .add_enum("Phase", &["Open", "Done"])
         .add_key("Customer", "Id", TypeRef::int())
         .add_member("Customer", "Name", TypeRef::string())
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_key("OrderDto", "Id", TypeRef::int())
         .add_member("OrderDto", "CustomerName", TypeRef::string());
        s
    }

    fn order() -> TypeRef {
        TypeRef::shape("Order")
    }

    fn dto() -> TypeRef {
        TypeRef::shape("OrderDto")
    }

    fn alice_order() -> Value {
        let customer = ObjectValue::new("Customer").with("Id", 9i64).with("Name", "Alice");
        Value::Object(ObjectValue::new("Order").with("Id", 1i64).with("Customer", customer))
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new(schema());
        builder.create_mapping(order(), dto()).reverse_map();
        builder.seal().unwrap()
    }

    #[test]
    fn test_flattening_copy() {
        let r = registry();
        let out = r.convert(&alice_order(), &order(), &dto()).unwrap();
        let dto = out.as_object().unwrap();
        assert_eq!(dto.type_name, "OrderDto");
        assert_eq!(dto.get("CustomerName"), &Value::String("Alice".into()));
        assert_eq!(dto.get("Id"), &Value::Integer(1));
    }

    #[test]
    fn test_reverse_creates_intermediate_objects() {
        let r = registry();
        let input = Value::Object(ObjectValue::new("OrderDto").with("Id", 5i64).with("CustomerName", "Bob"));
        let out = r.convert(&input, &dto(), &order()).unwrap();
        let order = out.as_object().unwrap();
        let customer = order.get("Customer").as_object().unwrap();
        assert_eq!(customer.type_name, "Customer");
        assert_eq!(customer.get("Name"), &Value::String("Bob".into()));
    }

    #[test]
    fn test_identity_null_and_nullable_lift() {
        let r = registry();
        assert_eq!(r.convert(&Value::Null, &order(), &dto()).unwrap(), Value::Null);
        assert_eq!(
            r.convert(&Value::Integer(3), &TypeRef::int(), &TypeRef::nullable(TypeRef::int())).unwrap(),
            Value::Integer(3)
        );
        let err = r.convert(&Value::Integer(3), &TypeRef::int(), &TypeRef::string()).unwrap_err();
        assert!(matches!(err, MappingError::MissingTypeMapping { .. }));
    }

    #[test]
    fn test_enum_by_variant_name() {
        let r = registry();
        let (status, phase) = (TypeRef::enumeration("Status"), TypeRef::enumeration("Phase"));
        let out = r.convert(&Value::enum_variant("Status", "Open"), &status, &phase).unwrap();
        assert_eq!(out, Value::enum_variant("Phase", "Open"));
        let err = r.convert(&Value::enum_variant("Status", "Closed"), &status, &phase).unwrap_err();
        assert!(matches!(err, MappingError::Conversion { .. }));
    }

    #[test]
    fn test_lists_convert_element_wise() {
        let r = registry();
        let list = Value::List(vec![alice_order(), alice_order()]);
        let out = r.convert(&list, &TypeRef::list(order()), &TypeRef::list(dto())).unwrap();
        let Value::List(items) = out else {
            panic!("liste attendue");
        };
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.as_object().is_some_and(|o| o.type_name == "OrderDto")));
    }

    #[test]
    fn test_resolver_and_member_converter() {
        let mut builder = RegistryBuilder::new(schema());
        let upper = ValueConverter::new(TypeRef::string(), TypeRef::string(), |v| match v {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Ok(other.clone()),
        });
        builder
            .create_mapping(order(), dto())
            .convert_member("CustomerName", upper)
            .resolve_using("Id", TypeRef::int(), |_| Ok(Value::Integer(42)));
        let r = builder.seal().unwrap();
        let out = r.convert(&alice_order(), &order(), &dto()).unwrap();
        let dto = out.as_object().unwrap();
        assert_eq!(dto.get("CustomerName"), &Value::String("ALICE".into()));
        assert_eq!(dto.get("Id"), &Value::Integer(42));
    }
}
