// =============================================================================
// TYPESIDE — Les types et les valeurs du système
// =============================================================================
//
// Un TypeRef décrit statiquement le type d'un nœud d'expression ou d'un
// membre. Il n'y a AUCUNE réflexion à l'exécution : tout ce qu'on sait d'un
// type est écrit ici, ou dans le Schema (pour les formes et les enums).
//
// Les familles de types :
//   - Base      : les types primitifs (String, Int, Float, Bool, custom)
//   - Enum      : énumération déclarée dans le Schema
//   - Shape     : type objet avec des membres (= une "table")
//   - Generic   : instanciation générique (Queryable<T>, Nullable<T>...)
//   - Func      : type fonctionnel Func<P1, .., R>
//   - Expression: type fonctionnel ENCODÉ en arbre, Expression<Func<..>>
//   - Param     : paramètre générique d'une signature de méthode (T, TKey)
//   - Object    : le type "top", auquel tout est assignable
//
// VOCABULAIRE :
//   type valeur   = base non-String, enum, ou Nullable<_>
//   type littéral = type valeur ou String
//
// Un type littéral n'est jamais "mappé" membre à membre : il se compare,
// se convertit, mais ne se traverse pas.
//
// =============================================================================

use std::collections::BTreeMap;
use std::fmt;

use super::instance::ObjectValue;

/// Un type de base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    /// Chaîne de caractères
    String,
    /// Entier signé 64 bits
    Integer,
    /// Nombre à virgule flottante
    Float,
    /// Booléen
    Boolean,
    /// Type personnalisé (Date, Guid...) traité comme un littéral opaque
    Custom(std::string::String),
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::String => write!(f, "String"),
            BaseType::Integer => write!(f, "Int"),
            BaseType::Float => write!(f, "Float"),
            BaseType::Boolean => write!(f, "Bool"),
            BaseType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Noms des familles génériques connues.
pub mod generic {
    pub const QUERYABLE: &str = "Queryable";
    pub const ORDERED_QUERYABLE: &str = "OrderedQueryable";
    pub const ENUMERABLE: &str = "Enumerable";
    pub const LIST: &str = "List";
    pub const NULLABLE: &str = "Nullable";
    pub const GROUPING: &str = "Grouping";
}

/// La description statique d'un type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeRef {
    Base(BaseType),
    Enum(String),
    Shape(String),
    Generic { name: String, args: Vec<TypeRef> },
    Func { params: Vec<TypeRef>, ret: Box<TypeRef> },
    Expression(Box<TypeRef>),
    Param(String),
    Object,
}

impl TypeRef {
    pub fn string() -> Self {
        TypeRef::Base(BaseType::String)
    }

    pub fn int() -> Self {
        TypeRef::Base(BaseType::Integer)
    }

    pub fn float() -> Self {
        TypeRef::Base(BaseType::Float)
    }

    pub fn boolean() -> Self {
        TypeRef::Base(BaseType::Boolean)
    }

    pub fn custom(name: &str) -> Self {
        TypeRef::Base(BaseType::Custom(name.to_string()))
    }

    pub fn shape(name: &str) -> Self {
        TypeRef::Shape(name.to_string())
    }

    pub fn enumeration(name: &str) -> Self {
        TypeRef::Enum(name.to_string())
    }

    pub fn param(name: &str) -> Self {
        TypeRef::Param(name.to_string())
    }

    pub fn generic(name: &str, args: Vec<TypeRef>) -> Self {
        TypeRef::Generic {
            name: name.to_string(),
            args,
        }
    }

    pub fn nullable(inner: TypeRef) -> Self {
        Self::generic(generic::NULLABLE, vec![inner])
    }

    pub fn queryable(element: TypeRef) -> Self {
        Self::generic(generic::QUERYABLE, vec![element])
    }

    pub fn ordered_queryable(element: TypeRef) -> Self {
        Self::generic(generic::ORDERED_QUERYABLE, vec![element])
    }

    pub fn enumerable(element: TypeRef) -> Self {
        Self::generic(generic::ENUMERABLE, vec![element])
    }

    pub fn list(element: TypeRef) -> Self {
        Self::generic(generic::LIST, vec![element])
    }

    pub fn func(params: Vec<TypeRef>, ret: TypeRef) -> Self {
        TypeRef::Func {
            params,
            ret: Box::new(ret),
        }
    }

    /// Expression<Func<params.., ret>>
    pub fn expression(params: Vec<TypeRef>, ret: TypeRef) -> Self {
        TypeRef::Expression(Box::new(Self::func(params, ret)))
    }

    /// Type valeur : base non-String, enum, Nullable<_>
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeRef::Base(BaseType::String) => false,
            TypeRef::Base(_) | TypeRef::Enum(_) => true,
            TypeRef::Generic { name, .. } => name == generic::NULLABLE,
            _ => false,
        }
    }

    /// Type littéral : type valeur ou String
    pub fn is_literal(&self) -> bool {
        matches!(self, TypeRef::Base(_)) || self.is_value_type()
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Generic { name, .. } if name == generic::NULLABLE)
    }

    /// Le T de Nullable<T>, sinon le type lui-même
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Generic { name, args } if name == generic::NULLABLE && args.len() == 1 => {
                &args[0]
            }
            other => other,
        }
    }

    /// Les arguments génériques (vide pour un type non générique)
    pub fn generic_args(&self) -> &[TypeRef] {
        match self {
            TypeRef::Generic { args, .. } => args,
            _ => &[],
        }
    }

    /// Le type d'élément d'une séquence (Queryable, Enumerable, List...)
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::Generic { name, args }
                if args.len() == 1
                    && matches!(
                        name.as_str(),
                        generic::QUERYABLE
                            | generic::ORDERED_QUERYABLE
                            | generic::ENUMERABLE
                            | generic::LIST
                    ) =>
            {
                Some(&args[0])
            }
            _ => None,
        }
    }

    /// Pour Expression<Func<..>>, le Func ; pour un Func, lui-même.
    pub fn as_func(&self) -> Option<(&[TypeRef], &TypeRef)> {
        match self {
            TypeRef::Func { params, ret } => Some((params.as_slice(), ret.as_ref())),
            TypeRef::Expression(inner) => inner.as_func(),
            _ => None,
        }
    }

    /// Un type contient-il encore des paramètres génériques libres ?
    pub fn has_params(&self) -> bool {
        match self {
            TypeRef::Param(_) => true,
            TypeRef::Generic { args, .. } => args.iter().any(|a| a.has_params()),
            TypeRef::Func { params, ret } => {
                params.iter().any(|p| p.has_params()) || ret.has_params()
            }
            TypeRef::Expression(inner) => inner.has_params(),
            _ => false,
        }
    }

    /// Remplace les paramètres génériques par leur liaison.
    pub fn bind_params(&self, bindings: &BTreeMap<String, TypeRef>) -> TypeRef {
        self.map_deep(&|t| match t {
            TypeRef::Param(name) => bindings.get(name).cloned(),
            _ => None,
        })
    }

    /// Réécriture en profondeur : `f` est essayée sur chaque sous-type,
    /// du plus externe au plus interne ; le premier remplacement gagne.
    pub fn map_deep(&self, f: &dyn Fn(&TypeRef) -> Option<TypeRef>) -> TypeRef {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            TypeRef::Generic { name, args } => TypeRef::Generic {
                name: name.clone(),
                args: args.iter().map(|a| a.map_deep(f)).collect(),
            },
            TypeRef::Func { params, ret } => TypeRef::Func {
                params: params.iter().map(|p| p.map_deep(f)).collect(),
                ret: Box::new(ret.map_deep(f)),
            },
            TypeRef::Expression(inner) => TypeRef::Expression(Box::new(inner.map_deep(f))),
            other => other.clone(),
        }
    }

    /// Le nom de la forme, pour un Shape
    pub fn shape_name(&self) -> Option<&str> {
        match self {
            TypeRef::Shape(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Base(b) => write!(f, "{}", b),
            TypeRef::Enum(name) | TypeRef::Shape(name) | TypeRef::Param(name) => {
                write!(f, "{}", name)
            }
            TypeRef::Generic { name, args } if name == generic::NULLABLE && args.len() == 1 => {
                write!(f, "{}?", args[0])
            }
            TypeRef::Generic { name, args } => {
                write!(f, "{}<{}>", name, join(args))
            }
            TypeRef::Func { params, ret } => {
                if params.is_empty() {
                    write!(f, "Func<{}>", ret)
                } else {
                    write!(f, "Func<{}, {}>", join(params), ret)
                }
            }
            TypeRef::Expression(inner) => write!(f, "Expression<{}>", inner),
            TypeRef::Object => write!(f, "Object"),
        }
    }
}

fn join(types: &[TypeRef]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Une valeur concrète.
///
/// Les objets et les listes sont des valeurs comme les autres : c'est ce
/// qui permet à l'évaluateur de traverser un chemin `o.Customer.Name`
/// sans connaître le schéma.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(std::string::String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    Enum { ty: std::string::String, variant: std::string::String },
    Object(ObjectValue),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Enum { ty, variant } => write!(f, "{}.{}", ty, variant),
            Value::Object(o) => write!(f, "{}", o),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl Value {
    pub fn enum_variant(ty: &str, variant: &str) -> Self {
        Value::Enum {
            ty: ty.to_string(),
            variant: variant.to_string(),
        }
    }

    /// Le type observé à l'exécution. `Null` n'a pas de type propre.
    pub fn runtime_type(&self) -> Option<TypeRef> {
        match self {
            Value::String(_) => Some(TypeRef::string()),
            Value::Integer(_) => Some(TypeRef::int()),
            Value::Float(_) => Some(TypeRef::float()),
            Value::Boolean(_) => Some(TypeRef::boolean()),
            Value::Null => None,
            Value::Enum { ty, .. } => Some(TypeRef::enumeration(ty)),
            Value::Object(o) => Some(TypeRef::shape(&o.type_name)),
            Value::List(items) => {
                let element = items
                    .iter()
                    .find_map(|v| v.runtime_type())
                    .unwrap_or(TypeRef::Object);
                Some(TypeRef::list(element))
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Nom court du genre de valeur, pour les messages d'erreur
    pub fn kind(&self) -> std::string::String {
        match self.runtime_type() {
            Some(t) => t.to_string(),
            None => "null".to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
