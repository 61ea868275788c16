// =============================================================================
// INSTANCE — Les objets concrets (valeurs d'un type Shape)
// =============================================================================
//
// Un ObjectValue est une instance VIVANTE d'une forme du Schema :
// un nom de type et un dictionnaire membre → valeur.
//
//   Order { Id = 1, Customer = Customer { Name = "Alice" } }
//
// Les membres absents valent Null. Un membre objet est simplement une
// Value::Object imbriquée : suivre `o.Customer.Name` revient à descendre
// dans les dictionnaires, exactement comme on suivait une FK puis un
// attribut.
//
// =============================================================================

use std::collections::BTreeMap;
use std::fmt;

use super::typeside::Value;

/// Une instance d'un type Shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectValue {
    /// Nom de la forme (ex: "Order")
    pub type_name: String,
    /// Les valeurs des membres, triées par nom
    pub fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    /// Crée un objet vide d'une forme donnée
    pub fn new(type_name: &str) -> Self {
        ObjectValue {
            type_name: type_name.to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder : fixe un membre et retourne l'objet
    pub fn with(mut self, member: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(member.to_string(), value.into());
        self
    }

    /// Fixe un membre
    pub fn set(&mut self, member: &str, value: Value) -> &mut Self {
        self.fields.insert(member.to_string(), value);
        self
    }

    /// Lit un membre ; un membre absent vaut Null
    pub fn get(&self, member: &str) -> &Value {
        self.fields.get(member).unwrap_or(&Value::Null)
    }

    /// Suit un chemin de membres (`["Customer", "Name"]`).
    /// Un Null rencontré en chemin se propage.
    pub fn get_path(&self, path: &[String]) -> Value {
        let Some((first, rest)) = path.split_first() else {
            return Value::Object(self.clone());
        };
        match self.get(first) {
            Value::Object(inner) if !rest.is_empty() => inner.get_path(rest),
            _ if !rest.is_empty() => Value::Null,
            v => v.clone(),
        }
    }

    /// Fixe une valeur au bout d'un chemin, en créant les objets
    /// intermédiaires manquants. `types` donne le nom de forme de chaque
    /// objet intermédiaire à créer.
    pub fn set_path(&mut self, path: &[String], types: &[String], value: Value) {
        match path {
            [] => {}
            [last] => {
                self.fields.insert(last.clone(), value);
            }
            [first, rest @ ..] => {
                let type_name = types.first().cloned().unwrap_or_default();
                let entry = self
                    .fields
                    .entry(first.clone())
                    .or_insert_with(|| Value::Object(ObjectValue::new(&type_name)));
                if !matches!(entry, Value::Object(_)) {
                    *entry = Value::Object(ObjectValue::new(&type_name));
                }
                if let Value::Object(inner) = entry {
                    inner.set_path(rest, types.get(1..).unwrap_or(&[]), value);
                }
            }
        }
    }
}

impl From<ObjectValue> for Value {
    fn from(o: ObjectValue) -> Self {
        Value::Object(o)
    }
}

impl fmt::Display for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.type_name)?;
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!(" {} = {}", k, v))
            .collect();
        write!(f, "{}", parts.join(","))?;
        write!(f, " }}")
    }
}
