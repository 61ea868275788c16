// =============================================================================
// SCHEMA — La table des descripteurs de types
// =============================================================================
//
// Le Schema remplace la réflexion : c'est la liste STATIQUE des formes
// (types objets), de leurs membres, de leur héritage, et des enums.
//
//   Order ──Customer──▶ Customer
//     │                    │
//     │Id                  │Name
//     ▼                    ▼
//    Int                 String
//
// Chaque membre est résolu UNE fois, au moment de la configuration :
// nom, type déclaré, type propriétaire, drapeau "clé", et éventuellement
// un nom de mapping explicite (l'équivalent d'un attribut [MapTo("X")]).
//
// Le Schema sait aussi répondre à LA question de typage du moteur :
// "une valeur de type A peut-elle aller là où on attend B ?"
//
//   - identité
//   - tout va vers Object
//   - T va vers Nullable<T>
//   - une forme dérivée va vers sa forme de base
//   - OrderedQueryable<T> → Queryable<T> → Enumerable<T>, List<T> → Enumerable<T>
//     (arguments covariants)
//   - un Func va vers Expression<Func> (la lambda est "citée")
//
// =============================================================================

use std::collections::HashMap;
use std::fmt;

use super::typeside::{generic, TypeRef};

/// Un membre d'une forme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    /// Nom du membre
    pub name: String,
    /// Type déclaré
    pub ty: TypeRef,
    /// Nom de la forme qui déclare ce membre
    pub owner: String,
    /// Le membre porte-t-il l'identité de l'objet (clé) ?
    pub is_key: bool,
    /// Nom de mapping déclaré explicitement sur le membre
    pub map_to: Option<String>,
}

impl Member {
    pub fn new(owner: &str, name: &str, ty: TypeRef) -> Self {
        Member {
            name: name.to_string(),
            ty,
            owner: owner.to_string(),
            is_key: false,
            map_to: None,
        }
    }

    /// Marque le membre comme clé
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Déclare un nom de mapping explicite
    pub fn mapped_to(mut self, name: &str) -> Self {
        self.map_to = Some(name.to_string());
        self
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} : {}", self.owner, self.name, self.ty)
    }
}

/// Le descripteur d'une forme.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    /// Membres propres, dans l'ordre de déclaration
    pub members: Vec<Member>,
    /// Forme de base (héritage simple)
    pub parent: Option<String>,
}

/// Le descripteur d'une énumération.
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub name: String,
    pub variants: Vec<String>,
}

/// Découpe une notation pointée ("Customer.Name") en noms de membres.
/// Les segments vides sont ignorés : `""` donne un chemin vide.
pub fn split_dotted(dotted: &str) -> Vec<String> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// La table des descripteurs.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub types: HashMap<String, TypeDescriptor>,
    pub enums: HashMap<String, EnumDescriptor>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Schema {
            name: name.to_string(),
            types: HashMap::new(),
            enums: HashMap::new(),
        }
    }

    /// Déclare une forme
    pub fn add_type(&mut self, name: &str) -> &mut Self {
        self.types.entry(name.to_string()).or_insert_with(|| TypeDescriptor {
            name: name.to_string(),
            members: Vec::new(),
            parent: None,
        });
        self
    }

    /// Déclare une forme dérivée d'une forme existante
    pub fn add_derived_type(&mut self, name: &str, parent: &str) -> &mut Self {
        assert!(self.types.contains_key(parent),
            "Forme de base '{}' n'existe pas dans le schéma", parent);
        self.add_type(name);
        if let Some(desc) = self.types.get_mut(name) {
            desc.parent = Some(parent.to_string());
        }
        self
    }

    /// Déclare une énumération
    pub fn add_enum(&mut self, name: &str, variants: &[&str]) -> &mut Self {
        self.enums.insert(name.to_string(), EnumDescriptor {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    /// Ajoute un membre simple
    pub fn add_member(&mut self, owner: &str, name: &str, ty: TypeRef) -> &mut Self {
        self.push_member(Member::new(owner, name, ty))
    }

    /// Ajoute un membre clé
    pub fn add_key(&mut self, owner: &str, name: &str, ty: TypeRef) -> &mut Self {
        self.push_member(Member::new(owner, name, ty).key())
    }

    /// Ajoute un membre déjà construit (nom explicite, clé...)
    pub fn push_member(&mut self, member: Member) -> &mut Self {
        let desc = self.types.get_mut(&member.owner);
        assert!(desc.is_some(),
            "Forme '{}' n'existe pas dans le schéma", member.owner);
        if let Some(desc) = desc {
            desc.members.retain(|m| m.name != member.name);
            desc.members.push(member);
        }
        self
    }

    pub fn type_descriptor(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn enum_descriptor(&self, name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(name)
    }

    /// Le type est-il connu ? (les types non-Shape/non-Enum le sont toujours)
    pub fn knows(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Shape(name) => self.types.contains_key(name),
            TypeRef::Enum(name) => self.enums.contains_key(name),
            TypeRef::Generic { args, .. } => args.iter().all(|a| self.knows(a)),
            _ => true,
        }
    }

    /// Tous les membres d'une forme, membres propres d'abord puis hérités.
    /// Un membre redéclaré masque celui de la base.
    pub fn members_of(&self, ty: &TypeRef) -> Vec<&Member> {
        let mut out: Vec<&Member> = Vec::new();
        let mut current = ty.shape_name().and_then(|n| self.types.get(n));
        while let Some(desc) = current {
            for m in &desc.members {
                if !out.iter().any(|o| o.name == m.name) {
                    out.push(m);
                }
            }
            current = desc.parent.as_ref().and_then(|p| self.types.get(p));
        }
        out
    }

    /// Recherche exacte d'un membre par nom
    pub fn find_member(&self, ty: &TypeRef, name: &str) -> Option<&Member> {
        self.members_of(ty).into_iter().find(|m| m.name == name)
    }

    /// Suit un chemin de membres et retourne la chaîne traversée
    pub fn resolve_chain(&self, ty: &TypeRef, path: &[String]) -> Option<Vec<Member>> {
        let mut chain = Vec::with_capacity(path.len());
        let mut current = ty.clone();
        for segment in path {
            let member = self.find_member(&current, segment)?;
            current = member.ty.clone();
            chain.push(member.clone());
        }
        Some(chain)
    }

    /// La forme `derived` hérite-t-elle (transitivement) de `base` ?
    pub fn derives_from(&self, derived: &str, base: &str) -> bool {
        let mut current = self.types.get(derived).and_then(|d| d.parent.as_deref());
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = self.types.get(name).and_then(|d| d.parent.as_deref());
        }
        false
    }

    /// Une valeur de type `from` peut-elle aller là où on attend `to` ?
    pub fn is_assignable(&self, from: &TypeRef, to: &TypeRef) -> bool {
        if from == to || *to == TypeRef::Object {
            return true;
        }
        match (from, to) {
            (_, TypeRef::Generic { name, args }) if name == generic::NULLABLE && args.len() == 1 => {
                !from.is_nullable() && self.is_assignable(from, &args[0])
            }
            (TypeRef::Shape(a), TypeRef::Shape(b)) => self.derives_from(a, b),
            (TypeRef::Generic { name: fname, args: fargs }, TypeRef::Generic { name: tname, args: targs }) => {
                if fargs.len() != targs.len() || !generic_widens(fname, tname) {
                    return false;
                }
                fargs.iter().zip(targs).all(|(a, b)| self.is_assignable(a, b))
            }
            (TypeRef::Func { params: fp, ret: fr }, TypeRef::Func { params: tp, ret: tr }) => {
                fp == tp && self.is_assignable(fr, tr)
            }
            (TypeRef::Func { .. }, TypeRef::Expression(inner)) => self.is_assignable(from, inner),
            (TypeRef::Expression(a), TypeRef::Expression(b)) => self.is_assignable(a, b),
            _ => false,
        }
    }
}

/// Élargissement entre familles génériques
fn generic_widens(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (generic::ORDERED_QUERYABLE, generic::QUERYABLE)
            | (generic::ORDERED_QUERYABLE, generic::ENUMERABLE)
            | (generic::QUERYABLE, generic::ENUMERABLE)
            | (generic::LIST, generic::ENUMERABLE)
    )
}

/// Les familles génériques vers lesquelles `name` s'élargit, de la plus
/// précise à la plus large (`name` compris).
pub fn generic_family(name: &str) -> Vec<&str> {
    match name {
        generic::ORDERED_QUERYABLE => vec![
            generic::ORDERED_QUERYABLE,
            generic::QUERYABLE,
            generic::ENUMERABLE,
        ],
        generic::QUERYABLE => vec![generic::QUERYABLE, generic::ENUMERABLE],
        generic::LIST => vec![generic::LIST, generic::ENUMERABLE],
        other => vec![other],
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "schema {} {{", self.name)?;
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        for name in names {
            let desc = &self.types[name];
            match &desc.parent {
                Some(p) => writeln!(f, "  {} : {}", name, p)?,
                None => writeln!(f, "  {}", name)?,
            }
            for m in &desc.members {
                let key = if m.is_key { " [key]" } else { "" };
                writeln!(f, "    {} : {}{}", m.name, m.ty, key)?;
            }
        }
        let mut enums: Vec<&EnumDescriptor> = self.enums.values().collect();
        enums.sort_by(|a, b| a.name.cmp(&b.name));
        for e in enums {
            writeln!(f, "  enum {} = {}", e.name, e.variants.join(" | "))?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Crée le schéma Order / Customer pour les tests
    fn shop_schema() -> Schema {
        let mut s = Schema::new("Shop");
        s.add_type("Customer")
         .add_type("Order")
         .add_key("Customer", "Id", TypeRef::int())
         .add_member("Customer", "Name", TypeRef::string())
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_member("Order", "Total", TypeRef::float());
        s.add_derived_type("VipCustomer", "Customer")
         .add_member("VipCustomer", "Level", TypeRef::int());
        s
    }

    #[test]
    fn test_members_with_inheritance() {
        let s = shop_schema();
        let names: Vec<&str> = s
            .members_of(&TypeRef::shape("VipCustomer"))
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["Level", "Id", "Name"]);
    }

    #[test]
    fn test_resolve_chain() {
        let s = shop_schema();
        let chain = s
            .resolve_chain(&TypeRef::shape("Order"), &["Customer".into(), "Name".into()])
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].ty, TypeRef::string());
        assert!(s.resolve_chain(&TypeRef::shape("Order"), &["Nope".into()]).is_none());
    }

    #[test]
    fn test_assignability() {
        let s = shop_schema();
        let vip = TypeRef::shape("VipCustomer");
        let customer = TypeRef::shape("Customer");
        assert!(s.is_assignable(&vip, &customer));
        assert!(!s.is_assignable(&customer, &vip));
        assert!(s.is_assignable(&TypeRef::int(), &TypeRef::nullable(TypeRef::int())));
        assert!(!s.is_assignable(&TypeRef::nullable(TypeRef::int()), &TypeRef::int()));
        assert!(s.is_assignable(&TypeRef::int(), &TypeRef::Object));
        assert!(s.is_assignable(
            &TypeRef::ordered_queryable(vip.clone()),
            &TypeRef::queryable(customer.clone())
        ));
        assert!(!s.is_assignable(&TypeRef::queryable(customer.clone()), &TypeRef::list(customer)));
    }

    #[test]
    fn test_func_quotes_into_expression() {
        let s = shop_schema();
        let f = TypeRef::func(vec![TypeRef::shape("Order")], TypeRef::boolean());
        let e = TypeRef::expression(vec![TypeRef::shape("Order")], TypeRef::boolean());
        assert!(s.is_assignable(&f, &e));
    }

    #[test]
    fn test_split_dotted() {
        assert_eq!(split_dotted("Customer.Name"), vec!["Customer", "Name"]);
        assert_eq!(split_dotted("Id"), vec!["Id"]);
        assert!(split_dotted("").is_empty());
        assert!(split_dotted("..").is_empty());
    }

    #[test]
    fn test_schema_display() {
        let s = shop_schema();
        let display = s.to_string();
        assert!(display.contains("schema Shop"));
        assert!(display.contains("VipCustomer : Customer"));
        assert!(display.contains("Id : Int [key]"));
    }
}
