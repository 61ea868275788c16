// =============================================================================
// CONVENTION — Trouver un membre source pour un nom destination
// =============================================================================
//
// Quand aucune règle explicite ne dit d'où vient `OrderDto.CustomerName`,
// on demande aux CONVENTIONS, dans un ordre fixe, la première qui répond
// gagne :
//
//   1. ExplicitName    → un membre source déclare map_to = "CustomerName"
//   2. ExactName       → un membre source s'appelle "CustomerName"
//   3. CaseInsensitive → un membre source s'appelle "customername"
//   4. PrePostfix      → on retire préfixes/suffixes ("strName" ~ "Name")
//   5. ReplaceName     → table de remplacements ("Ä" → "Ae")
//   6. NameSplit       → "CustomerName" = "Customer" + "Name" :
//                        Order.Customer (1er saut), puis Customer.Name
//                        (récursion avec TOUTES les conventions)
//
// Le découpage est RÉCURSIF et fait du retour arrière :
//
//   "CustomerAddressCity" sur Order
//     i=1 : "Customer"        → Order.Customer ✓
//           reste "AddressCity" sur Customer
//             i=1 : "Address" → Customer.Address ✓
//                   reste "City" sur Address → Address.City ✓
//   → chaîne [Customer, Address, City]
//
// Si le reste échoue, on essaie un préfixe plus long. Un nom vide est un
// succès terminal (chaîne vide). Chaque récursion consomme au moins un
// mot : la recherche termine même sur des types cycliques.
//
// Une convention ne LÈVE jamais d'erreur : "pas trouvé" = None.
//
// =============================================================================

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::schema::{Member, Schema};
use super::typeside::TypeRef;

/// Style de nommage utilisé pour découper / recomposer les noms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    /// CustomerName → ["Customer", "Name"]
    #[default]
    PascalCase,
    /// customer_name → ["customer", "name"]
    LowerUnderscore,
}

fn pascal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // pas de lookahead en Rust : les sigles ("HTMLParser") sont recoupés à la main
    RE.get_or_init(|| Regex::new(r"\p{Lu}+[\p{Ll}0-9]*|[\p{Ll}0-9]+").expect("regex valide"))
}

fn lower_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{Ll}0-9]+").expect("regex valide"))
}

impl NamingStyle {
    /// Découpe un nom en mots
    pub fn split(self, name: &str) -> Vec<String> {
        match self {
            NamingStyle::PascalCase => {
                let mut words = Vec::new();
                for m in pascal_regex().find_iter(name) {
                    split_acronym(m.as_str(), &mut words);
                }
                words
            }
            NamingStyle::LowerUnderscore => lower_regex()
                .find_iter(name)
                .map(|m| m.as_str().to_string())
                .collect(),
        }
    }

    /// Séparateur entre les mots
    pub fn separator(self) -> &'static str {
        match self {
            NamingStyle::PascalCase => "",
            NamingStyle::LowerUnderscore => "_",
        }
    }

    /// Normalise un mot dans ce style
    pub fn normalize(self, word: &str) -> String {
        match self {
            NamingStyle::PascalCase => {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            NamingStyle::LowerUnderscore => word.to_lowercase(),
        }
    }

    /// Recompose des mots en un nom
    pub fn join(self, words: &[String]) -> String {
        words
            .iter()
            .map(|w| self.normalize(w))
            .collect::<Vec<_>>()
            .join(self.separator())
    }
}

/// "HTMLParser" → "HTML", "Parser" ; "ID" reste "ID"
fn split_acronym(word: &str, out: &mut Vec<String>) {
    let upper: Vec<(usize, char)> = word
        .char_indices()
        .take_while(|(_, c)| c.is_uppercase())
        .collect();
    let has_tail = upper.len() < word.chars().count();
    if upper.len() >= 2 && has_tail {
        let (cut, _) = upper[upper.len() - 1];
        out.push(word[..cut].to_string());
        out.push(word[cut..].to_string());
    } else {
        out.push(word.to_string());
    }
}

/// Contexte passé aux conventions : le schéma et l'ensemble complet
/// (pour la récursion de NameSplit).
pub struct ConventionContext<'a> {
    pub schema: &'a Schema,
    pub conventions: &'a ConventionSet,
}

/// Une stratégie de résolution de nom.
pub trait MemberConvention: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Une convention récursive n'est pas utilisée pour le premier saut
    /// d'un découpage.
    fn is_recursive(&self) -> bool {
        false
    }

    /// Cherche une chaîne de membres de `owner` qui correspond à `name`.
    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>>;
}

/// Nom de mapping déclaré explicitement sur le membre source
#[derive(Debug, Clone, Default)]
pub struct ExplicitName;

impl MemberConvention for ExplicitName {
    fn name(&self) -> &'static str {
        "explicit-name"
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        ctx.schema
            .members_of(owner)
            .into_iter()
            .find(|m| m.map_to.as_deref() == Some(name))
            .map(|m| vec![m.clone()])
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExactName;

impl MemberConvention for ExactName {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        ctx.schema.find_member(owner, name).map(|m| vec![m.clone()])
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaseInsensitive;

impl MemberConvention for CaseInsensitive {
    fn name(&self) -> &'static str {
        "case-insensitive"
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        ctx.schema
            .members_of(owner)
            .into_iter()
            .find(|m| m.name.eq_ignore_ascii_case(name) || m.name.to_lowercase() == name.to_lowercase())
            .map(|m| vec![m.clone()])
    }
}

/// Retire les préfixes / suffixes avant de comparer.
#[derive(Debug, Clone, Default)]
pub struct PrePostfix {
    /// Préfixes des membres source ("str", "m_")
    pub prefixes: Vec<String>,
    pub postfixes: Vec<String>,
    /// Préfixes du nom destination recherché
    pub destination_prefixes: Vec<String>,
    pub destination_postfixes: Vec<String>,
}

/// Toutes les formes d'un nom : lui-même, puis sans chaque préfixe,
/// puis sans chaque suffixe (sur chacune des formes précédentes).
fn stripped_forms(name: &str, prefixes: &[String], postfixes: &[String]) -> Vec<String> {
    let mut forms = vec![name.to_string()];
    for p in prefixes.iter().filter(|p| !p.is_empty()) {
        if name.len() > p.len() && name.is_char_boundary(p.len()) && name[..p.len()].eq_ignore_ascii_case(p) {
            forms.push(name[p.len()..].to_string());
        }
    }
    let with_prefixes = forms.clone();
    for form in &with_prefixes {
        for s in postfixes.iter().filter(|s| !s.is_empty()) {
            if form.len() > s.len() && form.is_char_boundary(form.len() - s.len()) {
                let cut = form.len() - s.len();
                if form[cut..].eq_ignore_ascii_case(s) {
                    forms.push(form[..cut].to_string());
                }
            }
        }
    }
    forms
}

impl MemberConvention for PrePostfix {
    fn name(&self) -> &'static str {
        "prefix-postfix"
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        let wanted = stripped_forms(name, &self.destination_prefixes, &self.destination_postfixes);
        ctx.schema
            .members_of(owner)
            .into_iter()
            .find(|m| {
                stripped_forms(&m.name, &self.prefixes, &self.postfixes)
                    .iter()
                    .any(|form| wanted.iter().any(|w| w.eq_ignore_ascii_case(form)))
            })
            .map(|m| vec![m.clone()])
    }
}

/// Remplacements littéraux de sous-chaînes.
#[derive(Debug, Clone, Default)]
pub struct ReplaceName {
    /// (original, remplacement), appliqués dans l'ordre
    pub replacements: Vec<(String, String)>,
}

impl ReplaceName {
    /// Chaque remplacement seul, puis tous cumulés, puis le nom littéral
    fn possible_names(&self, name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .replacements
            .iter()
            .filter(|(from, _)| !from.is_empty() && name.contains(from.as_str()))
            .map(|(from, to)| name.replace(from.as_str(), to))
            .collect();
        let all = self
            .replacements
            .iter()
            .filter(|(from, _)| !from.is_empty())
            .fold(name.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to));
        names.push(all);
        names.push(name.to_string());
        names
    }
}

impl MemberConvention for ReplaceName {
    fn name(&self) -> &'static str {
        "replace"
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        if self.replacements.is_empty() {
            return None;
        }
        let wanted = self.possible_names(name);
        ctx.schema
            .members_of(owner)
            .into_iter()
            .find(|m| {
                self.possible_names(&m.name)
                    .iter()
                    .any(|candidate| wanted.iter().any(|w| w.to_lowercase() == candidate.to_lowercase()))
            })
            .map(|m| vec![m.clone()])
    }
}

/// Découpage récursif du nom (aplatissement).
#[derive(Debug, Clone, Default)]
pub struct NameSplit {
    pub source_style: NamingStyle,
    pub destination_style: NamingStyle,
}

impl MemberConvention for NameSplit {
    fn name(&self) -> &'static str {
        "name-split"
    }

    fn is_recursive(&self) -> bool {
        true
    }

    fn resolve(&self, ctx: &ConventionContext<'_>, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        let words = self.destination_style.split(name);
        for i in 1..=words.len() {
            let first = self.source_style.join(&words[..i]);
            let Some(member) = ctx.conventions.match_first_hop(ctx.schema, &first, owner) else {
                continue;
            };
            let rest = self.destination_style.join(&words[i..]);
            if rest.is_empty() {
                return Some(vec![member]);
            }
            if let Some(tail) = ctx.conventions.resolve(ctx.schema, &rest, &member.ty) {
                let mut chain = vec![member];
                chain.extend(tail);
                return Some(chain);
            }
        }
        None
    }
}

/// L'ensemble ORDONNÉ des conventions. La première qui répond gagne.
#[derive(Debug, Default)]
pub struct ConventionSet {
    conventions: Vec<Box<dyn MemberConvention>>,
}

impl ConventionSet {
    pub fn empty() -> Self {
        ConventionSet::default()
    }

    /// L'ordre standard, sans préfixes ni remplacements
    pub fn standard() -> Self {
        let mut set = ConventionSet::empty();
        set.push(ExplicitName)
            .push(ExactName)
            .push(CaseInsensitive)
            .push(PrePostfix::default())
            .push(ReplaceName::default())
            .push(NameSplit::default());
        set
    }

    pub fn push(&mut self, convention: impl MemberConvention + 'static) -> &mut Self {
        self.conventions.push(Box::new(convention));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.conventions.iter().map(|c| c.name()).collect()
    }

    /// Résout `name` sur `owner`. Un nom vide est un succès (chaîne vide).
    pub fn resolve(&self, schema: &Schema, name: &str, owner: &TypeRef) -> Option<Vec<Member>> {
        if name.is_empty() {
            return Some(Vec::new());
        }
        let ctx = ConventionContext {
            schema,
            conventions: self,
        };
        self.conventions
            .iter()
            .find_map(|c| c.resolve(&ctx, name, owner).filter(|chain| !chain.is_empty()))
    }

    /// Premier saut d'un découpage : seulement les conventions non récursives
    pub fn match_first_hop(&self, schema: &Schema, name: &str, owner: &TypeRef) -> Option<Member> {
        let ctx = ConventionContext {
            schema,
            conventions: self,
        };
        self.conventions
            .iter()
            .filter(|c| !c.is_recursive())
            .find_map(|c| c.resolve(&ctx, name, owner))
            .and_then(|chain| chain.into_iter().next())
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Schéma Order → Customer → Address pour l'aplatissement
    fn nested_schema() -> Schema {
        let mut s = Schema::new("Nested");
        s.add_type("Address")
         .add_type("Customer")
         .add_type("Order")
         .add_member("Address", "City", TypeRef::string())
         .add_member("Customer", "Name", TypeRef::string())
         .add_member("Customer", "Address", TypeRef::shape("Address"))
         .add_key("Order", "Id", TypeRef::int())
         .add_member("Order", "Customer", TypeRef::shape("Customer"))
         .add_member("Order", "CustomerRank", TypeRef::int());
        s
    }

    fn names(chain: &[Member]) -> Vec<&str> {
        chain.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_pascal_split() {
        let p = NamingStyle::PascalCase;
        assert_eq!(p.split("CustomerName"), vec!["Customer", "Name"]);
        assert_eq!(p.split("HTMLParser"), vec!["HTML", "Parser"]);
        assert_eq!(p.split("OrderID"), vec!["Order", "ID"]);
        assert_eq!(p.split("Address2City"), vec!["Address2", "City"]);
        assert_eq!(p.split("name"), vec!["name"]);
    }

    #[test]
    fn test_lower_underscore_split_and_join() {
        let l = NamingStyle::LowerUnderscore;
        assert_eq!(l.split("customer_name"), vec!["customer", "name"]);
        let words = vec!["Customer".to_string(), "Name".to_string()];
        assert_eq!(l.join(&words), "customer_name");
        assert_eq!(NamingStyle::PascalCase.join(&["customer".into(), "name".into()]), "CustomerName");
    }

    #[test]
    fn test_exact_and_case_insensitive() {
        let s = nested_schema();
        let set = ConventionSet::standard();
        let order = TypeRef::shape("Order");
        assert_eq!(names(&set.resolve(&s, "Id", &order).unwrap()), vec!["Id"]);
        assert_eq!(names(&set.resolve(&s, "ID", &order).unwrap()), vec!["Id"]);
    }

    #[test]
    fn test_flattening_two_and_three_levels() {
        let s = nested_schema();
        let set = ConventionSet::standard();
        let order = TypeRef::shape("Order");
        assert_eq!(
            names(&set.resolve(&s, "CustomerName", &order).unwrap()),
            vec!["Customer", "Name"]
        );
        assert_eq!(
            names(&set.resolve(&s, "CustomerAddressCity", &order).unwrap()),
            vec!["Customer", "Address", "City"]
        );
        // "CustomerRank" existe tel quel : l'exact passe avant le découpage
        assert_eq!(names(&set.resolve(&s, "CustomerRank", &order).unwrap()), vec!["CustomerRank"]);
        assert!(set.resolve(&s, "CustomerAge", &order).is_none());
    }

    #[test]
    fn test_split_backtracks_to_longer_prefix() {
        let mut s = Schema::new("Backtrack");
        s.add_type("Line")
         .add_type("Order")
         .add_member("Line", "Total", TypeRef::float())
         .add_member("Order", "Order", TypeRef::int())
         .add_member("Order", "OrderLine", TypeRef::shape("Line"));
        let set = ConventionSet::standard();
        // "Order" seul matche mais son reste "LineTotal" échoue sur Int,
        // on recule jusqu'à "OrderLine" + "Total"
        assert_eq!(
            names(&set.resolve(&s, "OrderLineTotal", &TypeRef::shape("Order")).unwrap()),
            vec!["OrderLine", "Total"]
        );
    }

    #[test]
    fn test_explicit_name_has_priority() {
        let mut s = Schema::new("Explicit");
        s.add_type("Src")
         .add_member("Src", "Name", TypeRef::string())
         .push_member(Member::new("Src", "Label", TypeRef::string()).mapped_to("Name"));
        let set = ConventionSet::standard();
        assert_eq!(names(&set.resolve(&s, "Name", &TypeRef::shape("Src")).unwrap()), vec!["Label"]);
    }

    #[test]
    fn test_pre_postfix() {
        let mut s = Schema::new("Prefixed");
        s.add_type("Src")
         .add_member("Src", "strName", TypeRef::string())
         .add_member("Src", "CountValue", TypeRef::int());
        let mut set = ConventionSet::empty();
        set.push(PrePostfix {
            prefixes: vec!["str".into()],
            postfixes: vec!["Value".into()],
            destination_prefixes: vec!["Dto".into()],
            destination_postfixes: vec![],
        });
        let src = TypeRef::shape("Src");
        assert_eq!(names(&set.resolve(&s, "Name", &src).unwrap()), vec!["strName"]);
        assert_eq!(names(&set.resolve(&s, "DtoCount", &src).unwrap()), vec!["CountValue"]);
    }

    #[test]
    fn test_replace_name() {
        let mut s = Schema::new("Replace");
        s.add_type("Src").add_member("Src", "Strasse", TypeRef::string());
        let mut set = ConventionSet::empty();
        set.push(ReplaceName {
            replacements: vec![("ß".into(), "ss".into())],
        });
        assert_eq!(
            names(&set.resolve(&s, "Straße", &TypeRef::shape("Src")).unwrap()),
            vec!["Strasse"]
        );
    }

    #[test]
    fn test_lower_underscore_flattening() {
        let mut s = Schema::new("Snake");
        s.add_type("customer")
         .add_type("order")
         .add_member("customer", "name", TypeRef::string())
         .add_member("order", "customer", TypeRef::shape("customer"));
        let mut set = ConventionSet::empty();
        set.push(ExactName).push(NameSplit {
            source_style: NamingStyle::LowerUnderscore,
            destination_style: NamingStyle::PascalCase,
        });
        assert_eq!(
            names(&set.resolve(&s, "CustomerName", &TypeRef::shape("order")).unwrap()),
            vec!["customer", "name"]
        );
    }

    #[test]
    fn test_empty_name_is_terminal_success() {
        let s = nested_schema();
        let set = ConventionSet::standard();
        assert_eq!(set.resolve(&s, "", &TypeRef::shape("Order")), Some(vec![]));
    }
}
