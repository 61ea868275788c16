// =============================================================================
// MAPPING — Les règles entre un type source et un type destination
// =============================================================================
//
// Un TypeMapping décrit COMMENT construire un objet destination à partir
// d'un objet source, membre par membre :
//
//   Order ──────────────▶ OrderDto
//     Id                    Id            (règle : chaîne [Id])
//     Customer.Name         CustomerName  (règle : chaîne [Customer, Name])
//     Total * 1.2           TotalTtc      (règle : expression o => o.Total * 1.2)
//     Customer.Address.City Address.City  (règle de CHEMIN : "Address.City")
//
// Il y a au plus UN TypeMapping par paire ORDONNÉE (source, destination) :
// Order → OrderDto et OrderDto → Order sont deux mappings distincts, que
// l'on peut lier avec reverse_map().
//
// CYCLE DE VIE :
//   Built      → en configuration (RegistryBuilder)
//   Validated  → scellé sans erreur
//   Invalid    → scellé avec des erreurs ; toute recherche échoue
//
// Un convertisseur de paire (convert_using) court-circuite les règles :
// le mapping devient une fonction opaque Source → Destination.
//
// =============================================================================

use std::fmt;
use std::sync::Arc;

use super::expr::Lambda;
use super::schema::Member;
use super::typeside::{TypeRef, Value};
use crate::error::{ConfigError, MappingError};

/// Clé d'un TypeMapping : la paire ORDONNÉE (source, destination).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypePair {
    pub source: TypeRef,
    pub destination: TypeRef,
}

impl TypePair {
    pub fn new(source: TypeRef, destination: TypeRef) -> Self {
        TypePair {
            source,
            destination,
        }
    }

    /// La paire miroir (destination → source)
    pub fn reversed(&self) -> Self {
        TypePair {
            source: self.destination.clone(),
            destination: self.source.clone(),
        }
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Fonction de conversion de valeur (paire entière ou membre)
pub type ConvertFn = Arc<dyn Fn(&Value) -> Result<Value, MappingError> + Send + Sync>;

/// Convertisseur d'une paire entière : remplace les règles membres.
#[derive(Clone)]
pub struct PairConverter {
    func: ConvertFn,
}

impl PairConverter {
    pub fn new(f: impl Fn(&Value) -> Result<Value, MappingError> + Send + Sync + 'static) -> Self {
        PairConverter { func: Arc::new(f) }
    }

    pub fn convert(&self, value: &Value) -> Result<Value, MappingError> {
        (self.func)(value)
    }
}

impl fmt::Debug for PairConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairConverter(..)")
    }
}

/// Convertisseur de valeur d'un membre : type d'entrée, type de sortie,
/// fonction.
#[derive(Clone)]
pub struct ValueConverter {
    pub from: TypeRef,
    pub to: TypeRef,
    func: ConvertFn,
}

impl ValueConverter {
    pub fn new(
        from: TypeRef,
        to: TypeRef,
        f: impl Fn(&Value) -> Result<Value, MappingError> + Send + Sync + 'static,
    ) -> Self {
        ValueConverter {
            from,
            to,
            func: Arc::new(f),
        }
    }

    pub fn convert(&self, value: &Value) -> Result<Value, MappingError> {
        (self.func)(value)
    }
}

impl fmt::Debug for ValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueConverter({} -> {})", self.from, self.to)
    }
}

/// Resolver d'exécution : calcule une valeur à partir de l'objet source,
/// sans forme expression. Le réécrivain le refuse.
#[derive(Clone)]
pub struct Resolver {
    /// Type de la valeur produite
    pub output: TypeRef,
    func: ConvertFn,
}

impl Resolver {
    pub fn new(
        output: TypeRef,
        f: impl Fn(&Value) -> Result<Value, MappingError> + Send + Sync + 'static,
    ) -> Self {
        Resolver {
            output,
            func: Arc::new(f),
        }
    }

    pub fn resolve(&self, source: &Value) -> Result<Value, MappingError> {
        (self.func)(source)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolver(-> {})", self.output)
    }
}

/// D'où vient une règle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    /// Déclarée par l'utilisateur
    Explicit,
    /// Découverte par les conventions au scellement
    Convention,
    /// Générée à partir du mapping inverse
    Reverse,
}

/// Règle pour UN membre destination.
#[derive(Debug, Clone)]
pub struct MemberRule {
    pub destination: Member,
    /// Chaîne de membres source (aplatissement), vide si aucune
    pub source_chain: Vec<Member>,
    /// Expression personnalisée sur le type source ; prioritaire sur la chaîne
    pub custom: Option<Lambda>,
    pub resolver: Option<Resolver>,
    pub converter: Option<ValueConverter>,
    pub ignored: bool,
    pub origin: RuleOrigin,
}

impl MemberRule {
    /// Règle vierge pour un membre destination
    pub fn new(destination: Member, origin: RuleOrigin) -> Self {
        MemberRule {
            destination,
            source_chain: Vec::new(),
            custom: None,
            resolver: None,
            converter: None,
            ignored: false,
            origin,
        }
    }

    pub fn from_chain(destination: Member, chain: Vec<Member>, origin: RuleOrigin) -> Self {
        let mut rule = MemberRule::new(destination, origin);
        rule.source_chain = chain;
        rule
    }

    /// Type de la valeur produite par la règle (avant convertisseur)
    pub fn value_type(&self) -> Option<TypeRef> {
        if let Some(custom) = &self.custom {
            return Some(custom.body.ty());
        }
        if let Some(last) = self.source_chain.last() {
            return Some(last.ty.clone());
        }
        self.resolver.as_ref().map(|r| r.output.clone())
    }

    /// Règle "simple" : une chaîne de membres, rien d'autre
    pub fn is_plain(&self) -> bool {
        self.custom.is_none() && self.resolver.is_none() && !self.source_chain.is_empty()
    }

    /// La règle a-t-elle une source (chaîne, expression ou resolver) ?
    pub fn is_resolved(&self) -> bool {
        self.ignored
            || self.custom.is_some()
            || self.resolver.is_some()
            || !self.source_chain.is_empty()
    }

    /// La chaîne de membres de la règle : la chaîne source, ou celle de
    /// l'expression personnalisée si elle n'est qu'un accès membre.
    pub fn member_chain(&self) -> Option<Vec<Member>> {
        match &self.custom {
            Some(custom) => custom.as_member_chain().filter(|c| !c.is_empty()),
            None if self.resolver.is_none() && !self.source_chain.is_empty() => {
                Some(self.source_chain.clone())
            }
            None => None,
        }
    }
}

impl fmt::Display for MemberRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- ", self.destination.name)?;
        if self.ignored {
            return write!(f, "(ignoré)");
        }
        match (&self.custom, &self.resolver) {
            (Some(c), _) => write!(f, "{}", c)?,
            (None, Some(r)) => write!(f, "{:?}", r)?,
            (None, None) => {
                let names: Vec<&str> = self.source_chain.iter().map(|m| m.name.as_str()).collect();
                write!(f, "{}", names.join("."))?;
            }
        }
        if let Some(conv) = &self.converter {
            write!(f, " via {:?}", conv)?;
        }
        Ok(())
    }
}

/// Règle pour un CHEMIN destination ("Address.City").
#[derive(Debug, Clone)]
pub struct PathRule {
    /// Segments du chemin destination
    pub path: Vec<String>,
    /// Expression sur le type source qui produit la valeur du chemin
    pub source: Lambda,
    pub origin: RuleOrigin,
}

impl PathRule {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    /// `self.path` est-il un préfixe de `segments` ?
    pub fn is_prefix_of(&self, segments: &[String]) -> bool {
        !self.path.is_empty()
            && self.path.len() <= segments.len()
            && self.path.iter().zip(segments).all(|(a, b)| a == b)
    }
}

/// Politique de validation des membres destination non résolus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberList {
    /// Tout membre destination doit être résolu
    #[default]
    Destination,
    /// Aucune vérification (mappings inverses générés)
    None,
}

/// Lien vers le mapping miroir
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReverseLink {
    #[default]
    None,
    /// Demandé en configuration, généré au scellement
    Requested,
    Linked(TypePair),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MappingState {
    #[default]
    Built,
    Validated,
    Invalid(Vec<ConfigError>),
}

/// Le mapping d'une paire de types.
#[derive(Debug, Clone)]
pub struct TypeMapping {
    pub pair: TypePair,
    /// Règles membres, dans l'ordre de déclaration puis de découverte
    pub rules: Vec<MemberRule>,
    pub path_rules: Vec<PathRule>,
    pub converter: Option<PairConverter>,
    pub reverse: ReverseLink,
    pub member_list: MemberList,
    pub state: MappingState,
    /// Erreurs détectées pendant la configuration, remontées au scellement
    pub(crate) pending_errors: Vec<ConfigError>,
}

impl TypeMapping {
    pub fn new(pair: TypePair) -> Self {
        TypeMapping {
            pair,
            rules: Vec::new(),
            path_rules: Vec::new(),
            converter: None,
            reverse: ReverseLink::None,
            member_list: MemberList::Destination,
            state: MappingState::Built,
            pending_errors: Vec::new(),
        }
    }

    pub fn source(&self) -> &TypeRef {
        &self.pair.source
    }

    pub fn destination(&self) -> &TypeRef {
        &self.pair.destination
    }

    /// La règle d'un membre destination
    pub fn rule_for(&self, member: &str) -> Option<&MemberRule> {
        self.rules.iter().find(|r| r.destination.name == member)
    }

    pub(crate) fn rule_for_mut(&mut self, member: &str) -> Option<&mut MemberRule> {
        self.rules.iter_mut().find(|r| r.destination.name == member)
    }

    /// Les règles de chemin dont le chemin est un préfixe de `segments`
    pub fn path_rules_for<'a>(&'a self, segments: &'a [String]) -> impl Iterator<Item = &'a PathRule> + 'a {
        self.path_rules.iter().filter(move |r| r.is_prefix_of(segments))
    }

    pub fn is_valid(&self) -> bool {
        self.state == MappingState::Validated
    }

    pub fn errors(&self) -> &[ConfigError] {
        match &self.state {
            MappingState::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

impl fmt::Display for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mapping {} {{", self.pair)?;
        if self.converter.is_some() {
            writeln!(f, "  (convertisseur de paire)")?;
        }
        for rule in &self.rules {
            writeln!(f, "  {}", rule)?;
        }
        for rule in &self.path_rules {
            writeln!(f, "  {} <- {}", rule.dotted(), rule.source)?;
        }
        write!(f, "}}")
    }
}
