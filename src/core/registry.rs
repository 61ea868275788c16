// =============================================================================
// REGISTRY — Configuration, scellement, lecture concurrente
// =============================================================================
//
// Deux phases, deux types :
//
//   RegistryBuilder  (mutable, un seul thread)
//        │  create_mapping(Order, OrderDto).map_member("Label", "Customer.Name")
//        │  equivalency(...), key_provider(...), with_options(...)
//        ▼
//      seal()  ── reverse maps → conventions → vérifications
//        ▼
//   Registry         (immuable, Send + Sync, partagé entre threads)
//        map_expression, map_include, equivalency, convert
//
// Seuls les caches (chemins résolus, équivalences) bougent après le
// scellement, en compute-and-overwrite derrière un RwLock.
//
// SCELLEMENT :
//   1. les conventions résolvent les membres sans règle explicite
//   2. les mappings inverses demandés (reverse_map) sont générés à partir
//      des règles simples : chaîne d'un membre → règle membre,
//      chaîne de plusieurs membres → règle de chemin
//   3. les conventions complètent les mappings inverses
//   4. toutes les erreurs sont collectées ; seal() échoue s'il y en a,
//      seal_lenient() marque les mappings fautifs Invalid
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use super::convention::ConventionSet;
use super::equivalency::{EquivalencyExpression, EquivalencyGenerator, EquivalencyOrigin, KeyProvider};
use super::expr::{Expr, Lambda, Parameter};
use super::mapping::{
    MappingState, MemberList, MemberRule, PairConverter, PathRule, Resolver, ReverseLink, RuleOrigin,
    TypeMapping, TypePair, ValueConverter,
};
use super::migrate::{MappingFacade, ObjectMapper};
use super::resolve::PathCache;
use super::rewrite;
use super::schema::{split_dotted, Member, Schema};
use super::typeside::{TypeRef, Value};
use super::validate;
use crate::config::MapperOptions;
use crate::error::{ConfigError, ConfigurationErrors, MappingError};

/// Le registre en configuration.
pub struct RegistryBuilder {
    schema: Schema,
    conventions: ConventionSet,
    mappings: Vec<TypeMapping>,
    equivalencies: Vec<(TypePair, Lambda)>,
    key_provider: Option<Arc<dyn KeyProvider>>,
    facade: Arc<dyn MappingFacade>,
}

impl RegistryBuilder {
    pub fn new(schema: Schema) -> Self {
        RegistryBuilder {
            schema,
            conventions: ConventionSet::standard(),
            mappings: Vec::new(),
            equivalencies: Vec::new(),
            key_provider: None,
            facade: Arc::new(ObjectMapper),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Remplace les conventions par celles décrites dans les options
    pub fn with_options(mut self, options: &MapperOptions) -> Self {
        self.conventions = options.convention_set();
        self
    }

    /// Remplace l'ensemble ordonné des conventions
    pub fn conventions(&mut self, conventions: ConventionSet) -> &mut Self {
        self.conventions = conventions;
        self
    }

    /// Déclare (ou retrouve) le mapping d'une paire et retourne sa poignée.
    pub fn create_mapping(&mut self, source: TypeRef, destination: TypeRef) -> MappingConfig<'_> {
        let pair = TypePair::new(source, destination);
        let index = self.ensure(&pair);
        MappingConfig {
            builder: self,
            index,
        }
    }

    /// Ajoute une règle membre. Une seconde source pour le même membre
    /// est une erreur de configuration.
    pub fn add_member_rule(&mut self, pair: &TypePair, rule: MemberRule) -> &mut Self {
        let index = self.ensure(pair);
        let mapping = &mut self.mappings[index];
        let name = rule.destination.name.clone();
        match mapping.rule_for_mut(&name) {
            Some(existing) if existing.is_resolved() => {
                mapping.pending_errors.push(ConfigError::DuplicateRule {
                    pair: pair.clone(),
                    member: name,
                });
            }
            Some(existing) => {
                let converter = existing.converter.take();
                *existing = rule;
                if existing.converter.is_none() {
                    existing.converter = converter;
                }
            }
            None => mapping.rules.push(rule),
        }
        self
    }

    /// Ajoute une règle de chemin. Un chemin d'un seul segment est une
    /// règle membre à expression personnalisée.
    pub fn add_path_rule(&mut self, pair: &TypePair, rule: PathRule) -> &mut Self {
        if let [single] = rule.path.as_slice() {
            match self.schema.find_member(&pair.destination, single).cloned() {
                Some(member) => {
                    let mut member_rule = MemberRule::new(member, rule.origin);
                    member_rule.custom = Some(rule.source);
                    return self.add_member_rule(pair, member_rule);
                }
                None => {
                    let index = self.ensure(pair);
                    self.mappings[index].pending_errors.push(ConfigError::UnknownMember {
                        ty: pair.destination.clone(),
                        member: single.clone(),
                    });
                    return self;
                }
            }
        }
        let index = self.ensure(pair);
        let mapping = &mut self.mappings[index];
        if mapping.path_rules.iter().any(|p| p.path == rule.path) {
            mapping.pending_errors.push(ConfigError::DuplicateRule {
                pair: pair.clone(),
                member: rule.dotted(),
            });
        } else {
            mapping.path_rules.push(rule);
        }
        self
    }

    /// Installe un convertisseur de paire (remplace les règles membres)
    pub fn set_pair_converter(&mut self, pair: &TypePair, converter: PairConverter) -> &mut Self {
        let index = self.ensure(pair);
        let mapping = &mut self.mappings[index];
        if mapping.converter.is_some() {
            mapping.pending_errors.push(ConfigError::DuplicateRule {
                pair: pair.clone(),
                member: "(convertisseur de paire)".into(),
            });
        } else {
            mapping.converter = Some(converter);
        }
        self
    }

    /// Déclare le prédicat d'équivalence d'une paire : (source, destination) → Bool
    pub fn equivalency(&mut self, source: TypeRef, destination: TypeRef, predicate: Lambda) -> &mut Self {
        self.equivalencies.push((TypePair::new(source, destination), predicate));
        self
    }

    pub fn key_provider(&mut self, provider: impl KeyProvider + 'static) -> &mut Self {
        self.key_provider = Some(Arc::new(provider));
        self
    }

    /// Remplace la façade de conversion d'objets
    pub fn facade(&mut self, facade: impl MappingFacade + 'static) -> &mut Self {
        self.facade = Arc::new(facade);
        self
    }

    /// Scelle le registre. Échoue avec TOUTES les erreurs de configuration.
    pub fn seal(self) -> Result<Registry, ConfigurationErrors> {
        let registry = self.build();
        if registry.errors.is_empty() {
            Ok(registry)
        } else {
            Err(ConfigurationErrors(registry.errors))
        }
    }

    /// Scelle le registre sans échouer : les mappings fautifs sont marqués
    /// Invalid et refusés à la recherche, les autres restent utilisables.
    pub fn seal_lenient(self) -> Registry {
        self.build()
    }

    fn ensure(&mut self, pair: &TypePair) -> usize {
        match self.mappings.iter().position(|m| m.pair == *pair) {
            Some(index) => index,
            None => {
                self.mappings.push(TypeMapping::new(pair.clone()));
                self.mappings.len() - 1
            }
        }
    }

    fn build(self) -> Registry {
        let RegistryBuilder {
            schema,
            conventions,
            mut mappings,
            equivalencies,
            key_provider,
            facade,
        } = self;

        let mut by_convention = 0;
        for mapping in &mut mappings {
            by_convention += validate::apply_conventions(&schema, &conventions, mapping);
        }
        generate_reverse_maps(&mut mappings);
        for mapping in &mut mappings {
            by_convention += validate::apply_conventions(&schema, &conventions, mapping);
        }

        let pairs: HashSet<TypePair> = mappings.iter().map(|m| m.pair.clone()).collect();
        let known = |from: &TypeRef, to: &TypeRef| pairs.contains(&TypePair::new(from.clone(), to.clone()));

        let mut errors = Vec::new();
        for mapping in &mut mappings {
            let found = validate::check_mapping(&schema, &known, mapping);
            mapping.pending_errors.clear();
            if found.is_empty() {
                mapping.state = MappingState::Validated;
            } else {
                warn!(pair = %mapping.pair, errors = found.len(), "mapping invalide");
                errors.extend(found.iter().cloned());
                mapping.state = MappingState::Invalid(found);
            }
        }

        let mut user = HashMap::new();
        for (pair, predicate) in equivalencies {
            let problem = if user.contains_key(&pair) {
                Some(ConfigError::InvalidEquivalency {
                    pair: pair.clone(),
                    reason: "prédicat déclaré deux fois".into(),
                })
            } else {
                validate::check_equivalency(&schema, &pair, &predicate)
            };
            match problem {
                Some(error) => errors.push(error),
                None => {
                    let expression = EquivalencyExpression::new(pair.clone(), predicate, EquivalencyOrigin::User);
                    user.insert(pair, Arc::new(expression));
                }
            }
        }

        info!(
            mappings = mappings.len(),
            convention_rules = by_convention,
            errors = errors.len(),
            "registre scellé"
        );

        let index = mappings
            .iter()
            .enumerate()
            .map(|(i, m)| (m.pair.clone(), i))
            .collect();
        Registry {
            schema,
            mappings,
            index,
            equivalency: EquivalencyGenerator::new(user, key_provider),
            facade,
            paths: PathCache::default(),
            errors,
        }
    }
}

/// Génère ou complète le mapping miroir de chaque paire marquée reverse_map().
fn generate_reverse_maps(mappings: &mut Vec<TypeMapping>) {
    let requested: Vec<usize> = mappings
        .iter()
        .enumerate()
        .filter(|(_, m)| m.reverse == ReverseLink::Requested)
        .map(|(i, _)| i)
        .collect();

    for i in requested {
        let forward = mappings[i].pair.clone();
        let mirror_pair = forward.reversed();
        let (rules, path_rules) = reverse_rules(&mappings[i]);
        let j = match mappings.iter().position(|m| m.pair == mirror_pair) {
            Some(j) => j,
            None => {
                let mut mirror = TypeMapping::new(mirror_pair.clone());
                mirror.member_list = MemberList::None;
                mappings.push(mirror);
                mappings.len() - 1
            }
        };

        let mirror = &mut mappings[j];
        for rule in rules {
            match mirror.rule_for_mut(&rule.destination.name) {
                Some(existing) if existing.is_resolved() => {}
                Some(existing) => existing.source_chain = rule.source_chain,
                None => mirror.rules.push(rule),
            }
        }
        for path_rule in path_rules {
            let covered = mirror.path_rules.iter().any(|p| p.path == path_rule.path)
                || mirror.rule_for(&path_rule.path[0]).is_some_and(|r| r.is_resolved());
            if !covered {
                mirror.path_rules.push(path_rule);
            }
        }
        mirror.reverse = ReverseLink::Linked(forward.clone());
        mappings[i].reverse = ReverseLink::Linked(mirror_pair);
    }
}

/// Les règles miroir des règles simples d'un mapping.
fn reverse_rules(mapping: &TypeMapping) -> (Vec<MemberRule>, Vec<PathRule>) {
    let mut rules = Vec::new();
    let mut path_rules = Vec::new();
    for rule in &mapping.rules {
        if rule.ignored || rule.resolver.is_some() || rule.converter.is_some() {
            continue;
        }
        let Some(chain) = rule.member_chain() else {
            continue;
        };
        match chain.as_slice() {
            [single] => rules.push(MemberRule::from_chain(
                single.clone(),
                vec![rule.destination.clone()],
                RuleOrigin::Reverse,
            )),
            _ => {
                let d = Parameter::new("d", mapping.pair.destination.clone());
                let body = Expr::param(&d).member(rule.destination.clone());
                path_rules.push(PathRule {
                    path: chain.iter().map(|m| m.name.clone()).collect(),
                    source: Lambda::new(vec![d], body),
                    origin: RuleOrigin::Reverse,
                });
            }
        }
    }
    (rules, path_rules)
}

/// Poignée de configuration d'UN TypeMapping.
pub struct MappingConfig<'a> {
    builder: &'a mut RegistryBuilder,
    index: usize,
}

impl MappingConfig<'_> {
    pub fn pair(&self) -> &TypePair {
        &self.builder.mappings[self.index].pair
    }

    /// Un paramètre neuf du type source, pour écrire les lambdas
    pub fn source_param(&self, name: &str) -> Parameter {
        Parameter::new(name, self.pair().source.clone())
    }

    /// `dest ← source.Path` (chaîne pointée résolue dans le schéma)
    pub fn map_member(&mut self, destination: &str, source_path: &str) -> &mut Self {
        let (Some(member), Some(chain)) = (self.destination_member(destination), self.source_chain(source_path)) else {
            return self;
        };
        let rule = MemberRule::from_chain(member, chain, RuleOrigin::Explicit);
        self.push_rule(rule)
    }

    /// `dest ← lambda(source)`
    pub fn map_from(&mut self, destination: &str, lambda: Lambda) -> &mut Self {
        let Some(member) = self.destination_member(destination) else {
            return self;
        };
        let mut rule = MemberRule::new(member, RuleOrigin::Explicit);
        rule.custom = Some(lambda);
        self.push_rule(rule)
    }

    /// Chaîne source ET expression : l'expression est prioritaire pour la
    /// réécriture, la chaîne documente le membre traversé.
    pub fn map_member_and_from(&mut self, destination: &str, source_path: &str, lambda: Lambda) -> &mut Self {
        let (Some(member), Some(chain)) = (self.destination_member(destination), self.source_chain(source_path)) else {
            return self;
        };
        let mut rule = MemberRule::from_chain(member, chain, RuleOrigin::Explicit);
        rule.custom = Some(lambda);
        self.push_rule(rule)
    }

    /// Convertisseur de valeur pour un membre
    pub fn convert_member(&mut self, destination: &str, converter: ValueConverter) -> &mut Self {
        let Some(member) = self.destination_member(destination) else {
            return self;
        };
        let pair = self.pair().clone();
        let mapping = &mut self.builder.mappings[self.index];
        match mapping.rule_for_mut(destination) {
            Some(rule) if rule.converter.is_some() => {
                mapping.pending_errors.push(ConfigError::DuplicateRule {
                    pair,
                    member: destination.to_string(),
                });
            }
            Some(rule) => rule.converter = Some(converter),
            None => {
                let mut rule = MemberRule::new(member, RuleOrigin::Explicit);
                rule.converter = Some(converter);
                mapping.rules.push(rule);
            }
        }
        self
    }

    /// Resolver d'exécution : utilisable par la façade, refusé par la réécriture
    pub fn resolve_using(
        &mut self,
        destination: &str,
        output: TypeRef,
        f: impl Fn(&Value) -> Result<Value, MappingError> + Send + Sync + 'static,
    ) -> &mut Self {
        let Some(member) = self.destination_member(destination) else {
            return self;
        };
        let mut rule = MemberRule::new(member, RuleOrigin::Explicit);
        rule.resolver = Some(Resolver::new(output, f));
        self.push_rule(rule)
    }

    pub fn ignore(&mut self, destination: &str) -> &mut Self {
        let Some(member) = self.destination_member(destination) else {
            return self;
        };
        let mut rule = MemberRule::new(member, RuleOrigin::Explicit);
        rule.ignored = true;
        self.push_rule(rule)
    }

    /// `"Address.City" ← lambda(source)`
    pub fn for_path(&mut self, dotted: &str, lambda: Lambda) -> &mut Self {
        let pair = self.pair().clone();
        let path = split_dotted(dotted);
        self.builder.add_path_rule(
            &pair,
            PathRule {
                path,
                source: lambda,
                origin: RuleOrigin::Explicit,
            },
        );
        self
    }

    /// Fonction totale Source → Destination ; les règles membres sont ignorées
    pub fn convert_using(
        &mut self,
        f: impl Fn(&Value) -> Result<Value, MappingError> + Send + Sync + 'static,
    ) -> &mut Self {
        let pair = self.pair().clone();
        self.builder.set_pair_converter(&pair, PairConverter::new(f));
        self
    }

    /// Demande la génération du mapping miroir au scellement
    pub fn reverse_map(&mut self) -> &mut Self {
        self.builder.mappings[self.index].reverse = ReverseLink::Requested;
        self
    }

    pub fn validate_members(&mut self, list: MemberList) -> &mut Self {
        self.builder.mappings[self.index].member_list = list;
        self
    }

    fn push_rule(&mut self, rule: MemberRule) -> &mut Self {
        let pair = self.pair().clone();
        self.builder.add_member_rule(&pair, rule);
        self
    }

    fn destination_member(&mut self, name: &str) -> Option<Member> {
        let destination = self.pair().destination.clone();
        let found = self.builder.schema.find_member(&destination, name).cloned();
        if found.is_none() {
            self.builder.mappings[self.index]
                .pending_errors
                .push(ConfigError::UnknownMember {
                    ty: destination,
                    member: name.to_string(),
                });
        }
        found
    }

    fn source_chain(&mut self, dotted: &str) -> Option<Vec<Member>> {
        let source = self.pair().source.clone();
        let path = split_dotted(dotted);
        let found = self.builder.schema.resolve_chain(&source, &path);
        if found.is_none() {
            self.builder.mappings[self.index]
                .pending_errors
                .push(ConfigError::UnknownMember {
                    ty: source,
                    member: dotted.to_string(),
                });
        }
        found
    }
}

/// Le registre scellé : immuable, partagé entre threads.
pub struct Registry {
    schema: Schema,
    mappings: Vec<TypeMapping>,
    index: HashMap<TypePair, usize>,
    equivalency: EquivalencyGenerator,
    facade: Arc<dyn MappingFacade>,
    paths: PathCache,
    errors: Vec<ConfigError>,
}

impl Registry {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Les mappings, dans l'ordre de déclaration (mappings inverses générés à la fin)
    pub fn mappings(&self) -> impl Iterator<Item = &TypeMapping> {
        self.mappings.iter()
    }

    /// Le mapping d'une paire, quel que soit son état
    pub fn find_mapping(&self, source: &TypeRef, destination: &TypeRef) -> Option<&TypeMapping> {
        let pair = TypePair::new(source.clone(), destination.clone());
        self.index.get(&pair).map(|&i| &self.mappings[i])
    }

    pub fn has_mapping(&self, source: &TypeRef, destination: &TypeRef) -> bool {
        self.find_mapping(source, destination).is_some()
    }

    /// Le mapping VALIDE d'une paire
    pub fn get_mapping(&self, source: &TypeRef, destination: &TypeRef) -> Result<&TypeMapping, MappingError> {
        let mapping = self
            .find_mapping(source, destination)
            .ok_or_else(|| MappingError::MissingTypeMapping {
                from: source.clone(),
                to: destination.clone(),
            })?;
        match &mapping.state {
            MappingState::Invalid(errors) => Err(MappingError::InvalidTypeMapping {
                pair: mapping.pair.clone(),
                errors: errors.clone(),
            }),
            _ => Ok(mapping),
        }
    }

    /// Convertit une valeur vivante par la façade
    pub fn convert(&self, value: &Value, from: &TypeRef, to: &TypeRef) -> Result<Value, MappingError> {
        self.facade.convert(self, value, from, to)
    }

    /// Le prédicat d'équivalence de la paire, s'il existe ou se dérive
    pub fn equivalency(&self, source: &TypeRef, destination: &TypeRef) -> Option<Arc<EquivalencyExpression>> {
        let pair = TypePair::new(source.clone(), destination.clone());
        let mapping = self.find_mapping(source, destination);
        self.equivalency.get(&self.schema, mapping, &pair)
    }

    /// Réécrit une lambda typée source vers le type fonctionnel `target`
    /// (`Expression<Func<..>>` ou `Func<..>`).
    pub fn map_expression(&self, expression: &Expr, target: &TypeRef) -> Result<Lambda, MappingError> {
        rewrite::map_expression(self, expression, target, false)
    }

    pub fn map_expression_list(&self, expressions: &[Expr], target: &TypeRef) -> Result<Vec<Lambda>, MappingError> {
        expressions
            .iter()
            .map(|e| self.map_expression(e, target))
            .collect()
    }

    /// Réécrit un sélecteur de navigation en chemin à charger
    /// (`s => s.Customer.Name` devient `d => d.Customer`).
    pub fn map_include(&self, expression: &Expr, target: &TypeRef) -> Result<Lambda, MappingError> {
        rewrite::map_expression(self, expression, target, true)
    }

    pub fn map_include_list(&self, expressions: &[Expr], target: &TypeRef) -> Result<Vec<Lambda>, MappingError> {
        expressions
            .iter()
            .map(|e| self.map_include(e, target))
            .collect()
    }

    /// Les erreurs collectées au scellement (vide après un seal() réussi)
    pub fn configuration_errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn assert_configuration_is_valid(&self) -> Result<(), ConfigurationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationErrors(self.errors.clone()))
        }
    }

    /// Nombre de chemins résolus gardés en cache
    pub fn cached_paths(&self) -> usize {
        self.paths.len()
    }

    pub(crate) fn path_cache(&self) -> &PathCache {
        &self.paths
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("schema", &self.schema.name)
            .field("mappings", &self.mappings.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}
