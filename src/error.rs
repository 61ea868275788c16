// =============================================================================
// ERROR — Les erreurs typées du moteur
// =============================================================================
//
// Trois familles d'erreurs, qui ne se rencontrent jamais :
//
//   ConfigError   → détectée au SCELLEMENT du registre (seal).
//                   Fatale pour le TypeMapping concerné seulement.
//   MappingError  → détectée pendant une RÉÉCRITURE d'expression ou une
//                   conversion de valeur. Fatale pour cet appel seulement.
//   EvalError     → l'évaluateur en mémoire n'a pas pu interpréter un arbre.
//
// Les échecs "doux" (fournisseur de clés qui plante, équivalence non
// dérivable) ne sont JAMAIS des erreurs : ils deviennent une sentinelle
// dans le cache et un warn! dans les logs.
//
// =============================================================================

use thiserror::Error;

use crate::core::mapping::TypePair;
use crate::core::typeside::TypeRef;

/// Erreur de configuration, collectée au scellement.
///
/// Chaque variante porte la paire de types et le membre concernés,
/// pour qu'un message d'erreur désigne exactement la règle fautive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{pair} : le membre destination '{member}' n'est associé à aucun membre source")]
    UnmappedMember { pair: TypePair, member: String },

    #[error("{pair} : le membre '{member}' reçoit une valeur de type {found} mais attend {expected}")]
    TypeMismatch {
        pair: TypePair,
        member: String,
        expected: TypeRef,
        found: TypeRef,
    },

    #[error("{pair} : règle déclarée deux fois pour '{member}'")]
    DuplicateRule { pair: TypePair, member: String },

    #[error("le type {ty} n'a pas de membre '{member}'")]
    UnknownMember { ty: TypeRef, member: String },

    #[error("le type {ty} n'est pas décrit dans le schéma")]
    UnknownType { ty: TypeRef },

    #[error("{pair} : expression personnalisée invalide pour '{member}' : {reason}")]
    InvalidCustomExpression {
        pair: TypePair,
        member: String,
        reason: String,
    },

    #[error("{pair} : chemin '{path}' invalide : {reason}")]
    InvalidPath {
        pair: TypePair,
        path: String,
        reason: String,
    },

    #[error("{pair} : prédicat d'équivalence invalide : {reason}")]
    InvalidEquivalency { pair: TypePair, reason: String },
}

impl ConfigError {
    /// La paire de types concernée, quand l'erreur en désigne une
    pub fn pair(&self) -> Option<&TypePair> {
        match self {
            ConfigError::UnmappedMember { pair, .. }
            | ConfigError::TypeMismatch { pair, .. }
            | ConfigError::DuplicateRule { pair, .. }
            | ConfigError::InvalidCustomExpression { pair, .. }
            | ConfigError::InvalidPath { pair, .. }
            | ConfigError::InvalidEquivalency { pair, .. } => Some(pair),
            ConfigError::UnknownMember { .. } | ConfigError::UnknownType { .. } => None,
        }
    }
}

/// L'ensemble des erreurs de configuration remontées par `seal()`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} erreur(s) de configuration :\n{}", .0.len(), render_list(.0))]
pub struct ConfigurationErrors(pub Vec<ConfigError>);

impl ConfigurationErrors {
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn render_list(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Erreur de résolution / réécriture / conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("seules les expressions lambda de type Expression<Func<..>> peuvent être réécrites (reçu {found})")]
    NotExpressionShaped { found: TypeRef },

    #[error("nombre d'arguments génériques différent entre {from} et {to}")]
    InvalidArgumentCount { from: TypeRef, to: TypeRef },

    #[error("impossible de réécrire l'expression : {reason}")]
    CannotRemap { reason: String },

    #[error("{pair} : le membre '{member}' utilise un resolver d'exécution, qui n'a pas de forme expression")]
    CustomResolverUnsupported { pair: TypePair, member: String },

    #[error("aucun TypeMapping enregistré de {from} vers {to}")]
    MissingTypeMapping { from: TypeRef, to: TypeRef },

    #[error("le TypeMapping {pair} est invalide ({} erreur(s))", .errors.len())]
    InvalidTypeMapping {
        pair: TypePair,
        errors: Vec<ConfigError>,
    },

    #[error("expression trop complexe : '{first}' et '{second}' ne sont pas imbriqués")]
    ExpressionTooComplex { first: String, second: String },

    #[error("le type {ty} n'a pas de membre '{member}'")]
    MissingMember { ty: TypeRef, member: String },

    #[error("{pair} : le membre '{member}' n'est résolu par aucune règle")]
    UnmappedMember { pair: TypePair, member: String },

    #[error("{pair} : le membre '{member}' doit avoir un membre source pour être traversé")]
    SourceMemberRequired { pair: TypePair, member: String },

    #[error("le membre '{member}' est de type {expected} mais sa règle produit {found}")]
    ValueTypeMismatch {
        member: String,
        expected: TypeRef,
        found: TypeRef,
    },

    #[error("argument {index} de {method} : attendu {expected}, reçu {found}")]
    ArgumentTypeMismatch {
        method: String,
        index: usize,
        expected: TypeRef,
        found: TypeRef,
    },

    #[error("opérateur {op} : types incompatibles {left} et {right}")]
    BinaryTypeMismatch {
        op: String,
        left: TypeRef,
        right: TypeRef,
    },

    #[error("le membre '{path}' de type littéral {ty} est directement sur le paramètre")]
    MemberIsChildOfParameter { path: String, ty: TypeRef },

    #[error("conversion de {from} vers {to} impossible : {reason}")]
    Conversion {
        from: TypeRef,
        to: TypeRef,
        reason: String,
    },

    #[error("la valeur n'est pas de type {expected} (reçu {found})")]
    NotOfType { expected: TypeRef, found: String },

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Erreur de l'évaluateur en mémoire.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("paramètre '{name}' non lié")]
    UnboundParameter { name: String },

    #[error("accès à '{member}' sur une valeur qui n'est pas un objet ({found})")]
    NotAnObject { member: String, found: String },

    #[error("méthode {name} non supportée par l'évaluateur")]
    UnsupportedMethod { name: String },

    #[error("{op} : {detail}")]
    TypeError { op: String, detail: String },

    #[error("lambda à {expected} paramètre(s) appelée avec {found} argument(s)")]
    Arity { expected: usize, found: usize },
}

/// Erreur de chargement des options depuis TOML.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("options TOML invalides : {0}")]
    Toml(#[from] toml::de::Error),

    #[error("lecture du fichier d'options impossible : {0}")]
    Io(#[from] std::io::Error),
}

/// Erreur d'un backend de requêtes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("aucune collection de type {ty}")]
    UnknownCollection { ty: TypeRef },

    #[error("la requête doit prendre une seule séquence en paramètre, reçu {found}")]
    NotAQuery { found: TypeRef },

    #[error(transparent)]
    Eval(#[from] EvalError),
}
