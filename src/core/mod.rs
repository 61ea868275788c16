// =============================================================================
// CORE — Registre de mappings et réécriture d'expressions
// =============================================================================
//
// Aucune base de données ici : uniquement des types, des règles de
// correspondance entre types, et des arbres d'expressions.
//
// Architecture :
//   typeside    → les types (String, Int, Nullable<T>, Queryable<T>...)
//   schema      → les formes et leurs membres
//   instance    → les objets concrets
//   expr        → l'arbre d'expressions (7 sortes de nœuds)
//   query       → le catalogue des opérateurs de requête
//   eval        → évaluateur en mémoire
//   convention  → appariement automatique des noms de membres
//   mapping     → TypeMapping, règles membres, règles de chemin
//   validate    → conventions et vérifications au scellement
//   registry    → builder, scellement, registre partagé
//   equivalency → prédicats d'identité entre objets de deux types
//   resolve     → résolution d'un chemin de membres vers un autre type
//   rewrite     → le visiteur de réécriture
//   migrate     → la façade de conversion d'objets vivants
//
// =============================================================================

pub mod typeside;
pub mod schema;
pub mod instance;
pub mod expr;
pub mod query;
pub mod eval;
pub mod convention;
pub mod mapping;
pub mod validate;
pub mod registry;
pub mod equivalency;
pub mod resolve;
pub mod rewrite;
pub mod migrate;
