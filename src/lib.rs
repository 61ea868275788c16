// =============================================================================
// EXPRMAP — Registre de mappings de types et réécriture d'expressions
// =============================================================================
//
// Une requête est écrite sur un type "vue" (OrderDto), mais doit
// s'exécuter sur le type "stockage" (Order). exprmap déclare comment
// chaque type se construit à partir de l'autre, puis réécrit l'arbre de
// la requête pour qu'un backend puisse l'exécuter tel quel.
//
// Architecture :
//   core/     → Le registre, les conventions et le réécrivain
//   backend/  → Le trait QueryBackend et un backend en mémoire
//   config    → Options des conventions (TOML)
//   error     → Les erreurs typées
//
// Cycle de vie :
//   RegistryBuilder (mutable, un seul thread)
//        ↓ seal()
//   Registry (immuable, partagé entre threads, caches internes)
//        ↓ map_expression(..)
//   Lambda réécrite → QueryBackend::execute
//
// =============================================================================

pub mod core;
pub mod backend;
pub mod config;
pub mod error;

pub use crate::core::registry::{MappingConfig, Registry, RegistryBuilder};
pub use crate::error::{ConfigError, ConfigurationErrors, MappingError};
