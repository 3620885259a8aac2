//! Constantes compartidas por el modelo de grafo y el consumidor de eventos.

use std::time::Duration;

/// Tag del input de un step que apunta al ingrediente fuente del artifact.
pub const TAG_SOURCE: &str = "src";

/// Terminales con este tag no forman parte del runtime (nodos huérfanos del plan).
pub const TAG_ORPHAN: &str = "orphan";

/// Tiempo sin eventos de build tras el cual un heartbeat se traduce en un
/// aviso de "sigue construyendo".
pub const STILL_BUILDING_AFTER: Duration = Duration::from_secs(15);

/// Tipos de dependencia de receta que cuentan para el runtime.
pub const DEPENDENCY_TYPE_RUNTIME: &str = "runtime";
