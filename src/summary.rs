//! Resumen de cambios en texto plano.
//!
//! Si el cambio agregó exactamente un paquete independiente (que ningún otro
//! artifact agregado o actualizado necesita), se listan sus dependencias
//! directas nuevas. Con dos o más paquetes independientes no se imprime
//! nada: no existe formato para un resumen de varios paquetes.
use std::collections::{HashMap, HashSet};
use std::io::Write;

use run_core::{recursive_dependencies_for, Artifact, ArtifactChangeset, ArtifactId, ArtifactMap};
use run_pipeline::{ChangeSummaryDigester, DigestError};

/// Líneas del resumen, o `None` cuando no corresponde mostrar nada.
pub fn change_summary_lines(artifacts: &ArtifactMap,
                            requested: &ArtifactChangeset,
                            changed: &ArtifactChangeset)
                            -> Option<Vec<String>> {
    let candidates = if requested.added.is_empty() { &changed.added } else { &requested.added };
    let mut independent = candidates.iter().filter(|a| !has_dependant(a.id, changed, artifacts));
    let added = independent.next()?;
    if independent.next().is_some() {
        return None;
    }
    let added = artifacts.get(&added.id)?;

    // sólo cuenta lo que el cambio trae: agregados y versiones nuevas
    let incoming: HashSet<ArtifactId> =
        changed.added.iter().map(|a| a.id).chain(changed.updated.iter().map(|u| u.to.id)).collect();
    let old_versions: HashMap<String, Option<String>> =
        changed.updated.iter().map(|u| (u.from.logical_name(), u.from.version.clone())).collect();

    let mut direct: Vec<&Artifact> = added.dependencies
                                          .iter()
                                          .filter(|id| incoming.contains(id))
                                          .filter_map(|id| artifacts.get(id))
                                          .collect();
    if direct.is_empty() {
        return None;
    }
    direct.sort_by(|a, b| a.name.cmp(&b.name));

    let mut unique: HashSet<ArtifactId> = direct.iter().map(|a| a.id).collect();
    let subs: Vec<usize> = direct.iter()
                                 .map(|d| {
                                     let nested: Vec<ArtifactId> = recursive_dependencies_for(d.id, artifacts)
                                         .into_iter()
                                         .filter(|id| incoming.contains(id))
                                         .collect();
                                     let n = nested.len();
                                     unique.extend(nested);
                                     n
                                 })
                                 .collect();

    let mut lines = vec![String::new()];
    let version = added.version.as_deref().unwrap_or_default();
    if direct.len() < unique.len() {
        lines.push(format!("Installing {}@{version} includes {} direct dependencies, and {} total dependencies.",
                           added.name,
                           direct.len(),
                           unique.len()));
    } else {
        lines.push(format!("Installing {}@{version} includes {} dependencies.", added.name, direct.len()));
    }
    for (i, (dep, n)) in direct.iter().zip(subs).enumerate() {
        let prefix = if i + 1 == direct.len() { "└─" } else { "├─" };
        let version = dep.version.as_deref().unwrap_or_default();
        let mut item = format!("{}@{version}", dep.name);
        if n > 0 {
            item.push_str(&format!(" ({n} dependencies)"));
        }
        if let Some(Some(old)) = old_versions.get(&dep.logical_name()) {
            if !version.is_empty() && old != version {
                item = format!("{}@{old} → {item} (updated)", dep.name);
            }
        }
        lines.push(format!("  {prefix} {item}"));
    }
    lines.push(String::new());
    Some(lines)
}

/// true si otro artifact agregado, o alguna de las dos puntas de una
/// actualización, depende (transitivamente) de `id`.
fn has_dependant(id: ArtifactId, changed: &ArtifactChangeset, artifacts: &ArtifactMap) -> bool {
    let depends_on = |root: ArtifactId| recursive_dependencies_for(root, artifacts).contains(&id);
    changed.added.iter().filter(|a| a.id != id).any(|a| depends_on(a.id))
    || changed.updated.iter().any(|u| depends_on(u.to.id) || depends_on(u.from.id))
}

/// Digester que escribe el resumen en cualquier `Write`.
pub struct SummaryPrinter<W> {
    out: W,
}

impl<W: Write> SummaryPrinter<W> {
    pub fn new(out: W) -> Self { Self { out } }
    pub fn into_inner(self) -> W { self.out }
}

impl<W: Write> ChangeSummaryDigester for SummaryPrinter<W> {
    fn change_summary(&mut self,
                      artifacts: &ArtifactMap,
                      requested: &ArtifactChangeset,
                      changed: &ArtifactChangeset)
                      -> Result<(), DigestError> {
        let Some(lines) = change_summary_lines(artifacts, requested, changed) else {
            return Ok(());
        };
        for line in lines {
            writeln!(self.out, "{line}").map_err(|e| DigestError::msg(format!("writing change summary: {e}")))?;
        }
        Ok(())
    }
}
