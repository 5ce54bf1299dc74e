use super::{resolve_state_path, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kiln_core::StatefulBuild;
use kiln_engine::{Artifact, BuildPlan, BuildUnit, ENGINE_VERSION};
use kiln_state::{fingerprint, Manager};
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(
    plan_path: &Path,
    state: Option<&Path>,
    force: bool,
    var_flags: &[String],
) -> Result<u8, String> {
    let plan = BuildPlan::from_file(plan_path).map_err(|e| e.to_string())?;
    if plan.builds.is_empty() {
        return Err(format!("no builds in plan {}", plan_path.display()));
    }

    let plan_dir = match plan_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let state_path = resolve_state_path(state, plan_dir);
    println!("Using state file: {}", state_path.display());

    let template_hash = fingerprint::hash_file(plan_path)
        .map_err(|e| format!("failed to hash plan {}: {e}", plan_path.display()))?;

    let mut variables = plan.variables.clone();
    for flag in var_flags {
        let (key, value) = flag
            .split_once('=')
            .ok_or_else(|| format!("invalid --var '{flag}', expected KEY=VALUE"))?;
        variables.insert(key.to_owned(), value.to_owned());
    }

    let mut files = BTreeMap::new();
    for source in &plan.sources {
        let hash = fingerprint::hash_file(plan_dir.join(source))
            .map_err(|e| format!("failed to hash source '{source}': {e}"))?;
        files.insert(source.clone(), hash);
    }

    // The manager's drop releases the lock on every early-error return.
    let mut mgr = Manager::new(&state_path);
    mgr.open().map_err(|e| e.to_string())?;

    let changed = mgr.inputs_changed(&template_hash, &variables, &files);
    if !changed && !force {
        let doc = mgr.document().map_err(|e| e.to_string())?;
        let all_complete = plan
            .builds
            .iter()
            .all(|b| doc.get_build(&b.name).is_some_and(|r| r.is_complete()));
        if all_complete {
            println!("✓ All builds complete and inputs unchanged. Nothing to do.");
            println!("  Use --force to rebuild anyway.");
            mgr.unlock().map_err(|e| e.to_string())?;
            return Ok(EXIT_SUCCESS);
        }
    } else if changed {
        println!("Plan inputs changed, rebuilding");
    }

    mgr.record_run_start().map_err(|e| e.to_string())?;
    mgr.update_template_inputs(
        &plan_path.display().to_string(),
        &template_hash,
        variables,
        files,
    )
    .map_err(|e| e.to_string())?;
    mgr.document_mut().map_err(|e| e.to_string())?.engine_version = ENGINE_VERSION.to_owned();

    if force {
        let doc = mgr.document_mut().map_err(|e| e.to_string())?;
        for build in &plan.builds {
            doc.remove_build(&build.name);
        }
    }

    let mut all_artifacts = Vec::new();
    for mut unit in plan.units() {
        let name = unit.name().to_owned();
        let pb = spinner(&format!("building '{name}'"));
        match StatefulBuild::new(&mut mgr, &mut unit).run(changed || force) {
            Ok(artifacts) => {
                spin_ok(&pb, &format!("build '{name}' finished"));
                all_artifacts.extend(artifacts);
            }
            Err(e) => {
                spin_fail(&pb, &format!("build '{name}' failed"));
                // The failure is already durable; flush the run info and
                // release the lock before surfacing it.
                let _ = mgr.close();
                return Err(format!("build '{name}' failed: {e}"));
            }
        }
    }

    mgr.record_run_completed().map_err(|e| e.to_string())?;
    mgr.close().map_err(|e| e.to_string())?;

    println!();
    println!("Builds finished. The artifacts were:");
    for artifact in &all_artifacts {
        println!("  {}: {}", artifact.builder_id(), artifact);
    }
    Ok(EXIT_SUCCESS)
}
