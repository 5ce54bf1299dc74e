use super::{colorize_build_status, json_pretty, resolve_state_path, EXIT_SUCCESS};
use kiln_state::{StateStore, StepStatus};
use std::path::Path;

/// Read-only: loads the document directly, takes no lock, writes nothing.
pub fn run(state: Option<&Path>, json: bool) -> Result<u8, String> {
    let path = resolve_state_path(state, Path::new("."));
    let doc = match StateStore::new(&path).load().map_err(|e| e.to_string())? {
        Some(doc) => doc,
        None => {
            println!("No state file found.");
            return Ok(EXIT_SUCCESS);
        }
    };

    if json {
        println!("{}", json_pretty(&doc)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("State file: {}", path.display());
    println!("Version: {} (serial: {})", doc.version, doc.serial);
    println!("Lineage: {}", doc.lineage);
    println!("Template: {}", doc.template.path);
    println!("Template hash: {}", doc.template.hash);
    if let Some(run) = &doc.last_run {
        match run.completed_at {
            Some(completed) => println!(
                "Last run: {} -> {}",
                run.started_at.to_rfc3339(),
                completed.to_rfc3339()
            ),
            None => println!("Last run: started {} (not completed)", run.started_at.to_rfc3339()),
        }
    }

    if doc.builds.is_empty() {
        println!();
        println!("No builds in state.");
        return Ok(EXIT_SUCCESS);
    }

    println!();
    println!("Builds ({}):", doc.builds.len());
    for (name, build) in &doc.builds {
        println!();
        println!("  {name}:");
        println!("    Type: {}", build.build_type);
        println!("    Status: {}", colorize_build_status(build.status));

        if let Some(instance) = &build.instance {
            println!("    Instance:");
            println!("      ID: {}", instance.id);
            println!("      Provider: {}", instance.provider);
            if let Some(ip) = &instance.public_ip {
                println!("      IP: {ip}");
            }
        }

        if !build.provisioners.is_empty() {
            let done = build
                .provisioners
                .iter()
                .filter(|s| s.status == StepStatus::Complete)
                .count();
            println!(
                "    Provisioners: {done}/{} complete",
                build.provisioners.len()
            );
        }
        if !build.post_processors.is_empty() {
            let done = build
                .post_processors
                .iter()
                .filter(|s| s.status == StepStatus::Complete)
                .count();
            println!(
                "    Post-processors: {done}/{} complete",
                build.post_processors.len()
            );
        }

        if !build.artifacts.is_empty() {
            println!("    Artifacts:");
            for artifact in &build.artifacts {
                println!("      - {} ({})", artifact.id, artifact.builder_id);
            }
        }

        if let Some(error) = &build.error {
            println!("    Error: {error}");
        }
        if let Some(completed) = build.completed_at {
            println!("    Completed: {}", completed.to_rfc3339());
        }
    }

    Ok(EXIT_SUCCESS)
}
