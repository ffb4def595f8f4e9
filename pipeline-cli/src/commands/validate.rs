use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::{MatrixExpander, WorkflowDefinition};

/// Check a workflow file without running it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

/// Returns the process exit code.
pub fn execute(args: ValidateArgs) -> Result<i32> {
    let path = &args.workflow;
    if !path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
    }

    output::status("Validating", &format!("{}", path.display()));

    let definition = match WorkflowDefinition::from_file(path) {
        Ok(definition) => definition,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(1);
        }
    };

    output::check(&format!("Workflow '{}' loaded", definition.display_name()));

    let instances: usize = definition
        .jobs()
        .iter()
        .map(|job| MatrixExpander::expand(job).len())
        .sum();
    let steps: usize = definition.jobs().iter().map(|job| job.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} job instances, {} steps",
        definition.jobs().len(),
        instances,
        steps
    ));

    for (depth, level) in definition.graph().levels().iter().enumerate() {
        let names: Vec<&str> = level
            .iter()
            .map(|id| definition.job(*id).name.as_str())
            .collect();
        output::dim(&format!("    level {}: {}", depth, names.join(", ")));
    }

    println!();
    output::success("Workflow is valid");
    Ok(0)
}
