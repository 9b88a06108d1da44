//! Command vector derivation from a job's mode and fields.
//!
//! Tokenization of `args`/`script` splits on whitespace, matching the
//! original's naive `str.split()`; no shell-quoting semantics are applied.

use hydra_db::{JobMode, RenderJob, RenderTask};

/// Build the argv for `task`, per its parent job's mode. The frame range
/// comes from the task's own slice (`task.start_frame`/`task.end_frame`), not
/// the job's overall submitted range — each task only renders its slice.
pub fn build_command(job: &RenderJob, task: &RenderTask) -> Vec<String> {
    match job.mode {
        JobMode::MayaRender => build_maya_render_command(job, task),
        JobMode::MayaPy => build_mayapy_command(job),
        JobMode::Command => build_plain_command(job),
    }
}

fn build_maya_render_command(job: &RenderJob, task: &RenderTask) -> Vec<String> {
    let mut cmd = vec!["render".to_owned()];

    if let Some(args) = &job.args {
        cmd.extend(args.split_whitespace().map(str::to_owned));
    }

    cmd.push("-s".to_owned());
    cmd.push(task.start_frame.to_string());
    cmd.push("-e".to_owned());
    cmd.push(task.end_frame.to_string());
    if let Some(render_layers) = &job.render_layers {
        cmd.push("-rl".to_owned());
        cmd.push(render_layers.clone());
    }
    if let Some(project) = &job.project {
        cmd.push("-proj".to_owned());
        cmd.push(project.clone());
    }
    if let Some(output_directory) = &job.output_directory {
        cmd.push("-rd".to_owned());
        cmd.push(output_directory.clone());
    }
    if let Some(task_file) = &job.task_file {
        cmd.push(task_file.clone());
    }

    cmd
}

fn build_mayapy_command(job: &RenderJob) -> Vec<String> {
    let script = job.script.clone().unwrap_or_default();
    vec!["mayapy".to_owned(), "-c".to_owned(), script]
}

fn build_plain_command(job: &RenderJob) -> Vec<String> {
    job.script
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}
