//! Translation between editor file paths and the engine's `res://` paths.

use std::path::Path;

pub const RES_SCHEME: &str = "res://";

/// Forward slashes only, so Windows paths compare equal to what the engine
/// reports.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn project_root(project: &Path) -> String {
    let root = normalize(&project.to_string_lossy());
    root.trim_end_matches('/').to_string()
}

/// Maps an editor path inside `project` to `res://...`. Paths outside the
/// project, or when no project is known, are only normalised.
pub fn to_res_path(project: Option<&Path>, file: &str) -> String {
    let file = normalize(file);
    if file.starts_with(RES_SCHEME) {
        return file;
    }
    let Some(project) = project else {
        return file;
    };
    let root = project_root(project);
    match file.strip_prefix(&root) {
        Some(rest) if rest.starts_with('/') => format!("{RES_SCHEME}{}", &rest[1..]),
        _ => file,
    }
}

/// Maps an engine `res://...` path back into `project`.
pub fn from_res_path(project: Option<&Path>, file: &str) -> String {
    match (project, file.strip_prefix(RES_SCHEME)) {
        (Some(project), Some(rest)) => format!("{}/{rest}", project_root(project)),
        _ => file.to_string(),
    }
}
