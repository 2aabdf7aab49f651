//! Remote folder layout on the Windows build machine.

/// Sub-folders purged before every build, relative to the output folder.
pub const PURGED_FOLDERS: [&[&str]; 3] = [
    &["Output", "GameZip"],
    &["Output", "GameFiles"],
    &["Input", "Options"],
];

/// Folder receiving staged option files, relative to the output folder.
pub const OPTIONS_FOLDER: &[&str] = &["Input", "Options"];

/// Default checkout location, relative to the output folder.
pub const PROJECT_FOLDER: &[&str] = &["Input", "Project"];

/// Folder holding the packaged artifact, relative to the output folder.
pub const ARTIFACT_FOLDER: &[&str] = &["Output", "GameZip"];

/// Joins Windows path components with `\`, tolerating trailing separators
/// on `base`.
#[must_use]
pub fn join(base: &str, parts: &[&str]) -> String {
    let mut path = base.trim_end_matches(['\\', '/']).to_owned();
    for part in parts {
        path.push('\\');
        path.push_str(part);
    }
    path
}
