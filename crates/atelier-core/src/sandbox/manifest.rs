//! Deciding what to install and what to start.

use std::path::Path;

use atelier_protocol::FileTree;
use serde_json::{Map, Value};

use super::SandboxError;
use crate::config::SandboxConfig;

/// Dependency manifest that switches a run into install mode.
pub const MANIFEST: &str = "package.json";

/// Entry files tried, in order, when nothing says what to start.
pub const ENTRY_CANDIDATES: &[&str] = &["server.js", "index.js", "app.js", "main.js"];

/// Commands for one run, plus the tree to mount.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Snapshot to mount, with the manifest fixed up if needed
    pub tree: FileTree,
    /// Installer, present only when a manifest exists
    pub install: Option<Vec<String>>,
    pub start: Vec<String>,
    /// Messages to show before anything runs
    pub notices: Vec<String>,
}

/// Work out how to run `tree`.
///
/// With a manifest lacking `scripts.start`, the first entry candidate is
/// written into the manifest as `node <file>`. Without a manifest a
/// runnable source file is required.
pub fn plan_run(mut tree: FileTree, config: &SandboxConfig) -> Result<RunPlan, SandboxError> {
    let mut notices = Vec::new();

    let Some(manifest) = tree.file_contents(MANIFEST).map(str::to_owned) else {
        let (entry, start) = direct_command(&tree, config)?;
        notices.push(format!("No {MANIFEST}; running {entry} directly"));
        return Ok(RunPlan {
            tree,
            install: None,
            start,
            notices,
        });
    };

    match serde_json::from_str::<Value>(&manifest) {
        Ok(Value::Object(mut object)) => {
            if !has_start_script(&object) {
                match tree.find_first_file(ENTRY_CANDIDATES) {
                    Some(entry) => {
                        let script = format!("node {entry}");
                        set_start_script(&mut object, &script);
                        let fixed = serde_json::to_string_pretty(&Value::Object(object))
                            .map(|json| json + "\n")
                            .unwrap_or(manifest);
                        // The manifest path is always valid
                        let _ = tree.write_file(MANIFEST, fixed);
                        notices.push(format!(
                            "No start script in {MANIFEST}; added \"start\": \"{script}\""
                        ));
                    }
                    None => notices.push(format!(
                        "No start script in {MANIFEST} and none of {} found",
                        ENTRY_CANDIDATES.join(", ")
                    )),
                }
            }
        }
        _ => notices.push(format!("{MANIFEST} is not a JSON object; using it unchanged")),
    }

    Ok(RunPlan {
        tree,
        install: Some(config.install_command.clone()),
        start: config.start_command.clone(),
        notices,
    })
}

fn has_start_script(manifest: &Map<String, Value>) -> bool {
    manifest
        .get("scripts")
        .and_then(|scripts| scripts.get("start"))
        .and_then(Value::as_str)
        .is_some_and(|start| !start.trim().is_empty())
}

fn set_start_script(manifest: &mut Map<String, Value>, script: &str) {
    let scripts = manifest
        .entry("scripts")
        .or_insert_with(|| Value::Object(Map::new()));
    if !scripts.is_object() {
        *scripts = Value::Object(Map::new());
    }
    if let Value::Object(scripts) = scripts {
        scripts.insert("start".to_string(), Value::String(script.to_string()));
    }
}

/// Pick an entry file and its interpreter when there is no manifest.
fn direct_command(
    tree: &FileTree,
    config: &SandboxConfig,
) -> Result<(String, Vec<String>), SandboxError> {
    let entry = tree
        .find_first_file(ENTRY_CANDIDATES)
        .map(str::to_owned)
        .or_else(|| {
            tree.files()
                .map(|(path, _)| path)
                .find(|path| interpreter(path, config).is_some())
                .map(str::to_owned)
        })
        .ok_or(SandboxError::NoRunnableFile)?;

    let program = interpreter(&entry, config).ok_or(SandboxError::NoRunnableFile)?;
    Ok((entry.clone(), vec![program, entry]))
}

fn interpreter(path: &str, config: &SandboxConfig) -> Option<String> {
    let extension = Path::new(path).extension()?.to_str()?;
    match extension {
        "js" | "mjs" | "cjs" => Some(config.node_binary.clone()),
        "py" => Some(config.python_binary.clone()),
        "sh" => Some("sh".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(files: &[(&str, &str)]) -> FileTree {
        let mut tree = FileTree::new();
        for (path, contents) in files {
            tree.write_file(*path, *contents).unwrap();
        }
        tree
    }

    #[test]
    fn missing_start_script_is_synthesized() {
        let snapshot = tree(&[
            (MANIFEST, r#"{"name":"demo","dependencies":{"express":"^4"}}"#),
            ("index.js", "// index"),
            ("server.js", "// server"),
        ]);
        let plan = plan_run(snapshot, &SandboxConfig::default()).unwrap();

        let manifest: Value =
            serde_json::from_str(plan.tree.file_contents(MANIFEST).unwrap()).unwrap();
        assert_eq!(manifest["scripts"]["start"], "node server.js");
        assert_eq!(manifest["dependencies"]["express"], "^4");
        assert!(plan.notices[0].contains("node server.js"));
        assert_eq!(plan.install, Some(vec!["npm".into(), "install".into()]));
        assert_eq!(plan.start, vec!["npm", "start"]);
    }

    #[test]
    fn existing_start_script_is_kept() {
        let manifest = r#"{"scripts":{"start":"vite"}}"#;
        let plan = plan_run(
            tree(&[(MANIFEST, manifest), ("server.js", "")]),
            &SandboxConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.tree.file_contents(MANIFEST), Some(manifest));
        assert!(plan.notices.is_empty());
    }

    #[test]
    fn non_object_scripts_are_replaced() {
        let plan = plan_run(
            tree(&[(MANIFEST, r#"{"scripts":"nope"}"#), ("app.js", "")]),
            &SandboxConfig::default(),
        )
        .unwrap();
        let manifest: Value =
            serde_json::from_str(plan.tree.file_contents(MANIFEST).unwrap()).unwrap();
        assert_eq!(manifest["scripts"]["start"], "node app.js");
    }

    #[test]
    fn direct_run_picks_interpreter() {
        let config = SandboxConfig::default();

        let plan = plan_run(tree(&[("README.md", ""), ("tool.py", "")]), &config).unwrap();
        assert_eq!(plan.install, None);
        assert_eq!(plan.start, vec!["python3", "tool.py"]);

        let plan = plan_run(tree(&[("a.py", ""), ("main.js", "")]), &config).unwrap();
        assert_eq!(plan.start, vec!["node", "main.js"]);
    }

    #[test]
    fn nothing_runnable() {
        let err = plan_run(tree(&[("README.md", "# hi")]), &SandboxConfig::default()).unwrap_err();
        assert!(matches!(err, SandboxError::NoRunnableFile));
        assert!(matches!(
            plan_run(FileTree::new(), &SandboxConfig::default()),
            Err(SandboxError::NoRunnableFile)
        ));
    }
}
