//! Reading and writing simulation files.
//!
//! A simulation file is the JSON form of a [`ModelSpec`] whose root model is
//! [`Simulations`]. Model types are resolved through their `$type` tag.

use crate::errors::{AgsimError, AgsimResult};
use crate::model::{ModelSpec, Simulations};
use crate::tree::{ModelTree, NodeId};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Parse a simulation tree from JSON text.
///
/// `source_name` only labels errors, typically the file name.
pub fn from_json(text: &str, source_name: &str) -> AgsimResult<ModelTree> {
    let spec: ModelSpec = serde_json::from_str(text).map_err(|e| AgsimError::Structural {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })?;
    let model = spec.model.as_ref();
    if model.as_any().downcast_ref::<Simulations>().is_none() {
        return Err(AgsimError::Structural {
            source_name: source_name.to_string(),
            message: format!(
                "Root model '{}' is a {}, expected Simulations",
                spec.name,
                model.type_name()
            ),
        });
    }
    Ok(ModelTree::from_spec(spec))
}

/// Read a simulation file.
///
/// Relative file references held by models are made absolute against the directory of
/// `path`, and the root records where it was loaded from.
pub fn read(path: impl AsRef<Path>) -> AgsimResult<ModelTree> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut tree = from_json(&text, &path.display().to_string())?;
    let root = root_of(&tree)?;

    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if let Some(directory) = absolute.parent() {
        rebase_file_references(&mut tree, root, directory)?;
    }
    tree.get_mut::<Simulations>(root)?.file_name = Some(absolute);

    info!(file = %path.display(), models = tree.len(), "Loaded simulation file");
    Ok(tree)
}

/// Serialize a tree in the simulation file format.
pub fn to_json(tree: &ModelTree) -> AgsimResult<String> {
    let root = root_of(tree)?;
    Ok(serde_json::to_string_pretty(&tree.spec_view(root))?)
}

/// Write a tree to `path`.
pub fn write(tree: &ModelTree, path: impl AsRef<Path>) -> AgsimResult<()> {
    let path = path.as_ref();
    fs::write(path, to_json(tree)?)?;
    debug!(file = %path.display(), "Wrote simulation file");
    Ok(())
}

fn root_of(tree: &ModelTree) -> AgsimResult<NodeId> {
    tree.root()
        .ok_or_else(|| AgsimError::Error("Simulation tree is empty".to_string()))
}

fn rebase_file_references(tree: &mut ModelTree, root: NodeId, directory: &Path) -> AgsimResult<()> {
    let ids: Vec<NodeId> = tree.subtree(root).collect();
    for id in ids {
        for reference in tree.model_mut(id)?.file_references() {
            if reference.is_relative() && !reference.as_os_str().is_empty() {
                *reference = directory.join(&*reference);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::model::Zone;
    use crate::simulation::{Factor, Simulation};
    use crate::value::VariableValue;
    use chrono::NaiveDate;

    const FILE: &str = r#"{
      "Name": "Simulations",
      "Model": { "$type": "Simulations" },
      "Children": [
        {
          "Name": "Sim",
          "Model": { "$type": "Simulation" },
          "Children": [
            {
              "Name": "Clock",
              "Model": { "$type": "Clock", "StartDate": "2000-01-01", "EndDate": "2000-01-31" }
            },
            { "Name": "Field", "Model": { "$type": "Zone", "Area": 12.5 } }
          ]
        }
      ]
    }"#;

    #[test]
    fn parses_a_simulation_file() {
        let tree = from_json(FILE, "test.json").unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.len(), 4);
        let sim = tree.find_by_path_as::<Simulation>(root, ".Simulations.Sim").unwrap();
        let clock = tree.find_by_path_as::<Clock>(sim, "Clock").unwrap();
        assert_eq!(
            tree.get::<Clock>(clock).unwrap().end_date,
            NaiveDate::from_ymd_opt(2000, 1, 31).unwrap()
        );
        assert_eq!(
            tree.get_variable(sim, "[Field].Area").unwrap(),
            VariableValue::Number(12.5)
        );
    }

    const EXPERIMENT: &str = r#"{
      "Name": "Simulations",
      "Model": { "$type": "Simulations" },
      "Children": [
        {
          "Name": "Replacements",
          "Model": { "$type": "Replacements" },
          "Children": [{ "Name": "Field", "Model": { "$type": "Zone", "Area": 3.25 } }]
        },
        {
          "Name": "Sowing",
          "Model": { "$type": "Experiment" },
          "Children": [
            {
              "Name": "Factors",
              "Model": { "$type": "Factors" },
              "Children": [
                { "Name": "Area", "Model": { "$type": "Factor", "Specification": "[Field].Area = 1, 2.5" } },
                { "Name": "End", "Model": { "$type": "Factor", "Specification": "[Clock].EndDate = 2000-02-01, 2000-03-01" } }
              ]
            },
            {
              "Name": "Base",
              "Model": { "$type": "Simulation" },
              "Children": [
                {
                  "Name": "Clock",
                  "Model": { "$type": "Clock", "StartDate": "2000-01-01", "EndDate": "2000-01-31" }
                },
                {
                  "Name": "Paddocks",
                  "Model": { "$type": "Folder" },
                  "Children": [{ "Name": "Field", "Model": { "$type": "Zone", "Area": 12.5 } }]
                }
              ]
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn round_trips_through_json() {
        for (text, name) in [(FILE, "test.json"), (EXPERIMENT, "experiment.json")] {
            let tree = from_json(text, name).unwrap();
            let first = to_json(&tree).unwrap();
            let again = from_json(&first, "again.json").unwrap();
            let second = to_json(&again).unwrap();

            assert_eq!(again.len(), tree.len());
            let first: serde_json::Value = serde_json::from_str(&first).unwrap();
            let second: serde_json::Value = serde_json::from_str(&second).unwrap();
            assert_eq!(first, second, "{}", name);
        }

        let tree = from_json(EXPERIMENT, "experiment.json").unwrap();
        let again = from_json(&to_json(&tree).unwrap(), "again.json").unwrap();
        let root = again.root().unwrap();
        let end = again.find_by_path(root, ".Simulations.Sowing.Factors.End").unwrap();
        assert_eq!(
            again.get::<Factor>(end).unwrap().specification,
            "[Clock].EndDate = 2000-02-01, 2000-03-01"
        );
        let field = again.find_by_path(root, ".Simulations.Sowing.Base.Paddocks.Field").unwrap();
        assert_eq!(again.get::<Zone>(field).unwrap().area, 12.5);
    }

    #[test]
    fn rejects_malformed_and_non_container_roots() {
        let err = from_json("{ \"Name\": ", "broken.json").unwrap_err();
        assert!(matches!(err, AgsimError::Structural { ref source_name, .. } if source_name == "broken.json"));

        let err = from_json(
            r#"{ "Name": "Field", "Model": { "$type": "Zone" } }"#,
            "zone.json",
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected Simulations"));

        let err = from_json(
            r#"{ "Name": "S", "Model": { "$type": "NoSuchModel" } }"#,
            "unknown.json",
        )
        .unwrap_err();
        assert!(matches!(err, AgsimError::Structural { .. }));
    }

    #[test]
    fn read_and_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sims.json");
        write(&from_json(FILE, "test.json").unwrap(), &path).unwrap();

        let tree = read(&path).unwrap();
        let root = tree.root().unwrap();
        let file_name = tree.get::<Simulations>(root).unwrap().file_name.clone();
        assert_eq!(file_name.unwrap().file_name().unwrap(), "sims.json");
        assert!(tree.is::<Zone>(tree.find_by_path(root, "[Field]").unwrap()));

        assert!(matches!(
            read(dir.path().join("missing.json")),
            Err(AgsimError::Io(_))
        ));
    }
}
