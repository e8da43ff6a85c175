//! Node definition profile for the host controller.
//!
//! Only categories with at least one configured field get a node definition,
//! and only with the drivers that are configured.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ProfileError;
use crate::mapping::ProfileTables;

const CONTROLLER_NODEDEF: &str = r#"  <nodeDef id="WeatherPoly" nodeType="139" nls="ctl">
    <sts>
      <st id="ST" editor="bool" />
      <st id="GV0" editor="I_VOLTS" />
      <st id="GV1" editor="I_VOLTS" />
    </sts>
    <cmds>
      <sends />
      <accepts>
        <cmd id="DISCOVER" />
        <cmd id="REMOVE_NOTICES_ALL" />
        <cmd id="UPDATE_PROFILE" />
      </accepts>
    </cmds>
  </nodeDef>
"#;

#[derive(Debug, Clone)]
pub struct ProfileWriter {
    dir: PathBuf,
}

impl ProfileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `nodedef/nodedefs.xml` under the profile directory and return
    /// its path.
    pub fn write(&self, tables: &ProfileTables) -> Result<PathBuf, ProfileError> {
        let nodedef_dir = self.dir.join("nodedef");
        fs::create_dir_all(&nodedef_dir).map_err(|source| ProfileError::CreateDir {
            path: nodedef_dir.clone(),
            source,
        })?;

        let path = nodedef_dir.join("nodedefs.xml");
        fs::write(&path, render(tables)).map_err(|source| ProfileError::Write {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), nodes = tables.len(), "profile written");
        Ok(path)
    }
}

/// Render the node definitions document.
pub fn render(tables: &ProfileTables) -> String {
    let mut xml = String::from("<nodeDefs>\n");
    xml.push_str(CONTROLLER_NODEDEF);

    for (category, drivers) in tables {
        if drivers.is_empty() {
            continue;
        }
        // Writing into a String cannot fail.
        let _ = writeln!(
            xml,
            r#"  <nodeDef id="{}" nodeType="139" nls="{}">"#,
            category.nodedef_id(),
            category.nls()
        );
        xml.push_str("    <sts>\n");
        for (driver, editor) in drivers {
            let _ = writeln!(xml, r#"      <st id="{driver}" editor="{editor}" />"#);
        }
        xml.push_str("    </sts>\n");
        xml.push_str("  </nodeDef>\n");
    }

    xml.push_str("</nodeDefs>\n");
    xml
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingTable, SensorCategory};
    use crate::units::UnitSystem;

    fn tables(pairs: &[(&str, &str)], display: UnitSystem) -> ProfileTables {
        MappingTable::build(pairs.iter().copied(), display, UnitSystem::Metric)
            .0
            .profile_tables()
    }

    #[test]
    fn empty_tables_render_controller_only() {
        let xml = render(&ProfileTables::new());
        assert!(xml.starts_with("<nodeDefs>\n"));
        assert!(xml.contains(r#"<nodeDef id="WeatherPoly" nodeType="139" nls="ctl">"#));
        assert!(xml.contains(r#"<cmd id="UPDATE_PROFILE" />"#));
        assert_eq!(xml.matches("<nodeDef ").count(), 1);
        assert!(xml.ends_with("</nodeDefs>\n"));
    }

    #[test]
    fn configured_categories_get_node_definitions() {
        let xml = render(&tables(
            &[
                ("temperature-main", "4"),
                ("temperature-dewpoint", "72"),
                ("rain-daily", "7"),
            ],
            UnitSystem::Us,
        ));

        assert!(xml.contains(r#"<nodeDef id="temperature" nodeType="139" nls="139T">"#));
        assert!(xml.contains(r#"<st id="ST" editor="TEMP_F" />"#));
        assert!(xml.contains(r#"<st id="GV0" editor="TEMP_F" />"#));
        assert!(xml.contains(r#"<nodeDef id="precipitation" nodeType="139" nls="139R">"#));
        assert!(xml.contains(r#"<st id="GV1" editor="I_INCH" />"#));
        assert!(!xml.contains(r#"id="wind""#));
    }

    #[test]
    fn drivers_keep_table_order() {
        let xml = render(&tables(
            &[("wind-gustspeed", "g"), ("wind-windspeed", "w")],
            UnitSystem::Metric,
        ));
        let st = xml.find(r#"<st id="ST" editor="I_KPH" />"#).unwrap();
        let gv1 = xml.find(r#"<st id="GV1" editor="I_KPH" />"#).unwrap();
        assert!(st < gv1);
    }

    #[test]
    fn write_creates_nodedef_directory() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProfileWriter::new(dir.path().join("profile"));

        let mut t = ProfileTables::new();
        t.insert(SensorCategory::Lightning, vec![("ST", "I_STRIKES")]);
        let path = writer.write(&t).unwrap();

        assert_eq!(path, dir.path().join("profile/nodedef/nodedefs.xml"));
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains(r#"nls="139S""#));
        assert!(contents.contains(r#"<st id="ST" editor="I_STRIKES" />"#));
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the profile directory should be.
        let blocker = dir.path().join("profile");
        fs::write(&blocker, "not a directory").unwrap();

        let err = ProfileWriter::new(&blocker)
            .write(&ProfileTables::new())
            .unwrap_err();
        assert!(matches!(err, ProfileError::CreateDir { .. }));
    }
}
