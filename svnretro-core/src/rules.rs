//! In-memory form of the YAML ruleset that drives the transformer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_creation_revision() -> i64 {
    1
}

/// One `strip-props` entry: remove the listed property keys from every node
/// whose path matches `files`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripPropsRule {
    pub files: String,
    pub props: Vec<String>,
}

/// Layout names the rules associate with the conventional trunk/branches/tags
/// roles. Informational only — nothing in the transformer branches on it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Convention {
    pub trunk: Option<String>,
    pub branches: Option<String>,
    pub tags: Option<String>,
}

/// Reserved for a future rewrite of branch-point history; parsed and stored
/// but not acted on until its semantics are pinned down.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Overfork {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rules {
    #[serde(rename = "retrofit-paths", default)]
    pub retrofit_paths: Vec<String>,

    #[serde(rename = "creation-revision", default = "default_creation_revision")]
    pub creation_revision: i64,

    #[serde(default)]
    pub filter: Vec<String>,

    #[serde(default)]
    pub replace: BTreeMap<String, String>,

    #[serde(rename = "strip-props", default)]
    pub strip_props: Vec<StripPropsRule>,

    #[serde(rename = "retrofit-props", default)]
    pub retrofit_props: Vec<String>,

    #[serde(default)]
    pub convention: Convention,

    #[serde(default)]
    pub overfork: Vec<Overfork>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            retrofit_paths: Vec::new(),
            creation_revision: default_creation_revision(),
            filter: Vec::new(),
            replace: BTreeMap::new(),
            strip_props: Vec::new(),
            retrofit_props: Vec::new(),
            convention: Convention::default(),
            overfork: Vec::new(),
        }
    }
}

impl Rules {
    pub fn is_empty(&self) -> bool {
        self.retrofit_paths.is_empty()
            && self.filter.is_empty()
            && self.replace.is_empty()
            && self.strip_props.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The engine itself never touches YAML (that's the CLI's job); these
    // tests just pin the schema `serde` derives against real documents.
    fn parse(src: &str) -> Rules {
        serde_yaml::from_str(src).unwrap()
    }

    #[test]
    fn default_creation_revision_is_one() {
        let rules = parse("retrofit-paths: [/a]\n");
        assert_eq!(rules.creation_revision, 1);
    }

    #[test]
    fn parses_full_ruleset() {
        let yaml = r#"
retrofit-paths: ["/Project/Trunk", "/Project/Branches"]
creation-revision: 1
filter: ["/bad"]
replace:
  /old: /new
strip-props:
  - files: ".*\\.bin$"
    props: ["svn:mime-type"]
retrofit-props: ["svn:mergeinfo"]
convention:
  trunk: Trunk
  branches: Branches
  tags: Tags
overfork:
  - from: /a
    to: /b
"#;
        let rules = parse(yaml);
        assert_eq!(rules.retrofit_paths.len(), 2);
        assert_eq!(rules.replace.get("/old").unwrap(), "/new");
        assert_eq!(rules.strip_props[0].props[0], "svn:mime-type");
        assert_eq!(rules.convention.trunk.as_deref(), Some("Trunk"));
        assert_eq!(rules.overfork[0].from, "/a");
    }

    #[test]
    fn empty_document_yields_defaults() {
        let rules = parse("{}\n");
        assert!(rules.is_empty());
        assert_eq!(rules.creation_revision, 1);
    }
}
