//! Applies a `Rules` value to a loaded `Repos`: per-revision prefix
//! replacement, filtering and property stripping, then the whole-repository
//! retrofit pass.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::node::{Node, NodeAction, NodeKind};
use crate::repos::Repos;
use crate::revision::Revision;
use crate::rules::Rules;
use crate::tree::{match_path_prefix, replace_path_prefix, NodeRef, Tree};

/// First- and last-seen creation revision of a folder or branch, mirroring
/// the original tool's analysis-report shape.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FirstLast {
    pub first: i64,
    pub last: i64,
}

/// Summary of what a transform pass actually did, for `-report` emission by
/// the CLI (which owns turning this into YAML).
#[derive(Debug, Default, Clone, Serialize)]
pub struct TransformReport {
    pub nodes_filtered: usize,
    pub nodes_prop_stripped: usize,
    pub paths_retrofitted: Vec<String>,
    pub branches_refit: usize,
    /// Plain folder creations (no copy-from ancestry), path -> first/last add revision.
    pub folder_creations: BTreeMap<String, FirstLast>,
    /// Branch creations (with copy-from ancestry), path -> first/last add revision.
    pub branch_creations: BTreeMap<String, FirstLast>,
}

/// First-seen/last-seen revision of every `add dir` node, split by whether
/// it carried copy-from ancestry. Built once across the whole repository
/// consulted by the retrofit pass.
#[derive(Debug, Default)]
struct CreationMaps {
    folder_news: HashMap<String, i64>,
    folder_adds: HashMap<String, i64>,
    branch_news: HashMap<String, i64>,
    branch_adds: HashMap<String, i64>,
}

impl CreationMaps {
    fn record(&mut self, revision: &Revision) {
        for node in &revision.nodes {
            if node.action != NodeAction::Add || node.kind != Some(NodeKind::Dir) {
                continue;
            }
            let path = node.path().to_string();
            if node.ancestry.is_some() {
                self.branch_news
                    .entry(path.clone())
                    .or_insert(revision.number);
                self.branch_adds.insert(path, revision.number);
            } else {
                self.folder_news
                    .entry(path.clone())
                    .or_insert(revision.number);
                self.folder_adds.insert(path, revision.number);
            }
        }
    }
}

pub struct Transformer<'a> {
    rules: &'a Rules,
    strip_props: Vec<(Regex, &'a [String])>,
}

impl<'a> Transformer<'a> {
    pub fn new(rules: &'a Rules) -> Self {
        let strip_props = rules
            .strip_props
            .iter()
            .map(|rule| {
                let re = Regex::new(&rule.files)
                    .unwrap_or_else(|e| panic!("invalid files regexp {:?}: {e}", rule.files));
                (re, rule.props.as_slice())
            })
            .collect();
        Self { rules, strip_props }
    }

    /// Runs the full pipeline: per-revision passes over every revision, then
    /// the whole-repository retrofit pass.
    pub fn transform(&self, repos: &mut Repos) -> TransformReport {
        let mut report = TransformReport::default();
        let mut maps = CreationMaps::default();

        for revision in repos.revisions.iter_mut() {
            self.replace_paths(revision);
            maps.record(revision);
            report.nodes_filtered += self.filter(revision);
            report.nodes_prop_stripped += self.strip_props(revision);
        }

        if !self.rules.retrofit_paths.is_empty() {
            self.retrofit(repos, &maps, &mut report);
        }

        for (path, &first) in &maps.folder_news {
            let last = maps.folder_adds.get(path).copied().unwrap_or(first);
            report
                .folder_creations
                .insert(path.clone(), FirstLast { first, last });
        }
        for (path, &first) in &maps.branch_news {
            let last = maps.branch_adds.get(path).copied().unwrap_or(first);
            report
                .branch_creations
                .insert(path.clone(), FirstLast { first, last });
        }

        report
    }

    /// Rewrites `Node-path`/`Node-copyfrom-path` and substring-rewrite
    /// property values, for every configured `prefix -> replacement`.
    fn replace_paths(&self, revision: &mut Revision) {
        if self.rules.replace.is_empty() {
            return;
        }

        revision.properties.apply_replacements(&self.rules.replace);

        let mut dead = Vec::new();
        for (idx, node) in revision.nodes.iter_mut().enumerate() {
            node.properties.apply_replacements(&self.rules.replace);

            let original_path = node.path().to_string();
            let mut new_path = original_path.clone();
            for (prefix, replacement) in &self.rules.replace {
                new_path = replace_path_prefix(&new_path, prefix, replacement);
            }
            if new_path == original_path {
                continue;
            }

            if new_path.is_empty() || new_path == "/" {
                if self.root_operation(node, &original_path, &new_path) {
                    dead.push(idx);
                }
                continue;
            }

            node.set_path(&new_path);

            if let Some(copyfrom) = node.copyfrom_path().map(str::to_string) {
                let mut new_copy = copyfrom.clone();
                for (prefix, replacement) in &self.rules.replace {
                    new_copy = replace_path_prefix(&new_copy, prefix, replacement);
                }
                if new_copy != copyfrom {
                    node.set_copyfrom_path(&new_copy);
                }
            }
        }

        for idx in dead.into_iter().rev() {
            revision.nodes.remove(idx);
        }
    }

    /// Handles a replace rule collapsing a node's path to the repository
    /// root. Returns `true` if the node should be dropped from the revision.
    fn root_operation(&self, node: &mut Node, original_path: &str, new_path: &str) -> bool {
        match node.action {
            NodeAction::Delete | NodeAction::Replace => {
                panic!(
                    "replace rule would {} the repository root (node was {original_path})",
                    node.action.as_wire()
                );
            }
            NodeAction::Add if node.ancestry.is_none() => true,
            NodeAction::Change if node.ancestry.is_none() => true,
            NodeAction::Add | NodeAction::Change => {
                let ancestry_path = node.ancestry.as_ref().unwrap().path.clone();
                if !ancestry_path.is_empty() {
                    panic!(
                        "replace rule would root node {original_path} whose ancestry {ancestry_path} is not itself root"
                    );
                }
                node.set_path(new_path);
                false
            }
        }
    }

    /// Drops nodes under a filtered prefix; fail hard if a surviving
    /// node's ancestry points into filtered-out history.
    fn filter(&self, revision: &mut Revision) -> usize {
        if self.rules.filter.is_empty() {
            return 0;
        }

        let before = revision.nodes.len();
        revision.nodes.retain(|node| {
            !self
                .rules
                .filter
                .iter()
                .any(|p| match_path_prefix(node.path(), p))
        });
        let removed = before - revision.nodes.len();

        for node in &revision.nodes {
            if let Some(ancestry) = &node.ancestry {
                if self
                    .rules
                    .filter
                    .iter()
                    .any(|p| match_path_prefix(&ancestry.path, p))
                {
                    panic!(
                        "filtering would break history: {} copies from filtered path {}",
                        node.path(),
                        ancestry.path
                    );
                }
            }
        }

        removed
    }

    /// Removes configured property keys from nodes matching a rule's
    /// file regexp.
    fn strip_props(&self, revision: &mut Revision) -> usize {
        let mut stripped = 0;
        for (re, props) in &self.strip_props {
            for node in revision.nodes.iter_mut() {
                if !re.is_match(node.path()) {
                    continue;
                }
                let mut touched = false;
                for key in *props {
                    if node.properties.remove(key).is_some() {
                        touched = true;
                    }
                }
                if touched {
                    stripped += 1;
                }
            }
        }
        stripped
    }

    fn build_tree(repos: &Repos) -> Tree {
        let mut tree = Tree::new();
        for revision in repos.revisions.iter().filter(|r| r.number >= 1) {
            for node in &revision.nodes {
                if let Err(e) = tree.insert(NodeRef::from(node)) {
                    panic!("inconsistent repository history while building path tree: {e}");
                }
            }
        }
        tree
    }

    /// Whole-repository pass: pulls each retrofit path's creation back to
    /// `creation-revision`, then rewrites history for any branch whose
    /// ancestry crosses in from outside the retrofit root.
    fn retrofit(&self, repos: &mut Repos, maps: &CreationMaps, report: &mut TransformReport) {
        let tree = Self::build_tree(repos);

        for rp in &self.rules.retrofit_paths {
            let (_, found) = tree.lookup(rp);
            if !found {
                info!(path = %rp, "retrofit path not present in repository, skipping");
                continue;
            }

            let has_explicit_creation =
                maps.folder_news.contains_key(rp) || maps.branch_news.contains_key(rp);
            if !has_explicit_creation {
                panic!(
                    "retrofit path {rp} exists only as an inherited path, not an originally-created folder"
                );
            }

            match maps.folder_news.get(rp) {
                Some(&created_rev) if created_rev > self.rules.creation_revision => {
                    self.relocate_creation(repos, rp, created_rev, self.rules.creation_revision);
                    report.paths_retrofitted.push(rp.clone());
                }
                Some(&created_rev) => {
                    info!(
                        path = %rp, at = created_rev, target = self.rules.creation_revision,
                        "retrofit path already created at or before target revision, nothing to do"
                    );
                }
                None => {
                    info!(path = %rp, "retrofit path has no plain folder creation; left for refit-branch pass");
                }
            }
        }

        report.branches_refit = self.refit_branches(repos);
    }

    fn relocate_creation(&self, repos: &mut Repos, path: &str, from_rev: i64, to_rev: i64) {
        let from_nodes = &mut repos.revisions[from_rev as usize].nodes;
        let node_idx = from_nodes
            .iter()
            .position(|n| {
                n.path() == path
                    && n.action == NodeAction::Add
                    && n.kind == Some(NodeKind::Dir)
                    && n.ancestry.is_none()
            })
            .unwrap_or_else(|| panic!("creation map pointed at a node no longer present: {path}"));
        let node = from_nodes.remove(node_idx);

        let target_nodes = &mut repos.revisions[to_rev as usize].nodes;
        let insert_at = target_nodes.partition_point(|n| n.path() < node.path());
        if target_nodes.get(insert_at).map(|n| n.path()) == Some(node.path()) {
            panic!(
                "retrofit creation of {path} would duplicate an existing node at revision {to_rev}"
            );
        }
        target_nodes.insert(insert_at, node);
    }

    /// Finds every node whose path is under a retrofit root but whose
    /// copy-from ancestry is not, and rewrites history so the old path
    /// retroactively becomes the new one.
    fn refit_branches(&self, repos: &mut Repos) -> usize {
        let mut candidates: Vec<(i64, String, String)> = Vec::new();
        for revision in &repos.revisions {
            for node in &revision.nodes {
                let Some(ancestry) = &node.ancestry else {
                    continue;
                };
                let path = node.path();
                let under_root = self
                    .rules
                    .retrofit_paths
                    .iter()
                    .any(|rp| match_path_prefix(path, rp));
                if !under_root {
                    continue;
                }
                let ancestry_under_root = self
                    .rules
                    .retrofit_paths
                    .iter()
                    .any(|rp| match_path_prefix(&ancestry.path, rp));
                if ancestry_under_root {
                    continue;
                }
                candidates.push((revision.number, ancestry.path.clone(), path.to_string()));
            }
        }

        for (node_rev, old, new) in &candidates {
            self.refit_one_branch(repos, *node_rev, old, new);
        }
        candidates.len()
    }

    fn refit_one_branch(&self, repos: &mut Repos, node_rev: i64, old: &str, new: &str) {
        for rev in (0..node_rev).rev() {
            let revision = &mut repos.revisions[rev as usize];
            if self.walk_step_backward(revision, old, new) {
                break;
            }
        }

        repos.revisions[node_rev as usize]
            .nodes
            .retain(|n| !(n.path() == new && n.ancestry.as_ref().is_some_and(|a| a.path == old)));

        for rev in node_rev..=repos.head() {
            let revision = &mut repos.revisions[rev as usize];
            if self.walk_step_forward(revision, old, new) {
                break;
            }
        }
    }

    fn walk_step_backward(&self, revision: &mut Revision, old: &str, new: &str) -> bool {
        let stop = revision.nodes.iter().any(|n| {
            n.kind == Some(NodeKind::Dir) && n.action == NodeAction::Add && n.path() == old
        });
        self.replace_all(revision, old, new);
        stop
    }

    fn walk_step_forward(&self, revision: &mut Revision, old: &str, new: &str) -> bool {
        let stop = revision
            .nodes
            .iter()
            .any(|n| n.action == NodeAction::Delete && n.path() == old);
        if stop {
            // The closing delete of the old path is removed outright, not
            // rewritten — a rewrite would leave the just-retrofitted branch
            // deleted out from under it.
            revision
                .nodes
                .retain(|n| !(n.action == NodeAction::Delete && n.path() == old));
        }
        self.replace_all(revision, old, new);
        stop
    }

    /// Path-component-prefix rewrite of every node's path, copy-from path,
    /// and `retrofit-props` property values within one revision.
    fn replace_all(&self, revision: &mut Revision, old: &str, new: &str) {
        for node in revision.nodes.iter_mut() {
            let path = node.path().to_string();
            if match_path_prefix(&path, old) {
                node.set_path(&replace_path_prefix(&path, old, new));
            }
            if let Some(copy) = node.copyfrom_path().map(str::to_string) {
                if match_path_prefix(&copy, old) {
                    node.set_copyfrom_path(&replace_path_prefix(&copy, old, new));
                }
            }
            if !self.rules.retrofit_props.is_empty() {
                node.properties
                    .replace_substring_in_keys(&self.rules.retrofit_props, old, new);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dumpfile::DumpFile;

    fn repos_from(dumps: &[&[u8]]) -> Repos {
        let mut repos = Repos::new();
        for (i, d) in dumps.iter().enumerate() {
            let df = DumpFile::from_vec(format!("{i}.dump"), d.to_vec()).unwrap();
            repos.add(df).unwrap();
        }
        repos
    }

    fn rev(n: i64, nodes: &str) -> Vec<u8> {
        let mut out = format!(
            "Revision-number: {n}\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\n"
        )
        .into_bytes();
        out.extend_from_slice(nodes.as_bytes());
        out
    }

    fn preamble() -> Vec<u8> {
        b"SVN-fs-dump-format-version: 3\n\nUUID: u\n\n".to_vec()
    }

    #[test]
    fn replace_rewrites_path_component_prefix_only() {
        let mut src = preamble();
        src.extend(rev(0, ""));
        src.extend(rev(
            1,
            "Node-path: /a\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.replace.insert("/a".to_string(), "/x".to_string());
        let transformer = Transformer::new(&rules);
        transformer.transform(&mut repos);

        assert_eq!(repos.revisions[1].nodes[0].path(), "/x");
    }

    #[test]
    fn filter_removes_matching_nodes() {
        let mut src = preamble();
        src.extend(rev(0, ""));
        src.extend(rev(
            1,
            "Node-path: /bad/y\nNode-kind: file\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.filter.push("/bad".to_string());
        let transformer = Transformer::new(&rules);
        let report = transformer.transform(&mut repos);

        assert!(repos.revisions[1].nodes.is_empty());
        assert_eq!(report.nodes_filtered, 1);
    }

    #[test]
    #[should_panic(expected = "would break history")]
    fn filter_breaking_ancestry_panics() {
        let mut src = preamble();
        src.extend(rev(0, ""));
        src.extend(rev(
            1,
            "Node-path: /bad/y\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        src.extend(rev(
            2,
            "Node-path: /new\nNode-kind: dir\nNode-action: add\nNode-copyfrom-rev: 1\nNode-copyfrom-path: /bad/y\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.filter.push("/bad".to_string());
        Transformer::new(&rules).transform(&mut repos);
    }

    #[test]
    fn retrofit_pulls_plain_creation_back() {
        let mut src = preamble();
        for n in 0..6 {
            src.extend(rev(n, ""));
        }
        src.extend(rev(
            6,
            "Node-path: /Project\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        src.extend(rev(
            7,
            "Node-path: /Project/Trunk\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.retrofit_paths.push("/Project/Trunk".to_string());
        rules.creation_revision = 1;
        let transformer = Transformer::new(&rules);
        let report = transformer.transform(&mut repos);

        assert!(repos.revisions[7].nodes.is_empty());
        assert_eq!(repos.revisions[1].nodes[0].path(), "/Project/Trunk");
        assert_eq!(report.paths_retrofitted, vec!["/Project/Trunk".to_string()]);
    }

    #[test]
    fn refit_branch_rewrites_history_and_removes_copy_node() {
        let mut src = preamble();
        src.extend(rev(0, ""));
        src.extend(rev(
            1,
            "Node-path: /Trunk\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        for n in 2..9 {
            src.extend(rev(n, ""));
        }
        src.extend(rev(
            9,
            "Node-path: /Trunk/file\nNode-kind: file\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        src.extend(rev(
            10,
            "Node-path: /Project\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\nNode-path: /Project/Trunk\nNode-kind: dir\nNode-action: add\nNode-copyfrom-rev: 9\nNode-copyfrom-path: /Trunk\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.retrofit_paths.push("/Project/Trunk".to_string());
        let transformer = Transformer::new(&rules);
        let report = transformer.transform(&mut repos);

        assert_eq!(report.branches_refit, 1);
        assert_eq!(repos.revisions[10].nodes.len(), 1);
        assert_eq!(repos.revisions[10].nodes[0].path(), "/Project");
        assert_eq!(repos.revisions[1].nodes[0].path(), "/Project/Trunk");
        assert_eq!(repos.revisions[9].nodes[0].path(), "/Project/Trunk/file");
    }

    #[test]
    fn refit_branch_move_removes_closing_delete_instead_of_rewriting_it() {
        let mut src = preamble();
        src.extend(rev(0, ""));
        src.extend(rev(
            1,
            "Node-path: /Trunk\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n",
        ));
        for n in 2..9 {
            src.extend(rev(n, ""));
        }
        src.extend(rev(
            9,
            "Node-path: /Project\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\nNode-path: /Project/Trunk\nNode-kind: dir\nNode-action: add\nNode-copyfrom-rev: 8\nNode-copyfrom-path: /Trunk\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\nNode-path: /Trunk\nNode-action: delete\n\n",
        ));
        let mut repos = repos_from(&[&src]);

        let mut rules = Rules::default();
        rules.retrofit_paths.push("/Project/Trunk".to_string());
        let transformer = Transformer::new(&rules);
        let report = transformer.transform(&mut repos);

        assert_eq!(report.branches_refit, 1);
        // The copy node is gone (retrofit's root-creation removal) and the
        // closing `delete dir /Trunk` is gone too (forward-walk removal),
        // not rewritten into a delete of the just-retrofitted branch.
        assert_eq!(repos.revisions[9].nodes.len(), 1);
        assert_eq!(repos.revisions[9].nodes[0].path(), "/Project");
        assert!(repos.revisions[9]
            .nodes
            .iter()
            .all(|n| n.action != NodeAction::Delete));
        assert_eq!(repos.revisions[1].nodes[0].path(), "/Project/Trunk");
    }
}
