//! The document model (spec.md §3): resources, structs, functions, nodes.
//!
//! Deserialized with `serde` the way the teacher's `config.rs`/`v1.rs`
//! deserialize a gauge-layout document with `#[derive(Deserialize)]`
//! structs, generalized here to the IR document schema. Unknown fields on a
//! node are preserved via `#[serde(flatten)]` into `extra`, per spec.md §6
//! ("Unknown fields on nodes are preserved").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Buffer,
    Texture2d,
    AtomicCounter,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    Clamp,
    Repeat,
    Mirror,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Sampler {
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Persistence {
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub clear_every_frame: bool,
    #[serde(default)]
    pub clear_on_resize: bool,
    #[serde(default)]
    pub cpu_access: bool,
}

/// A resource's fixed or viewport-tracking size (spec.md §3): a bare number,
/// a `[w, h]` pair, or the string `"viewport"` meaning it tracks the output
/// viewport size. Parsed from whichever shape appears in the document.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum ResourceSize {
    Fixed(u32),
    Fixed2(u32, u32),
    TracksViewport,
}

impl<'de> Deserialize<'de> for ResourceSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Json::deserialize(deserializer)?;
        match raw {
            Json::Number(n) => {
                let v = n.as_u64().ok_or_else(|| serde::de::Error::custom("resource size must be a non-negative integer"))?;
                Ok(ResourceSize::Fixed(v as u32))
            }
            Json::Array(items) if items.len() == 2 => {
                let w = items[0].as_u64().ok_or_else(|| serde::de::Error::custom("resource size width must be an integer"))?;
                let h = items[1].as_u64().ok_or_else(|| serde::de::Error::custom("resource size height must be an integer"))?;
                Ok(ResourceSize::Fixed2(w as u32, h as u32))
            }
            Json::String(s) if s == "viewport" => Ok(ResourceSize::TracksViewport),
            other => Err(serde::de::Error::custom(format!("invalid resource size: {other}"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    /// Element type for buffer/atomic; required for those kinds (checked by
    /// the structural validator, not serde — a document that omits it is a
    /// structural error with a precise message, not a silent default).
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    pub size: ResourceSize,
    #[serde(default)]
    pub persistence: Persistence,
    #[serde(default)]
    pub clear_value: Option<Json>,
    #[serde(default)]
    pub sampler: Option<Sampler>,
    #[serde(default)]
    pub is_output: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StructMember {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub builtin: Option<String>,
    #[serde(default)]
    pub location: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StructDef {
    pub id: String,
    pub members: Vec<StructMember>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Cpu,
    Shader,
    Vertex,
    Fragment,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalVar {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub initial_value: Option<Json>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A node in a function's graph (spec.md §3). `op` selects the registry
/// entry; `args` carries the op-specific argument fields as raw JSON (the
/// validator interprets them against the op's `ArgDescriptor`s); the
/// `exec_*`/`next` fields are execution-flow references, kept separate from
/// `args` because they have document-wide invariants (must name a node in
/// the same function) the generic arg machinery doesn't enforce.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub op: String,
    #[serde(default)]
    pub exec_in: Option<String>,
    #[serde(default)]
    pub exec_out: Option<String>,
    #[serde(default)]
    pub exec_true: Option<String>,
    #[serde(default)]
    pub exec_false: Option<String>,
    #[serde(default)]
    pub exec_body: Option<String>,
    #[serde(default)]
    pub exec_completed: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Op-specific argument fields, preserved verbatim including any fields
    /// the op schema does not know about.
    #[serde(flatten)]
    pub args: HashMap<String, Json>,
}

impl Node {
    /// Every `exec_*`/`next` field that is actually set, in a stable order,
    /// used by the validator to check that execution references resolve.
    pub fn exec_targets(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = &self.exec_out {
            out.push(("exec_out", v.as_str()));
        }
        if let Some(v) = &self.exec_true {
            out.push(("exec_true", v.as_str()));
        }
        if let Some(v) = &self.exec_false {
            out.push(("exec_false", v.as_str()));
        }
        if let Some(v) = &self.exec_body {
            out.push(("exec_body", v.as_str()));
        }
        if let Some(v) = &self.exec_completed {
            out.push(("exec_completed", v.as_str()));
        }
        if let Some(v) = &self.next {
            out.push(("next", v.as_str()));
        }
        out
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub id: String,
    pub kind: FunctionKind,
    #[serde(default)]
    pub inputs: Vec<Param>,
    #[serde(default)]
    pub outputs: Vec<Param>,
    /// Declared GPU workgroup size for `shader` functions (spec.md §3). Not
    /// to be confused with a dispatch's thread count, which is a per-node
    /// argument on `cmd_dispatch` normalized by `edges::canonicalize` (spec.md
    /// §9 Open Question: `threads`/`dispatch`/inferred dims all mean the
    /// same thing at different document vintages).
    #[serde(default)]
    pub workgroup_size: Option<[u32; 3]>,
    #[serde(default)]
    pub local_vars: Vec<LocalVar>,
    pub nodes: Vec<Node>,
}

impl Function {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The node execution starts at: the first node reachable via `exec_in`,
    /// or, absent that, the first top-level node without a predecessor
    /// (spec.md §4.4). A node has a predecessor either because some other
    /// node's `exec_out`/`exec_true`/`exec_false`/`exec_body`/`exec_completed`/
    /// `next` names it, or because it names its own predecessor via its own
    /// `exec_in` — the two are redundant encodings of the same edge, and a
    /// document is free to declare it from either end. Pure data nodes (a
    /// `var_get`-style reference merely resolves lazily) are excluded from
    /// candidacy entirely: they participate only via data edges, so one
    /// declared before the real entry in document order must never be
    /// mistaken for it.
    pub fn entry_node(&self) -> Option<&Node> {
        let mut has_incoming: HashMap<&str, bool> = self.nodes.iter().map(|n| (n.id.as_str(), false)).collect();
        for n in &self.nodes {
            for (_, target) in n.exec_targets() {
                has_incoming.insert(target, true);
            }
            if n.exec_in.is_some() {
                has_incoming.insert(n.id.as_str(), true);
            }
        }
        self.nodes
            .iter()
            .find(|n| !crate::ops::is_pure(&n.op) && !has_incoming.get(n.id.as_str()).copied().unwrap_or(false))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub version: String,
    #[serde(default)]
    pub meta: Meta,
    pub entry_point: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    pub functions: Vec<Function>,
}

impl Document {
    pub fn from_json_str(text: &str) -> serde_json::Result<Document> {
        serde_json::from_str(text)
    }

    pub fn function(&self, id: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn struct_def(&self, id: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.id == id)
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.function(&self.entry_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "version": "1",
            "entryPoint": "main",
            "resources": [
                {"id": "b_output", "kind": "buffer", "elementType": "float", "size": 2}
            ],
            "structs": [],
            "functions": [
                {
                    "id": "main",
                    "kind": "cpu",
                    "inputs": [],
                    "outputs": [],
                    "nodes": [
                        {"id": "n0", "op": "cmd_resize_resource", "resource": "b_output", "size": 10}
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn parses_minimal_document() {
        let doc = Document::from_json_str(sample()).unwrap();
        assert_eq!(doc.entry_point, "main");
        assert_eq!(doc.resource("b_output").unwrap().kind, ResourceKind::Buffer);
    }

    #[test]
    fn entry_node_is_the_one_with_no_incoming_exec_edge() {
        let doc = Document::from_json_str(sample()).unwrap();
        let f = doc.function("main").unwrap();
        assert_eq!(f.entry_node().unwrap().id, "n0");
    }

    #[test]
    fn parses_declared_workgroup_size() {
        let json = r#"{
            "id": "shade", "kind": "shader", "inputs": [], "outputs": [],
            "workgroupSize": [8, 1, 1], "nodes": []
        }"#;
        let f: Function = serde_json::from_str(json).unwrap();
        assert_eq!(f.workgroup_size, Some([8, 1, 1]));
    }

    #[test]
    fn node_args_preserve_unknown_fields() {
        let json = r#"{"id": "n1", "op": "cmd_dispatch", "shader": "fill", "dispatch": [10, 1, 1]}"#;
        let n: Node = serde_json::from_str(json).unwrap();
        assert_eq!(n.args.get("dispatch").unwrap(), &serde_json::json!([10, 1, 1]));
    }
}
