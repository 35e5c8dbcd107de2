//! OSCQuery JSON documents
//!
//! Host-info and parameter-tree documents as served by the game client and
//! by our own advertisement server, both at the root URL and disambiguated
//! by the `HOST_INFO` query marker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Host-info document: where the peer receives OSC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "OSC_IP")]
    pub osc_ip: String,
    #[serde(rename = "OSC_PORT")]
    pub osc_port: u16,
    #[serde(rename = "OSC_TRANSPORT")]
    pub osc_transport: String,
    #[serde(rename = "EXTENSIONS", default)]
    pub extensions: HashMap<String, bool>,
}

impl HostInfo {
    pub fn new(name: impl Into<String>, osc_ip: impl Into<String>, osc_port: u16) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert("ACCESS".to_string(), true);
        extensions.insert("VALUE".to_string(), true);
        Self {
            name: name.into(),
            osc_ip: osc_ip.into(),
            osc_port,
            osc_transport: "UDP".to_string(),
            extensions,
        }
    }
}

/// One node of a parameter tree. Containers carry `CONTENTS`, leaves carry
/// `TYPE`/`VALUE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OscQueryNode {
    #[serde(rename = "FULL_PATH", default)]
    pub full_path: String,
    #[serde(rename = "ACCESS", default)]
    pub access: u8,
    #[serde(rename = "CONTENTS", default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<HashMap<String, OscQueryNode>>,
    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(rename = "VALUE", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<serde_json::Value>>,
}

impl OscQueryNode {
    pub fn container(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            access: 0,
            contents: Some(HashMap::new()),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, child: OscQueryNode) -> Self {
        self.contents
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), child);
        self
    }
}

/// Flatten a parameter tree into `full path → first value`.
///
/// Leaves without a value are skipped; the game reports every avatar
/// parameter this way after an avatar load.
pub fn flatten(root: &OscQueryNode) -> HashMap<String, serde_json::Value> {
    let mut out = HashMap::new();
    flatten_into(root, &mut out);
    out
}

fn flatten_into(node: &OscQueryNode, out: &mut HashMap<String, serde_json::Value>) {
    if let Some(values) = &node.value {
        if let Some(first) = values.first() {
            if !node.full_path.is_empty() {
                out.insert(node.full_path.clone(), first.clone());
            }
        }
    }
    if let Some(contents) = &node.contents {
        for child in contents.values() {
            flatten_into(child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_game_style_tree() {
        let doc = json!({
            "FULL_PATH": "/",
            "ACCESS": 0,
            "CONTENTS": {
                "avatar": {
                    "FULL_PATH": "/avatar",
                    "ACCESS": 0,
                    "CONTENTS": {
                        "change": {
                            "FULL_PATH": "/avatar/change",
                            "ACCESS": 3,
                            "TYPE": "s",
                            "VALUE": ["avtr_0000"]
                        },
                        "parameters": {
                            "FULL_PATH": "/avatar/parameters",
                            "ACCESS": 0,
                            "CONTENTS": {
                                "ShockOsc/Leg": {
                                    "FULL_PATH": "/avatar/parameters/ShockOsc/Leg",
                                    "ACCESS": 3,
                                    "TYPE": "F",
                                    "VALUE": [false]
                                }
                            }
                        }
                    }
                }
            }
        });
        let root: OscQueryNode = serde_json::from_value(doc).unwrap();
        let flat = flatten(&root);
        assert_eq!(flat.get("/avatar/change"), Some(&json!("avtr_0000")));
        assert_eq!(
            flat.get("/avatar/parameters/ShockOsc/Leg"),
            Some(&json!(false))
        );
    }

    #[test]
    fn host_info_wire_casing() {
        let info = HostInfo::new("VRChat-Client-Test", "127.0.0.1", 9000);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["OSC_PORT"], 9000);
        assert_eq!(json["OSC_TRANSPORT"], "UDP");
        let back: HostInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.osc_port, 9000);
    }
}
