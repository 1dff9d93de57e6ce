//! Flat MEGA node lists turned into an id-keyed arena.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use super::api::ApiContext;
use super::crypto::{b64_decode, decrypt_attributes, decrypt_key, nonce_of, unmerge_key, Attributes};
use super::error::ProtocolError;
use super::link::MegaLink;
use crate::action::Context;
use crate::vfs::{VfsError, VfsResult};

/// How the download endpoint addresses a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadId {
    /// A publicly linked file.
    Public(String),
    /// A node inside a shared folder.
    Shared { folder: String, node: String },
}

/// One remote node.
#[derive(Debug, Clone)]
pub struct MegaNode {
    pub node_id: String,
    pub download_id: DownloadId,
    pub is_directory: bool,
    /// Content and attribute key, already unmerged.
    pub key: [u8; 16],
    /// Content nonce; zero for directories.
    pub nonce: [u8; 8],
    pub size: u64,
    /// Seconds since the epoch.
    pub timestamp: Option<u64>,
    pub owner: Option<String>,
    pub attributes: Option<Attributes>,
    /// Child ids, in response order.
    pub children: Vec<String>,
    pub parent: Option<String>,
}

impl MegaNode {
    pub fn name(&self) -> Option<&str> {
        self.attributes.as_ref().and_then(Attributes::name)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.timestamp
            .map(|ts| SystemTime::UNIX_EPOCH + Duration::from_secs(ts))
    }
}

/// Nodes of one link, keyed by node id.
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: HashMap<String, MegaNode>,
    root: String,
}

impl NodeArena {
    /// An arena holding a single file.
    pub fn single(node: MegaNode) -> Self {
        let root = node.node_id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), node);
        Self { nodes, root }
    }

    pub fn get(&self, id: &str) -> Option<&MegaNode> {
        self.nodes.get(id)
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> Option<&MegaNode> {
        self.nodes.get(&self.root)
    }

    /// Children of `id` in response order.
    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a MegaNode> + 'a {
        let ids = self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[]);
        ids.iter().filter_map(|c| self.nodes.get(c))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn str_field<'a>(node: &'a Value, field: &str) -> Option<&'a str> {
    node.get(field).and_then(Value::as_str)
}

/// Unwrap the first `id:key` pair of a node's `k` field.
fn node_key(k: &str, folder_key: &[u8; 16]) -> VfsResult<Vec<u8>> {
    let pair = k.split('/').next().unwrap_or(k);
    let wrapped = pair
        .split_once(':')
        .map(|(_, key)| key)
        .ok_or_else(|| VfsError::decode(format!("node key without id: {k}")))?;
    decrypt_key(folder_key, &b64_decode(wrapped)?)
}

fn attributes_of(node: &Value, key: &[u8; 16]) -> Option<Attributes> {
    let at = b64_decode(str_field(node, "a")?).ok()?;
    decrypt_attributes(key, &at)
}

/// Fetch a shared folder's full listing and rebuild it.
pub async fn load_folder(
    api: &ApiContext,
    ctx: &Context,
    folder_id: &str,
    folder_key: &[u8; 16],
) -> VfsResult<NodeArena> {
    let resp = api
        .request(ctx, &[("n", folder_id)], json!({"a": "f", "c": 1, "ca": 1, "r": 1}))
        .await?;
    let listed = resp
        .get("f")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::malformed("folder listing without nodes"))?;
    debug!(folder = folder_id, nodes = listed.len(), "MEGA folder listing");

    // The container is the node whose id is the first part of its own key.
    let container = listed
        .iter()
        .find(|n| match (str_field(n, "h"), str_field(n, "k")) {
            (Some(h), Some(k)) => k.split(':').next() == Some(h),
            _ => false,
        })
        .ok_or_else(|| ProtocolError::malformed("folder listing without a container node"))?;
    let root_id = str_field(container, "h").unwrap_or_default().to_string();

    let mut nodes: HashMap<String, MegaNode> = HashMap::with_capacity(listed.len());
    for raw in listed {
        let Some(h) = str_field(raw, "h") else {
            warn!("skipping MEGA node without id");
            continue;
        };
        let is_root = h == root_id;
        let material = match str_field(raw, "k").map(|k| node_key(k, folder_key)) {
            Some(Ok(m)) => m,
            Some(Err(e)) if is_root => return Err(e),
            Some(Err(e)) => {
                warn!(node = h, error = %e, "skipping MEGA node with undecodable key");
                continue;
            }
            None => {
                warn!(node = h, "skipping MEGA node without key");
                continue;
            }
        };
        let (key, nonce) = match unmerge_key(&material) {
            Ok(key) => (key, nonce_of(&material)),
            Err(e) if is_root => return Err(e),
            Err(e) => {
                warn!(node = h, error = %e, "skipping MEGA node with bad key length");
                continue;
            }
        };

        let attributes = attributes_of(raw, &key);
        if is_root && attributes.is_none() {
            return Err(VfsError::decode(
                "attributes could not be decrypted with the provided key",
            ));
        }
        trace!(node = h, name = ?attributes.as_ref().and_then(Attributes::name), "MEGA node");

        nodes.insert(
            h.to_string(),
            MegaNode {
                node_id: h.to_string(),
                download_id: DownloadId::Shared {
                    folder: folder_id.to_string(),
                    node: h.to_string(),
                },
                is_directory: raw.get("t").and_then(Value::as_u64) == Some(1),
                key,
                nonce,
                size: raw.get("s").and_then(Value::as_u64).unwrap_or(0),
                timestamp: raw.get("ts").and_then(Value::as_u64),
                owner: str_field(raw, "u").map(str::to_string),
                attributes,
                children: Vec::new(),
                parent: None,
            },
        );
    }

    // Second pass: link by parent id, in response order.
    for raw in listed {
        let (Some(h), Some(p)) = (str_field(raw, "h"), str_field(raw, "p")) else {
            continue;
        };
        if h == root_id || !nodes.contains_key(h) {
            continue;
        }
        if let Some(parent) = nodes.get_mut(p) {
            parent.children.push(h.to_string());
            if let Some(child) = nodes.get_mut(h) {
                child.parent = Some(p.to_string());
            }
        }
    }

    Ok(NodeArena {
        nodes,
        root: root_id,
    })
}

/// Fetch a public file's size and attributes.
pub async fn load_file(api: &ApiContext, ctx: &Context, id: &str, key: &[u8; 32]) -> VfsResult<MegaNode> {
    let resp = api.request(ctx, &[], json!({"a": "g", "p": id})).await?;
    let aes_key = unmerge_key(key)?;
    let attributes = str_field(&resp, "at")
        .and_then(|at| b64_decode(at).ok())
        .and_then(|at| decrypt_attributes(&aes_key, &at));
    if attributes.is_none() {
        return Err(VfsError::decode(
            "attributes could not be decrypted with the provided key",
        ));
    }
    debug!(file = id, size = ?resp.get("s"), "MEGA file metadata");

    Ok(MegaNode {
        node_id: id.to_string(),
        download_id: DownloadId::Public(id.to_string()),
        is_directory: false,
        key: aes_key,
        nonce: nonce_of(key),
        size: resp.get("s").and_then(Value::as_u64).unwrap_or(0),
        timestamp: resp.get("ts").and_then(Value::as_u64),
        owner: None,
        attributes,
        children: Vec::new(),
        parent: None,
    })
}

/// Load whatever `link` points at. Returns the arena and the id of the
/// linked node.
pub async fn load_attributes(api: &ApiContext, ctx: &Context, link: &MegaLink) -> VfsResult<(NodeArena, String)> {
    match link {
        MegaLink::File { id, key } => {
            let node = load_file(api, ctx, id, key).await?;
            let target = node.node_id.clone();
            Ok((NodeArena::single(node), target))
        }
        MegaLink::Folder {
            id,
            key,
            loaded_file,
        } => {
            let arena = load_folder(api, ctx, id, key).await?;
            let target = match loaded_file {
                Some(sub) if arena.get(sub).is_none() => {
                    return Err(VfsError::not_found(format!("node {sub} not found in folder {id}")));
                }
                Some(sub) => sub.clone(),
                None => arena.root_id().to_string(),
            };
            Ok((arena, target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mega::crypto::{b64_encode, encrypt_attributes, encrypt_key};
    use crate::http::testing::{StubHttpClient, StubResponse};
    use std::sync::Arc;

    const CS: &str = "https://g.api.mega.co.nz/cs";
    const FOLDER_KEY: [u8; 16] = [0x11; 16];
    const ROOT_KEY: [u8; 16] = [0x44; 16];

    fn at(key: &[u8; 16], name: &str) -> String {
        b64_encode(&encrypt_attributes(key, &Attributes::named(name)).unwrap())
    }

    fn file_node(h: &str, p: &str, raw_key: [u8; 32], name: &str, size: u64) -> Value {
        let wrapped = encrypt_key(&FOLDER_KEY, &raw_key).unwrap();
        json!({
            "h": h, "p": p, "u": "owner", "t": 0, "s": size, "ts": 1_600_000_000u64,
            "k": format!("ROOT:{}", b64_encode(&wrapped)),
            "a": at(&unmerge_key(&raw_key).unwrap(), name),
        })
    }

    fn dir_node(h: &str, p: &str, raw_key: [u8; 16], name: &str) -> Value {
        let wrapped = encrypt_key(&FOLDER_KEY, &raw_key).unwrap();
        json!({
            "h": h, "p": p, "t": 1, "ts": 1_600_000_000u64,
            "k": format!("ROOT:{}", b64_encode(&wrapped)),
            "a": at(&raw_key, name),
        })
    }

    fn listing() -> Value {
        json!([{ "f": [
            file_node("F2", "D1", [2; 32], "b.txt", 20),
            { "h": "ROOT", "p": "", "t": 1, "ts": 1_500_000_000u64,
              "k": format!("ROOT:{}", b64_encode(&encrypt_key(&FOLDER_KEY, &ROOT_KEY).unwrap())),
              "a": at(&ROOT_KEY, "Shared") },
            dir_node("D1", "ROOT", [3; 16], "sub"),
            file_node("F1", "ROOT", [1; 32], "a.txt", 10),
            { "h": "BAD", "p": "ROOT", "t": 0, "k": "ROOT:%%%", "a": "" },
        ]}])
    }

    fn api(stub: &Arc<StubHttpClient>) -> ApiContext {
        ApiContext::new(stub.clone())
    }

    #[tokio::test]
    async fn test_folder_reconstruction() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_post(CS, StubResponse::ok(listing().to_string()));

        let arena = load_folder(&api(&stub), &Context::new(), "FOLDER", &FOLDER_KEY)
            .await
            .unwrap();
        assert_eq!(arena.root_id(), "ROOT");
        assert_eq!(arena.len(), 4);

        let root = arena.root().unwrap();
        assert_eq!(root.name(), Some("Shared"));
        assert_eq!(root.key, ROOT_KEY);
        assert_eq!(root.nonce, [0u8; 8]);
        let names: Vec<_> = arena.children("ROOT").filter_map(MegaNode::name).collect();
        assert_eq!(names, vec!["sub", "a.txt"]);

        let f2 = arena.get("F2").unwrap();
        assert_eq!(f2.parent.as_deref(), Some("D1"));
        assert_eq!(f2.key, unmerge_key(&[2u8; 32]).unwrap());
        assert_eq!(f2.nonce, [2u8; 8]);
        assert_eq!(f2.size, 20);
        assert_eq!(
            f2.download_id,
            DownloadId::Shared {
                folder: "FOLDER".into(),
                node: "F2".into()
            }
        );
        assert!(arena.get("D1").unwrap().is_directory);

        let req = &stub.requests()[0];
        assert!(req.url.query().unwrap().ends_with("&n=FOLDER"));
        assert_eq!(req.json().unwrap(), json!([{"a": "f", "c": 1, "ca": 1, "r": 1}]));
    }

    #[tokio::test]
    async fn test_bad_attribute_blob_leaves_name_unset() {
        let stub = Arc::new(StubHttpClient::new());
        let mut body = listing();
        body[0]["f"][3]["a"] = json!(at(&[9; 16], "wrong key"));
        stub.on_post(CS, StubResponse::ok(body.to_string()));

        let arena = load_folder(&api(&stub), &Context::new(), "FOLDER", &FOLDER_KEY)
            .await
            .unwrap();
        let f1 = arena.get("F1").unwrap();
        assert!(f1.attributes.is_none());
        assert_eq!(f1.size, 10);
    }

    #[tokio::test]
    async fn test_wrong_folder_key_fails() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_post(CS, StubResponse::ok(listing().to_string()));
        let err = load_folder(&api(&stub), &Context::new(), "FOLDER", &[0x22; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Decode(_)));
    }

    #[tokio::test]
    async fn test_container_key_is_unwrapped_with_share_key() {
        // A root whose attributes are under the share key itself must not load.
        let stub = Arc::new(StubHttpClient::new());
        let mut body = listing();
        body[0]["f"][1]["a"] = json!(at(&FOLDER_KEY, "Shared"));
        stub.on_post(CS, StubResponse::ok(body.to_string()));
        let err = load_folder(&api(&stub), &Context::new(), "FOLDER", &FOLDER_KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Decode(_)));

        let stub = Arc::new(StubHttpClient::new());
        let mut body = listing();
        body[0]["f"][1]["k"] = json!("ROOT:%%%");
        stub.on_post(CS, StubResponse::ok(body.to_string()));
        let err = load_folder(&api(&stub), &Context::new(), "FOLDER", &FOLDER_KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Decode(_)));
    }

    #[tokio::test]
    async fn test_descendant_lookup() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_post(CS, StubResponse::ok(listing().to_string()));
        let link = MegaLink::Folder {
            id: "FOLDER".into(),
            key: FOLDER_KEY,
            loaded_file: Some("F2".into()),
        };
        let (_, target) = load_attributes(&api(&stub), &Context::new(), &link).await.unwrap();
        assert_eq!(target, "F2");

        let missing = MegaLink::Folder {
            id: "FOLDER".into(),
            key: FOLDER_KEY,
            loaded_file: Some("NOPE".into()),
        };
        let err = load_attributes(&api(&stub), &Context::new(), &missing).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_public_file() {
        let stub = Arc::new(StubHttpClient::new());
        let raw = [7u8; 32];
        let blob = at(&unmerge_key(&raw).unwrap(), "movie.mkv");
        stub.on_post(CS, StubResponse::ok(json!([{"s": 1234, "at": blob}]).to_string()));

        let node = load_file(&api(&stub), &Context::new(), "PUB", &raw).await.unwrap();
        assert_eq!(node.name(), Some("movie.mkv"));
        assert_eq!(node.size, 1234);
        assert_eq!(node.nonce, [7u8; 8]);
        assert_eq!(node.download_id, DownloadId::Public("PUB".into()));
        assert_eq!(stub.requests()[0].json().unwrap(), json!([{"a": "g", "p": "PUB"}]));
    }
}
