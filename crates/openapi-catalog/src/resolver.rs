//! `OpenAPI` `$ref` resolution.
//!
//! The `openapiv3` crate models references as `ReferenceOr<T>` but does not
//! resolve them. Real-world specs split schemas across files and URLs, so the
//! loader needs transitive resolution before it can publish a self-contained
//! catalog.
//!
//! Resolution is always relative to the document that contains the `$ref`;
//! callers thread the current document id through nested lookups.

use crate::error::{CatalogError, Result};
use openapiv3::{OpenAPI, Parameter, PathItem, ReferenceOr, RequestBody, Schema};
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Identity of one spec document (the root spec or a `$ref` target).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocId {
    Url(Url),
    File(PathBuf),
}

impl DocId {
    /// Parse a spec location string into a document id.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the location is not a valid URL or file URL.
    pub fn parse(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location)
                .map_err(|e| CatalogError::invalid(location, format!("invalid spec URL: {e}")))?;
            Ok(DocId::Url(without_fragment(url)))
        } else if location.starts_with("file://") {
            let url = Url::parse(location)
                .map_err(|e| CatalogError::invalid(location, format!("invalid file URL: {e}")))?;
            let path = url.to_file_path().map_err(|()| {
                CatalogError::invalid(location, "file URL cannot be converted to a path")
            })?;
            Ok(DocId::File(canonical_or_original(path)))
        } else {
            Ok(DocId::File(canonical_or_original(PathBuf::from(location))))
        }
    }

    pub(crate) fn display(&self) -> String {
        match self {
            DocId::Url(u) => u.to_string(),
            DocId::File(p) => p.display().to_string(),
        }
    }
}

fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

fn canonical_or_original(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// Resolves `$ref` nodes against a cache of loaded documents.
#[derive(Debug)]
pub struct RefResolver<'a> {
    root: DocId,
    client: &'a Client,
    docs: RwLock<HashMap<DocId, Arc<Value>>>,
}

impl<'a> RefResolver<'a> {
    /// Create a resolver seeded with the already-parsed root document.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the root spec cannot be re-serialized for
    /// pointer lookups.
    pub fn new(root: DocId, spec: &OpenAPI, client: &'a Client) -> Result<Self> {
        let root_value = serde_json::to_value(spec)
            .map_err(|e| CatalogError::invalid(root.display(), e.to_string()))?;
        let mut docs = HashMap::new();
        docs.insert(root.clone(), Arc::new(root_value));
        Ok(Self {
            root,
            client,
            docs: RwLock::new(docs),
        })
    }

    #[must_use]
    pub fn root(&self) -> &DocId {
        &self.root
    }

    /// Resolve a parameter reference.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the reference chain cannot be resolved.
    pub async fn parameter(
        &self,
        doc: &DocId,
        node: &ReferenceOr<Parameter>,
    ) -> Result<(DocId, Parameter)> {
        self.resolve(doc, node).await
    }

    /// Resolve a request body reference.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the reference chain cannot be resolved.
    pub async fn request_body(
        &self,
        doc: &DocId,
        node: &ReferenceOr<RequestBody>,
    ) -> Result<(DocId, RequestBody)> {
        self.resolve(doc, node).await
    }

    /// Resolve a schema reference.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the reference chain cannot be resolved.
    pub async fn schema(
        &self,
        doc: &DocId,
        node: &ReferenceOr<Schema>,
    ) -> Result<(DocId, Schema)> {
        self.resolve(doc, node).await
    }

    /// Resolve a path item reference.
    ///
    /// # Errors
    ///
    /// Returns `SpecInvalid` if the reference chain cannot be resolved.
    pub async fn path_item(
        &self,
        doc: &DocId,
        node: &ReferenceOr<PathItem>,
    ) -> Result<(DocId, PathItem)> {
        self.resolve(doc, node).await
    }

    async fn resolve<T>(&self, doc: &DocId, node: &ReferenceOr<T>) -> Result<(DocId, T)>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut doc = doc.clone();
        let mut cur: ReferenceOr<T> = node.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok((doc, item)),
                ReferenceOr::Reference { reference } => {
                    let (target, pointer) = split_ref(&doc, &reference)?;
                    let key = ref_key(&target, pointer.as_deref());
                    if !seen.insert(key) {
                        return Err(CatalogError::invalid(
                            doc.display(),
                            format!("cyclic $ref while resolving '{reference}'"),
                        ));
                    }

                    let value = self.select(&target, pointer.as_deref(), &reference).await?;
                    cur = serde_json::from_value(value).map_err(|e| {
                        CatalogError::invalid(
                            target.display(),
                            format!("referenced value '{reference}' has unexpected shape: {e}"),
                        )
                    })?;
                    doc = target;
                }
            }
        }
    }

    async fn select(&self, target: &DocId, pointer: Option<&str>, reference: &str) -> Result<Value> {
        let doc_value = self.load(target).await?;
        match pointer {
            Some(ptr) => doc_value.pointer(ptr).cloned().ok_or_else(|| {
                CatalogError::invalid(
                    target.display(),
                    format!("unresolved $ref '{reference}' (missing pointer '{ptr}')"),
                )
            }),
            None => Ok((*doc_value).clone()),
        }
    }

    async fn load(&self, doc: &DocId) -> Result<Arc<Value>> {
        if let Some(v) = self.docs.read().get(doc).cloned() {
            return Ok(v);
        }

        let content = match doc {
            DocId::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                CatalogError::invalid(
                    self.root.display(),
                    format!("failed to read referenced file {}: {e}", path.display()),
                )
            })?,
            DocId::Url(url) => {
                let resp = self.client.get(url.clone()).send().await.map_err(|e| {
                    CatalogError::invalid(
                        self.root.display(),
                        format!("failed to fetch referenced URL {url}: {e}"),
                    )
                })?;
                resp.text().await.map_err(|e| {
                    CatalogError::invalid(
                        self.root.display(),
                        format!("failed to read referenced URL body: {e}"),
                    )
                })?
            }
        };

        // JSON is a valid subset of YAML, but try JSON first for exact errors.
        let parsed: Value = serde_json::from_str(&content)
            .or_else(|_| serde_yaml::from_str(&content))
            .map_err(|e| {
                CatalogError::invalid(
                    doc.display(),
                    format!("failed to parse referenced document: {e}"),
                )
            })?;

        let parsed = Arc::new(parsed);
        self.docs.write().insert(doc.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

/// Split a `$ref` string into the target document and an optional JSON pointer.
fn split_ref(current: &DocId, reference: &str) -> Result<(DocId, Option<String>)> {
    if let Some(frag) = reference.strip_prefix('#') {
        return Ok((current.clone(), pointer_from_fragment(current, frag)?));
    }

    let (doc_part, frag_part) = match reference.split_once('#') {
        Some((d, f)) => (d, Some(f)),
        None => (reference, None),
    };

    let target = target_doc(current, doc_part)?;
    let pointer = match frag_part {
        Some("") | None => None,
        Some(frag) => pointer_from_fragment(current, frag)?,
    };
    Ok((target, pointer))
}

fn pointer_from_fragment(current: &DocId, frag: &str) -> Result<Option<String>> {
    if frag.is_empty() {
        Ok(None)
    } else if frag.starts_with('/') {
        Ok(Some(frag.to_string()))
    } else {
        Err(CatalogError::invalid(
            current.display(),
            format!("unsupported $ref fragment (expected JSON pointer): #{frag}"),
        ))
    }
}

fn target_doc(current: &DocId, doc_part: &str) -> Result<DocId> {
    if doc_part.is_empty() {
        return Ok(current.clone());
    }

    if doc_part.starts_with("http://") || doc_part.starts_with("https://") {
        let url = Url::parse(doc_part)
            .map_err(|e| CatalogError::invalid(current.display(), format!("bad $ref URL: {e}")))?;
        return Ok(DocId::Url(without_fragment(url)));
    }

    if doc_part.starts_with("file://") {
        let url = Url::parse(doc_part).map_err(|e| {
            CatalogError::invalid(current.display(), format!("bad $ref file URL: {e}"))
        })?;
        let path = url.to_file_path().map_err(|()| {
            CatalogError::invalid(current.display(), "bad $ref file URL (not a path)")
        })?;
        return Ok(DocId::File(canonical_or_original(path)));
    }

    match current {
        DocId::Url(base) => {
            let joined = base.join(doc_part).map_err(|e| {
                CatalogError::invalid(
                    current.display(),
                    format!("cannot resolve relative $ref '{doc_part}': {e}"),
                )
            })?;
            Ok(DocId::Url(without_fragment(joined)))
        }
        DocId::File(base) => {
            let resolved = if Path::new(doc_part).is_absolute() {
                PathBuf::from(doc_part)
            } else {
                base.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(doc_part)
            };
            Ok(DocId::File(canonical_or_original(resolved)))
        }
    }
}

fn ref_key(target: &DocId, pointer: Option<&str>) -> String {
    let mut key = match target {
        DocId::Url(u) => format!("url:{u}"),
        DocId::File(p) => format!("file:{}", p.display()),
    };
    if let Some(ptr) = pointer {
        key.push('#');
        key.push_str(ptr);
    }
    key
}
