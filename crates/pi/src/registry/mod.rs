// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's two registry-shaped HTTP servers: the mirror facing local
//! containerd pulls, and the peer server facing other agents.

pub mod mirror;
pub mod peer;

use anyhow::{bail, Context};

/// Header marking a request as already proxied once, to stop mirror loops.
pub const MIRRORED_HEADER: &str = "X-Spegel-Mirrored";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Manifest,
    Blob,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::Blob => "blob",
        }
    }
}

/// A parsed OCI distribution request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceKind,
    /// Registry the client originally pulled from (the `ns` query value).
    pub original_registry: String,
    /// Repository name from the path.
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl Reference {
    /// Parse `/v2/<name>/manifests/<reference>` or `/v2/<name>/blobs/<digest>`.
    pub fn parse(path: &str, original_registry: &str) -> anyhow::Result<Self> {
        let rest = path
            .strip_prefix("/v2/")
            .with_context(|| format!("path {path:?} is not an OCI distribution path"))?;

        let (kind, repository, reference) =
            if let Some((repository, reference)) = rsplit_segment(rest, "/manifests/") {
                (ReferenceKind::Manifest, repository, reference)
            } else if let Some((repository, reference)) = rsplit_segment(rest, "/blobs/") {
                (ReferenceKind::Blob, repository, reference)
            } else {
                bail!("path {path:?} is neither a manifest nor a blob request");
            };

        if repository.is_empty() || reference.is_empty() {
            bail!("path {path:?} has an empty name or reference");
        }

        let (tag, digest) = if reference.contains(':') {
            if !reference.starts_with("sha256:") {
                bail!("unsupported digest algorithm in {reference:?}");
            }
            (String::new(), reference.to_owned())
        } else {
            if kind == ReferenceKind::Blob {
                bail!("blob request {path:?} must carry a digest");
            }
            (reference.to_owned(), String::new())
        };

        Ok(Self {
            kind,
            original_registry: original_registry.to_owned(),
            repository: repository.to_owned(),
            tag,
            digest,
        })
    }

    /// The content key this request maps to: the digest when present,
    /// otherwise the canonical tag reference.
    pub fn key(&self) -> String {
        if !self.digest.is_empty() {
            return self.digest.clone();
        }
        self.tag_name()
    }

    /// `registry/repository:tag` (without the registry when the request did
    /// not carry `ns`).
    pub fn tag_name(&self) -> String {
        if self.original_registry.is_empty() {
            format!("{}:{}", self.repository, self.tag)
        } else {
            format!("{}/{}:{}", self.original_registry, self.repository, self.tag)
        }
    }

    pub fn has_latest_tag(&self) -> bool {
        self.tag == "latest"
    }
}

fn rsplit_segment<'a>(path: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    let at = path.rfind(separator)?;
    Some((&path[..at], &path[at + separator.len()..]))
}

/// Extract the `ns` query parameter containerd adds to mirror requests.
pub fn original_registry_from_query(query: Option<&str>) -> String {
    let Some(query) = query else { return String::new() };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("ns=") {
            return value.to_owned();
        }
    }
    String::new()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
