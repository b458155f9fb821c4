// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image reference parsing.

use anyhow::{bail, Context};

/// A parsed image reference from the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: String,
    /// The original reference the image was parsed from.
    pub name: String,
}

impl Image {
    /// Parse a runtime reference of the form `registry/repo[:tag][@digest]`.
    /// `digest` overrides any digest carried in the reference itself.
    pub fn parse(name: &str, digest: &str) -> anyhow::Result<Self> {
        let (base, ref_digest) = match name.split_once('@') {
            Some((base, d)) => (base, d),
            None => (name, ""),
        };

        let digest = if digest.is_empty() { ref_digest } else { digest };

        let (registry, rest) = base
            .split_once('/')
            .with_context(|| format!("reference {name:?} has no registry component"))?;
        if registry.is_empty() || rest.is_empty() {
            bail!("reference {name:?} has an empty registry or repository");
        }

        // A colon after the last slash separates the tag; colons earlier in
        // the reference belong to the registry port.
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (rest, ""),
        };
        if repository.is_empty() {
            bail!("reference {name:?} has an empty repository");
        }
        if tag.is_empty() && digest.is_empty() {
            bail!("reference {name:?} carries neither tag nor digest");
        }

        Ok(Self {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
            digest: digest.to_owned(),
            name: name.to_owned(),
        })
    }

    pub fn is_latest_tag(&self) -> bool {
        self.tag == "latest"
    }

    /// `registry/repository:tag`, when the reference carries a tag.
    pub fn tag_name(&self) -> Option<String> {
        if self.tag.is_empty() {
            None
        } else {
            Some(format!("{}/{}:{}", self.registry, self.repository, self.tag))
        }
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
