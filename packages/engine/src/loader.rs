//! Config resource loading
//!
//! Imports and extension configs reach the digester through this seam so
//! digestion itself stays free of filesystem assumptions.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

/// Loads the text of a config resource named by URI.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, uri: &str) -> io::Result<String>;
}

/// Filesystem-backed loader. `file:` URIs and plain paths read directly;
/// rooted lookups (extension resources such as `/META-INF/...`) resolve
/// under the configured root directory when one is set.
#[derive(Debug, Default)]
pub struct FsResourceLoader {
    root: Option<PathBuf>,
}

impl FsResourceLoader {
    pub fn new() -> Self {
        FsResourceLoader { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        FsResourceLoader {
            root: Some(root.into()),
        }
    }
}

impl ResourceLoader for FsResourceLoader {
    fn load(&self, uri: &str) -> io::Result<String> {
        let path = uri.strip_prefix("file:").unwrap_or(uri);
        let resolved = match &self.root {
            Some(root) => root.join(path.strip_prefix('/').unwrap_or(path)),
            None => PathBuf::from(path),
        };
        std::fs::read_to_string(resolved)
    }
}

/// In-memory loader keyed by exact URI; used by embedded configs and tests.
#[derive(Debug, Default)]
pub struct MapResourceLoader {
    resources: HashMap<String, String>,
}

impl MapResourceLoader {
    pub fn new() -> Self {
        MapResourceLoader::default()
    }

    pub fn add(&mut self, uri: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.resources.insert(uri.into(), content.into());
        self
    }
}

impl ResourceLoader for MapResourceLoader {
    fn load(&self, uri: &str) -> io::Result<String> {
        self.resources.get(uri).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no resource '{}'", uri))
        })
    }
}
