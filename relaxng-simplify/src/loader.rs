//! Resource loading for `include` and `externalRef`.
//!
//! The pipeline never touches the filesystem itself; it asks a
//! [`ResourceLoader`] for the text of a URL and uses the canonical URL it
//! returns as the base for relative references inside that resource.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("could not read {url}: {source}")]
    Io {
        url: Url,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported URL scheme {scheme:?} for {url}")]
    UnsupportedScheme { url: Url, scheme: String },
    #[error("resource not found: {url}")]
    NotFound { url: Url },
}

/// A loaded schema document.
pub struct Resource {
    /// Canonical URL, used as the base for relative references.
    pub url: Url,
    pub text: String,
}

pub trait ResourceLoader {
    fn load(&self, url: &Url) -> Result<Resource, ResourceError>;
}

/// Loads `file:` URLs through `std::fs`.
pub struct FsLoader;

impl ResourceLoader for FsLoader {
    fn load(&self, url: &Url) -> Result<Resource, ResourceError> {
        if url.scheme() != "file" {
            return Err(ResourceError::UnsupportedScheme {
                url: url.clone(),
                scheme: url.scheme().to_string(),
            });
        }
        let path = url
            .to_file_path()
            .map_err(|()| ResourceError::NotFound { url: url.clone() })?;
        let text = std::fs::read_to_string(&path).map_err(|source| ResourceError::Io {
            url: url.clone(),
            source,
        })?;
        Ok(Resource {
            url: url.clone(),
            text,
        })
    }
}

/// An in-memory loader, keyed by absolute URL string.
#[derive(Default)]
pub struct MapLoader {
    resources: std::collections::HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> MapLoader {
        MapLoader::default()
    }

    pub fn add(mut self, url: &str, text: &str) -> MapLoader {
        self.resources.insert(url.to_string(), text.to_string());
        self
    }
}

impl ResourceLoader for MapLoader {
    fn load(&self, url: &Url) -> Result<Resource, ResourceError> {
        match self.resources.get(url.as_str()) {
            Some(text) => Ok(Resource {
                url: url.clone(),
                text: text.clone(),
            }),
            None => Err(ResourceError::NotFound { url: url.clone() }),
        }
    }
}
