//! Download of missing extension dependencies.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, warn};

use super::manifest::Dependency;
use super::registry::MissingDependencies;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Fetches raw artifact bytes from a URL.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`ArtifactFetcher`] over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Downloads dependencies from an ordered list of mirrors.
pub struct DependencyResolver {
    fetcher: Arc<dyn ArtifactFetcher>,
    mirrors: Vec<String>,
    target_dir: PathBuf,
}

impl DependencyResolver {
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        mirrors: Vec<String>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            mirrors,
            target_dir: target_dir.into(),
        }
    }

    /// Unique dependencies across all extensions, in first-seen order.
    pub fn flatten(missing: &MissingDependencies) -> Vec<Dependency> {
        let mut seen = HashSet::new();
        missing
            .iter()
            .flat_map(|(_, deps)| deps.iter())
            .filter(|dep| seen.insert((*dep).clone()))
            .cloned()
            .collect()
    }

    /// Download every missing dependency.
    ///
    /// Dependencies are resolved concurrently; each one tries the mirrors in
    /// order until one succeeds. Returns the dependencies that failed on every
    /// mirror.
    pub async fn resolve_missing(&self, missing: &MissingDependencies) -> Vec<Dependency> {
        let dependencies = Self::flatten(missing);
        if dependencies.is_empty() {
            return Vec::new();
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.target_dir).await {
            error!(dir = %self.target_dir.display(), error = %e, "Failed to create dependency directory");
        }

        let results = join_all(dependencies.iter().map(|dep| self.resolve_one(dep))).await;

        dependencies
            .into_iter()
            .zip(results)
            .filter_map(|(dep, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    error!(dependency = %dep, error = %e, "Unable to download dependency");
                    Some(dep)
                }
            })
            .collect()
    }

    async fn resolve_one(&self, dependency: &Dependency) -> Result<()> {
        let target = self.target_dir.join(dependency.file_name());

        for mirror in &self.mirrors {
            let url = dependency.url_on(mirror);
            info!(url = %url, target = %target.display(), "Downloading dependency");

            let bytes = match self.fetcher.fetch(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to download dependency");
                    continue;
                }
            };

            match tokio::fs::write(&target, &bytes).await {
                Ok(()) => {
                    info!(dependency = %dependency, "Dependency downloaded");
                    return Ok(());
                }
                Err(e) => {
                    error!(target = %target.display(), error = %e, "Failed to write dependency file");
                }
            }
        }

        Err(Error::DependencyDownload {
            dependency: dependency.to_string(),
            message: format!("exhausted {} mirrors", self.mirrors.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::manifest::ExtensionMeta;
    use parking_lot::Mutex;

    /// Serves bytes for URLs that start with an allowed prefix and records every request.
    struct ScriptedFetcher {
        allowed: Vec<String>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.lock().push(url.to_string());
            if self.allowed.iter().any(|p| url.starts_with(p.as_str())) {
                Ok(b"artifact".to_vec())
            } else {
                Err(Error::Other(format!("404 {url}")))
            }
        }
    }

    fn meta(name: &str) -> ExtensionMeta {
        ExtensionMeta {
            name: name.into(),
            version: "1".into(),
            author: "a".into(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_second_mirror_resolves_after_first_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            allowed: vec!["https://second".into()],
            requests: Mutex::new(Vec::new()),
        });
        let resolver = DependencyResolver::new(
            fetcher.clone(),
            vec!["https://first/".into(), "https://second".into()],
            dir.path().join("plugins-lib"),
        );

        let dep = Dependency::new("org.example", "thing", "1.0");
        let failed = resolver
            .resolve_missing(&vec![(meta("x"), vec![dep.clone()])])
            .await;

        assert!(failed.is_empty());
        assert_eq!(
            *fetcher.requests.lock(),
            vec![
                "https://first/org/example/thing/1.0/thing-1.0.jar".to_string(),
                "https://second/org/example/thing/1.0/thing-1.0.jar".to_string(),
            ]
        );
        let written = std::fs::read(dir.path().join("plugins-lib/thing-1.0.jar")).unwrap();
        assert_eq!(written, b"artifact");
    }

    #[tokio::test]
    async fn test_failures_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            allowed: vec!["https://m/org/ok".into()],
            requests: Mutex::new(Vec::new()),
        });
        let resolver =
            DependencyResolver::new(fetcher.clone(), vec!["https://m".into()], dir.path());

        let ok = Dependency::new("org.ok", "good", "1");
        let bad = Dependency::new("org.bad", "gone", "1");
        let missing = vec![
            (meta("x"), vec![ok.clone(), bad.clone()]),
            (meta("y"), vec![Dependency::new("org.bad", "gone", "2")]),
        ];

        let failed = resolver.resolve_missing(&missing).await;
        assert_eq!(failed, vec![bad]);
        assert_eq!(fetcher.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_nothing_missing_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            allowed: Vec::new(),
            requests: Mutex::new(Vec::new()),
        });
        let resolver = DependencyResolver::new(fetcher.clone(), vec!["https://m".into()], dir.path());
        assert!(resolver.resolve_missing(&vec![(meta("x"), Vec::new())]).await.is_empty());
        assert!(fetcher.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_http_fetcher() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/org/x/a/1/a-1.jar")
            .with_status(200)
            .with_body("jar-bytes")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/org/x/b/1/b-1.jar")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let body = fetcher
            .fetch(&format!("{}/org/x/a/1/a-1.jar", server.url()))
            .await
            .unwrap();
        assert_eq!(body, b"jar-bytes");
        assert!(
            fetcher
                .fetch(&format!("{}/org/x/b/1/b-1.jar", server.url()))
                .await
                .is_err()
        );
    }
}
