//! Routing table mapping destination labels to downstream channels.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::traits::{Channel, Router};

/// A fixed routing table: one main connexion plus labeled connexions.
///
/// The table is built once by the topology builder and is read-only
/// afterwards.
pub struct Connexions<P> {
    main: String,
    channels: HashMap<String, Arc<dyn Channel<P>>>,
}

impl<P> std::fmt::Debug for Connexions<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut labels: Vec<_> = self.channels.keys().collect();
        labels.sort();
        f.debug_struct("Connexions")
            .field("main", &self.main)
            .field("labels", &labels)
            .finish()
    }
}

impl<P: Send + 'static> Connexions<P> {
    /// Create a table whose default channel is registered under `main`
    pub fn new<S, C>(main: S, channel: C) -> Self
    where
        S: Into<String>,
        C: Channel<P> + 'static,
    {
        let main = main.into();
        let mut channels: HashMap<String, Arc<dyn Channel<P>>> = HashMap::new();
        channels.insert(main.clone(), Arc::new(channel));
        Self { main, channels }
    }

    /// Register another labeled channel
    pub fn with<S, C>(mut self, label: S, channel: C) -> Self
    where
        S: Into<String>,
        C: Channel<P> + 'static,
    {
        self.channels.insert(label.into(), Arc::new(channel));
        self
    }

    /// Build a table from prebuilt channels; `main` must be among them
    pub fn from_map(
        main: impl Into<String>,
        channels: HashMap<String, Arc<dyn Channel<P>>>,
    ) -> Result<Self> {
        let main = main.into();
        if !channels.contains_key(&main) {
            return Err(Error::Routing { label: main });
        }
        Ok(Self { main, channels })
    }

    /// The label of the main connexion
    pub fn main_name(&self) -> &str {
        &self.main
    }

    /// Whether a channel is registered under `label`
    pub fn contains(&self, label: &str) -> bool {
        self.channels.contains_key(label)
    }
}

impl<P: Send + 'static> Router<P> for Connexions<P> {
    fn resolve(&self, label: &str) -> Option<Arc<dyn Channel<P>>> {
        self.channels.get(label).cloned()
    }

    fn default_channel(&self) -> Arc<dyn Channel<P>> {
        // The constructors guarantee the main label is present
        Arc::clone(&self.channels[&self.main])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::request_channel;

    #[tokio::test]
    async fn test_resolve_and_default() {
        let (main_tx, main_rx) = request_channel::<u8>(1);
        let (calib_tx, calib_rx) = request_channel::<u8>(1);
        let router = Connexions::new("reco", main_tx).with("calib", calib_tx);

        assert_eq!(router.main_name(), "reco");
        assert!(router.contains("calib"));
        assert!(router.resolve("missing").is_none());

        let main_collector = tokio::spawn(main_rx.collect_all());
        let calib_collector = tokio::spawn(calib_rx.collect_all());

        router.default_channel().request(1).await.unwrap();
        router.resolve("calib").unwrap().request(2).await.unwrap();
        drop(router);

        assert_eq!(main_collector.await.unwrap(), vec![1]);
        assert_eq!(calib_collector.await.unwrap(), vec![2]);
    }

    #[test]
    fn test_from_map_requires_main() {
        let (tx, _rx) = request_channel::<u8>(1);
        let mut channels: HashMap<String, Arc<dyn Channel<u8>>> = HashMap::new();
        channels.insert("a".to_string(), Arc::new(tx));

        assert!(Connexions::from_map("a", channels.clone()).is_ok());
        assert!(matches!(
            Connexions::from_map("b", channels),
            Err(Error::Routing { label }) if label == "b"
        ));
    }
}
