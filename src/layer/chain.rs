//! Immutable layers and the chains they stack into

use crate::cache::Fingerprint;
use crate::layer::delta::{ancestors, Delta, FileChange};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The output of one executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Fingerprint of the inputs that produced this layer
    pub fingerprint: Fingerprint,
    /// Identifier of the producing step
    pub step: String,
    /// Changes relative to the layer below
    pub delta: Arc<Delta>,
}

impl Layer {
    pub fn new(fingerprint: Fingerprint, step: impl Into<String>, delta: Arc<Delta>) -> Self {
        Self {
            fingerprint,
            step: step.into(),
            delta,
        }
    }
}

/// Ordered stack of layers, bottom first.
///
/// Cloning is cheap: layers are shared, never copied or mutated.
#[derive(Debug, Clone, Default)]
pub struct LayerChain {
    layers: Vec<Arc<Layer>>,
}

impl LayerChain {
    /// The empty base every run starts from
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fingerprint of the top layer, or `Fingerprint::ZERO` for the empty chain
    pub fn fingerprint(&self) -> Fingerprint {
        self.layers
            .last()
            .map(|l| l.fingerprint)
            .unwrap_or(Fingerprint::ZERO)
    }

    /// New chain with `layer` on top; `self` is left untouched
    pub fn push(&self, layer: Arc<Layer>) -> Self {
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self { layers }
    }

    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    pub fn top(&self) -> Option<&Arc<Layer>> {
        self.layers.last()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Resolve a path as seen from the top of the chain.
    ///
    /// Returns `None` if the path never existed or was removed, either
    /// directly or through removal of a parent directory.
    pub fn resolve(&self, path: &str) -> Option<&FileChange> {
        for layer in self.layers.iter().rev() {
            if let Some(change) = layer.delta.get(path) {
                return match change {
                    FileChange::Remove => None,
                    other => Some(other),
                };
            }
            if ancestors(path).any(|a| matches!(layer.delta.get(a), Some(FileChange::Remove))) {
                return None;
            }
        }
        None
    }

    /// Collapse the chain into the full filesystem view it describes
    pub fn flatten(&self) -> BTreeMap<String, FileChange> {
        let mut view: BTreeMap<String, FileChange> = BTreeMap::new();

        for layer in &self.layers {
            for (path, change) in layer.delta.iter() {
                match change {
                    FileChange::Remove => {
                        let prefix = format!("{}/", path);
                        view.retain(|p, _| p != path && !p.starts_with(&prefix));
                    }
                    other => {
                        view.insert(path.clone(), other.clone());
                    }
                }
            }
        }

        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(step: &str, parent: &LayerChain, build: impl FnOnce(&mut Delta)) -> Arc<Layer> {
        let mut delta = Delta::new();
        build(&mut delta);
        let fp = Fingerprint::chain(&parent.fingerprint(), step, &delta.digest().as_bytes()[..]);
        Arc::new(Layer::new(fp, step, Arc::new(delta)))
    }

    #[test]
    fn empty_chain_has_zero_fingerprint() {
        let chain = LayerChain::empty();
        assert!(chain.fingerprint().is_zero());
        assert!(chain.flatten().is_empty());
    }

    #[test]
    fn push_does_not_mutate() {
        let base = LayerChain::empty();
        let l = layer("base", &base, |d| d.write("etc/os-release", "x").unwrap());
        let next = base.push(l.clone());

        assert!(base.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(next.fingerprint(), l.fingerprint);
    }

    #[test]
    fn upper_layers_shadow_lower() {
        let chain = LayerChain::empty();
        let chain = chain.push(layer("base", &chain, |d| d.write("a", "old").unwrap()));
        let chain = chain.push(layer("patch", &chain, |d| d.write("a", "new").unwrap()));

        assert_eq!(chain.resolve("a"), Some(&FileChange::file("new")));
        assert_eq!(chain.flatten().get("a"), Some(&FileChange::file("new")));
    }

    #[test]
    fn removals_hide_paths_and_children() {
        let chain = LayerChain::empty();
        let chain = chain.push(layer("base", &chain, |d| {
            d.mkdir("tmp").unwrap();
            d.write("tmp/build.log", "x").unwrap();
            d.write("keep", "y").unwrap();
        }));
        let chain = chain.push(layer("clean", &chain, |d| d.remove("tmp").unwrap()));

        assert!(chain.resolve("tmp").is_none());
        assert!(chain.resolve("tmp/build.log").is_none());
        assert!(chain.resolve("keep").is_some());

        let view = chain.flatten();
        assert_eq!(view.len(), 1);
        assert!(view.contains_key("keep"));
    }

    #[test]
    fn recreated_after_removal() {
        let chain = LayerChain::empty();
        let chain = chain.push(layer("one", &chain, |d| d.write("f", "1").unwrap()));
        let chain = chain.push(layer("two", &chain, |d| d.remove("f").unwrap()));
        let chain = chain.push(layer("three", &chain, |d| d.write("f", "3").unwrap()));

        assert_eq!(chain.resolve("f"), Some(&FileChange::file("3")));
        assert_eq!(chain.flatten().get("f"), Some(&FileChange::file("3")));
    }
}
