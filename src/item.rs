//! Work items produced by a [`WorkSource`](crate::traits::WorkSource).

/// A unit of work, optionally tagged with a destination label.
///
/// `Plain` items go to the router's default channel, `Routed` items to the
/// channel registered under their label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<P> {
    /// A payload for the default downstream channel
    Plain(P),
    /// A payload for the channel registered under the label
    Routed(P, String),
}

impl<P> Item<P> {
    /// Create an item for the default channel
    pub fn plain(payload: P) -> Self {
        Item::Plain(payload)
    }

    /// Create an item for a labeled destination
    pub fn routed<S: Into<String>>(payload: P, label: S) -> Self {
        Item::Routed(payload, label.into())
    }

    /// The destination label, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            Item::Plain(_) => None,
            Item::Routed(_, label) => Some(label),
        }
    }

    /// Split the item into its payload and optional label
    pub fn into_parts(self) -> (P, Option<String>) {
        match self {
            Item::Plain(payload) => (payload, None),
            Item::Routed(payload, label) => (payload, Some(label)),
        }
    }
}

impl<P> From<(P, String)> for Item<P> {
    fn from((payload, label): (P, String)) -> Self {
        Item::Routed(payload, label)
    }
}

impl<P> From<(P, &str)> for Item<P> {
    fn from((payload, label): (P, &str)) -> Self {
        Item::Routed(payload, label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_parts() {
        assert_eq!(Item::plain(1).into_parts(), (1, None));
        assert_eq!(
            Item::routed(2, "B").into_parts(),
            (2, Some("B".to_string()))
        );
    }

    #[test]
    fn test_tuple_conversion() {
        let item: Item<&str> = ("frame", "calib").into();
        assert_eq!(item.label(), Some("calib"));
        assert_eq!(item, Item::Routed("frame", "calib".to_string()));
    }
}
