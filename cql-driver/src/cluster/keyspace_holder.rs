use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::watch;

/// Holds currently set global keyspace and notifies pools when it changes, so every connection
/// can follow with its own `USE`.
#[derive(Debug)]
pub struct KeyspaceHolder {
    current_keyspace: ArcSwapOption<String>,
    keyspace_sender: watch::Sender<Option<String>>,
}

impl KeyspaceHolder {
    pub fn new() -> Self {
        let (keyspace_sender, _) = watch::channel(None);
        KeyspaceHolder {
            current_keyspace: Default::default(),
            keyspace_sender,
        }
    }

    #[inline]
    pub fn current_keyspace(&self) -> Option<Arc<String>> {
        self.current_keyspace.load().clone()
    }

    /// Stores the keyspace, notifying subscribers if it differs from the current one.
    pub fn update_current_keyspace(&self, keyspace: String) {
        let old_keyspace = self
            .current_keyspace
            .swap(Some(Arc::new(keyspace.clone())));

        match &old_keyspace {
            Some(old_keyspace) if **old_keyspace == keyspace => {}
            _ => {
                self.keyspace_sender.send_replace(Some(keyspace));
            }
        }
    }

    #[inline]
    pub fn keyspace_receiver(&self) -> watch::Receiver<Option<String>> {
        self.keyspace_sender.subscribe()
    }
}

impl Default for KeyspaceHolder {
    fn default() -> Self {
        Self::new()
    }
}
