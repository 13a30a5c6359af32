use crate::store::Store;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    /// Ledger store (postgres or memory backend)
    pub store: Store,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}
