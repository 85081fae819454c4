use std::collections::HashMap;
use std::hash::Hash;

/// Collects handler registrations for one listener or writer. Freeze it with
/// [`HandlerRegistry::build`] before handing it to the constructor; the
/// resulting table cannot change.
pub struct HandlerRegistry<K, H> {
    handlers: HashMap<K, H>,
}

impl<K: Eq + Hash, H> HandlerRegistry<K, H> {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Registers `handler` for `kind`. A later registration for the same kind
    /// replaces the earlier one.
    pub fn register(mut self, kind: K, handler: H) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn build(self) -> HandlerTable<K, H> {
        HandlerTable { handlers: self.handlers }
    }
}

impl<K: Eq + Hash, H> Default for HandlerRegistry<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HandlerTable<K, H> {
    handlers: HashMap<K, H>,
}

impl<K: Eq + Hash, H> HandlerTable<K, H> {
    pub fn get(&self, kind: &K) -> Option<&H> {
        self.handlers.get(kind)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferType;

    #[test]
    fn test_registry_builds_table() {
        let table = HandlerRegistry::new()
            .register(TransferType::Fungible, "fungible")
            .register(TransferType::Generic, "generic")
            .build();

        assert_eq!(table.get(&TransferType::Fungible), Some(&"fungible"));
        assert_eq!(table.get(&TransferType::Generic), Some(&"generic"));
        assert_eq!(table.get(&TransferType::NonFungible), None);
    }

    #[test]
    fn test_later_registration_wins() {
        let table = HandlerRegistry::new()
            .register("0xabc".to_string(), 1)
            .register("0xabc".to_string(), 2)
            .build();

        assert_eq!(table.get(&"0xabc".to_string()), Some(&2));
    }

    #[test]
    fn test_empty_table() {
        let table: HandlerTable<TransferType, ()> = HandlerRegistry::default().build();
        assert!(table.get(&TransferType::Fungible).is_none());
    }
}
