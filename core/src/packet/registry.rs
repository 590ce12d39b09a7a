//! Next-protocol dispatch through key registries.
//!
//! Many protocols name their payload's protocol in a header field (an EtherType, an IP protocol
//! number). A [`PacketRegistry`] maps such keys to [`Factory`]s. A protocol whose payload type is
//! selected that way implements [`RegistryKeyed`] and forwards its
//! [`next_packet_type`](PacketType::next_packet_type) to [`registry_next_type`].
//!
//! Registries are meant to be process-wide statics:
//!
//! ```rust
//! # #[macro_use] extern crate lazy_static;
//! use strata_core::packet::PacketRegistry;
//! use strata_core::protocols::data::DataPacketType;
//!
//! lazy_static! {
//!     static ref PORTS: PacketRegistry<u16> = {
//!         let registry = PacketRegistry::new("port");
//!         registry.register::<DataPacketType>(9);
//!         registry
//!     };
//! }
//! # fn main() { assert!(PORTS.try_lookup(&9).is_some()); }
//! ```

use crate::packet::factory::Factory;
use crate::packet::handle::{ConcretePacket, Packet};
use crate::packet::interpreter::PacketType;
use crate::packet::PacketError;

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};

#[derive(Debug)]
struct RegistryEntries<K> {
    by_key: BTreeMap<K, Factory>,
    by_type: HashMap<TypeId, K>,
}

/// Key to factory table used to resolve the type of a next packet.
pub struct PacketRegistry<K> {
    name: &'static str,
    entries: RwLock<RegistryEntries<K>>,
}

impl<K> PacketRegistry<K>
where
    K: Ord + Clone + fmt::Debug,
{
    /// Creates an empty registry. `name` identifies the registry in errors and logs.
    pub fn new(name: &'static str) -> PacketRegistry<K> {
        PacketRegistry {
            name,
            entries: RwLock::new(RegistryEntries {
                by_key: BTreeMap::new(),
                by_type: HashMap::new(),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryEntries<K>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryEntries<K>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers packet type `T` under `key`.
    pub fn register<T: PacketType>(&self, key: K) {
        self.register_factory(key, Factory::of::<T>())
    }

    /// Registers `factory` under `key`, replacing any previous registration of `key`.
    ///
    /// A type registered under several keys maps back to the first of them still registered.
    pub fn register_factory(&self, key: K, factory: Factory) {
        let mut entries = self.write();
        if let Some(previous) = entries.by_key.insert(key.clone(), factory) {
            log::warn!(
                "{} registry: {:?} re-registered from {} to {}",
                self.name,
                key,
                previous.name(),
                factory.name()
            );
            if entries.by_type.get(&previous.type_id()) == Some(&key) {
                let other = entries
                    .by_key
                    .iter()
                    .find(|(_, f)| **f == previous)
                    .map(|(k, _)| k.clone());
                match other {
                    Some(other) => entries.by_type.insert(previous.type_id(), other),
                    None => entries.by_type.remove(&previous.type_id()),
                };
            }
        }
        entries
            .by_type
            .entry(factory.type_id())
            .or_insert_with(|| key.clone());
        log::debug!(
            "{} registry: {:?} -> {}",
            self.name,
            key,
            factory.name()
        );
    }

    /// Returns the factory registered under `key`.
    pub fn lookup(&self, key: &K) -> Result<Factory> {
        match self.try_lookup(key) {
            Some(factory) => Ok(factory),
            None => bail!(PacketError::NotRegistered {
                registry: self.name,
                key: format!("{:?}", key),
            }),
        }
    }

    /// Non-failing variant of [`lookup`](PacketRegistry::lookup).
    pub fn try_lookup(&self, key: &K) -> Option<Factory> {
        self.read().by_key.get(key).copied()
    }

    /// Returns the key under which the type of `packet` is registered.
    pub fn key_of(&self, packet: &Packet) -> Option<K> {
        self.read().by_type.get(&packet.type_id()).cloned()
    }

    /// Returns the key under which packet type `T` is registered.
    pub fn key_of_type<T: PacketType>(&self) -> Option<K> {
        self.read().by_type.get(&TypeId::of::<T>()).cloned()
    }

    /// Returns the registered keys in ascending order.
    pub fn keys(&self) -> Vec<K> {
        self.read().by_key.keys().cloned().collect()
    }
}

impl<K: fmt::Debug> fmt::Debug for PacketRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PacketRegistry")
            .field("name", &self.name)
            .field("entries", &entries.by_key)
            .finish()
    }
}

/// A packet type whose next packet type is named by a registry key in its header.
pub trait RegistryKeyed: PacketType {
    type Key: Ord + Clone + fmt::Debug + 'static;

    /// The registry next-protocol keys are resolved in.
    fn registry() -> &'static PacketRegistry<Self::Key>;

    /// Reads the key of the next packet's type from `packet`.
    fn next_packet_key(packet: &ConcretePacket<Self>) -> Result<Self::Key>;
}

/// Resolves the next packet type of `packet` through `T`'s registry.
///
/// Fails with [`PacketError::NotRegistered`] when the key is unknown.
pub fn registry_next_type<T: RegistryKeyed>(packet: &ConcretePacket<T>) -> Result<Option<Factory>> {
    let key = T::next_packet_key(packet)?;
    let factory = T::registry().lookup(&key)?;
    log::debug!(
        "{} registry resolved {:?} to {}",
        T::registry().name(),
        key,
        factory.name()
    );
    Ok(Some(factory))
}

/// Returns the key under which `packet`'s type is registered in `T`'s registry. `None` for an
/// absent or unregistered packet.
pub fn registry_key<T: RegistryKeyed>(packet: Option<&Packet>) -> Option<T::Key> {
    packet.and_then(|packet| T::registry().key_of(packet))
}

/// Next packet range of a protocol with a fixed-size header and trailer: everything between
/// `init_head_size` and the trailer. `None` if the packet is smaller than `init_size`.
pub fn fixed_next_range<T: PacketType>(packet: &ConcretePacket<T>) -> Option<Range<usize>> {
    let size = packet.size();
    if size < T::init_size() {
        return None;
    }
    let trailer = T::init_size() - T::init_head_size().min(T::init_size());
    Some(T::init_head_size()..size - trailer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::data::DataPacketType;
    use crate::protocols::ethernet::EthernetType;
    use crate::protocols::generic::{GenericPacket, GenericPacketType};

    #[test]
    fn test_register_lookup() {
        let registry: PacketRegistry<u16> = PacketRegistry::new("test");
        registry.register::<DataPacketType>(7);
        registry.register::<GenericPacketType<4, 0>>(9);

        assert_eq!(
            registry.lookup(&7).unwrap(),
            Factory::of::<DataPacketType>()
        );
        assert!(registry.try_lookup(&8).is_none());
        let err = registry.lookup(&8).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PacketError>(),
            Some(&PacketError::NotRegistered {
                registry: "test",
                key: "8".to_owned()
            })
        );
        assert_eq!(registry.keys(), vec![7, 9]);
        assert_eq!(registry.key_of_type::<GenericPacketType<4, 0>>(), Some(9));
    }

    #[test]
    fn test_reverse_lookup() {
        let registry: PacketRegistry<u8> = PacketRegistry::new("reverse");
        registry.register::<DataPacketType>(1);
        registry.register::<DataPacketType>(2);
        let packet = GenericPacket::<2, 0>::create_from(&[0; 2]);

        assert_eq!(registry.key_of(&packet), None);
        registry.register::<GenericPacketType<2, 0>>(1);
        assert_eq!(registry.key_of(&packet), Some(1));
        assert_eq!(registry.key_of_type::<DataPacketType>(), Some(2));
        assert_eq!(registry.lookup(&2).unwrap(), Factory::of::<DataPacketType>());
        assert_eq!(registry_key::<EthernetType>(None), None);
    }

    #[test]
    fn test_fixed_next_range() {
        let packet = GenericPacket::<4, 6>::create_from(&[0; 20]);
        assert_eq!(fixed_next_range(&packet), Some(4..14));
        let short = GenericPacket::<4, 6>::create_from(&[0; 9]);
        assert_eq!(fixed_next_range(&short), None);
        let exact = GenericPacket::<4, 6>::create_from(&[0; 10]);
        assert_eq!(fixed_next_range(&exact), Some(4..4));
    }
}
