//! The interop hook table.
//!
//! Scripts reach host services through `SYSCALL` with a 32-bit id derived
//! from the service name. The table carries the gas price and the call flags
//! a caller must hold; the host resolves the id to an actual handler after
//! the machine has charged gas and checked flags.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::call_flags::CallFlags;

/// Derives the service id: the first four bytes of `SHA256(name)`.
pub fn interop_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Metadata for one host service.
#[derive(Debug, Clone)]
pub struct InteropDescriptor {
    pub name: &'static str,
    pub id: u32,
    /// Base gas price, multiplied by the execution fee factor.
    pub price: i64,
    /// Flags the calling context must hold.
    pub required_call_flags: CallFlags,
}

impl InteropDescriptor {
    pub fn new(name: &'static str, price: i64, required_call_flags: CallFlags) -> Self {
        Self {
            name,
            id: interop_id(name),
            price,
            required_call_flags,
        }
    }
}

/// A flat id-to-descriptor mapping built once at startup.
#[derive(Debug, Clone, Default)]
pub struct InteropService {
    descriptors: HashMap<u32, InteropDescriptor>,
}

impl InteropService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: InteropDescriptor) {
        self.descriptors.insert(descriptor.id, descriptor);
    }

    pub fn get(&self, id: u32) -> Option<&InteropDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_first_four_hash_bytes() {
        let id = interop_id("System.Runtime.Platform");
        let digest = Sha256::digest(b"System.Runtime.Platform");
        assert_eq!(
            id,
            u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
        );
    }

    #[test]
    fn registry_resolves_by_id() {
        let mut service = InteropService::new();
        let descriptor =
            InteropDescriptor::new("System.Runtime.Platform", 1 << 3, CallFlags::NONE);
        let id = descriptor.id;
        service.register(descriptor);
        assert_eq!(service.get(id).unwrap().name, "System.Runtime.Platform");
        assert!(service.get(id.wrapping_add(1)).is_none());
    }
}
