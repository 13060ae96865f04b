//! Contract manifests: what a contract exposes and what it may touch.

use neo3_core::{ECPoint, UInt160};
use serde::{Deserialize, Serialize};

use crate::{ContractError, ContractResult};

/// Maximum serialized manifest size.
pub const MAX_MANIFEST_SIZE: usize = 0xFFFF;

/// A group a contract belongs to: a public key plus its signature over the
/// contract hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractGroup {
    #[serde(rename = "pubkey")]
    pub public_key: ECPoint,
    /// Hex signature of the contract hash.
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl ContractGroup {
    /// Verifies the group signature against a contract hash.
    pub fn is_valid(&self, contract_hash: &UInt160) -> bool {
        self.public_key.verify(contract_hash.as_bytes(), &self.signature)
    }
}

/// One ABI method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMethod {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ContractParameter>,
    #[serde(rename = "returntype")]
    pub return_type: String,
    /// Entry offset of the method inside the contract script.
    pub offset: usize,
    #[serde(default)]
    pub safe: bool,
}

/// One ABI parameter descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: String,
}

/// One ABI event descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEvent {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ContractParameter>,
}

/// The contract ABI: methods and events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractAbi {
    #[serde(default)]
    pub methods: Vec<ContractMethod>,
    #[serde(default)]
    pub events: Vec<ContractEvent>,
}

impl ContractAbi {
    /// Finds a method by name and parameter count.
    pub fn method(&self, name: &str, parameter_count: usize) -> Option<&ContractMethod> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.parameters.len() == parameter_count)
    }
}

/// What a permission entry matches: anything, one contract, or a group key.
///
/// Variant order matters for untagged decoding: `"*"` must fall through the
/// hash and key parsers before the wildcard catches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionContract {
    Hash(UInt160),
    Group(ECPoint),
    /// `"*"` matches every contract.
    Wildcard(String),
}

/// The methods a permission entry allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionMethods {
    List(Vec<String>),
    /// `"*"` allows every method.
    Wildcard(String),
}

/// One permission: which contracts may be called, and which of their methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPermission {
    pub contract: PermissionContract,
    pub methods: PermissionMethods,
}

impl ContractPermission {
    /// Whether calling `method` on the contract described by `hash` and
    /// `manifest` is allowed.
    pub fn is_allowed(&self, hash: &UInt160, manifest: &ContractManifest, method: &str) -> bool {
        match &self.contract {
            PermissionContract::Wildcard(w) if w == "*" => {}
            PermissionContract::Wildcard(_) => return false,
            PermissionContract::Hash(allowed) => {
                if allowed != hash {
                    return false;
                }
            }
            PermissionContract::Group(key) => {
                if !manifest.groups.iter().any(|g| g.public_key == *key) {
                    return false;
                }
            }
        }
        match &self.methods {
            PermissionMethods::Wildcard(w) => w == "*",
            PermissionMethods::List(list) => list.iter().any(|m| m == method),
        }
    }

    fn is_well_formed(&self) -> bool {
        match (&self.contract, &self.methods) {
            (PermissionContract::Wildcard(w), _) if w != "*" => false,
            (_, PermissionMethods::Wildcard(w)) if w != "*" => false,
            _ => true,
        }
    }
}

/// The trusted contract set: a wildcard or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trusts {
    Wildcard(String),
    List(Vec<UInt160>),
}

impl Default for Trusts {
    fn default() -> Self {
        Trusts::List(Vec::new())
    }
}

/// The manifest: everything a node needs to know about a contract besides
/// its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractManifest {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<ContractGroup>,
    #[serde(rename = "supportedstandards", default)]
    pub supported_standards: Vec<String>,
    #[serde(default)]
    pub abi: ContractAbi,
    #[serde(default)]
    pub permissions: Vec<ContractPermission>,
    #[serde(default)]
    pub trusts: Trusts,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl ContractManifest {
    /// A minimal manifest exposing the given methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            supported_standards: Vec::new(),
            abi: ContractAbi::default(),
            permissions: Vec::new(),
            trusts: Trusts::default(),
            extra: None,
        }
    }

    /// Validity rules checked at deploy and update time.
    pub fn validate(&self, contract_hash: &UInt160) -> ContractResult<()> {
        if self.name.is_empty() {
            return Err(ContractError::InvalidManifest("empty name".into()));
        }
        for (i, group) in self.groups.iter().enumerate() {
            if self.groups[..i]
                .iter()
                .any(|g| g.public_key == group.public_key)
            {
                return Err(ContractError::InvalidManifest(format!(
                    "duplicate group {}",
                    group.public_key
                )));
            }
            if !group.is_valid(contract_hash) {
                return Err(ContractError::InvalidManifest(format!(
                    "invalid group signature for {}",
                    group.public_key
                )));
            }
        }
        for (i, standard) in self.supported_standards.iter().enumerate() {
            if self.supported_standards[..i].contains(standard) {
                return Err(ContractError::InvalidManifest(format!(
                    "duplicate standard {standard}"
                )));
            }
        }
        for permission in &self.permissions {
            if !permission.is_well_formed() {
                return Err(ContractError::InvalidManifest(
                    "malformed permission entry".into(),
                ));
            }
        }
        if let Trusts::List(trusts) = &self.trusts {
            for (i, trust) in trusts.iter().enumerate() {
                if trusts[..i].contains(trust) {
                    return Err(ContractError::InvalidManifest(format!(
                        "duplicate trust {trust}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether code under this manifest may call `method` on the target.
    pub fn can_call(
        &self,
        target_hash: &UInt160,
        target_manifest: &ContractManifest,
        method: &str,
    ) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_allowed(target_hash, target_manifest, method))
    }

    pub fn to_json(&self) -> ContractResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ContractError::InvalidManifest(e.to_string()))
    }

    pub fn from_json(json: &str) -> ContractResult<Self> {
        if json.len() > MAX_MANIFEST_SIZE {
            return Err(ContractError::InvalidManifest("manifest too large".into()));
        }
        serde_json::from_str(json).map_err(|e| ContractError::InvalidManifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with_permissions() -> ContractManifest {
        let mut manifest = ContractManifest::new("token");
        manifest.permissions = vec![ContractPermission {
            contract: PermissionContract::Hash(UInt160::zero()),
            methods: PermissionMethods::List(vec!["transfer".into()]),
        }];
        manifest
    }

    #[test]
    fn empty_name_rejected() {
        let manifest = ContractManifest::new("");
        assert!(manifest.validate(&UInt160::zero()).is_err());
    }

    #[test]
    fn duplicate_standards_rejected() {
        let mut manifest = ContractManifest::new("x");
        manifest.supported_standards = vec!["NEP-17".into(), "NEP-17".into()];
        assert!(manifest.validate(&UInt160::zero()).is_err());
    }

    #[test]
    fn duplicate_trusts_rejected() {
        let mut manifest = ContractManifest::new("x");
        manifest.trusts = Trusts::List(vec![UInt160::zero(), UInt160::zero()]);
        assert!(manifest.validate(&UInt160::zero()).is_err());
    }

    #[test]
    fn permission_matching() {
        let caller = manifest_with_permissions();
        let target = ContractManifest::new("target");
        assert!(caller.can_call(&UInt160::zero(), &target, "transfer"));
        assert!(!caller.can_call(&UInt160::zero(), &target, "mint"));
        let other = UInt160::from_bytes(&[9u8; 20]).unwrap();
        assert!(!caller.can_call(&other, &target, "transfer"));
    }

    #[test]
    fn wildcard_permission() {
        let mut manifest = ContractManifest::new("open");
        manifest.permissions = vec![ContractPermission {
            contract: PermissionContract::Wildcard("*".into()),
            methods: PermissionMethods::Wildcard("*".into()),
        }];
        let target = ContractManifest::new("t");
        let hash = UInt160::from_bytes(&[1u8; 20]).unwrap();
        assert!(manifest.can_call(&hash, &target, "anything"));
    }

    #[test]
    fn json_round_trip() {
        let manifest = manifest_with_permissions();
        let json = manifest.to_json().unwrap();
        assert_eq!(ContractManifest::from_json(&json).unwrap(), manifest);
    }
}
