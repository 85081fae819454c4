use crate::{types::ChainFamily, Error};

/// Identity the relayer acts as on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub family: ChainFamily,
    pub name: String,
    pub address: String,
}

/// Resolves the identity reference from a chain config to a keypair.
#[cfg_attr(test, mockall::automock)]
pub trait KeyProvider: Send + Sync {
    fn resolve(&self, reference: &str, family: ChainFamily) -> Result<Keypair, Error>;
}

const DEV_ACCOUNTS: [(&str, &str, &str); 5] = [
    (
        "alice",
        "0xff93B45308FD417dF303D6515aB04D9e89a750Ca",
        "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY",
    ),
    (
        "bob",
        "0x8e0a907331554AF72563Bd8D43051C2E64Be5d35",
        "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty",
    ),
    (
        "charlie",
        "0x24962717f8fA5BA3b931bACaF9ac03924EB475a0",
        "5FLSigC9HGRKVhB9FiEo4Y3koPsNmBmLJbpXg2mp1hXcS59Y",
    ),
    (
        "dave",
        "0x148FfB2074A9e59eD58142822b3eB3fcBffb0cd7",
        "5DAAnrj7VHTznn2AWBemMuyBwZWs6FNFjdyVXUeYum3PTXFy",
    ),
    (
        "eve",
        "0x4CEEf6139f00F9F4535Ad19640Ff7A0137708485",
        "5HGjWAeFDfFCWPsjFQdVV2Msvz2XtMktvgocEZcCj68kUMaw",
    ),
];

/// Well-known development accounts, addressable by name or by address.
/// Only meant for local networks where these accounts are unlocked.
#[derive(Debug, Clone, Default)]
pub struct TestKeyring;

impl KeyProvider for TestKeyring {
    fn resolve(&self, reference: &str, family: ChainFamily) -> Result<Keypair, Error> {
        if reference.is_empty() {
            return Err(Error::Keystore("Empty identity reference".to_string()));
        }

        DEV_ACCOUNTS
            .iter()
            .find_map(|(name, evm, sub)| {
                let address = match family {
                    ChainFamily::Ethereum => *evm,
                    ChainFamily::Substrate => *sub,
                };
                let matches = name.eq_ignore_ascii_case(reference)
                    || match family {
                        ChainFamily::Ethereum => address.eq_ignore_ascii_case(reference),
                        ChainFamily::Substrate => address == reference,
                    };
                matches.then(|| Keypair {
                    family,
                    name: name.to_string(),
                    address: address.to_string(),
                })
            })
            .ok_or_else(|| {
                Error::Keystore(format!("No {} key found for identity {}", family, reference))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_name() {
        let keyring = TestKeyring;
        let alice = keyring.resolve("alice", ChainFamily::Ethereum).unwrap();
        assert_eq!(alice.address, "0xff93B45308FD417dF303D6515aB04D9e89a750Ca");

        let alice = keyring.resolve("Alice", ChainFamily::Substrate).unwrap();
        assert_eq!(alice.address, "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY");
    }

    #[test]
    fn test_resolve_by_address() {
        let keyring = TestKeyring;
        let bob = keyring
            .resolve("0x8e0a907331554af72563bd8d43051c2e64be5d35", ChainFamily::Ethereum)
            .unwrap();
        assert_eq!(bob.name, "bob");

        let eve = keyring
            .resolve("5HGjWAeFDfFCWPsjFQdVV2Msvz2XtMktvgocEZcCj68kUMaw", ChainFamily::Substrate)
            .unwrap();
        assert_eq!(eve.name, "eve");
        assert_eq!(eve.family, ChainFamily::Substrate);
    }

    #[test]
    fn test_resolve_wrong_family() {
        let keyring = TestKeyring;
        let err = keyring
            .resolve("0xff93B45308FD417dF303D6515aB04D9e89a750Ca", ChainFamily::Substrate)
            .unwrap_err();
        assert!(matches!(err, Error::Keystore(_)));
        assert!(keyring.resolve("", ChainFamily::Ethereum).is_err());
        assert!(keyring.resolve("mallory", ChainFamily::Ethereum).is_err());
    }
}
