use std::collections::HashMap;

use tracing::debug;

use crate::schemas::Identity;

/// Lookup key for a human-entered name: trimmed and lowercased, nothing else.
pub fn normalize(name: &str) -> String {
    name.to_lowercase().trim().to_string()
}

/// Name index over the identities the ledger returned for one request.
///
/// Each identity is reachable by its first name and by "first last". When two
/// identities share a key the one inserted later wins.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    by_name: HashMap<String, Identity>,
}

impl Roster {
    pub fn build(identities: &[Identity]) -> Self {
        let mut by_name = HashMap::new();
        for identity in identities {
            let first_name = normalize(&identity.first_name);
            let full_name = normalize(&format!("{} {}", identity.first_name, identity.last_name));
            for key in [first_name, full_name] {
                if let Some(previous) = by_name.insert(key.clone(), identity.clone()) {
                    if previous.id != identity.id {
                        debug!(
                            key = %key,
                            replaced = %previous.id,
                            by = %identity.id,
                            "name key collision"
                        );
                    }
                }
            }
        }
        Roster { by_name }
    }

    pub fn resolve(&self, name: &str) -> Option<&Identity> {
        self.by_name.get(&normalize(name))
    }
}
