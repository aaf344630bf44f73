//! Directory of sectoral identity providers.
//!
//! Published as a signed JWT. Two payload schemas exist: the current
//! `fed_idp_list` and the legacy `kk_app_list`. Decoders are tried in order
//! and the first success wins.

use serde::{Deserialize, Serialize};

/// A sectoral identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KKAppEntry {
    /// Display name.
    pub name: String,

    /// Identifier used to start the federated flow.
    pub identifier: String,

    /// Supports the GID federation flow.
    pub gid: bool,

    /// Logo URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Ordered set of sectoral identity providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KKAppDirectory {
    /// Entries in directory order.
    pub apps: Vec<KKAppEntry>,
}

/// Payload schema a directory was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorySchema {
    /// `fed_idp_list` with `idp_name`, `idp_iss`, `idp_logo`, `idp_sek_2`.
    FederationList,
    /// `kk_app_list` with `kk_app_name`, `kk_app_id`.
    Legacy,
}

#[derive(Deserialize)]
struct FederationList {
    fed_idp_list: Vec<FederationListEntry>,
}

#[derive(Deserialize)]
struct FederationListEntry {
    idp_name: String,
    idp_iss: String,
    #[serde(default)]
    idp_logo: Option<String>,
    #[serde(default)]
    idp_sek_2: bool,
}

#[derive(Deserialize)]
struct LegacyList {
    kk_app_list: Vec<LegacyListEntry>,
}

#[derive(Deserialize)]
struct LegacyListEntry {
    kk_app_name: String,
    kk_app_id: String,
}

type SchemaDecoder = fn(&[u8]) -> Option<KKAppDirectory>;

const DECODERS: [(DirectorySchema, SchemaDecoder); 2] = [
    (DirectorySchema::FederationList, decode_federation_list),
    (DirectorySchema::Legacy, decode_legacy_list),
];

fn decode_federation_list(payload: &[u8]) -> Option<KKAppDirectory> {
    let list: FederationList = serde_json::from_slice(payload).ok()?;
    Some(KKAppDirectory {
        apps: list
            .fed_idp_list
            .into_iter()
            .map(|entry| KKAppEntry {
                name: entry.idp_name,
                identifier: entry.idp_iss,
                gid: entry.idp_sek_2,
                logo: entry.idp_logo,
            })
            .collect(),
    })
}

// Legacy entries carry no federation capability; they decode as `gid: false`.
fn decode_legacy_list(payload: &[u8]) -> Option<KKAppDirectory> {
    let list: LegacyList = serde_json::from_slice(payload).ok()?;
    Some(KKAppDirectory {
        apps: list
            .kk_app_list
            .into_iter()
            .map(|entry| KKAppEntry {
                name: entry.kk_app_name,
                identifier: entry.kk_app_id,
                gid: false,
                logo: None,
            })
            .collect(),
    })
}

impl KKAppDirectory {
    /// Decode a directory payload, trying the current schema first.
    ///
    /// Returns `None` if no schema matches.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Option<(Self, DirectorySchema)> {
        DECODERS
            .iter()
            .find_map(|(schema, decode)| decode(payload).map(|directory| (directory, *schema)))
    }

    /// Entries ordered case-insensitively by name.
    #[must_use]
    pub fn sorted(&self) -> Self {
        let mut apps = self.apps.clone();
        apps.sort_by_cached_key(|entry| entry.name.to_lowercase());
        Self { apps }
    }

    /// Look up an entry by identifier.
    #[must_use]
    pub fn entry(&self, identifier: &str) -> Option<&KKAppEntry> {
        self.apps.iter().find(|entry| entry.identifier == identifier)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FEDERATION: &str = r#"{"fed_idp_list":[
        {"idp_name":"beta Kasse","idp_iss":"https://beta.test","idp_logo":"https://beta.test/logo.png","idp_sek_2":true},
        {"idp_name":"Alpha Kasse","idp_iss":"https://alpha.test","idp_sek_2":false}
    ]}"#;

    const LEGACY: &str = r#"{"kk_app_list":[
        {"kk_app_name":"beta Kasse","kk_app_id":"https://beta.test"},
        {"kk_app_name":"Alpha Kasse","kk_app_id":"https://alpha.test"}
    ]}"#;

    #[test]
    fn test_federation_schema_preferred() {
        let (directory, schema) = KKAppDirectory::decode(FEDERATION.as_bytes()).unwrap();
        assert_eq!(schema, DirectorySchema::FederationList);
        assert_eq!(directory.apps.len(), 2);
        assert!(directory.apps[0].gid);
        assert_eq!(directory.apps[0].logo.as_deref(), Some("https://beta.test/logo.png"));
    }

    #[test]
    fn test_legacy_schema_fallback() {
        let (directory, schema) = KKAppDirectory::decode(LEGACY.as_bytes()).unwrap();
        assert_eq!(schema, DirectorySchema::Legacy);
        assert!(directory.apps.iter().all(|entry| !entry.gid));
        assert_eq!(directory.entry("https://alpha.test").unwrap().name, "Alpha Kasse");
    }

    #[test]
    fn test_both_schemas_sort_to_same_names() {
        let (federation, _) = KKAppDirectory::decode(FEDERATION.as_bytes()).unwrap();
        let (legacy, _) = KKAppDirectory::decode(LEGACY.as_bytes()).unwrap();
        let names = |directory: &KKAppDirectory| {
            directory
                .sorted()
                .apps
                .into_iter()
                .map(|entry| (entry.name, entry.identifier))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&federation), names(&legacy));
        assert_eq!(names(&federation)[0].0, "Alpha Kasse");
    }

    #[test]
    fn test_unknown_schema() {
        assert!(KKAppDirectory::decode(br#"{"apps":[]}"#).is_none());
    }
}
