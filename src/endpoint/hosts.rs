// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Batch host entries
//!
//! Callers handing over a list of hosts may mix plain shorthand strings
//! with structured entries carrying per-host parameters. Both shapes are
//! carried as one tagged type rather than inspected dynamically.

use serde::{Deserialize, Serialize};

use crate::config::Defaults;
use crate::error::ResolveError;
use crate::ssh_config::SshConfigLookup;

use super::resolver::{resolve, Overrides};
use super::EndpointSpec;

/// One host in a batch operation.
///
/// `#[serde(untagged)]` accepts either a bare string or a mapping; the
/// structured variant must be listed first for serde to try matching the
/// object shape before falling back to the string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostEntry {
    /// Structured entry with explicit per-host parameters.
    Detailed {
        host: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        port: Option<u16>,
    },
    /// Plain `[user@]host[:port]` shorthand.
    Name(String),
}

impl HostEntry {
    /// Resolve this entry into an endpoint.
    pub fn resolve(
        &self,
        defaults: &Defaults,
        ssh_config: &dyn SshConfigLookup,
    ) -> Result<EndpointSpec, ResolveError> {
        match self {
            HostEntry::Name(spec) => resolve(spec, Overrides::default(), defaults, ssh_config),
            HostEntry::Detailed { host, user, port } => resolve(
                host,
                Overrides {
                    user: user.clone(),
                    port: *port,
                    ..Default::default()
                },
                defaults,
                ssh_config,
            ),
        }
    }
}

impl From<&str> for HostEntry {
    fn from(spec: &str) -> Self {
        HostEntry::Name(spec.to_string())
    }
}

impl From<String> for HostEntry {
    fn from(spec: String) -> Self {
        HostEntry::Name(spec)
    }
}

/// Resolve a batch of entries, failing on the first bad one.
pub fn resolve_all(
    entries: &[HostEntry],
    defaults: &Defaults,
    ssh_config: &dyn SshConfigLookup,
) -> Result<Vec<EndpointSpec>, ResolveError> {
    entries
        .iter()
        .map(|entry| entry.resolve(defaults, ssh_config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_config::EmptySshConfig;

    #[test]
    fn test_name_entry_resolves_shorthand() {
        let entry = HostEntry::from("admin@db01:2222");
        let ep = entry.resolve(&Defaults::default(), &EmptySshConfig).unwrap();
        assert_eq!(ep.host, "db01");
        assert_eq!(ep.user, "admin");
        assert_eq!(ep.port, 2222);
    }

    #[test]
    fn test_detailed_entry_uses_explicit_fields() {
        let entry = HostEntry::Detailed {
            host: "db01".to_string(),
            user: Some("admin".to_string()),
            port: Some(2222),
        };
        let ep = entry.resolve(&Defaults::default(), &EmptySshConfig).unwrap();
        assert_eq!(ep.user, "admin");
        assert_eq!(ep.port, 2222);
    }

    #[test]
    fn test_detailed_entry_shorthand_conflict_is_ambiguous() {
        let entry = HostEntry::Detailed {
            host: "admin@db01".to_string(),
            user: Some("root".to_string()),
            port: None,
        };
        let result = entry.resolve(&Defaults::default(), &EmptySshConfig);
        assert_eq!(result, Err(ResolveError::AmbiguousField { field: "user" }));
    }

    #[test]
    fn test_untagged_deserialization() {
        let yaml = r#"
- web01
- host: db01
  user: admin
  port: 5432
- ops@cache01
"#;
        let entries: Vec<HostEntry> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], HostEntry::Name("web01".to_string()));
        assert_eq!(
            entries[1],
            HostEntry::Detailed {
                host: "db01".to_string(),
                user: Some("admin".to_string()),
                port: Some(5432),
            }
        );
        assert_eq!(entries[2], HostEntry::Name("ops@cache01".to_string()));
    }

    #[test]
    fn test_resolve_all_fails_fast() {
        let entries = vec![
            HostEntry::from("good01"),
            HostEntry::from("bad:port:extra@"),
        ];
        assert!(resolve_all(&entries, &Defaults::default(), &EmptySshConfig).is_err());

        let entries = vec![HostEntry::from("a"), HostEntry::from("b")];
        let specs = resolve_all(&entries, &Defaults::default(), &EmptySshConfig).unwrap();
        assert_eq!(specs.len(), 2);
    }
}
