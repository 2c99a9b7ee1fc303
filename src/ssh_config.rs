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

//! SSH configuration lookup boundary
//!
//! Parsing and merging of SSH config files is owned by an external
//! collaborator; this crate only consumes lookup results. A lookup takes a
//! host alias and returns the directives the resolver honors:
//! `HostName`, `User`, `Port`, `ForwardAgent`, `ConnectTimeout`,
//! `ProxyJump`, and `ProxyCommand`.

use std::collections::HashMap;

/// Directives returned by a host-alias lookup.
///
/// Only the directives the resolver consumes are carried; everything else
/// an implementation may know about a host is dropped at this boundary.
/// A directive that is not set for the alias stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDirectives {
    /// `HostName`: the real hostname behind an alias.
    pub hostname: Option<String>,
    /// `User`
    pub user: Option<String>,
    /// `Port`
    pub port: Option<u16>,
    /// `ForwardAgent` (`yes`/`no` already mapped to a boolean)
    pub forward_agent: Option<bool>,
    /// `ConnectTimeout`, in seconds
    pub connect_timeout: Option<u64>,
    /// `ProxyJump`: comma-separated `[user@]host[:port]` hops
    pub proxy_jump: Option<String>,
    /// `ProxyCommand`: a shell command bridging stdin/stdout
    pub proxy_command: Option<String>,
}

impl HostDirectives {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Lookup interface onto loaded SSH configuration data.
pub trait SshConfigLookup: Send + Sync {
    /// Return the directives applying to `alias`. Unknown aliases yield
    /// an empty [`HostDirectives`], never an error.
    fn lookup(&self, alias: &str) -> HostDirectives;
}

/// A lookup that knows nothing. Used when no SSH config is loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySshConfig;

impl SshConfigLookup for EmptySshConfig {
    fn lookup(&self, _alias: &str) -> HostDirectives {
        HostDirectives::default()
    }
}

/// A programmatic, exact-alias-match lookup table.
///
/// Embedders that parse SSH config themselves (or tests) register
/// per-alias directives here. No pattern matching is performed; the alias
/// must match exactly.
#[derive(Debug, Clone, Default)]
pub struct StaticSshConfig {
    hosts: HashMap<String, HostDirectives>,
}

impl StaticSshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register directives for `alias`, replacing any previous entry.
    pub fn host(mut self, alias: impl Into<String>, directives: HostDirectives) -> Self {
        self.hosts.insert(alias.into(), directives);
        self
    }

    pub fn insert(&mut self, alias: impl Into<String>, directives: HostDirectives) {
        self.hosts.insert(alias.into(), directives);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl SshConfigLookup for StaticSshConfig {
    fn lookup(&self, alias: &str) -> HostDirectives {
        match self.hosts.get(alias) {
            Some(directives) => {
                tracing::trace!("ssh config hit for '{alias}'");
                directives.clone()
            }
            None => HostDirectives::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lookup() {
        let config = EmptySshConfig;
        assert!(config.lookup("anything").is_empty());
    }

    #[test]
    fn test_static_lookup_exact_match() {
        let config = StaticSshConfig::new().host(
            "myalias",
            HostDirectives {
                hostname: Some("realhost".to_string()),
                port: Some(2202),
                ..Default::default()
            },
        );

        let hit = config.lookup("myalias");
        assert_eq!(hit.hostname.as_deref(), Some("realhost"));
        assert_eq!(hit.port, Some(2202));

        assert!(config.lookup("myalias2").is_empty());
        assert!(config.lookup("realhost").is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let mut config = StaticSshConfig::new();
        config.insert(
            "web",
            HostDirectives {
                user: Some("alice".to_string()),
                ..Default::default()
            },
        );
        config.insert(
            "web",
            HostDirectives {
                user: Some("bob".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(config.len(), 1);
        assert_eq!(config.lookup("web").user.as_deref(), Some("bob"));
    }
}
