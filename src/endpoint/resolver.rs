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

//! Endpoint resolution
//!
//! Merges four sources into one [`EndpointSpec`], in precedence order:
//! explicit overrides, host shorthand, SSH config directives, layered
//! defaults. Supplying the same field via both shorthand and override is
//! an error. Gateway chains (`ProxyJump a,b,c`) resolve recursively,
//! left to right: the first hop is dialed directly and the last hop is
//! the target's immediate gateway. Every recursion step checks a visited
//! set, so a chain that loops back fails fast instead of recursing.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Defaults, GatewayDefault};
use crate::error::ResolveError;
use crate::ssh_config::{HostDirectives, SshConfigLookup};

use super::shorthand::derive_shorthand;
use super::{EndpointSpec, Gateway, GatewayOverride};

/// Explicit per-call arguments. Everything left `None` falls through to
/// shorthand, SSH config, and defaults in that order.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub gateway: Option<GatewayOverride>,
    pub forward_agent: Option<bool>,
    pub connect_timeout: Option<Duration>,
    pub connect_options: HashMap<String, String>,
}

/// Resolve a host specification into a connection descriptor.
pub fn resolve(
    host_string: &str,
    overrides: Overrides,
    defaults: &Defaults,
    ssh_config: &dyn SshConfigLookup,
) -> Result<EndpointSpec, ResolveError> {
    let mut visited = Vec::new();
    resolve_with_visited(host_string, overrides, defaults, ssh_config, &mut visited)
}

fn resolve_with_visited(
    host_string: &str,
    overrides: Overrides,
    defaults: &Defaults,
    ssh_config: &dyn SshConfigLookup,
    visited: &mut Vec<String>,
) -> Result<EndpointSpec, ResolveError> {
    let shorthand = derive_shorthand(host_string)?;

    if visited.iter().any(|seen| *seen == shorthand.host) {
        return Err(ResolveError::GatewayCycle {
            host: visited.first().cloned().unwrap_or_else(|| shorthand.host.clone()),
            via: shorthand.host,
        });
    }
    visited.push(shorthand.host.clone());

    if shorthand.user.is_some() && overrides.user.is_some() {
        return Err(ResolveError::AmbiguousField { field: "user" });
    }
    if shorthand.port.is_some() && overrides.port.is_some() {
        return Err(ResolveError::AmbiguousField { field: "port" });
    }

    // The lookup is keyed on the alias as given; a HostName directive
    // rewrites the dialed host but the alias is retained.
    let directives = ssh_config.lookup(&shorthand.host);
    let host = directives
        .hostname
        .clone()
        .unwrap_or_else(|| shorthand.host.clone());

    let user = overrides
        .user
        .or(shorthand.user)
        .or_else(|| directives.user.clone())
        .unwrap_or_else(|| defaults.effective_user());

    let port = overrides
        .port
        .or(shorthand.port)
        .or(directives.port)
        .unwrap_or(defaults.port);
    if port == 0 {
        return Err(ResolveError::InvalidPort {
            input: host_string.to_string(),
            value: "0".to_string(),
        });
    }

    let forward_agent = match overrides.forward_agent {
        Some(explicit) => explicit,
        None => directives.forward_agent.unwrap_or(defaults.forward_agent),
    };

    let connect_timeout = overrides
        .connect_timeout
        .or_else(|| directives.connect_timeout.map(Duration::from_secs))
        .or_else(|| defaults.connect_timeout.map(Duration::from_secs));

    let gateway = match overrides.gateway {
        Some(GatewayOverride::Disable) => None,
        Some(GatewayOverride::Endpoint(spec)) => Some(Gateway::Endpoint(Box::new(spec))),
        Some(GatewayOverride::Command(command)) => Some(Gateway::Command(command)),
        None => derive_gateway(&shorthand.host, &directives, defaults, ssh_config, visited)?,
    };

    if let Some(gw) = &gateway {
        tracing::debug!("resolved '{}' with gateway {}", shorthand.host, gw);
    }

    Ok(EndpointSpec {
        original_host: host_string.to_string(),
        host,
        user,
        port,
        gateway,
        forward_agent,
        connect_timeout,
        connect_options: overrides.connect_options,
    })
}

/// Derive a gateway from SSH config directives or the configured default.
///
/// `ProxyJump` wins over `ProxyCommand`, matching OpenSSH. A default
/// gateway pointing at the host currently being resolved is skipped so a
/// bastion configured as the global default can itself be dialed.
fn derive_gateway(
    alias: &str,
    directives: &HostDirectives,
    defaults: &Defaults,
    ssh_config: &dyn SshConfigLookup,
    visited: &mut Vec<String>,
) -> Result<Option<Gateway>, ResolveError> {
    if let Some(jump) = &directives.proxy_jump {
        return resolve_jump_chain(jump, defaults, ssh_config, visited);
    }
    if let Some(command) = &directives.proxy_command {
        return Ok(Some(Gateway::Command(command.clone())));
    }

    match &defaults.gateway {
        Some(GatewayDefault::Jump(spec)) => {
            if derive_shorthand(spec)?.host == alias {
                return Ok(None);
            }
            resolve_jump_chain(spec, defaults, ssh_config, visited)
        }
        Some(GatewayDefault::Command { command }) => Ok(Some(Gateway::Command(command.clone()))),
        None => Ok(None),
    }
}

/// Resolve a comma-separated hop list into a nested gateway chain.
///
/// Hops apply left to right: each hop's gateway is the hop before it, so
/// the returned endpoint (the last hop) is the target's immediate
/// gateway and the first hop has no injected gateway of its own.
fn resolve_jump_chain(
    jump: &str,
    defaults: &Defaults,
    ssh_config: &dyn SshConfigLookup,
    visited: &mut Vec<String>,
) -> Result<Option<Gateway>, ResolveError> {
    let mut prev: Option<EndpointSpec> = None;
    for hop in jump.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        let hop_overrides = Overrides {
            gateway: prev.take().map(GatewayOverride::Endpoint),
            ..Default::default()
        };
        prev = Some(resolve_with_visited(
            hop,
            hop_overrides,
            defaults,
            ssh_config,
            visited,
        )?);
    }
    Ok(prev.map(|spec| Gateway::Endpoint(Box::new(spec))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_config::{EmptySshConfig, StaticSshConfig};

    fn plain(host: &str) -> Result<EndpointSpec, ResolveError> {
        resolve(host, Overrides::default(), &Defaults::default(), &EmptySshConfig)
    }

    #[test]
    fn test_full_shorthand_scenario() {
        let ep = plain("admin@db01:2222").unwrap();
        assert_eq!(ep.host, "db01");
        assert_eq!(ep.user, "admin");
        assert_eq!(ep.port, 2222);
        assert_eq!(ep.original_host, "admin@db01:2222");
        assert!(ep.gateway.is_none());
    }

    #[test]
    fn test_ambiguous_user() {
        let result = resolve(
            "admin@db01",
            Overrides {
                user: Some("root".to_string()),
                ..Default::default()
            },
            &Defaults::default(),
            &EmptySshConfig,
        );
        assert_eq!(result, Err(ResolveError::AmbiguousField { field: "user" }));
    }

    #[test]
    fn test_ambiguous_port() {
        let result = resolve(
            "db01:2222",
            Overrides {
                port: Some(22),
                ..Default::default()
            },
            &Defaults::default(),
            &EmptySshConfig,
        );
        assert_eq!(result, Err(ResolveError::AmbiguousField { field: "port" }));
    }

    #[test]
    fn test_hostname_directive_rewrites_host() {
        let config = StaticSshConfig::new().host(
            "myalias",
            HostDirectives {
                hostname: Some("realhost".to_string()),
                ..Default::default()
            },
        );
        let ep = resolve("myalias", Overrides::default(), &Defaults::default(), &config).unwrap();
        assert_eq!(ep.host, "realhost");
        assert_eq!(ep.original_host, "myalias");
    }

    #[test]
    fn test_user_precedence_order() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                user: Some("cfguser".to_string()),
                ..Default::default()
            },
        );
        let defaults = Defaults {
            user: Some("defuser".to_string()),
            ..Default::default()
        };

        // Explicit beats everything.
        let ep = resolve(
            "web",
            Overrides {
                user: Some("explicit".to_string()),
                ..Default::default()
            },
            &defaults,
            &config,
        )
        .unwrap();
        assert_eq!(ep.user, "explicit");

        // Shorthand beats ssh config.
        let ep = resolve("short@web", Overrides::default(), &defaults, &config).unwrap();
        assert_eq!(ep.user, "short");

        // SSH config beats the configured default.
        let ep = resolve("web", Overrides::default(), &defaults, &config).unwrap();
        assert_eq!(ep.user, "cfguser");

        // Nothing else set: configured default applies.
        let ep = resolve("other", Overrides::default(), &defaults, &config).unwrap();
        assert_eq!(ep.user, "defuser");
    }

    #[test]
    fn test_port_from_directive_then_default() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                port: Some(2202),
                ..Default::default()
            },
        );
        let ep = resolve("web", Overrides::default(), &Defaults::default(), &config).unwrap();
        assert_eq!(ep.port, 2202);

        let ep = plain("bare").unwrap();
        assert_eq!(ep.port, 22);
    }

    #[test]
    fn test_forward_agent_directive_overrides_default_not_explicit() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                forward_agent: Some(true),
                ..Default::default()
            },
        );

        let ep = resolve("web", Overrides::default(), &Defaults::default(), &config).unwrap();
        assert!(ep.forward_agent);

        let ep = resolve(
            "web",
            Overrides {
                forward_agent: Some(false),
                ..Default::default()
            },
            &Defaults::default(),
            &config,
        )
        .unwrap();
        assert!(!ep.forward_agent);
    }

    #[test]
    fn test_connect_timeout_sources() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                connect_timeout: Some(7),
                ..Default::default()
            },
        );
        let defaults = Defaults {
            connect_timeout: Some(30),
            ..Default::default()
        };

        let ep = resolve("web", Overrides::default(), &defaults, &config).unwrap();
        assert_eq!(ep.connect_timeout, Some(Duration::from_secs(7)));

        let ep = resolve("other", Overrides::default(), &defaults, &config).unwrap();
        assert_eq!(ep.connect_timeout, Some(Duration::from_secs(30)));

        let ep = resolve(
            "web",
            Overrides {
                connect_timeout: Some(Duration::from_secs(3)),
                ..Default::default()
            },
            &defaults,
            &config,
        )
        .unwrap();
        assert_eq!(ep.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_proxy_jump_single_hop() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                proxy_jump: Some("ops@bastion:2200".to_string()),
                ..Default::default()
            },
        );
        let ep = resolve("web", Overrides::default(), &Defaults::default(), &config).unwrap();
        match ep.gateway {
            Some(Gateway::Endpoint(gw)) => {
                assert_eq!(gw.host, "bastion");
                assert_eq!(gw.user, "ops");
                assert_eq!(gw.port, 2200);
                assert!(gw.gateway.is_none());
            }
            other => panic!("expected endpoint gateway, got {other:?}"),
        }
    }

    #[test]
    fn test_proxy_jump_multi_hop_order() {
        // -J first,second: first is dialed directly, second rides through
        // it, and second is the target's immediate gateway.
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                proxy_jump: Some("first,second".to_string()),
                ..Default::default()
            },
        );
        let ep = resolve("web", Overrides::default(), &Defaults::default(), &config).unwrap();
        let second = match ep.gateway {
            Some(Gateway::Endpoint(gw)) => gw,
            other => panic!("expected endpoint gateway, got {other:?}"),
        };
        assert_eq!(second.host, "second");
        let first = match second.gateway {
            Some(Gateway::Endpoint(gw)) => gw,
            other => panic!("expected nested gateway, got {other:?}"),
        };
        assert_eq!(first.host, "first");
        assert!(first.gateway.is_none());
    }

    #[test]
    fn test_proxy_command_directive() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                proxy_command: Some("ssh -W %h:%p relay".to_string()),
                ..Default::default()
            },
        );
        let ep = resolve("web", Overrides::default(), &Defaults::default(), &config).unwrap();
        assert_eq!(
            ep.gateway,
            Some(Gateway::Command("ssh -W %h:%p relay".to_string()))
        );
    }

    #[test]
    fn test_disable_sentinel_wins() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                proxy_jump: Some("bastion".to_string()),
                ..Default::default()
            },
        );
        let ep = resolve(
            "web",
            Overrides {
                gateway: Some(GatewayOverride::Disable),
                ..Default::default()
            },
            &Defaults::default(),
            &config,
        )
        .unwrap();
        assert!(ep.gateway.is_none());
    }

    #[test]
    fn test_default_gateway_applies_and_skips_itself() {
        let defaults = Defaults {
            gateway: Some(GatewayDefault::Jump("bastion".to_string())),
            ..Default::default()
        };

        let ep = resolve("web", Overrides::default(), &defaults, &EmptySshConfig).unwrap();
        match &ep.gateway {
            Some(Gateway::Endpoint(gw)) => assert_eq!(gw.host, "bastion"),
            other => panic!("expected endpoint gateway, got {other:?}"),
        }

        // Dialing the bastion itself must not loop through itself.
        let ep = resolve("bastion", Overrides::default(), &defaults, &EmptySshConfig).unwrap();
        assert!(ep.gateway.is_none());
    }

    #[test]
    fn test_gateway_cycle_detected() {
        // web jumps via bastion, bastion jumps via web.
        let config = StaticSshConfig::new()
            .host(
                "web",
                HostDirectives {
                    proxy_jump: Some("bastion".to_string()),
                    ..Default::default()
                },
            )
            .host(
                "bastion",
                HostDirectives {
                    proxy_jump: Some("web".to_string()),
                    ..Default::default()
                },
            );
        let result = resolve("web", Overrides::default(), &Defaults::default(), &config);
        assert_eq!(
            result,
            Err(ResolveError::GatewayCycle {
                host: "web".to_string(),
                via: "web".to_string(),
            })
        );
    }

    #[test]
    fn test_self_referential_jump_is_a_cycle() {
        let config = StaticSshConfig::new().host(
            "web",
            HostDirectives {
                proxy_jump: Some("web".to_string()),
                ..Default::default()
            },
        );
        let result = resolve("web", Overrides::default(), &Defaults::default(), &config);
        assert!(matches!(result, Err(ResolveError::GatewayCycle { .. })));
    }

    #[test]
    fn test_connect_options_pass_through() {
        let mut options = HashMap::new();
        options.insert("keepalive".to_string(), "30".to_string());
        let ep = resolve(
            "web",
            Overrides {
                connect_options: options.clone(),
                ..Default::default()
            },
            &Defaults::default(),
            &EmptySshConfig,
        )
        .unwrap();
        assert_eq!(ep.connect_options, options);
    }
}
