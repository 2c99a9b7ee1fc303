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

//! Host shorthand parsing
//!
//! Splits a host specification of the form `[user@]host[:port]` into its
//! components. IPv6 literals are incompatible with the `:port` shorthand:
//! more than one `:` in the host part disables port extraction entirely,
//! so `user@::1` parses as user `user`, host `::1`, no port.

use crate::error::ResolveError;

/// Components extracted from a `[user@]host[:port]` specification.
///
/// Absent components stay `None`; empty components (`@host`, `host:`) are
/// treated as absent rather than as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shorthand {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

/// Parse a host specification into [`Shorthand`] components.
///
/// The user part is split on the *last* `@`, so usernames containing `@`
/// survive. The port is split on the last `:` only when the remainder
/// contains a single `:`.
pub fn derive_shorthand(host_string: &str) -> Result<Shorthand, ResolveError> {
    let (user, hostport) = match host_string.rfind('@') {
        Some(pos) => {
            let user = &host_string[..pos];
            let rest = &host_string[pos + 1..];
            let user = (!user.is_empty()).then(|| user.to_string());
            (user, rest)
        }
        None => (None, host_string),
    };

    // >1 colon means an IPv6 literal; no shorthand port can be derived.
    let (host, port) = if hostport.matches(':').count() > 1 {
        (hostport, None)
    } else if let Some(pos) = hostport.rfind(':') {
        let host = &hostport[..pos];
        let port_str = &hostport[pos + 1..];
        if port_str.is_empty() {
            (host, None)
        } else {
            let port = port_str
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ResolveError::InvalidPort {
                    input: host_string.to_string(),
                    value: port_str.to_string(),
                })?;
            (host, Some(port))
        }
    } else {
        (hostport, None)
    };

    if host.is_empty() {
        return Err(ResolveError::EmptyHost {
            input: host_string.to_string(),
        });
    }

    Ok(Shorthand {
        user,
        host: host.to_string(),
        port,
    })
}
